// Debug library
// Implements: debug, gethook, getinfo, getlocal, getmetatable, getregistry,
// getupvalue, getuservalue, sethook, setlocal, setmetatable, setupvalue,
// setuservalue, traceback, upvalueid, upvaluejoin

use std::io::{BufRead, Write};
use std::rc::Rc;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, LuaValueKind, ThreadRef};
use crate::lua_vm::hook_mask::{MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};
use crate::lua_vm::lua_limits::LUA_REGISTRYINDEX;
use crate::lua_vm::{LuaDebug, LuaHook, LuaResult, LuaState, ThreadStatus};

/// Registry key of the table mapping threads to their Lua hook functions
const HOOKKEY: &str = "_HKEY";

pub fn create_debug_lib() -> LibraryModule {
    crate::lib_module!("debug", {
        "debug" => db_debug,
        "gethook" => db_gethook,
        "getinfo" => db_getinfo,
        "getlocal" => db_getlocal,
        "getmetatable" => db_getmetatable,
        "getregistry" => db_getregistry,
        "getupvalue" => db_getupvalue,
        "getuservalue" => db_getuservalue,
        "sethook" => db_sethook,
        "setlocal" => db_setlocal,
        "setmetatable" => db_setmetatable,
        "setupvalue" => db_setupvalue,
        "setuservalue" => db_setuservalue,
        "traceback" => db_traceback,
        "upvalueid" => db_upvalueid,
        "upvaluejoin" => db_upvaluejoin,
    })
}

/// Optional thread argument: the thread to inspect (None for the running
/// one) and the offset of the remaining arguments
fn get_thread(l: &LuaState) -> (Option<ThreadRef>, usize) {
    match l.value_at(1) {
        LuaValue::Thread(t) => {
            let running = Rc::as_ptr(&t) as *const u8 == l.self_ref.as_ptr() as *const u8;
            (if running { None } else { Some(t) }, 1)
        }
        _ => (None, 0),
    }
}

/// Run `f` on the inspected thread
fn on_thread<R>(l: &mut LuaState, co: Option<&ThreadRef>, f: impl FnOnce(&mut LuaState) -> R) -> LuaResult<R> {
    match co {
        None => Ok(f(l)),
        Some(t) => match t.try_borrow_mut() {
            Ok(mut state) => Ok(f(&mut state)),
            Err(_) => Err(l.error("cannot inspect a running coroutine")),
        },
    }
}

fn db_getregistry(l: &mut LuaState) -> LuaResult<usize> {
    l.push_index(LUA_REGISTRYINDEX)?;
    Ok(1)
}

fn db_getmetatable(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(1)?;
    if !l.get_metatable(1)? {
        l.push_nil()?;
    }
    Ok(1)
}

fn db_setmetatable(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.type_at(2);
    l.arg_check(t == LuaValueKind::Nil || t == LuaValueKind::Table, 2, "nil or table expected")?;
    l.set_top(2);
    l.set_metatable(1)?;
    Ok(1)
}

fn db_getuservalue(l: &mut LuaState) -> LuaResult<usize> {
    if l.type_at(1) != LuaValueKind::Userdata {
        l.push_nil()?;
    } else {
        l.get_uservalue(1)?;
    }
    Ok(1)
}

fn db_setuservalue(l: &mut LuaState) -> LuaResult<usize> {
    if l.type_at(1) == LuaValueKind::LightUserdata {
        return Err(l.arg_error(1, "full userdata expected, got light userdata"));
    }
    l.check_type(1, LuaValueKind::Userdata)?;
    if !l.is_none_or_nil(2) {
        l.check_type(2, LuaValueKind::Table)?;
    }
    l.set_top(2);
    l.set_uservalue(1);
    Ok(1)
}

fn set_field(l: &mut LuaState, key: &str, value: LuaValue) -> LuaResult<()> {
    l.push_value(value)?;
    l.set_field(-2, key)
}

fn db_getinfo(l: &mut LuaState) -> LuaResult<usize> {
    let (co, arg) = get_thread(l);
    let options = l.opt_lstring(arg + 2, "flnStu")?.to_str_lossy().into_owned();
    let target = l.value_at((arg + 1) as i32);
    let by_function = target.is_function();
    if !by_function && l.to_number((arg + 1) as i32).is_none() {
        return Err(l.arg_error(arg + 1, "function or level expected"));
    }
    let level = if by_function { 0 } else { l.check_integer(arg + 1)? };

    // (record, activelines, func) or None for a level out of range
    let info = on_thread(l, co.as_ref(), |l1| {
        let (mut ar, what) = if by_function {
            let _ = l1.push_value(target.clone());
            (LuaDebug::default(), format!(">{}", options))
        } else {
            match usize::try_from(level).ok().and_then(|lv| l1.get_stack(lv)) {
                Some(ar) => (ar, options.clone()),
                None => return Ok(None),
            }
        };
        let base = l1.get_top();
        if !l1.get_info(&what, &mut ar) {
            return Err(());
        }
        let lines = if options.contains('L') { Some(l1.value_at(-1)) } else { None };
        let func = if options.contains('f') {
            let offset = if lines.is_some() { -2 } else { -1 };
            Some(l1.value_at(offset))
        } else {
            None
        };
        l1.set_top(base as i32 - if by_function { 1 } else { 0 });
        Ok(Some((ar, lines, func)))
    })?;
    let (ar, lines, func) = match info {
        Ok(Some(info)) => info,
        Ok(None) => {
            l.push_nil()?;
            return Ok(1);
        }
        Err(()) => return Err(l.arg_error(arg + 2, "invalid option")),
    };

    l.create_table(0, 2)?;
    if options.contains('S') {
        set_field(l, "source", LuaValue::from(ar.source.as_str()))?;
        set_field(l, "short_src", LuaValue::from(ar.short_src.as_str()))?;
        set_field(l, "linedefined", LuaValue::integer(ar.line_defined as i64))?;
        set_field(l, "lastlinedefined", LuaValue::integer(ar.last_line_defined as i64))?;
        set_field(l, "what", LuaValue::from(ar.what))?;
    }
    if options.contains('l') {
        set_field(l, "currentline", LuaValue::integer(ar.current_line as i64))?;
    }
    if options.contains('u') {
        set_field(l, "nups", LuaValue::integer(ar.nups as i64))?;
        set_field(l, "nparams", LuaValue::integer(ar.nparams as i64))?;
        set_field(l, "isvararg", LuaValue::Boolean(ar.is_vararg))?;
    }
    if options.contains('n') {
        let name = ar.name.map(LuaValue::from).unwrap_or_default();
        set_field(l, "name", name)?;
        set_field(l, "namewhat", LuaValue::from(ar.namewhat))?;
    }
    if options.contains('t') {
        set_field(l, "istailcall", LuaValue::Boolean(ar.is_tail_call))?;
    }
    if let Some(lines) = lines {
        set_field(l, "activelines", lines)?;
    }
    if let Some(func) = func {
        set_field(l, "func", func)?;
    }
    Ok(1)
}

fn db_getlocal(l: &mut LuaState) -> LuaResult<usize> {
    let (co, arg) = get_thread(l);
    let nvar = l.check_integer(arg + 2)? as i32;
    if l.value_at((arg + 1) as i32).is_function() {
        // parameter names of a function that is not active
        l.push_index((arg + 1) as i32)?;
        let name = l.get_local(None, nvar);
        l.pop(1);
        match name {
            Some(name) => l.push_string(name)?,
            None => l.push_nil()?,
        }
        return Ok(1);
    }
    let level = l.check_integer(arg + 1)?;
    let found = on_thread(l, co.as_ref(), |l1| {
        let ar = usize::try_from(level).ok().and_then(|lv| l1.get_stack(lv))?;
        let name = l1.get_local(Some(&ar), nvar);
        Some(name.map(|name| {
            let value = l1.value_at(-1);
            l1.pop(1);
            (name, value)
        }))
    })?;
    match found {
        None => Err(l.arg_error(arg + 1, "level out of range")),
        Some(Some((name, value))) => {
            l.push_string(name)?;
            l.push_value(value)?;
            Ok(2)
        }
        Some(None) => {
            l.push_nil()?;
            Ok(1)
        }
    }
}

fn db_setlocal(l: &mut LuaState) -> LuaResult<usize> {
    let (co, arg) = get_thread(l);
    let level = l.check_integer(arg + 1)?;
    let nvar = l.check_integer(arg + 2)? as i32;
    let value = l.check_any(arg + 3)?;
    let found = on_thread(l, co.as_ref(), |l1| {
        let ar = usize::try_from(level).ok().and_then(|lv| l1.get_stack(lv))?;
        let _ = l1.push_value(value);
        Some(l1.set_local(&ar, nvar))
    })?;
    match found {
        None => Err(l.arg_error(arg + 1, "level out of range")),
        Some(name) => {
            match name {
                Some(name) => l.push_string(name)?,
                None => l.push_nil()?,
            }
            Ok(1)
        }
    }
}

fn aux_upvalue(l: &mut LuaState, get: bool) -> LuaResult<usize> {
    let n = l.check_integer(2)?;
    l.check_type(1, LuaValueKind::Function)?;
    let n = usize::try_from(n).unwrap_or(0);
    let name = if get { l.get_upvalue(1, n) } else { l.set_upvalue(1, n) };
    let Some(name) = name else {
        return Ok(0);
    };
    l.push_string(name)?;
    if get {
        l.insert(-2);
        Ok(2)
    } else {
        Ok(1)
    }
}

fn db_getupvalue(l: &mut LuaState) -> LuaResult<usize> {
    aux_upvalue(l, true)
}

fn db_setupvalue(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(3)?;
    l.set_top(3);
    aux_upvalue(l, false)
}

/// Upvalue index argument `argnup` of the function at `argf`
fn check_upval(l: &mut LuaState, argf: usize, argnup: usize) -> LuaResult<usize> {
    let nup = l.check_integer(argnup)?;
    l.check_type(argf, LuaValueKind::Function)?;
    let nup = usize::try_from(nup).unwrap_or(0);
    let valid = l.upvalue_id(argf as i32, nup).is_some();
    l.arg_check(valid, argnup, "invalid upvalue index")?;
    Ok(nup)
}

fn db_upvalueid(l: &mut LuaState) -> LuaResult<usize> {
    let n = check_upval(l, 1, 2)?;
    let id = l.upvalue_id(1, n).unwrap_or(0);
    l.push_light_userdata(id)?;
    Ok(1)
}

fn db_upvaluejoin(l: &mut LuaState) -> LuaResult<usize> {
    let n1 = check_upval(l, 1, 2)?;
    let n2 = check_upval(l, 3, 4)?;
    let c1 = l.is_cfunction(1);
    l.arg_check(!c1, 1, "Lua function expected")?;
    let c3 = l.is_cfunction(3);
    l.arg_check(!c3, 3, "Lua function expected")?;
    l.upvalue_join(1, n1, 3, n2);
    Ok(0)
}

// ===== Hooks =====

/// `registry._HKEY`, created on first use
fn hook_table(l: &mut LuaState) -> LuaValue {
    let registry = l.global().registry();
    let existing = registry.borrow().get_str(HOOKKEY);
    if existing.is_table() {
        return existing;
    }
    let t = LuaValue::table(crate::lua_value::LuaTable::new(0, 1));
    registry.borrow_mut().set_str(HOOKKEY, t.clone());
    t
}

/// Hook installed for every thread with a Lua hook function: calls
/// `_HKEY[thread]` with the event name and the current line
fn hookf(l: &mut LuaState, ar: &LuaDebug) -> LuaResult<()> {
    let hooks = hook_table(l);
    let thread = l.thread_value();
    let func = match hooks.as_table() {
        Some(t) => t.borrow().get(&thread),
        None => LuaValue::Nil,
    };
    if !func.is_function() {
        return Ok(());
    }
    l.push_value(func)?;
    l.push_string(ar.event.name())?;
    if ar.current_line >= 0 {
        l.push_integer(ar.current_line as i64)?;
    } else {
        l.push_nil()?;
    }
    l.call(2, 0)
}

fn make_mask(smask: &[u8], count: i64) -> u8 {
    let mut mask = 0;
    if smask.contains(&b'c') {
        mask |= MASK_CALL;
    }
    if smask.contains(&b'r') {
        mask |= MASK_RET;
    }
    if smask.contains(&b'l') {
        mask |= MASK_LINE;
    }
    if count > 0 {
        mask |= MASK_COUNT;
    }
    mask
}

fn unmake_mask(mask: u8) -> String {
    let mut smask = String::new();
    if mask & MASK_CALL != 0 {
        smask.push('c');
    }
    if mask & MASK_RET != 0 {
        smask.push('r');
    }
    if mask & MASK_LINE != 0 {
        smask.push('l');
    }
    smask
}

fn db_sethook(l: &mut LuaState) -> LuaResult<usize> {
    let (co, arg) = get_thread(l);
    let (func, hook, mask, count) = if l.is_none_or_nil((arg + 1) as i32) {
        // turn off hooks
        (LuaValue::Nil, None, 0, 0)
    } else {
        let smask = l.check_lstring(arg + 2)?;
        let func = l.check_type(arg + 1, LuaValueKind::Function)?;
        let count = l.opt_integer(arg + 3, 0)?;
        (func, Some(hookf as LuaHook), make_mask(smask.as_bytes(), count), count as i32)
    };
    let thread = match &co {
        Some(t) => LuaValue::Thread(t.clone()),
        None => l.thread_value(),
    };
    if let Some(t) = hook_table(l).as_table() {
        if t.borrow_mut().set(thread, func).is_err() {
            return Err(l.error("cannot register hook"));
        }
    }
    on_thread(l, co.as_ref(), |l1| l1.set_hook(hook, mask, count))?;
    Ok(0)
}

fn db_gethook(l: &mut LuaState) -> LuaResult<usize> {
    let (co, _) = get_thread(l);
    let (hook, mask, count) = on_thread(l, co.as_ref(), |l1| (l1.get_hook(), l1.get_hook_mask(), l1.get_hook_count()))?;
    let Some(hook) = hook else {
        l.push_nil()?;
        return Ok(1);
    };
    if !std::ptr::fn_addr_eq(hook, hookf as LuaHook) {
        l.push_string("external hook")?;
    } else {
        let thread = match &co {
            Some(t) => LuaValue::Thread(t.clone()),
            None => l.thread_value(),
        };
        let func = match hook_table(l).as_table() {
            Some(t) => t.borrow().get(&thread),
            None => LuaValue::Nil,
        };
        l.push_value(func)?;
    }
    l.push_string(unmake_mask(mask))?;
    l.push_integer(count as i64)?;
    Ok(3)
}

/// Read commands from standard input and run them until "cont"
fn db_debug(l: &mut LuaState) -> LuaResult<usize> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock();
    loop {
        eprint!("lua_debug> ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match lines.read_line(&mut line) {
            Ok(0) | Err(_) => return Ok(0),
            Ok(_) => {}
        }
        if line.trim_end_matches(['\n', '\r']) == "cont" {
            return Ok(0);
        }
        let failed = match l.load(line.as_bytes(), "=(debug command)", None) {
            Ok(()) => !matches!(l.pcall(0, 0, 0)?, ThreadStatus::Ok),
            Err(_) => true,
        };
        if failed {
            let msg = l.value_at(-1).to_plain_string();
            eprintln!("{}", msg);
        }
        l.set_top(0);
    }
}

fn db_traceback(l: &mut LuaState) -> LuaResult<usize> {
    let (co, arg) = get_thread(l);
    let msg = l.value_at((arg + 1) as i32);
    if !msg.is_nil() && !msg.is_string() && msg.as_number().is_none() {
        // non-string messages are returned untouched
        l.push_value(msg)?;
        return Ok(1);
    }
    let default_level = if co.is_none() { 1 } else { 0 };
    let level = l.opt_integer(arg + 2, default_level)?;
    let text = msg.to_lua_string().map(|s| s.to_str_lossy().into_owned());
    let level = usize::try_from(level).unwrap_or(0);
    let tb = on_thread(l, co.as_ref(), |l1| l1.traceback(text.as_deref(), level))?;
    l.push_string(tb)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_masks() {
        let mask = make_mask(b"crl", 0);
        assert_eq!(mask, MASK_CALL | MASK_RET | MASK_LINE);
        assert_eq!(unmake_mask(mask), "crl");
        assert_eq!(make_mask(b"", 10), MASK_COUNT);
        assert_eq!(unmake_mask(MASK_COUNT), "");
    }

    #[test]
    fn test_getinfo_and_locals() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local function f(a, b)
                local info = debug.getinfo(1, "nSlu")
                assert(info.what == "Lua" and info.nparams == 2 and info.currentline == 3)
                assert(info.name == "f")
                local name, value = debug.getlocal(1, 2)
                assert(name == "b" and value == 20)
                assert(debug.setlocal(1, 1, 99) == "a")
                assert(a == 99)
                return true
            end
            assert(f(10, 20))
            local info = debug.getinfo(print)
            assert(info.what == "C" and info.short_src == "[C]" and info.func == print)
            assert(debug.getinfo(100) == nil)
            assert(debug.getlocal(f, 1) == "a")
            local ok, msg = pcall(debug.getinfo, 1, "!")
            assert(not ok and msg:find("invalid option", 1, true))
            ok, msg = pcall(debug.getlocal, 100, 1)
            assert(not ok and msg:find("level out of range", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_upvalues() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local x, y = 1, 2
            local function fx() return x end
            local function fy() return y end
            assert(debug.getupvalue(fx, 1) == "x")
            assert(debug.setupvalue(fx, 1, 10) == "x")
            assert(fx() == 10 and x == 10)
            assert(debug.getupvalue(fx, 2) == nil)
            assert(debug.upvalueid(fx, 1) ~= debug.upvalueid(fy, 1))
            debug.upvaluejoin(fx, 1, fy, 1)
            assert(fx() == 2)
            assert(debug.upvalueid(fx, 1) == debug.upvalueid(fy, 1))
            local ok, msg = pcall(debug.upvalueid, fx, 5)
            assert(not ok and msg:find("invalid upvalue index", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_hooks_and_traceback() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local lines = 0
            local function hook(event, line)
                assert(event == "line" and type(line) == "number")
                lines = lines + 1
            end
            debug.sethook(hook, "l")
            local a = 1
            a = a + 1
            debug.sethook()
            assert(lines >= 2)
            assert(debug.gethook() == nil)

            local function nop() end
            debug.sethook(nop, "cr", 0)
            local h, mask, count = debug.gethook()
            debug.sethook()
            assert(h == nop and mask == "cr" and count == 0)

            local tb = debug.traceback("msg")
            assert(tb:find("^msg\nstack traceback:"))
            assert(debug.traceback(42):find("^42\nstack traceback:"))
            local t = {}
            assert(debug.traceback(t) == t)
            local co = coroutine.create(function() coroutine.yield() end)
            coroutine.resume(co)
            assert(debug.traceback(co):find("stack traceback:", 1, true))
            assert(type(debug.getregistry()) == "table")
            assert(debug.getmetatable("").__index == string)
            "#,
        );
        assert!(result.is_ok());
    }
}
