// Basic library (_G global functions)
// Implements: assert, collectgarbage, dofile, error, getmetatable, ipairs,
// load, loadfile, next, pairs, pcall, print, rawequal, rawget, rawlen,
// rawset, select, setmetatable, tonumber, tostring, type, xpcall

use std::io::Write;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{CFunction, LuaValue, LuaValueKind};
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{LuaError, LuaResult, LuaState, ThreadStatus};

pub fn create_basic_lib() -> LibraryModule {
    crate::lib_module!("_G", {
        "assert" => lua_assert,
        "collectgarbage" => lua_collectgarbage,
        "dofile" => lua_dofile,
        "error" => lua_error,
        "getmetatable" => lua_getmetatable,
        "ipairs" => lua_ipairs,
        "loadfile" => lua_loadfile,
        "load" => lua_load,
        "loadstring" => lua_load,
        "next" => lua_next,
        "pairs" => lua_pairs,
        "pcall" => lua_pcall,
        "print" => lua_print,
        "rawequal" => lua_rawequal,
        "rawlen" => lua_rawlen,
        "rawget" => lua_rawget,
        "rawset" => lua_rawset,
        "select" => lua_select,
        "setmetatable" => lua_setmetatable,
        "tonumber" => lua_tonumber,
        "tostring" => lua_tostring,
        "type" => lua_type,
        "xpcall" => lua_xpcall,
    })
    .with_value("_G", |l| l.global().globals())
    .with_value("_VERSION", |_| LuaValue::from("Lua 5.2"))
}

/// print(...) - write the `tostring` of each argument to stdout
fn lua_print(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    l.get_global("tostring")?;
    let mut out = Vec::new();
    for i in 1..=n {
        l.push_index(-1)?;
        l.push_index(i as i32)?;
        l.call(1, 1)?;
        let Some(s) = l.to_lstring(-1) else {
            return Err(l.error("'tostring' must return a string to 'print'"));
        };
        if i > 1 {
            out.push(b'\t');
        }
        out.extend_from_slice(s.as_bytes());
        l.pop(1);
    }
    out.push(b'\n');
    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    // a closed stdout is not an error for print
    let _ = lock.write_all(&out);
    let _ = lock.flush();
    Ok(0)
}

/// Digits of `s` in `base`, with optional sign and surrounding spaces
fn parse_with_base(s: &[u8], base: u32) -> Option<f64> {
    let s = s.trim_ascii();
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n = 0.0;
    for &c in digits {
        let d = (c as char).to_digit(36)?;
        if d >= base {
            return None;
        }
        n = n * base as f64 + d as f64;
    }
    Some(if neg { -n } else { n })
}

/// tonumber(e [, base])
fn lua_tonumber(l: &mut LuaState) -> LuaResult<usize> {
    if l.is_none_or_nil(2) {
        let v = l.check_any(1)?;
        match v.to_number() {
            Some(n) => l.push_number(n)?,
            None => l.push_nil()?,
        }
        return Ok(1);
    }
    let base = l.check_integer(2)?;
    let v = l.check_type(1, LuaValueKind::String)?;
    l.arg_check((2..=36).contains(&base), 2, "base out of range")?;
    let s = v.as_string().map(|s| s.as_bytes().to_vec()).unwrap_or_default();
    match parse_with_base(&s, base as u32) {
        Some(n) => l.push_number(n)?,
        None => l.push_nil()?,
    }
    Ok(1)
}

/// error(message [, level])
fn lua_error(l: &mut LuaState) -> LuaResult<usize> {
    let level = l.opt_integer(2, 1)?;
    l.set_top(1);
    if l.value_at(1).is_string() && level > 0 {
        // add position information
        let position = l.where_(level as usize);
        l.push_string(position)?;
        l.insert(1);
        l.concat(2)?;
    }
    Err(l.throw_top())
}

fn lua_getmetatable(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(1)?;
    if !l.get_metatable(1)? {
        l.push_nil()?;
        return Ok(1);
    }
    let obj = l.value_at(1);
    let protected = l.get_metafield(&obj, "__metatable");
    if !protected.is_nil() {
        l.push_value(protected)?;
    }
    Ok(1)
}

fn lua_setmetatable(l: &mut LuaState) -> LuaResult<usize> {
    l.check_table(1)?;
    let t = l.type_at(2);
    l.arg_check(
        t == LuaValueKind::Nil || t == LuaValueKind::Table,
        2,
        "nil or table expected",
    )?;
    let obj = l.value_at(1);
    if !l.get_metafield(&obj, "__metatable").is_nil() {
        return Err(l.error("cannot change a protected metatable"));
    }
    l.set_top(2);
    l.set_metatable(1)?;
    Ok(1)
}

fn lua_rawequal(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(1)?;
    l.check_any(2)?;
    let eq = l.raw_equal(1, 2);
    l.push_boolean(eq)?;
    Ok(1)
}

fn lua_rawlen(l: &mut LuaState) -> LuaResult<usize> {
    let t = l.type_at(1);
    l.arg_check(
        t == LuaValueKind::Table || t == LuaValueKind::String,
        1,
        "table or string expected",
    )?;
    let n = l.raw_len(1);
    l.push_integer(n as i64)?;
    Ok(1)
}

fn lua_rawget(l: &mut LuaState) -> LuaResult<usize> {
    l.check_table(1)?;
    l.check_any(2)?;
    l.set_top(2);
    l.raw_get(1)?;
    Ok(1)
}

fn lua_rawset(l: &mut LuaState) -> LuaResult<usize> {
    l.check_table(1)?;
    l.check_any(2)?;
    l.check_any(3)?;
    l.set_top(3);
    l.raw_set(1)?;
    Ok(1)
}

/// collectgarbage([opt [, arg]]). Memory is reference counted, so the
/// collector options are accepted and report an idle collector.
fn lua_collectgarbage(l: &mut LuaState) -> LuaResult<usize> {
    const OPTS: [&str; 11] = [
        "stop",
        "restart",
        "collect",
        "count",
        "step",
        "setpause",
        "setstepmul",
        "setmajorinc",
        "isrunning",
        "generational",
        "incremental",
    ];
    let o = l.check_option(1, Some("collect"), &OPTS)?;
    let ex = l.opt_integer(2, 0)? as i32;
    let res = l.gc(OPTS[o], ex);
    match OPTS[o] {
        "count" => {
            l.push_number(res as f64)?;
            l.push_integer(0)?;
            Ok(2)
        }
        "step" | "isrunning" => {
            l.push_boolean(OPTS[o] == "isrunning" || res != 0)?;
            Ok(1)
        }
        _ => {
            l.push_integer(res as i64)?;
            Ok(1)
        }
    }
}

fn lua_type(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.check_any(1)?;
    l.push_string(v.type_name())?;
    Ok(1)
}

/// Push `__pairs`/`__ipairs` results, or `iter, t, init`
fn pairs_meta(l: &mut LuaState, method: &str, is_zero: bool, iter: CFunction) -> LuaResult<usize> {
    let obj = l.check_any(1)?;
    let mm = l.get_metafield(&obj, method);
    if mm.is_nil() {
        l.check_table(1)?;
        l.push_cfunction(iter)?;
        l.push_value(obj)?;
        if is_zero {
            l.push_integer(0)?;
        } else {
            l.push_nil()?;
        }
    } else {
        l.push_value(mm)?;
        l.push_value(obj)?;
        l.call(1, 3)?;
    }
    Ok(3)
}

fn lua_next(l: &mut LuaState) -> LuaResult<usize> {
    l.check_table(1)?;
    // create a second argument if there isn't one
    l.set_top(2);
    if l.next(1)? {
        Ok(2)
    } else {
        l.push_nil()?;
        Ok(1)
    }
}

fn lua_pairs(l: &mut LuaState) -> LuaResult<usize> {
    pairs_meta(l, "__pairs", false, lua_next)
}

fn ipairs_aux(l: &mut LuaState) -> LuaResult<usize> {
    let i = l.check_integer(2)? + 1;
    l.push_integer(i)?;
    l.raw_get_int(1, i)?;
    if l.value_at(-1).is_nil() { Ok(1) } else { Ok(2) }
}

fn lua_ipairs(l: &mut LuaState) -> LuaResult<usize> {
    pairs_meta(l, "__ipairs", true, ipairs_aux)
}

/// Optional environment for a loaded chunk: becomes its first upvalue
fn set_env(l: &mut LuaState, envidx: Option<i32>) -> LuaResult<()> {
    if let Some(envidx) = envidx {
        l.push_index(envidx)?;
        if l.set_upvalue(-2, 1).is_none() {
            // no upvalue to receive it
            l.pop(1);
        }
    }
    Ok(())
}

/// Results of a load: the function, or nil plus the message
fn load_aux(l: &mut LuaState, result: LuaResult<()>, envidx: Option<i32>) -> LuaResult<usize> {
    match result {
        Ok(()) => {
            set_env(l, envidx)?;
            Ok(1)
        }
        Err(LuaError::SyntaxError) | Err(LuaError::FileError) | Err(LuaError::MemoryError) => {
            l.push_nil()?;
            l.insert(-2);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

fn lua_loadfile(l: &mut LuaState) -> LuaResult<usize> {
    let fname = if l.is_none_or_nil(1) { None } else { Some(l.check_lstring(1)?) };
    let mode = if l.is_none_or_nil(2) { None } else { Some(l.check_lstring(2)?) };
    let env = if l.is_none(3) { None } else { Some(3) };
    let fname = fname.map(|s| s.to_string());
    let mode = mode.map(|s| s.to_string());
    let status = l.load_file(fname.as_deref(), mode.as_deref());
    load_aux(l, status, env)
}

/// Collect the pieces returned by a reader function
fn read_pieces(l: &mut LuaState) -> LuaResult<Result<Vec<u8>, String>> {
    let mut chunk = Vec::new();
    loop {
        l.check_stack_msg(2, "too many nested functions")?;
        l.push_index(1)?;
        l.call(0, 1)?;
        match l.value_at(-1) {
            LuaValue::Nil => {
                l.pop(1);
                return Ok(Ok(chunk));
            }
            LuaValue::String(s) => {
                l.pop(1);
                if s.is_empty() {
                    return Ok(Ok(chunk));
                }
                chunk.extend_from_slice(s.as_bytes());
            }
            _ => {
                l.pop(1);
                return Ok(Err("reader function must return a string".to_string()));
            }
        }
    }
}

/// load(ld [, source [, mode [, env]]])
fn lua_load(l: &mut LuaState) -> LuaResult<usize> {
    let mode = l.opt_lstring(3, "bt")?.to_string();
    let env = if l.is_none(4) { None } else { Some(4) };
    let status = match l.value_at(1) {
        LuaValue::String(s) => {
            let chunkname = l.opt_lstring(2, &s.to_str_lossy())?.to_string();
            l.load(s.as_bytes(), &chunkname, Some(&mode))
        }
        _ => {
            let chunkname = l.opt_lstring(2, "=(load)")?.to_string();
            l.check_type(1, LuaValueKind::Function)?;
            // reserve slot for the reader results
            l.set_top(5);
            match read_pieces(l)? {
                Ok(chunk) => l.load(&chunk, &chunkname, Some(&mode)),
                Err(msg) => {
                    l.push_string(msg)?;
                    Err(LuaError::SyntaxError)
                }
            }
        }
    };
    load_aux(l, status, env)
}

fn dofile_cont(l: &mut LuaState) -> LuaResult<usize> {
    Ok(l.get_top() - 1)
}

fn lua_dofile(l: &mut LuaState) -> LuaResult<usize> {
    let fname = if l.is_none_or_nil(1) { None } else { Some(l.check_lstring(1)?.to_string()) };
    l.set_top(1);
    if l.load_file(fname.as_deref(), None).is_err() {
        return Err(l.throw_top());
    }
    l.callk(0, LUA_MULTRET, 0, Some(dofile_cont))?;
    dofile_cont(l)
}

fn lua_assert(l: &mut LuaState) -> LuaResult<usize> {
    if !l.to_boolean(1) {
        let msg = l.opt_lstring(2, "assertion failed!")?;
        return Err(l.error(msg.to_string()));
    }
    Ok(l.get_top())
}

fn lua_select(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top() as i64;
    if matches!(l.value_at(1), LuaValue::String(ref s) if s.as_bytes() == b"#") {
        l.push_integer(n - 1)?;
        return Ok(1);
    }
    let mut i = l.check_integer(1)?;
    if i < 0 {
        i += n;
    } else if i > n {
        i = n;
    }
    l.arg_check(1 <= i, 1, "index out of range")?;
    Ok((n - i) as usize)
}

/// Results of `pcall`/`xpcall`: the status replaces the slot below the
/// called function, followed by the results or the error value
fn finish_pcall(l: &mut LuaState, ok: bool) -> LuaResult<usize> {
    if !l.ensure_stack(1) {
        // no space for the extra boolean
        l.set_top(0);
        l.push_boolean(false)?;
        l.push_string("stack overflow")?;
        return Ok(2);
    }
    l.push_boolean(ok)?;
    l.replace(1);
    Ok(l.get_top())
}

fn pcall_cont(l: &mut LuaState) -> LuaResult<usize> {
    let (status, _) = l.get_ctx();
    finish_pcall(l, status == ThreadStatus::Yield)
}

fn lua_pcall(l: &mut LuaState) -> LuaResult<usize> {
    l.check_any(1)?;
    // space for the status result
    l.push_nil()?;
    l.insert(1);
    let nargs = l.get_top() - 2;
    let status = l.pcallk(nargs, LUA_MULTRET, 0, 0, Some(pcall_cont))?;
    finish_pcall(l, status == ThreadStatus::Ok)
}

fn lua_xpcall(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    l.arg_check(n >= 2, 2, "value expected")?;
    // exchange function and error handler
    l.push_index(1)?;
    l.copy(2, 1);
    l.replace(2);
    let status = l.pcallk(n - 2, LUA_MULTRET, 1, 0, Some(pcall_cont))?;
    finish_pcall(l, status == ThreadStatus::Ok)
}

fn lua_tostring(l: &mut LuaState) -> LuaResult<usize> {
    let v = l.check_any(1)?;
    let s = l.to_display_string(&v)?;
    l.push_string(s)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::parse_with_base;

    #[test]
    fn test_parse_with_base() {
        assert_eq!(parse_with_base(b"ff", 16), Some(255.0));
        assert_eq!(parse_with_base(b"  -101 ", 2), Some(-5.0));
        assert_eq!(parse_with_base(b"zz", 36), Some(1295.0));
        assert_eq!(parse_with_base(b"8", 8), None);
        assert_eq!(parse_with_base(b"", 10), None);
        assert_eq!(parse_with_base(b"1 0", 10), None);
    }
}
