// Call protocol: entering and leaving frames (luaD_precall / luaD_poscall / luaD_call)

use crate::lua_value::{Chunk, LuaFunction, LuaValue};
use crate::lua_vm::debug_info::{HookEvent, ValueSlot};
use crate::lua_vm::execute::lua_execute;
use crate::lua_vm::execute::metamethod::{TmKind, get_tm_by_obj};
use crate::lua_vm::lua_limits::{LUA_MINSTACK, LUA_MULTRET};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Resolve `__call` for the non-function at `func`: the handler is inserted
/// below the arguments, the called object becomes the first argument.
fn try_func_tm(l: &mut LuaState, func: usize) -> LuaResult<LuaFunction> {
    let obj = l.stack[func].clone();
    let tm = get_tm_by_obj(l, &obj, TmKind::Call);
    let LuaValue::Function(f) = tm else {
        return Err(l.type_error(&obj, ValueSlot::Stack(func), "call"));
    };
    l.check_stack(1)?;
    let top = l.top;
    for p in (func..top).rev() {
        l.stack[p + 1] = std::mem::take(&mut l.stack[p]);
    }
    l.top += 1;
    l.stack[func] = LuaValue::Function(f.clone());
    Ok(f)
}

/// Move the fixed parameters above the varargs; returns the new base
fn adjust_varargs(l: &mut LuaState, p: &Chunk, actual: usize) -> usize {
    let nfixargs = p.param_count as usize;
    let fixed = l.top - actual;
    let base = l.top;
    for i in 0..nfixargs {
        let v = std::mem::take(&mut l.stack[fixed + i]);
        l.push_unchecked(v);
    }
    base
}

/// Prepare a call to the value at `func` with the arguments above it.
/// Host functions run to completion here (returns `true`); for a Lua
/// function the new frame is entered and `false` is returned.
pub(crate) fn precall(l: &mut LuaState, func: usize, nresults: i32) -> LuaResult<bool> {
    let f = match &l.stack[func] {
        LuaValue::Function(f) => f.clone(),
        _ => try_func_tm(l, func)?,
    };
    match f {
        LuaFunction::Lua(cl) => {
            let p = cl.proto.clone();
            let mut n = l.top - func - 1;
            l.check_stack(p.max_stack_size as usize + p.param_count as usize)?;
            while n < p.param_count as usize {
                l.push_unchecked(LuaValue::Nil);
                n += 1;
            }
            let base = if p.is_vararg != 0 { adjust_varargs(l, &p, n) } else { func + 1 };
            let ci = l.next_ci()?;
            let top = base + p.max_stack_size as usize;
            l.call_stack[ci].reset_lua(func, base, top, nresults);
            l.top = top;
            if l.hooks_on_call() {
                l.call_hook()?;
            }
            Ok(false)
        }
        LuaFunction::Rust(c) => {
            run_host(l, func, nresults, c.func)?;
            Ok(true)
        }
        LuaFunction::Light(f) => {
            run_host(l, func, nresults, f)?;
            Ok(true)
        }
    }
}

fn run_host(l: &mut LuaState, func: usize, nresults: i32, f: crate::lua_value::CFunction) -> LuaResult<()> {
    l.check_stack(LUA_MINSTACK)?;
    let ci = l.next_ci()?;
    let top = l.top + LUA_MINSTACK;
    l.call_stack[ci].reset_c(func, top, nresults);
    if l.hooks_on_call() {
        l.run_hook(HookEvent::Call, -1)?;
    }
    let n = f(l)?;
    let available = l.top - (l.call_stack[l.ci].func + 1);
    let n = n.min(available);
    poscall(l, l.top - n)?;
    Ok(())
}

/// Leave the running frame, moving its results (from `first_result` to
/// the top) to where the function was. Returns `false` when the caller
/// wanted all results.
pub(crate) fn poscall(l: &mut LuaState, mut first_result: usize) -> LuaResult<bool> {
    let ci = l.ci;
    if l.hooks_on_return() {
        if l.hooks_on_return_only() {
            l.run_hook(HookEvent::Return, -1)?;
        }
        if ci > 0 {
            l.old_pc = l.call_stack[ci - 1].saved_pc;
        }
    }
    let mut res = l.call_stack[ci].func;
    let wanted = l.call_stack[ci].nresults;
    l.ci = ci - 1;
    let mut i = wanted;
    while i != 0 && first_result < l.top {
        l.stack[res] = std::mem::take(&mut l.stack[first_result]);
        res += 1;
        first_result += 1;
        i -= 1;
    }
    while i > 0 {
        l.stack[res] = LuaValue::Nil;
        res += 1;
        i -= 1;
    }
    // clear moved-from slots so they do not keep values alive
    for slot in &mut l.stack[res..first_result.max(res)] {
        *slot = LuaValue::Nil;
    }
    l.top = res;
    Ok(wanted != LUA_MULTRET)
}

/// Call the value at `func` with the values above it as arguments,
/// running a Lua callee to completion. With `allow_yield` false a yield
/// inside the callee is an error.
pub(crate) fn call(l: &mut LuaState, func: usize, nresults: i32, allow_yield: bool) -> LuaResult<()> {
    l.n_ccalls += 1;
    let max = l.global.option.max_c_calls;
    if l.n_ccalls >= max {
        if l.n_ccalls == max {
            let e = l.runtime_error("C stack overflow");
            l.n_ccalls -= 1;
            return Err(e);
        } else if l.n_ccalls >= max + (max >> 3) {
            l.n_ccalls -= 1;
            return Err(l.throw_status(LuaError::ErrorInErrorHandling));
        }
    }
    if !allow_yield {
        l.nny += 1;
    }
    let result = match precall(l, func, nresults) {
        Ok(false) => lua_execute(l),
        Ok(true) => Ok(()),
        Err(e) => Err(e),
    };
    if !allow_yield {
        l.nny -= 1;
    }
    l.n_ccalls -= 1;
    result
}
