// Coroutine library
// Implements: create, resume, running, status, wrap, yield

use std::rc::Rc;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValueKind, ThreadRef};
use crate::lua_vm::lua_limits::lua_upvalueindex;
use crate::lua_vm::{LuaResult, LuaState, ThreadStatus};

pub fn create_coroutine_lib() -> LibraryModule {
    crate::lib_module!("coroutine", {
        "create" => co_create,
        "resume" => co_resume,
        "running" => co_running,
        "status" => co_status,
        "wrap" => co_wrap,
        "yield" => co_yield,
    })
}

fn is_running(l: &LuaState, co: &ThreadRef) -> bool {
    Rc::as_ptr(co) as *const u8 == l.self_ref.as_ptr() as *const u8
}

fn get_co(l: &mut LuaState) -> LuaResult<ThreadRef> {
    match l.to_thread(1) {
        Some(co) => Ok(co),
        None => Err(l.arg_error(1, "coroutine expected")),
    }
}

/// Resume `co` with the `narg` values on top of `l`. On success the
/// results are moved to `l` and their count returned; on failure the error
/// value is left on top of `l`.
fn aux_resume(l: &mut LuaState, co: &ThreadRef, narg: usize) -> LuaResult<Result<usize, ()>> {
    let Ok(mut co_state) = co.try_borrow_mut() else {
        // running, or resuming another coroutine
        l.push_string("cannot resume non-suspended coroutine")?;
        return Ok(Err(()));
    };
    if !co_state.ensure_stack(narg) {
        l.push_string("too many arguments to resume")?;
        return Ok(Err(()));
    }
    if co_state.thread_status() == ThreadStatus::Ok && co_state.get_top() == 0 {
        l.push_string("cannot resume dead coroutine")?;
        return Ok(Err(()));
    }
    l.xmove(&mut co_state, narg)?;
    // the values of `l` stay reachable for upvalues shared with `co`
    l.park_stack();
    let status = co_state.resume(l.n_ccalls, narg);
    l.unpark_stack();
    match status {
        Ok(_) => {
            let nres = co_state.get_top();
            if !l.ensure_stack(nres + 1) {
                co_state.pop(nres);
                l.push_string("too many results to resume")?;
                return Ok(Err(()));
            }
            co_state.xmove(l, nres)?;
            Ok(Ok(nres))
        }
        Err(_) => {
            co_state.xmove(l, 1)?;
            Ok(Err(()))
        }
    }
}

fn co_create(l: &mut LuaState) -> LuaResult<usize> {
    l.check_type(1, LuaValueKind::Function)?;
    let co = l.new_thread_value()?;
    let f = l.value_at(1);
    co.borrow_mut().push_value(f)?;
    Ok(1)
}

fn co_resume(l: &mut LuaState) -> LuaResult<usize> {
    let co = get_co(l)?;
    let narg = l.get_top() - 1;
    match aux_resume(l, &co, narg)? {
        Ok(nres) => {
            l.push_boolean(true)?;
            l.insert(-(nres as i32) - 1);
            Ok(nres + 1)
        }
        Err(()) => {
            l.push_boolean(false)?;
            l.insert(-2);
            Ok(2)
        }
    }
}

fn aux_wrap(l: &mut LuaState) -> LuaResult<usize> {
    let Some(co) = l.value_at(lua_upvalueindex(1)).as_thread().cloned() else {
        return Err(l.error("coroutine expected"));
    };
    let narg = l.get_top();
    match aux_resume(l, &co, narg)? {
        Ok(nres) => Ok(nres),
        Err(()) => {
            if l.value_at(-1).is_string() {
                // add position information
                let position = l.where_(1);
                l.push_string(position)?;
                l.insert(-2);
                l.concat(2)?;
            }
            Err(l.throw_top())
        }
    }
}

fn co_wrap(l: &mut LuaState) -> LuaResult<usize> {
    co_create(l)?;
    l.push_rust_closure(aux_wrap, 1)?;
    Ok(1)
}

fn co_yield(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    l.yield_(n)
}

fn co_status(l: &mut LuaState) -> LuaResult<usize> {
    let co = get_co(l)?;
    let status = if is_running(l, &co) {
        "running"
    } else {
        match co.try_borrow() {
            // it is resuming another coroutine
            Err(_) => "normal",
            Ok(co_state) => match co_state.thread_status() {
                ThreadStatus::Yield => "suspended",
                ThreadStatus::Ok if co_state.get_stack(0).is_some() => "normal",
                ThreadStatus::Ok if co_state.get_top() == 0 => "dead",
                ThreadStatus::Ok => "suspended",
                ThreadStatus::Error(_) => "dead",
            },
        }
    };
    l.push_string(status)?;
    Ok(1)
}

fn co_running(l: &mut LuaState) -> LuaResult<usize> {
    let is_main = l.push_thread()?;
    l.push_boolean(is_main)?;
    Ok(2)
}

#[cfg(test)]
mod tests {
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_resume_passes_values_both_ways() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local co = coroutine.create(function(a, b)
                local c = coroutine.yield(a + b)
                local d, e = coroutine.yield(c * 2)
                return d + e
            end)
            local ok, v = coroutine.resume(co, 1, 2)
            assert(ok and v == 3)
            ok, v = coroutine.resume(co, 10)
            assert(ok and v == 20)
            ok, v = coroutine.resume(co, 3, 4)
            assert(ok and v == 7)
            assert(coroutine.status(co) == "dead")
            ok, v = coroutine.resume(co)
            assert(not ok and v == "cannot resume dead coroutine")
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_status_values() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local main = coroutine.running()
            local co
            co = coroutine.create(function()
                assert(coroutine.status(co) == "running")
                assert(coroutine.status(main) == "normal")
                local ok, msg = coroutine.resume(co)
                assert(not ok and msg == "cannot resume non-suspended coroutine")
                coroutine.yield()
            end)
            assert(coroutine.status(co) == "suspended")
            coroutine.resume(co)
            assert(coroutine.status(co) == "suspended")
            coroutine.resume(co)
            assert(coroutine.status(co) == "dead")
            local _, ismain = coroutine.running()
            assert(ismain == true)
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_wrap_propagates_errors_with_position() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local gen = coroutine.wrap(function()
                for i = 1, 3 do coroutine.yield(i) end
            end)
            assert(gen() == 1 and gen() == 2 and gen() == 3)
            gen()
            local ok, msg = pcall(gen)
            assert(not ok and msg:find("cannot resume dead coroutine", 1, true))
            local bad = coroutine.wrap(function() error({code = 1}) end)
            local ok2, e = pcall(bad)
            assert(not ok2 and type(e) == "table" and e.code == 1)
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_yield_outside_coroutine() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local ok, msg = pcall(coroutine.yield, 1)
            assert(not ok and msg:find("outside a coroutine", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_yield_across_pcall() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local co = coroutine.wrap(function()
                local ok, v = pcall(function()
                    local x = coroutine.yield("in pcall")
                    error("after " .. x, 0)
                end)
                coroutine.yield(ok, v)
                return "done"
            end)
            assert(co() == "in pcall")
            local ok, v = co("resume")
            assert(ok == false and v == "after resume")
            assert(co() == "done")
            "#,
        );
        assert!(result.is_ok());
    }
}
