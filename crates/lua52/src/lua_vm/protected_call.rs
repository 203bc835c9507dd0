// Protected and unprotected calls from host code (lua_callk / lua_pcallk)
//
// An error travels as `Err(status)` with the error value parked in
// `LuaState::error_object`. A protected call catches it, unwinds the frame
// chain back to where it started and installs the value where the called
// function was, so the stack looks as if the call returned one value.

use tracing::trace;

use crate::lua_value::CFunction;
use crate::lua_vm::call_info::call_status::{CIST_YIELDED, CIST_YPCALL};
use crate::lua_vm::execute::call::call;
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{LuaError, LuaResult, LuaState, ThreadStatus};

impl LuaState {
    /// Run `f` so that any error it raises is caught. On error the frame
    /// chain and the hook/yield bookkeeping are restored, upvalues above
    /// `old_top` are closed and the error value is left at `old_top`.
    pub(crate) fn protected_run<F>(&mut self, old_top: usize, ef: usize, f: F) -> LuaResult<()>
    where
        F: FnOnce(&mut LuaState) -> LuaResult<()>,
    {
        let old_ci = self.ci;
        let old_allow_hook = self.allow_hook;
        let old_nny = self.nny;
        let old_n_ccalls = self.n_ccalls;
        let old_err_func = self.err_func;
        self.err_func = ef;
        let result = f(self);
        match result {
            Ok(()) => {
                self.err_func = old_err_func;
                Ok(())
            }
            Err(LuaError::Yield) => {
                self.err_func = old_err_func;
                Err(LuaError::Yield)
            }
            Err(e) => {
                trace!(thread = self.id, status = ?e, "unwinding to protected call");
                self.close_upvalues(old_top);
                self.set_error_obj(e, old_top);
                self.ci = old_ci;
                self.allow_hook = old_allow_hook;
                self.nny = old_nny;
                self.n_ccalls = old_n_ccalls;
                self.shrink_stack();
                self.err_func = old_err_func;
                Err(e)
            }
        }
    }

    /// After a call with `nresults == LUA_MULTRET` the frame top must cover
    /// the results.
    #[inline]
    pub(crate) fn adjust_results(&mut self, nresults: i32) {
        if nresults == LUA_MULTRET && self.top >= self.current_ci().top {
            let top = self.top;
            self.current_ci_mut().top = top;
        }
    }

    /// Call the function below the `nargs` arguments on top of the stack.
    /// Errors propagate to the caller.
    pub fn call(&mut self, nargs: usize, nresults: i32) -> LuaResult<()> {
        self.callk(nargs, nresults, 0, None)
    }

    /// Like `call`, but when the callee yields the running host function is
    /// finished by `k` after the coroutine is resumed.
    pub fn callk(&mut self, nargs: usize, nresults: i32, ctx: i32, k: Option<CFunction>) -> LuaResult<()> {
        let func = self.top - (nargs + 1);
        if self.ci == 0 {
            return self.call_at_base(func, nresults);
        }
        if k.is_some() && self.nny == 0 {
            let ci = self.current_ci_mut();
            ci.k = k;
            ci.ctx = ctx;
            call(self, func, nresults, true)?;
        } else {
            call(self, func, nresults, false)?;
        }
        self.adjust_results(nresults);
        Ok(())
    }

    /// An unprotected call made by the host with no Lua frame below it.
    /// A failure runs the panic function and resets the thread, leaving the
    /// error value where the function was.
    fn call_at_base(&mut self, func: usize, nresults: i32) -> LuaResult<()> {
        let ef = self.err_func;
        let result = self.protected_run(func, ef, |l| call(l, func, nresults, false));
        match result {
            Ok(()) => {
                self.adjust_results(nresults);
                Ok(())
            }
            Err(e) => {
                if let Some(panic) = self.global.panic.get() {
                    trace!(thread = self.id, "calling panic function");
                    // whatever the panic function does, the error stands
                    let top = self.top;
                    let _ = panic(self);
                    self.top = top;
                }
                Err(e)
            }
        }
    }

    /// Protected call. `errfunc` is the stack index of a message handler
    /// (0 for none). Returns the status; on error the error value replaces
    /// the function and its arguments.
    pub fn pcall(&mut self, nargs: usize, nresults: i32, errfunc: i32) -> LuaResult<ThreadStatus> {
        self.pcallk(nargs, nresults, errfunc, 0, None)
    }

    /// Protected call that may be interrupted by a yield. Once the callee
    /// yields, the running host function is finished by `k`, which learns
    /// the outcome through `get_ctx`.
    pub fn pcallk(
        &mut self,
        nargs: usize,
        nresults: i32,
        errfunc: i32,
        ctx: i32,
        k: Option<CFunction>,
    ) -> LuaResult<ThreadStatus> {
        let func = self.top - (nargs + 1);
        let ef = if errfunc == 0 { 0 } else { self.stack_slot(errfunc) };
        if k.is_none() || self.nny > 0 {
            // conventional protected call
            return match self.protected_run(func, ef, |l| call(l, func, nresults, false)) {
                Ok(()) => {
                    self.adjust_results(nresults);
                    Ok(ThreadStatus::Ok)
                }
                Err(LuaError::Yield) => Err(LuaError::Yield),
                Err(e) => Ok(ThreadStatus::Error(e)),
            };
        }
        // yieldable protected call: the frame keeps what `recover` needs
        // to finish the call after the Rust frame is gone
        let ci = self.ci;
        let old_allow_hook = self.allow_hook;
        let old_err_func = self.err_func;
        let old_n_ccalls = self.n_ccalls;
        {
            let frame = &mut self.call_stack[ci];
            frame.k = k;
            frame.ctx = ctx;
            frame.extra = func;
            frame.old_allow_hook = old_allow_hook;
            frame.old_err_func = old_err_func;
            frame.call_status |= CIST_YPCALL;
        }
        self.err_func = ef;
        match call(self, func, nresults, true) {
            Ok(()) => {
                self.call_stack[ci].call_status &= !CIST_YPCALL;
                self.err_func = old_err_func;
                self.adjust_results(nresults);
                Ok(ThreadStatus::Ok)
            }
            Err(LuaError::Yield) => Err(LuaError::Yield),
            Err(e) => {
                trace!(thread = self.id, status = ?e, "unwinding to yieldable protected call");
                self.close_upvalues(func);
                self.set_error_obj(e, func);
                self.ci = ci;
                self.allow_hook = old_allow_hook;
                self.nny = 0;
                self.n_ccalls = old_n_ccalls;
                self.shrink_stack();
                self.err_func = old_err_func;
                self.call_stack[ci].call_status &= !CIST_YPCALL;
                Ok(ThreadStatus::Error(e))
            }
        }
    }

    /// Status and context of the running host function. Inside a
    /// continuation the status is `Yield` (or the error a yieldable
    /// protected call caught); otherwise it is `Ok` with context 0.
    pub fn get_ctx(&self) -> (ThreadStatus, i32) {
        let ci = self.current_ci();
        if ci.call_status & CIST_YIELDED == 0 {
            return (ThreadStatus::Ok, 0);
        }
        let status = match ci.cont_status {
            None => ThreadStatus::Ok,
            Some(LuaError::Yield) => ThreadStatus::Yield,
            Some(e) => ThreadStatus::Error(e),
        };
        (status, ci.ctx)
    }

    /// Install the panic function run by unprotected errors at base level;
    /// returns the previous one.
    pub fn at_panic(&mut self, panic: Option<CFunction>) -> Option<CFunction> {
        self.global.panic.replace(panic)
    }
}
