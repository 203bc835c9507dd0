// Coroutines: resume, yield and finishing interrupted frames
//
// A yield unwinds the Rust stack with `Err(LuaError::Yield)` but keeps the
// frame chain of the thread. Resuming finishes the frames one by one:
// host frames through their continuation, Lua frames by completing the
// interrupted instruction and running the dispatch loop again.

use tracing::{debug, trace};

use crate::lua_value::{CFunction, LuaValue};
use crate::lua_vm::call_info::call_status::{CIST_STAT, CIST_YIELDED, CIST_YPCALL};
use crate::lua_vm::execute::call::{poscall, precall};
use crate::lua_vm::execute::{finish_op, lua_execute};
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{LuaError, LuaResult, LuaState, ThreadStatus};

impl LuaState {
    /// Start or continue this coroutine with the `nargs` values on top of
    /// its stack. `from_ccalls` is the host-call depth of the resumer.
    ///
    /// Returns `Ok(Yield)` when the coroutine yielded (the yielded values
    /// are on its stack), `Ok(Ok)` when its body returned and `Err` when it
    /// failed, with the error value on top of its stack.
    pub fn resume(&mut self, from_ccalls: usize, nargs: usize) -> LuaResult<ThreadStatus> {
        let old_nny = self.nny;
        self.n_ccalls = from_ccalls + 1;
        self.nny = 0;
        let first_arg = self.top - nargs;
        let result = match self.resume_precondition() {
            Some(msg) => {
                // the coroutine is left as it was
                self.top = first_arg;
                self.push_unchecked(LuaValue::from(msg));
                Err(LuaError::RuntimeError)
            }
            None => {
                debug!(thread = self.id, nargs, "resuming coroutine");
                let mut status = self.resume_body(first_arg);
                loop {
                    match status {
                        Err(LuaError::Yield) => break Ok(ThreadStatus::Yield),
                        Err(e) => {
                            if self.recover(e) {
                                status = self.unroll();
                                continue;
                            }
                            debug!(thread = self.id, status = ?e, "coroutine died");
                            self.status = ThreadStatus::Error(e);
                            let top = self.top;
                            self.set_error_obj(e, top);
                            let top = self.top;
                            self.current_ci_mut().top = top;
                            break Err(e);
                        }
                        Ok(()) => {
                            trace!(thread = self.id, "coroutine returned");
                            break Ok(ThreadStatus::Ok);
                        }
                    }
                }
            }
        };
        self.nny = old_nny;
        self.n_ccalls = from_ccalls;
        result
    }

    /// Why this thread cannot be resumed, if it cannot
    fn resume_precondition(&self) -> Option<&'static str> {
        if self.n_ccalls >= self.global.option.max_c_calls {
            return Some("C stack overflow");
        }
        match self.status {
            ThreadStatus::Ok if self.ci != 0 => Some("cannot resume non-suspended coroutine"),
            ThreadStatus::Ok | ThreadStatus::Yield => None,
            ThreadStatus::Error(_) => Some("cannot resume dead coroutine"),
        }
    }

    fn resume_body(&mut self, first_arg: usize) -> LuaResult<()> {
        if self.status == ThreadStatus::Ok {
            // start the body
            if !precall(self, first_arg - 1, LUA_MULTRET)? {
                lua_execute(self)?;
            }
            return Ok(());
        }
        self.status = ThreadStatus::Ok;
        let ci = self.ci;
        let func = self.call_stack[ci].extra;
        self.call_stack[ci].func = func;
        if self.call_stack[ci].is_lua() {
            // yielded inside a hook: keep running the Lua code
            lua_execute(self)?;
        } else {
            let mut first_result = first_arg;
            let k = self.call_stack[ci].k;
            if let Some(k) = k {
                let frame = &mut self.call_stack[ci];
                frame.cont_status = Some(LuaError::Yield);
                frame.call_status |= CIST_YIELDED;
                let n = self.run_continuation(k)?;
                first_result = self.top - n;
            }
            poscall(self, first_result)?;
        }
        self.unroll()
    }

    fn run_continuation(&mut self, k: CFunction) -> LuaResult<usize> {
        let n = k(self)?;
        let available = self.top - (self.current_ci().func + 1);
        Ok(n.min(available))
    }

    /// Finish every frame left over from the yield, down to the base frame
    fn unroll(&mut self) -> LuaResult<()> {
        while self.ci != 0 {
            if self.current_ci().is_lua() {
                finish_op(self);
                lua_execute(self)?;
            } else {
                self.finish_ccall()?;
            }
        }
        Ok(())
    }

    /// Finish a host frame whose callee returned after a resume
    fn finish_ccall(&mut self) -> LuaResult<()> {
        let ci = self.ci;
        if self.call_stack[ci].call_status & CIST_YPCALL != 0 {
            self.call_stack[ci].call_status &= !CIST_YPCALL;
            self.err_func = self.call_stack[ci].old_err_func;
        }
        let nresults = self.call_stack[ci].nresults;
        self.adjust_results(nresults);
        let frame = &mut self.call_stack[ci];
        if frame.call_status & CIST_STAT == 0 {
            frame.cont_status = Some(LuaError::Yield);
        }
        frame.call_status = (frame.call_status & !(CIST_YPCALL | CIST_STAT)) | CIST_YIELDED;
        let k = frame.k;
        let n = match k {
            Some(k) => self.run_continuation(k)?,
            None => 0,
        };
        let top = self.top;
        poscall(self, top - n)?;
        Ok(())
    }

    /// Catch an error raised after a resume at the innermost yieldable
    /// protected call. Returns false when there is none.
    fn recover(&mut self, e: LuaError) -> bool {
        let Some(ci) = (1..=self.ci).rev().find(|&i| self.call_stack[i].call_status & CIST_YPCALL != 0) else {
            return false;
        };
        trace!(thread = self.id, status = ?e, frame = ci, "recovering yieldable protected call");
        let old_top = self.call_stack[ci].extra;
        self.close_upvalues(old_top);
        self.set_error_obj(e, old_top);
        self.ci = ci;
        self.allow_hook = self.call_stack[ci].old_allow_hook;
        self.nny = 0;
        self.shrink_stack();
        self.err_func = self.call_stack[ci].old_err_func;
        let frame = &mut self.call_stack[ci];
        frame.call_status |= CIST_STAT;
        frame.cont_status = Some(e);
        true
    }

    /// Yield the `nresults` values on top of the stack. Call from a host
    /// function as `return l.yieldk(n, ctx, k)`; on resume the host function
    /// is finished by `k` (or returns the resume arguments when `k` is None).
    pub fn yieldk(&mut self, nresults: usize, ctx: i32, k: Option<CFunction>) -> LuaResult<usize> {
        if self.nny > 0 {
            let msg = if self.is_main_thread() {
                "attempt to yield from outside a coroutine"
            } else {
                "attempt to yield across a C-call boundary"
            };
            return Err(self.runtime_error(msg));
        }
        debug!(thread = self.id, nresults, "coroutine yield");
        self.status = ThreadStatus::Yield;
        let ci = self.ci;
        let top = self.top;
        let frame = &mut self.call_stack[ci];
        frame.extra = frame.func;
        if frame.is_lua() {
            // inside a hook; the dispatch loop raises the yield
            return Ok(0);
        }
        frame.k = k;
        if k.is_some() {
            frame.ctx = ctx;
        }
        frame.func = top - nresults - 1;
        Err(LuaError::Yield)
    }

    pub fn yield_(&mut self, nresults: usize) -> LuaResult<usize> {
        self.yieldk(nresults, 0, None)
    }
}
