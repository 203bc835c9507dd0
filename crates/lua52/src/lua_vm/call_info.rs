// CallInfo - one active call frame (lstate.h `CallInfo`)

use crate::lua_value::CFunction;

/// Call status flags (CIST_*)
pub mod call_status {
    /// Frame runs a Lua function
    pub const CIST_LUA: u32 = 1 << 0;
    /// Frame is running a debug hook
    pub const CIST_HOOKED: u32 = 1 << 1;
    /// Frame was entered from the dispatch loop of its caller (no new Rust frame)
    pub const CIST_REENTRY: u32 = 1 << 2;
    /// Frame was resumed after a yield
    pub const CIST_YIELDED: u32 = 1 << 3;
    /// Frame is a yieldable protected call
    pub const CIST_YPCALL: u32 = 1 << 4;
    /// Frame carries an error status for its continuation
    pub const CIST_STAT: u32 = 1 << 5;
    /// Frame was tail called
    pub const CIST_TAIL: u32 = 1 << 6;
    /// Last hook called from this frame yielded
    pub const CIST_HOOKYIELD: u32 = 1 << 7;
}

use call_status::CIST_LUA;

use super::LuaError;

/// A node of the frame chain. Nodes live in `LuaState::call_stack` and are
/// reused across calls; `reset_lua` / `reset_c` reinitialize every field that
/// belongs to one frame kind.
#[derive(Clone, Default)]
pub struct CallInfo {
    /// Stack index of the called function
    pub func: usize,
    /// Top of this frame (first free slot)
    pub top: usize,
    /// Expected number of results (-1 = all)
    pub nresults: i32,
    /// CIST_* bits
    pub call_status: u32,
    /// Saved stack position (function slot across a yield, pcall function slot)
    pub extra: usize,

    // ---- Lua frames ----
    /// First register of the frame
    pub base: usize,
    /// Index of the next instruction to run
    pub saved_pc: usize,

    // ---- host frames ----
    /// Context integer handed to the continuation
    pub ctx: i32,
    /// Continuation run instead of the function after a yield
    pub k: Option<CFunction>,
    pub old_allow_hook: bool,
    pub old_err_func: usize,
    /// Status handed to the continuation (`None` means Ok)
    pub cont_status: Option<LuaError>,
}

impl CallInfo {
    pub fn reset_lua(&mut self, func: usize, base: usize, top: usize, nresults: i32) {
        self.func = func;
        self.base = base;
        self.top = top;
        self.nresults = nresults;
        self.call_status = CIST_LUA;
        self.saved_pc = 0;
        self.extra = 0;
    }

    pub fn reset_c(&mut self, func: usize, top: usize, nresults: i32) {
        self.func = func;
        self.base = func + 1;
        self.top = top;
        self.nresults = nresults;
        self.call_status = 0;
        self.extra = 0;
        self.ctx = 0;
        self.k = None;
        self.old_allow_hook = false;
        self.old_err_func = 0;
        self.cont_status = None;
    }

    #[inline(always)]
    pub fn is_lua(&self) -> bool {
        self.call_status & CIST_LUA != 0
    }

    #[inline(always)]
    pub fn is_tail(&self) -> bool {
        self.call_status & call_status::CIST_TAIL != 0
    }
}
