// Lua execution state: one thread of a VM
// Represents a single thread/coroutine execution context. Every thread of a
// VM shares one `GlobalState`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::lua_value::{LuaFunction, LuaUpvalue, LuaValue, ThreadRef, UpvalueRef};
use crate::lua_vm::call_info::CallInfo;
use crate::lua_vm::debug_info::{LuaHook, chunk_id};
use crate::lua_vm::lua_limits::{BASIC_STACK_SIZE, EXTRA_STACK, LUA_MINSTACK};
use crate::lua_vm::{GlobalState, LuaError, LuaResult, ThreadStatus};

/// Execution state for a Lua thread/coroutine
pub struct LuaState {
    pub(crate) global: Rc<GlobalState>,
    /// Identity used by open upvalues to find their stack
    pub(crate) id: u64,
    pub(crate) self_ref: Weak<RefCell<LuaState>>,

    /// Value stack. Its length is the allocated size; slots at and above
    /// `top` are free. `EXTRA_STACK` slots past the last frame top are
    /// always available for metamethod calls.
    pub(crate) stack: Vec<LuaValue>,
    /// First free slot
    pub(crate) top: usize,

    /// Frame chain. Slot 0 is the base frame; `ci` is the running frame.
    /// Nodes above `ci` are kept for reuse.
    pub(crate) call_stack: Vec<CallInfo>,
    pub(crate) ci: usize,

    /// Open upvalues of this thread, sorted by stack level
    pub(crate) open_upvalues: Vec<UpvalueRef>,

    pub(crate) hook: Option<LuaHook>,
    pub(crate) hook_mask: u8,
    pub(crate) base_hook_count: i32,
    pub(crate) hook_count: i32,
    pub(crate) allow_hook: bool,
    /// Program counter of the last traced instruction (line hooks)
    pub(crate) old_pc: usize,

    /// Number of non-yieldable calls in the stack
    pub(crate) nny: u32,
    /// Number of nested host calls
    pub(crate) n_ccalls: usize,
    /// Stack index of the current error handler (0 = none)
    pub(crate) err_func: usize,

    pub(crate) status: ThreadStatus,
    /// The value of the error being propagated
    pub(crate) error_object: LuaValue,
}

impl LuaState {
    fn new(global: Rc<GlobalState>, self_ref: Weak<RefCell<LuaState>>) -> Self {
        let mut stack = Vec::with_capacity(BASIC_STACK_SIZE);
        stack.resize(BASIC_STACK_SIZE, LuaValue::Nil);
        let mut base_ci = CallInfo::default();
        base_ci.reset_c(0, 1 + LUA_MINSTACK, 0);
        let id = global.new_thread_id();
        LuaState {
            global,
            id,
            self_ref,
            stack,
            top: 1,
            call_stack: vec![base_ci],
            ci: 0,
            open_upvalues: Vec::new(),
            hook: None,
            hook_mask: 0,
            base_hook_count: 0,
            hook_count: 0,
            allow_hook: true,
            old_pc: 0,
            nny: 0,
            n_ccalls: 0,
            err_func: 0,
            status: ThreadStatus::Ok,
            error_object: LuaValue::Nil,
        }
    }

    pub(crate) fn new_thread_ref(global: Rc<GlobalState>) -> ThreadRef {
        Rc::new_cyclic(|weak| RefCell::new(LuaState::new(global, weak.clone())))
    }

    /// Create a thread sharing this thread's global state and hook
    pub fn new_thread(&self) -> ThreadRef {
        let thread = LuaState::new_thread_ref(self.global.clone());
        {
            let mut t = thread.borrow_mut();
            t.hook = self.hook;
            t.hook_mask = self.hook_mask;
            t.base_hook_count = self.base_hook_count;
            t.hook_count = self.base_hook_count;
            debug!(thread = t.id, parent = self.id, "created thread");
        }
        thread
    }

    pub fn global(&self) -> &Rc<GlobalState> {
        &self.global
    }

    /// This thread as a value
    pub fn thread_value(&self) -> LuaValue {
        match self.self_ref.upgrade() {
            Some(t) => LuaValue::Thread(t),
            None => LuaValue::Nil,
        }
    }

    pub fn is_main_thread(&self) -> bool {
        match self.global.registry.borrow().get_int(crate::lua_vm::lua_limits::LUA_RIDX_MAINTHREAD) {
            LuaValue::Thread(t) => Rc::as_ptr(&t) as *const u8 == self.self_ref.as_ptr() as *const u8,
            _ => false,
        }
    }

    pub fn thread_status(&self) -> ThreadStatus {
        self.status
    }

    // ===== Frames =====

    #[inline(always)]
    pub(crate) fn current_ci(&self) -> &CallInfo {
        &self.call_stack[self.ci]
    }

    #[inline(always)]
    pub(crate) fn current_ci_mut(&mut self) -> &mut CallInfo {
        &mut self.call_stack[self.ci]
    }

    /// Enter a new frame node, reusing an old one when possible
    pub(crate) fn next_ci(&mut self) -> LuaResult<usize> {
        if self.ci + 1 >= self.global.option.max_call_depth {
            return Err(self.runtime_error("stack overflow"));
        }
        self.ci += 1;
        if self.ci == self.call_stack.len() {
            self.call_stack.push(CallInfo::default());
        }
        Ok(self.ci)
    }

    /// Number of active frames, the base frame excluded
    pub fn call_depth(&self) -> usize {
        self.ci
    }

    // ===== Stack =====

    /// Ensure `n` free slots above `top`
    #[inline(always)]
    pub(crate) fn check_stack(&mut self, n: usize) -> LuaResult<()> {
        if self.stack.len() <= self.top + n + EXTRA_STACK {
            self.grow_stack(n)?;
        }
        Ok(())
    }

    #[cold]
    #[inline(never)]
    pub(crate) fn grow_stack(&mut self, n: usize) -> LuaResult<()> {
        let max = self.global.option.max_stack_size;
        let size = self.stack.len();
        if size > max {
            // already using the emergency area
            return Err(self.throw_status(LuaError::ErrorInErrorHandling));
        }
        let needed = self.top + n + EXTRA_STACK;
        let new_size = (2 * size).min(max).max(needed);
        if new_size > max {
            debug!(thread = self.id, size, "stack overflow");
            self.realloc_stack(max + 200);
            return Err(self.runtime_error("stack overflow"));
        }
        trace!(thread = self.id, from = size, to = new_size, "growing stack");
        self.realloc_stack(new_size);
        Ok(())
    }

    fn realloc_stack(&mut self, new_size: usize) {
        self.stack.resize(new_size, LuaValue::Nil);
    }

    /// Give back stack space after an error unwound deep frames
    pub(crate) fn shrink_stack(&mut self) {
        let mut lim = self.top;
        for ci in &self.call_stack[..=self.ci] {
            lim = lim.max(ci.top);
        }
        let in_use = lim + 1;
        let max = self.global.option.max_stack_size;
        let good_size = (in_use + in_use / 8 + 2 * EXTRA_STACK).min(max);
        if in_use <= max && good_size < self.stack.len() {
            self.realloc_stack(good_size.max(BASIC_STACK_SIZE));
        }
    }

    /// Push a value, growing the stack when needed
    #[inline]
    pub fn push_value(&mut self, value: LuaValue) -> LuaResult<()> {
        if self.top + EXTRA_STACK >= self.stack.len() {
            self.check_stack(1)?;
        }
        self.stack[self.top] = value;
        self.top += 1;
        Ok(())
    }

    /// Push without a size check; callers reserve the space up front
    #[inline(always)]
    pub(crate) fn push_unchecked(&mut self, value: LuaValue) {
        self.stack[self.top] = value;
        self.top += 1;
    }

    pub(crate) fn pop_value(&mut self) -> LuaValue {
        if self.top <= self.current_ci().func + 1 {
            return LuaValue::Nil;
        }
        self.top -= 1;
        std::mem::take(&mut self.stack[self.top])
    }

    // ===== Upvalues =====

    /// The open upvalue for stack slot `level`, created on first use
    pub(crate) fn find_upvalue(&mut self, level: usize) -> UpvalueRef {
        let pos = self
            .open_upvalues
            .binary_search_by(|uv| uv.borrow().stack_index().unwrap_or(0).cmp(&level));
        match pos {
            Ok(i) => self.open_upvalues[i].clone(),
            Err(i) => {
                let uv = Rc::new(RefCell::new(LuaUpvalue::Open {
                    thread_id: self.id,
                    thread: self.self_ref.clone(),
                    index: level,
                }));
                self.open_upvalues.insert(i, uv.clone());
                uv
            }
        }
    }

    /// Close every open upvalue at or above `level`
    pub(crate) fn close_upvalues(&mut self, level: usize) {
        while let Some(uv) = self.open_upvalues.last() {
            let index = match uv.borrow().stack_index() {
                Some(i) if i >= level => i,
                _ => break,
            };
            let value = self.stack.get(index).cloned().unwrap_or_default();
            *uv.borrow_mut() = LuaUpvalue::Closed(value);
            self.open_upvalues.pop();
        }
    }

    #[inline]
    pub(crate) fn upvalue_get(&self, uv: &UpvalueRef) -> LuaValue {
        match &*uv.borrow() {
            LuaUpvalue::Closed(v) => v.clone(),
            LuaUpvalue::Open { thread_id, thread, index } => {
                if *thread_id == self.id {
                    self.stack[*index].clone()
                } else {
                    self.global.foreign_slot(*thread_id, thread, *index)
                }
            }
        }
    }

    #[inline]
    pub(crate) fn upvalue_set(&mut self, uv: &UpvalueRef, value: LuaValue) {
        let mut slot = uv.borrow_mut();
        match &mut *slot {
            LuaUpvalue::Closed(v) => *v = value,
            LuaUpvalue::Open { thread_id, thread, index } => {
                if *thread_id == self.id {
                    self.stack[*index] = value;
                } else {
                    self.global.set_foreign_slot(*thread_id, thread, *index, value);
                }
            }
        }
    }

    /// Lend this thread's stack to the global state while another thread
    /// runs, so shared upvalues stay reachable.
    pub(crate) fn park_stack(&mut self) {
        let stack = std::mem::take(&mut self.stack);
        self.global.parked_stacks.borrow_mut().insert(self.id, stack);
    }

    pub(crate) fn unpark_stack(&mut self) {
        if let Some(stack) = self.global.parked_stacks.borrow_mut().remove(&self.id) {
            self.stack = stack;
        }
    }

    // ===== Errors =====

    /// Raise `msg` as a runtime error, prefixed with the position of the
    /// running Lua function.
    #[cold]
    #[inline(never)]
    pub fn runtime_error(&mut self, msg: impl Into<String>) -> LuaError {
        let msg = msg.into();
        let ci = self.current_ci();
        let full = if ci.is_lua() {
            match self.stack[ci.func].as_function().and_then(LuaFunction::proto) {
                Some(p) => {
                    let line = p.line_at(ci.saved_pc.saturating_sub(1));
                    format!("{}:{}: {}", chunk_id(p.source_name()), line, msg)
                }
                None => msg,
            }
        } else {
            msg
        };
        self.throw(LuaValue::from(full))
    }

    /// Raise `value` as an error object. The current message handler, if
    /// any, runs here, before any frame is unwound.
    #[cold]
    #[inline(never)]
    pub fn throw(&mut self, value: LuaValue) -> LuaError {
        if self.err_func == 0 {
            self.error_object = value;
            return LuaError::RuntimeError;
        }
        let handler = self.stack[self.err_func].clone();
        if !handler.is_function() {
            return self.throw_status(LuaError::ErrorInErrorHandling);
        }
        if let Err(e) = self.check_stack(2) {
            return e;
        }
        trace!(thread = self.id, "calling message handler");
        let func = self.top;
        self.push_unchecked(handler);
        self.push_unchecked(value);
        match crate::lua_vm::execute::call::call(self, func, 1, false) {
            Ok(()) => {
                self.top -= 1;
                self.error_object = std::mem::take(&mut self.stack[self.top]);
                LuaError::RuntimeError
            }
            Err(e) => e,
        }
    }

    /// Raise a status whose error object is fixed
    #[cold]
    pub(crate) fn throw_status(&mut self, status: LuaError) -> LuaError {
        self.error_object = match status {
            LuaError::MemoryError => LuaValue::from("not enough memory"),
            LuaError::ErrorInErrorHandling => LuaValue::from("error in error handling"),
            _ => std::mem::take(&mut self.error_object),
        };
        status
    }

    /// Install the pending error object at `old_top` (`seterrorobj`)
    pub(crate) fn set_error_obj(&mut self, status: LuaError, old_top: usize) {
        let value = match status {
            LuaError::MemoryError => LuaValue::from("not enough memory"),
            LuaError::ErrorInErrorHandling => LuaValue::from("error in error handling"),
            _ => self.error_object.clone(),
        };
        self.error_object = value.clone();
        if old_top >= self.stack.len() {
            self.realloc_stack(old_top + 1 + EXTRA_STACK);
        }
        self.stack[old_top] = value;
        self.top = old_top + 1;
    }

    pub(crate) fn reset_for_drop(&mut self) {
        self.close_upvalues(0);
        self.stack.clear();
        self.top = 0;
        self.ci = 0;
        self.call_stack.truncate(1);
    }
}

impl Drop for LuaState {
    fn drop(&mut self) {
        // Closures that outlive this thread keep the values they captured.
        self.close_upvalues(0);
    }
}
