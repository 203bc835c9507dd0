use crate::lua_vm::lua_limits::{LUAI_MAXCCALLS, LUAI_MAXSTACK, MAX_CALL_DEPTH};

/// Runtime configuration handed to `LuaVM::new`.
#[derive(Debug, Clone)]
pub struct SafeOption {
    /// Hard limit on value-stack slots per thread
    pub max_stack_size: usize,
    /// Limit on nested host calls (host functions, metamethods, resumes)
    pub max_c_calls: usize,
    /// Limit on call frames per thread
    pub max_call_depth: usize,
}

impl Default for SafeOption {
    fn default() -> Self {
        Self {
            max_stack_size: LUAI_MAXSTACK,
            max_c_calls: LUAI_MAXCCALLS,
            max_call_depth: MAX_CALL_DEPTH,
        }
    }
}
