// Lua Virtual Machine
// Register-based execution of compiled prototypes. `LuaVM` owns the global
// state shared by every thread and the main thread itself.
mod call_info;
mod coroutine;
mod debug_info;
pub(crate) mod execute;
mod lua_api;
mod lua_auxlib;
mod lua_error;
pub mod lua_limits;
mod lua_state;
mod opcode;
mod protected_call;
mod safe_option;

use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use ahash::RandomState;
use tracing::debug;

use crate::lua_value::{CFunction, LuaString, LuaTable, LuaValue, NUM_TYPES, TableRef, ThreadRef};
pub use call_info::{CallInfo, call_status};
pub use debug_info::{HookEvent, LuaDebug, LuaHook, chunk_id, hook_mask};
pub use execute::arithmetic::ArithOp;
pub use execute::metamethod::TmKind;
pub use lua_api::CompareOp;
pub use lua_auxlib::{LUA_NOREF, LUA_REFNIL, io_error_message};
pub use lua_error::{LuaError, LuaResult, ThreadStatus};
pub use lua_state::LuaState;
pub use opcode::{
    ALL_OPCODES, Instruction, NUM_OPCODES, OpArgMask, OpCode, OpMode, float8_decode, float8_encode,
};
pub use safe_option::SafeOption;

use lua_limits::{LUA_MULTRET, LUA_RIDX_GLOBALS, LUA_RIDX_MAINTHREAD};

/// Lua version number reported by `lua_version`
pub const LUA_VERSION_NUM: f64 = 502.0;

/// State shared by all threads of one VM (the `global_State`)
pub struct GlobalState {
    pub(crate) registry: TableRef,
    /// Metatables of the basic types that carry no metatable of their own
    pub(crate) type_metatables: RefCell<[Option<TableRef>; NUM_TYPES]>,
    /// Event names in `TmKind` order
    pub(crate) tm_names: Vec<LuaString>,
    pub(crate) panic: Cell<Option<CFunction>>,
    /// Value stacks of threads that are resuming another thread. Open
    /// upvalues of those threads are read and written here.
    pub(crate) parked_stacks: RefCell<HashMap<u64, Vec<LuaValue>, RandomState>>,
    next_thread_id: Cell<u64>,
    pub(crate) option: SafeOption,
}

impl GlobalState {
    fn new(option: SafeOption) -> Self {
        GlobalState {
            registry: Rc::new(RefCell::new(LuaTable::new(2, 8))),
            type_metatables: RefCell::new(Default::default()),
            tm_names: TmKind::ALL.iter().map(|tm| LuaString::from(tm.name())).collect(),
            panic: Cell::new(None),
            parked_stacks: RefCell::new(HashMap::with_hasher(RandomState::new())),
            next_thread_id: Cell::new(0),
            option,
        }
    }

    pub(crate) fn new_thread_id(&self) -> u64 {
        let id = self.next_thread_id.get();
        self.next_thread_id.set(id + 1);
        id
    }

    pub fn registry(&self) -> TableRef {
        self.registry.clone()
    }

    pub fn globals(&self) -> LuaValue {
        self.registry.borrow().get_int(LUA_RIDX_GLOBALS)
    }

    pub(crate) fn tm_name(&self, tm: TmKind) -> &LuaString {
        &self.tm_names[tm as usize]
    }

    /// Value of a stack slot owned by another thread
    pub(crate) fn foreign_slot(
        &self,
        thread_id: u64,
        thread: &Weak<RefCell<LuaState>>,
        index: usize,
    ) -> LuaValue {
        if let Some(stack) = self.parked_stacks.borrow().get(&thread_id) {
            return stack.get(index).cloned().unwrap_or_default();
        }
        match thread.upgrade() {
            Some(t) => match t.try_borrow() {
                Ok(state) => state.stack.get(index).cloned().unwrap_or_default(),
                Err(_) => LuaValue::Nil,
            },
            None => LuaValue::Nil,
        }
    }

    pub(crate) fn set_foreign_slot(
        &self,
        thread_id: u64,
        thread: &Weak<RefCell<LuaState>>,
        index: usize,
        value: LuaValue,
    ) {
        if let Some(stack) = self.parked_stacks.borrow_mut().get_mut(&thread_id) {
            if let Some(slot) = stack.get_mut(index) {
                *slot = value;
            }
            return;
        }
        if let Some(t) = thread.upgrade() {
            if let Ok(mut state) = t.try_borrow_mut() {
                if let Some(slot) = state.stack.get_mut(index) {
                    *slot = value;
                }
            }
        }
    }
}

pub struct LuaVM {
    main: ThreadRef,
    global: Rc<GlobalState>,
}

impl LuaVM {
    pub fn new(option: SafeOption) -> Self {
        let global = Rc::new(GlobalState::new(option));
        let main = LuaState::new_thread_ref(global.clone());
        {
            let mut l = main.borrow_mut();
            // the main thread is never yieldable
            l.nny = 1;
        }
        {
            let mut registry = global.registry.borrow_mut();
            registry.set_int(LUA_RIDX_MAINTHREAD, LuaValue::Thread(main.clone()));
            registry.set_int(LUA_RIDX_GLOBALS, LuaValue::table(LuaTable::new(0, 32)));
        }
        debug!("created VM");
        LuaVM { main, global }
    }

    /// The main thread
    pub fn main_state(&self) -> RefMut<'_, LuaState> {
        self.main.borrow_mut()
    }

    pub fn main_thread(&self) -> ThreadRef {
        self.main.clone()
    }

    pub fn global(&self) -> &Rc<GlobalState> {
        &self.global
    }

    /// Open every standard library into the globals table
    pub fn open_libs(&mut self) {
        let mut l = self.main.borrow_mut();
        if let Err(e) = crate::lib_registry::create_standard_registry().load_all(&mut l) {
            tracing::error!(error = %e, message = %l.error_object, "failed to open standard libraries");
        }
    }

    pub fn get_global(&self, name: &str) -> LuaValue {
        match self.global.globals() {
            LuaValue::Table(t) => t.borrow().get_str(name),
            _ => LuaValue::Nil,
        }
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) {
        if let LuaValue::Table(t) = self.global.globals() {
            t.borrow_mut().set_str(name, value);
        }
    }

    /// Compile (or undump) a chunk and leave it as a function value
    pub fn load(&mut self, chunk: &[u8], chunk_name: &str) -> LuaResult<LuaValue> {
        let mut l = self.main.borrow_mut();
        l.load(chunk, chunk_name, None)?;
        Ok(l.pop_value())
    }

    /// Run a chunk of source code in protected mode and return its results.
    /// On error the message is available through `error_message`.
    pub fn execute_string(&mut self, source: &str) -> LuaResult<Vec<LuaValue>> {
        self.execute_named(source.as_bytes(), source)
    }

    pub fn execute_named(&mut self, chunk: &[u8], chunk_name: &str) -> LuaResult<Vec<LuaValue>> {
        let mut l = self.main.borrow_mut();
        let base = l.get_top();
        if let Err(e) = l.load(chunk, chunk_name, None) {
            l.error_object = l.pop_value();
            return Err(e);
        }
        match l.pcall(0, LUA_MULTRET, 0) {
            Ok(ThreadStatus::Ok) => {
                let n = l.get_top() - base;
                let results = (1..=n).map(|i| l.value_at((base + i) as i32)).collect();
                l.set_top(base as i32);
                Ok(results)
            }
            Ok(ThreadStatus::Error(e)) | Err(e) => {
                l.error_object = l.pop_value();
                l.set_top(base as i32);
                Err(e)
            }
            Ok(ThreadStatus::Yield) => {
                l.set_top(base as i32);
                Err(LuaError::Yield)
            }
        }
    }

    /// Error value of the last failed `execute_string`, as text
    pub fn error_message(&self) -> String {
        self.main.borrow().error_object.to_plain_string().to_string()
    }
}

impl Default for LuaVM {
    fn default() -> Self {
        LuaVM::new(SafeOption::default())
    }
}

impl Drop for LuaVM {
    fn drop(&mut self) {
        // Break the reference cycles through the registry and the globals
        // table so the threads and their values can be freed.
        let globals = self.global.globals();
        if let Ok(mut registry) = self.global.registry.try_borrow_mut() {
            *registry = LuaTable::new(0, 0);
        }
        if let LuaValue::Table(t) = globals {
            if let Ok(mut g) = t.try_borrow_mut() {
                *g = LuaTable::new(0, 0);
            }
        }
        if let Ok(mut mts) = self.global.type_metatables.try_borrow_mut() {
            *mts = Default::default();
        }
        if let Ok(mut l) = self.main.try_borrow_mut() {
            l.reset_for_drop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_layout() {
        let vm = LuaVM::new(SafeOption::default());
        let registry = vm.global().registry();
        let reg = registry.borrow();
        assert!(matches!(reg.get_int(LUA_RIDX_MAINTHREAD), LuaValue::Thread(_)));
        assert!(matches!(reg.get_int(LUA_RIDX_GLOBALS), LuaValue::Table(_)));
    }

    #[test]
    fn test_execute_returns_values() {
        let mut vm = LuaVM::new(SafeOption::default());
        let results = vm.execute_string("return 1, 'two', nil").unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0], LuaValue::number(1.0));
        assert_eq!(results[1], LuaValue::from("two"));
        assert!(results[2].is_nil());
    }

    #[test]
    fn test_execute_reports_errors() {
        let mut vm = LuaVM::new(SafeOption::default());
        let result = vm.execute_string("local x = nil; return x.y");
        assert_eq!(result.unwrap_err(), LuaError::RuntimeError);
        assert!(vm.error_message().contains("attempt to index local 'x' (a nil value)"));
        let result = vm.execute_string("return +");
        assert_eq!(result.unwrap_err(), LuaError::SyntaxError);
    }
}
