// Library registration: standard libraries are declared as modules of
// named entries and loaded into the globals table and `package.loaded`.

use tracing::debug;

use crate::lua_value::{CFunction, LuaValue};
use crate::lua_vm::{LuaResult, LuaState};
use crate::stdlib;

/// Creates a value when the module loads
pub type ValueInitializer = fn(&mut LuaState) -> LuaValue;

/// Runs after the module table is filled, with the table on top of the stack
pub type ModuleInitializer = fn(&mut LuaState) -> LuaResult<()>;

/// Entry in a library module - can be a function or a value
pub enum LibraryEntry {
    Function(CFunction),
    Value(ValueInitializer),
}

/// A library module containing multiple functions and values
pub struct LibraryModule {
    pub name: &'static str,
    pub entries: Vec<(&'static str, LibraryEntry)>,
    pub initializer: Option<ModuleInitializer>,
}

impl LibraryModule {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            initializer: None,
        }
    }

    pub fn with_function(mut self, name: &'static str, func: CFunction) -> Self {
        self.entries.push((name, LibraryEntry::Function(func)));
        self
    }

    pub fn with_value(mut self, name: &'static str, value_init: ValueInitializer) -> Self {
        self.entries.push((name, LibraryEntry::Value(value_init)));
        self
    }

    pub fn with_initializer(mut self, init: ModuleInitializer) -> Self {
        self.initializer = Some(init);
        self
    }
}

/// Builder for creating library modules from functions
#[macro_export]
macro_rules! lib_module {
    ($name:expr, {
        $($item_name:expr => $item:expr),* $(,)?
    }) => {{
        let mut module = $crate::lib_registry::LibraryModule::new($name);
        $(
            module.entries.push(($item_name, $crate::lib_registry::LibraryEntry::Function($item)));
        )*
        module
    }};
}

/// Registry for all Lua standard libraries
#[derive(Default)]
pub struct LibraryRegistry {
    // kept in registration order
    modules: Vec<LibraryModule>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self { modules: Vec::new() }
    }

    pub fn register(&mut self, module: LibraryModule) {
        self.modules.push(module);
    }

    /// Load all registered libraries into the thread's globals
    pub fn load_all(&self, l: &mut LuaState) -> LuaResult<()> {
        for module in &self.modules {
            self.load_module(l, module)?;
        }
        Ok(())
    }

    /// Build the module table, publish it as a global and in
    /// `package.loaded`, then run the module initializer
    pub fn load_module(&self, l: &mut LuaState, module: &LibraryModule) -> LuaResult<()> {
        debug!(module = module.name, entries = module.entries.len(), "opening library");
        let base = l.get_top();
        let loaded = loaded_table(l)?;
        if module.name == "_G" {
            let globals = l.global().globals();
            l.push_value(globals)?;
        } else {
            l.create_table(0, module.entries.len())?;
        }
        for (name, entry) in &module.entries {
            let value = match entry {
                LibraryEntry::Function(func) => LuaValue::cfunction(*func),
                LibraryEntry::Value(value_init) => value_init(l),
            };
            l.push_value(value)?;
            l.set_field(-2, name)?;
        }
        let lib = l.value_at(-1);
        if module.name != "_G" {
            l.push_value(lib.clone())?;
            l.set_global(module.name)?;
        }
        if let Some(t) = loaded.as_table() {
            t.borrow_mut().set_str(module.name, lib);
        }
        if let Some(init) = module.initializer {
            init(l)?;
        }
        l.set_top(base as i32);
        Ok(())
    }

    pub fn get_module(&self, name: &str) -> Option<&LibraryModule> {
        self.modules.iter().find(|m| m.name == name)
    }
}

/// `registry._LOADED`, created on first use
pub fn loaded_table(l: &mut LuaState) -> LuaResult<LuaValue> {
    let registry = l.global().registry();
    let existing = registry.borrow().get_str("_LOADED");
    if existing.is_table() {
        return Ok(existing);
    }
    let t = LuaValue::table(crate::lua_value::LuaTable::new(0, 16));
    registry.borrow_mut().set_str("_LOADED", t.clone());
    Ok(t)
}

/// The Lua 5.2 standard libraries, in opening order
pub fn create_standard_registry() -> LibraryRegistry {
    let mut registry = LibraryRegistry::new();
    registry.register(stdlib::basic::create_basic_lib());
    registry.register(stdlib::package::create_package_lib());
    registry.register(stdlib::coroutine::create_coroutine_lib());
    registry.register(stdlib::table::create_table_lib());
    registry.register(stdlib::io::create_io_lib());
    registry.register(stdlib::os::create_os_lib());
    registry.register(stdlib::string::create_string_lib());
    registry.register(stdlib::bit32::create_bit32_lib());
    registry.register(stdlib::math::create_math_lib());
    registry.register(stdlib::debug::create_debug_lib());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    fn answer(l: &mut LuaState) -> LuaResult<usize> {
        l.push_number(42.0)?;
        Ok(1)
    }

    #[test]
    fn test_module_is_global_and_loaded() {
        let vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        let module = lib_module!("demo", { "answer" => answer })
            .with_value("name", |_| LuaValue::from("demo"));
        let registry = LibraryRegistry::new();
        registry.load_module(&mut l, &module).unwrap();
        assert_eq!(l.get_top(), 0);
        drop(l);
        let demo = vm.get_global("demo");
        let t = demo.as_table().unwrap().borrow();
        assert!(t.get_str("answer").is_function());
        assert_eq!(t.get_str("name"), LuaValue::from("demo"));
        let loaded = vm.global().registry().borrow().get_str("_LOADED");
        assert!(loaded.as_table().unwrap().borrow().get_str("demo").is_table());
    }

    #[test]
    fn test_standard_registry_order() {
        let registry = create_standard_registry();
        assert_eq!(registry.modules[0].name, "_G");
        assert!(registry.get_module("string").is_some());
        assert!(registry.get_module("bit32").is_some());
        assert!(registry.get_module("utf8").is_none());
    }
}
