// Module loading through package.preload and package.path
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_require_preload() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local calls = 0
        package.preload.mymod = function(name)
            calls = calls + 1
            assert(name == "mymod")
            return {value = 42}
        end
        local m = require("mymod")
        assert(m.value == 42)
        assert(require("mymod") == m and calls == 1)
        assert(package.loaded.mymod == m)
        assert(require("string") == string)
        package.preload.nothing = function() end
        assert(require("nothing") == true)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_require_from_path() {
    let dir = std::env::temp_dir().join(format!("lua52_require_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("greeter.lua"), "local name = ...\nreturn {hello = function() return 'hello from ' .. name end}\n").unwrap();

    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let script = format!(
        r#"
        package.path = "{}/?.lua"
        local g = require("greeter")
        assert(g.hello() == "hello from greeter")
        assert(package.searchpath("greeter", package.path):find("greeter.lua", 1, true))
        local none, msg = package.searchpath("absent", package.path)
        assert(none == nil and msg:find("no file", 1, true))
        local ok, err = pcall(require, "absent.module")
        assert(not ok and err:find("module 'absent.module' not found:", 1, true))
        assert(err:find("no field package.preload['absent.module']", 1, true))
        "#,
        dir.display()
    );
    let result = vm.execute_string(&script);
    std::fs::remove_dir_all(&dir).ok();
    assert!(result.is_ok());
}

#[test]
fn test_package_fields() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(type(package.path) == "string" and type(package.cpath) == "string")
        assert(package.config:sub(1, 1) == "/")
        assert(#package.searchers == 4 and package.loaders == package.searchers)
        local f, msg, where = package.loadlib("libfoo.so", "luaopen_foo")
        assert(f == nil and where == "absent")
        "#,
    );
    assert!(result.is_ok());
}
