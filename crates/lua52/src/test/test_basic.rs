// Tests for the base library and the embedding entry points
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_hello_world() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(r#"print("Hello World!")"#);
    assert!(result.is_ok());
}

#[test]
fn test_fibonacci() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        return fib(10), fib(20)
        "#,
    );
    assert_eq!(result.unwrap(), vec![LuaValue::from(55.0), LuaValue::from(6765.0)]);
}

#[test]
fn test_type_and_conversions() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(type(nil) == "nil" and type(true) == "boolean" and type(1) == "number")
        assert(type("") == "string" and type({}) == "table" and type(print) == "function")
        assert(type(coroutine.create(print)) == "thread")
        assert(tonumber("0x10") == 16)
        assert(tonumber("  12  ") == 12)
        assert(tonumber("1e2") == 100)
        assert(tonumber("0x1p4") == 16)
        assert(tonumber("z", 36) == 35)
        assert(tonumber("ff", 16) == 255)
        assert(tonumber("inf") == nil and tonumber("nan") == nil)
        assert(tonumber("12a") == nil)
        assert(tostring(10) == "10")
        assert(tostring(1/3) == "0.33333333333333")
        assert(tostring(1e15) == "1e+15")
        assert(tostring(-0.0) == "-0")
        assert(tostring(nil) == "nil" and tostring(true) == "true")
        assert(10 .. "" == "10")
        assert("10" + 5 == 15)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_select_and_varargs() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r##"
        assert(select("#") == 0)
        assert(select("#", nil, nil) == 2)
        assert(select(2, "a", "b", "c") == "b")
        assert(select(-1, "a", "b", "c") == "c")
        local function count(...) return select("#", ...) end
        assert(count(1, nil, 3, nil) == 4)
        local function pack2(...) return {...} end
        assert(#pack2(1, 2, 3) == 3)
        local ok = pcall(select, 0, 1)
        assert(not ok)
        "##,
    );
    assert!(result.is_ok());
}

#[test]
fn test_raw_access() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local t = setmetatable({}, {
            __index = function() return "meta" end,
            __newindex = function() error("blocked") end,
            __len = function() return 99 end,
        })
        assert(t.x == "meta" and rawget(t, "x") == nil)
        rawset(t, "x", 1)
        assert(t.x == 1)
        assert(#t == 99 and rawlen(t) == 0)
        assert(rawlen("abc") == 3)
        assert(rawequal(t, t) and not rawequal(t, {}))
        assert(not pcall(function() t.y = 2 end))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_load_variants() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local f = load("return 1 + 1")
        assert(f() == 2)
        local env = {y = 5}
        local g = load("x = y * 2", "chunk", "t", env)
        g()
        assert(env.x == 10 and x == nil)
        local parts = {"return ", "'pie", "ces'"}
        local i = 0
        local h = load(function() i = i + 1; return parts[i] end)
        assert(h() == "pieces")
        local bad, msg = load("return +")
        assert(bad == nil and msg:find("unexpected symbol", 1, true))
        local nope, why = load("return 1", "=text", "b")
        assert(nope == nil and why == "attempt to load a text chunk (mode is 'b')")
        assert(loadstring("return 3")() == 3)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_collectgarbage_options() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(collectgarbage() == 0)
        local kb, bytes = collectgarbage("count")
        assert(type(kb) == "number" and type(bytes) == "number")
        assert(collectgarbage("step") ~= nil)
        assert(collectgarbage("isrunning") ~= nil)
        assert(not pcall(collectgarbage, "bogus"))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_globals_from_host() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    vm.set_global("answer", LuaValue::from(42.0));
    let result = vm.execute_string("result = answer * 2; return _VERSION");
    assert_eq!(result.unwrap(), vec![LuaValue::from("Lua 5.2")]);
    assert_eq!(vm.get_global("result"), LuaValue::from(84.0));
    assert!(vm.get_global("_G").is_table());
}
