// Error values, levels, handlers and stack state after protected calls
use crate::lua_value::LuaValue;
use crate::lua_vm::lua_limits::LUA_MULTRET;
use crate::lua_vm::{LuaError, LuaVM, SafeOption, ThreadStatus};

#[test]
fn test_pcall_boom_leaves_two_results() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let mut l = vm.main_state();
    let base = l.get_top();
    l.get_global("pcall").unwrap();
    l.load(b"error('boom', 0)", "=boom", None).unwrap();
    l.call(1, LUA_MULTRET).unwrap();
    assert_eq!(l.get_top(), base + 2);
    assert_eq!(l.value_at(-2), LuaValue::Boolean(false));
    assert_eq!(l.value_at(-1), LuaValue::from("boom"));
}

#[test]
fn test_failed_pcall_leaves_error_value() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let mut l = vm.main_state();
    let base = l.get_top();
    let depth = l.call_depth();
    l.load(b"local t = {code = 7}; error(t)", "=t", None).unwrap();
    let status = l.pcall(0, 0, 0).unwrap();
    assert_eq!(status, ThreadStatus::Error(LuaError::RuntimeError));
    assert_eq!(l.get_top(), base + 1);
    assert_eq!(l.call_depth(), depth);
    let err = l.value_at(-1);
    let code = err.as_table().unwrap().borrow().get_str("code");
    assert_eq!(code, LuaValue::from(7.0));
}

#[test]
fn test_error_levels_and_positions() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function lvl1() error("one") end
        local function lvl2() error("two", 2) end
        local function caller() lvl2() end
        local ok, msg = pcall(lvl1)
        assert(msg:find(":2: one", 1, true))
        ok, msg = pcall(caller)
        assert(msg:find(":4: two", 1, true))
        ok, msg = pcall(error)
        assert(ok == false and msg == nil)
        ok, msg = pcall(function() local x = nil; return x.field end)
        assert(msg:find("attempt to index local 'x' (a nil value)", 1, true))
        ok, msg = pcall(function() return undefinedglobal.field end)
        assert(msg:find("attempt to index global 'undefinedglobal' (a nil value)", 1, true))
        ok, msg = pcall(function() return #5 end)
        assert(msg:find("attempt to get length of a number value", 1, true))
        ok, msg = pcall(function() return {} < {} end)
        assert(msg:find("attempt to compare two table values", 1, true))
        ok, msg = pcall(function() return "a" .. {} end)
        assert(msg:find("attempt to concatenate a table value", 1, true))
        ok, msg = pcall(string.rep)
        assert(msg:find("bad argument #1 to 'string.rep'", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_xpcall_handler() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local ok, v = xpcall(function() error("raw", 0) end, function(m) return "handled " .. m end)
        assert(not ok and v == "handled raw")
        ok, v = xpcall(function() error("deep") end, debug.traceback)
        assert(not ok and v:find("stack traceback:", 1, true))
        ok, v = xpcall(function(a, b) return a + b end, print, 2, 3)
        assert(ok and v == 5)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_stack_overflow_is_catchable() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function inf(n) return 1 + inf(n + 1) end
        local ok, msg = pcall(inf, 1)
        assert(not ok and msg:find("stack overflow", 1, true))
        local ok2 = pcall(string.rep, "x", -1)
        assert(ok2)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_execute_string_reports_message() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string("error('top level failure', 0)");
    assert_eq!(result, Err(LuaError::RuntimeError));
    assert_eq!(vm.error_message(), "top level failure");
    let result = vm.execute_string("return +");
    assert_eq!(result, Err(LuaError::SyntaxError));
    assert!(vm.error_message().contains("unexpected symbol"));
}
