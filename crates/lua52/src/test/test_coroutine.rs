// Coroutine scenarios: generators, wrap, yields through protected calls
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_generator() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function range(n)
            return coroutine.wrap(function()
                for i = 1, n do coroutine.yield(i) end
            end)
        end
        local sum = 0
        for i in range(10) do sum = sum + i end
        assert(sum == 55)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_status_transitions() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local co
        co = coroutine.create(function(a)
            assert(coroutine.status(co) == "running")
            local main, ismain = coroutine.running()
            assert(main == co and ismain == false)
            local b = coroutine.yield(a + 1)
            error("fail " .. b)
        end)
        assert(coroutine.status(co) == "suspended")
        local ok, v = coroutine.resume(co, 1)
        assert(ok and v == 2)
        ok, v = coroutine.resume(co, "x")
        assert(not ok and v:find("fail x", 1, true))
        assert(coroutine.status(co) == "dead")
        ok, v = coroutine.resume(co)
        assert(not ok and v == "cannot resume dead coroutine")
        local _, ismain = coroutine.running()
        assert(ismain == true)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_yield_across_pcall_and_metamethods() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local co = coroutine.wrap(function()
            local ok, v = pcall(function()
                local got = coroutine.yield("inside")
                error("after " .. got, 0)
            end)
            coroutine.yield(tostring(ok) .. ":" .. v)
            return "end"
        end)
        assert(co() == "inside")
        assert(co("resume") == "false:after resume")
        assert(co() == "end")

        local nested = coroutine.wrap(function()
            local inner = coroutine.wrap(function()
                coroutine.yield(1)
                coroutine.yield(2)
            end)
            coroutine.yield(inner() + inner())
        end)
        assert(nested() == 3)

        local sorter = coroutine.wrap(function()
            table.sort({3, 1, 2}, function(a, b)
                coroutine.yield()
                return a < b
            end)
        end)
        local ok, msg = pcall(sorter)
        assert(not ok and msg:find("attempt to yield across a C-call boundary", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_wrap_error_propagates() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local f = coroutine.wrap(function() error({code = 1}) end)
        local ok, e = pcall(f)
        assert(not ok and type(e) == "table" and e.code == 1)
        local ok2, e2 = pcall(coroutine.yield)
        assert(not ok2 and e2:find("attempt to yield from outside a coroutine", 1, true))
        "#,
    );
    assert!(result.is_ok());
}
