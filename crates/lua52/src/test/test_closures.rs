// Closure and upvalue tests
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_counter_closure() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        "local function mk() local x=0; return function() x=x+1; return x end end; local c=mk(); return c(),c(),c()",
    );
    assert_eq!(
        result.unwrap(),
        vec![LuaValue::from(1.0), LuaValue::from(2.0), LuaValue::from(3.0)]
    );
}

#[test]
fn test_shared_upvalue_after_close() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function make()
            local value = 10
            local function get() return value end
            local function set(v) value = v end
            return get, set
        end
        local get, set = make()
        assert(get() == 10)
        set(20)
        assert(get() == 20)
        local get2, set2 = make()
        set2(1)
        assert(get() == 20 and get2() == 1)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_loop_variables_are_fresh() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local fns = {}
        for i = 1, 3 do
            fns[i] = function() return i end
        end
        assert(fns[1]() == 1 and fns[2]() == 2 and fns[3]() == 3)

        local gens = {}
        for k, v in ipairs({"a", "b"}) do
            gens[k] = function() return v end
        end
        assert(gens[1]() == "a" and gens[2]() == "b")

        local whiles = {}
        local n = 0
        while n < 2 do
            n = n + 1
            local captured = n * 10
            whiles[n] = function() return captured end
        end
        assert(whiles[1]() == 10 and whiles[2]() == 20)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_nested_upvalues() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function outer(x)
            return function(y)
                return function(z)
                    x = x + 1
                    return x + y + z
                end
            end
        end
        local f = outer(1)(2)
        assert(f(3) == 7)
        assert(f(3) == 8)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_recursive_local_function() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function fact(n)
            if n <= 1 then return 1 end
            return n * fact(n - 1)
        end
        assert(fact(10) == 3628800)
        local function loop(n, acc)
            if n == 0 then return acc end
            return loop(n - 1, acc + 1)
        end
        -- deep tail recursion runs in constant frames
        assert(loop(100000, 0) == 100000)
        "#,
    );
    assert!(result.is_ok());
}
