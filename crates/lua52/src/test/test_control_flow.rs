// Loops, goto and numeric for edge cases
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_numeric_for_counts() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function count(a, b, c)
            local n = 0
            for _ = a, b, c do n = n + 1 end
            return n
        end
        assert(count(1, 10, 1) == 10)
        assert(count(10, 1, -1) == 10)
        assert(count(1, 0, 1) == 0)
        assert(count(1, 2, 0.5) == 3)
        assert(count("1", "3", "1") == 3)
        local last
        for i = 1, math.huge do
            last = i
            if i == 5 then break end
        end
        assert(last == 5)
        local ok, msg = pcall(count, 1, 10, 0)
        assert(not ok and msg:find("'for' step is zero", 1, true))
        ok, msg = pcall(count, 1, "x", 1)
        assert(not ok and msg:find("'for' limit must be a number", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_goto_continue() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local odd = {}
        for i = 1, 6 do
            if i % 2 == 0 then goto continue end
            odd[#odd + 1] = i
            ::continue::
        end
        assert(#odd == 3 and odd[3] == 5)

        local n = 0
        ::top::
        n = n + 1
        if n < 3 then goto top end
        assert(n == 3)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_goto_errors() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local f, msg = load("goto nowhere")
        assert(f == nil and msg:find("no visible label 'nowhere'", 1, true))
        f, msg = load("::a:: ::a::")
        assert(f == nil and msg:find("label 'a' already defined", 1, true))
        f, msg = load("goto l; local x; ::l:: print(x)")
        assert(f == nil and msg:find("jumps into the scope of local 'x'", 1, true))
        f, msg = load("break")
        assert(f == nil)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_repeat_scope_and_while() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local i = 0
        repeat
            local done = i >= 3
            i = i + 1
        until done
        assert(i == 4)

        local s = 0
        local k = 10
        while k > 0 do
            s = s + k
            k = k - 1
        end
        assert(s == 55)

        local x = nil
        local y = x and x.field or "default"
        assert(y == "default")
        assert((false or nil) == nil)
        assert((1 and 2) == 2)
        assert(not nil == true)
        "#,
    );
    assert!(result.is_ok());
}
