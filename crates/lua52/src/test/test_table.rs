// Table library and table constructor tests
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_sort() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local t = {5, 2, 8, 1, 9, 3}
        table.sort(t)
        assert(table.concat(t, " ") == "1 2 3 5 8 9")
        table.sort(t, function(a, b) return a > b end)
        assert(table.concat(t, " ") == "9 8 5 3 2 1")
        local words = {"pear", "apple", "fig"}
        table.sort(words)
        assert(words[1] == "apple" and words[3] == "pear")
        local big = {}
        for i = 1, 200 do big[i] = (i * 37) % 101 end
        table.sort(big)
        for i = 2, 200 do assert(big[i - 1] <= big[i]) end
        local ok, msg = pcall(table.sort, {1, "x", 2})
        assert(not ok and msg:find("attempt to compare", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_insert_remove_concat() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local t = {}
        table.insert(t, "a")
        table.insert(t, "c")
        table.insert(t, 2, "b")
        assert(table.concat(t) == "abc")
        assert(table.concat(t, ", ", 2, 3) == "b, c")
        assert(table.remove(t) == "c")
        assert(table.remove(t, 1) == "a")
        assert(#t == 1 and t[1] == "b")
        assert(table.remove({}) == nil)
        local ok, msg = pcall(table.insert, t, 5, "x")
        assert(not ok and msg:find("position out of bounds", 1, true))
        ok, msg = pcall(table.insert, t, 1, 2, 3)
        assert(not ok and msg:find("wrong number of arguments to 'insert'", 1, true))
        ok, msg = pcall(table.concat, {1, {}, 3})
        assert(not ok and msg:find("invalid value (at index 2) in table for 'concat'", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_pack_unpack() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r##"
        local p = table.pack(1, nil, 3)
        assert(p.n == 3 and p[1] == 1 and p[3] == 3)
        local a, b, c = table.unpack({1, 2, 3})
        assert(a == 1 and b == 2 and c == 3)
        local x, y = table.unpack({1, 2, 3}, 2)
        assert(x == 2 and y == 3)
        assert(select("#", table.unpack({}, 1, 3)) == 3)
        assert(unpack == table.unpack)
        assert(not pcall(table.unpack, {}, 1, 1e8))
        "##,
    );
    assert!(result.is_ok());
}

#[test]
fn test_constructors_and_length() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function three() return 1, 2, 3 end
        local t = {three()}
        assert(#t == 3)
        t = {three(), three()}
        assert(#t == 4)
        t = {(three())}
        assert(#t == 1)
        local big = {}
        for i = 1, 100 do big[#big + 1] = i end
        assert(#big == 100 and big[100] == 100)
        local mixed = {1, 2, x = "y", [10] = "ten", ["key with space"] = true}
        assert(mixed.x == "y" and mixed[10] == "ten" and mixed["key with space"])
        local n = 0
        for _ in pairs(mixed) do n = n + 1 end
        assert(n == 5)
        local nan = 0 / 0
        assert(not pcall(function() local q = {}; q[nan] = 1 end))
        assert(not pcall(rawset, {}, nil, 1))
        local f = {}
        f[1.0] = "int"
        assert(f[1] == "int")
        "#,
    );
    assert!(result.is_ok());
}
