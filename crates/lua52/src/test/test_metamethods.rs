// Metatable events
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_add_metamethod() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local mt = {__add = function(a, b) return 42 end}
        local t = setmetatable({}, mt)
        return t + 1, 1 + t, t + t
        "#,
    );
    let expected = LuaValue::from(42.0);
    assert_eq!(result.unwrap(), vec![expected.clone(), expected.clone(), expected]);
}

#[test]
fn test_arithmetic_type_error() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local a, b = setmetatable({}, {}), setmetatable({}, {})
        local ok, msg = pcall(function() return a + b end)
        assert(not ok)
        local text = msg:gsub("^[^:]*:%d+: ", "")
        assert(text:sub(1, 32) == "attempt to perform arithmetic on")
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_index_and_newindex_chains() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local base = {greet = function(self) return "hi " .. self.name end}
        base.__index = base
        local derived = setmetatable({name = "lua"}, base)
        assert(derived:greet() == "hi lua")

        local log = {}
        local proxy = setmetatable({}, {
            __index = function(_, k) return k .. "!" end,
            __newindex = function(t, k, v) log[#log + 1] = k; rawset(t, k, v) end,
        })
        assert(proxy.abc == "abc!")
        proxy.x = 1
        proxy.x = 2
        assert(#log == 1 and proxy.x == 2)

        local store = {}
        local redirect = setmetatable({}, {__newindex = store})
        redirect.k = "v"
        assert(rawget(redirect, "k") == nil and store.k == "v")
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_comparison_call_concat_len() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local V = {}
        V.__index = V
        V.__eq = function(a, b) return a.v == b.v end
        V.__lt = function(a, b) return a.v < b.v end
        V.__le = function(a, b) return a.v <= b.v end
        V.__concat = function(a, b)
            local x = type(a) == "table" and a.v or a
            local y = type(b) == "table" and b.v or b
            return x .. "&" .. y
        end
        V.__call = function(self, x) return self.v * x end
        V.__len = function(self) return self.v end
        V.__unm = function(self) return -self.v end
        V.__tostring = function(self) return "V(" .. self.v .. ")" end
        local function new(v) return setmetatable({v = v}, V) end
        local a, b = new(1), new(2)
        assert(a ~= b and a == new(1))
        assert(a < b and b > a and a <= new(1) and b >= a)
        assert(a .. b == "1&2" and a .. "s" == "1&s" and 0 .. b == "0&2")
        assert(b(21) == 42)
        assert(#b == 2 and -b == -2)
        assert(tostring(a) == "V(1)")
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_protected_metatable() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local t = setmetatable({}, {__metatable = "locked"})
        assert(getmetatable(t) == "locked")
        local ok, msg = pcall(setmetatable, t, {})
        assert(not ok and msg:find("cannot change a protected metatable", 1, true))
        assert(getmetatable("abc").__index == string)
        assert(("abc"):upper() == "ABC")
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_pairs_and_ipairs_metamethods() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local seen = {}
        for i, v in ipairs({10, 20, 30}) do seen[#seen + 1] = i .. "=" .. v end
        assert(table.concat(seen, ",") == "1=10,2=20,3=30")

        local custom = setmetatable({}, {__pairs = function(t)
            return function(_, k) if not k then return 1, "one" end end, t, nil
        end})
        local n = 0
        for k, v in pairs(custom) do n = n + 1; assert(k == 1 and v == "one") end
        assert(n == 1)

        local counted = setmetatable({}, {__ipairs = function(t)
            return function(_, i) if i < 2 then return i + 1, i + 1 end end, t, 0
        end})
        local total = 0
        for _, v in ipairs(counted) do total = total + v end
        assert(total == 3)
        "#,
    );
    assert!(result.is_ok());
}
