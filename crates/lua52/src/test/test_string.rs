// String library scenarios
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaVM, SafeOption};

#[test]
fn test_gsub_with_function() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"return string.gsub("hello world", "%w+", function(w) return w:upper() end)"#,
    );
    assert_eq!(result.unwrap(), vec![LuaValue::from("HELLO WORLD"), LuaValue::from(2.0)]);
}

#[test]
fn test_format_directives() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(string.format("%d items", 3) == "3 items")
        assert(string.format("%5.2f|%-5d|%05d", 3.14159, 42, 7) == " 3.14|42   |00007")
        assert(string.format("%x %X %o", 255, 255, 8) == "ff FF 10")
        assert(string.format("%g %g", 1e20, 0.1) == "1e+20 0.1")
        assert(string.format("%s %s", nil, true) == "nil true")
        assert(string.format("%q", 'a "quoted"\n') == '"a \\"quoted\\"\\\n"')
        assert(string.format("%.3s", "abcdef") == "abc")
        assert(string.format("%c%c", 76, 117) == "Lu")
        assert(string.format("%%") == "%")
        local ok, msg = pcall(string.format, "%d", "x")
        assert(not ok and msg:find("bad argument #2 to 'string.format'", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_find_match_gmatch() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(string.find("hello", "l") == 3)
        assert(string.find("a.b", ".", 1, true) == 2)
        local s, e, cap = string.find("key = value", "(%w+)%s*=")
        assert(s == 1 and e == 5 and cap == "key")
        assert(string.match("2024-01-15", "(%d+)-(%d+)-(%d+)") == "2024")
        assert(string.match("  trim  ", "^%s*(.-)%s*$") == "trim")
        assert(string.match("f(a(b)c)", "%b()") == "(a(b)c)")
        assert(string.match("THE (quick) fox", "%f[%a]%a+", 5) == "quick")
        assert(string.match("hello", "()ll()") == 3)
        local words = {}
        for w in string.gmatch("one two  three", "%a+") do words[#words + 1] = w end
        assert(#words == 3 and words[3] == "three")
        local kv = {}
        for k, v in ("a=1, b=2"):gmatch("(%w+)=(%w+)") do kv[k] = v end
        assert(kv.a == "1" and kv.b == "2")
        assert(("abc"):gsub("", "-") == "-a-b-c-")
        assert(("hello world"):gsub("o", {o = "0"}) == "hell0 w0rld")
        assert(("abc"):gsub("%w", "%0%0") == "aabbcc")
        local ok, msg = pcall(string.find, "x", "[a")
        assert(not ok and msg:find("malformed pattern (missing ']')", 1, true))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_basic_string_functions() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(("abc"):len() == 3 and #"" == 0)
        assert(("Hello"):lower() == "hello" and ("Hello"):upper() == "HELLO")
        assert(("abc"):reverse() == "cba")
        assert(("ab"):rep(3) == "ababab" and ("ab"):rep(3, ",") == "ab,ab,ab")
        assert(("hello"):sub(2, 4) == "ell" and ("hello"):sub(-3) == "llo")
        assert(("hello"):sub(0) == "hello" and ("hello"):sub(10) == "")
        assert(string.byte("A") == 65)
        local a, b = string.byte("xyz", 1, 2)
        assert(a == 120 and b == 121)
        assert(string.char(104, 105) == "hi")
        assert(("\0a\0"):len() == 3)
        "#,
    );
    assert!(result.is_ok());
}
