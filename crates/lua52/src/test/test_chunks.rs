// Precompiled chunks: dump, reload and stripping
use crate::lua_value::LuaValue;
use crate::lua_vm::{LuaError, LuaVM, SafeOption};

const SOURCE: &str = r#"
local t = {}
for i = 1, 10 do t[#t + 1] = string.rep("x", i) end
local function join(sep) return table.concat(t, sep) end
return #join(","), join("")
"#;

#[test]
fn test_dump_reload_is_byte_identical() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let mut l = vm.main_state();
    l.load(SOURCE.as_bytes(), "=chunk", None).unwrap();
    let first = l.dump(false).unwrap();
    l.pop(1);
    l.load(&first, "=ignored", None).unwrap();
    let second = l.dump(false).unwrap();
    assert_eq!(first, second);
    l.pop(1);

    let stripped = {
        l.load(SOURCE.as_bytes(), "=chunk", None).unwrap();
        let bytes = l.dump(true).unwrap();
        l.pop(1);
        bytes
    };
    assert!(stripped.len() < first.len());
    drop(l);

    let results = vm.execute_named(&stripped, "=stripped").unwrap();
    assert_eq!(results[0], LuaValue::from(64.0));
}

#[test]
fn test_binary_chunks_from_lua() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local function add(a, b) return a + b end
        local bin = string.dump(add)
        assert(bin:sub(1, 4) == "\27Lua")
        local again = load(bin, "add", "b")
        assert(again(2, 3) == 5)
        local f, msg = load(bin, "add", "t")
        assert(f == nil and msg == "attempt to load a binary chunk (mode is 't')")
        f, msg = load(bin:sub(1, 20), "=trunc")
        assert(f == nil and msg:find("truncated", 1, true))
        assert(not pcall(string.dump, print))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_syntax_error_status() {
    let vm = LuaVM::new(SafeOption::default());
    let mut l = vm.main_state();
    let status = l.load(b"x = = 1", "=bad", None);
    assert_eq!(status, Err(LuaError::SyntaxError));
    let msg = l.value_at(-1);
    assert!(msg.as_string().unwrap().to_str_lossy().starts_with("bad:1:"));
}

#[test]
fn test_loaded_chunks_see_globals() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        assert(load("return print")() == print)
        local parts = {"return ", "string"}
        local i = 0
        assert(load(function() i = i + 1; return parts[i] end)() == string)
        -- an explicit nil still replaces _ENV
        local f = load("return print", "=nilenv", "t", nil)
        assert(not pcall(f))

        local name = os.tmpname()
        local out = assert(io.open(name, "w"))
        out:write("shared = (shared or 0) + 1\nreturn type(print)")
        out:close()
        assert(loadfile(name)() == "function" and shared == 1)
        local env = {}
        loadfile(name, "t", env)
        assert(pcall(loadfile(name, "t", {type = type})))
        assert(shared == 1)
        os.remove(name)
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_string_chunk_names_in_syntax_errors() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local f, msg = load("x=")
        assert(f == nil and msg == [[[string "x="]:1: unexpected symbol near <eof>]])
        f, msg = load("local a\nx=")
        assert(msg == [[[string "local a..."]:2: unexpected symbol near <eof>]])
        f, msg = load("x=", "=named")
        assert(msg == "named:1: unexpected symbol near <eof>")
        local long = string.rep("local a = 1 ", 50) .. "x="
        f, msg = load(long)
        assert(#msg < 100 and msg:find('^%[string "local a = 1'))
        "#,
    );
    assert!(result.is_ok());
}

#[test]
fn test_escape_byte_selects_binary_loader() {
    let mut vm = LuaVM::new(SafeOption::default());
    vm.open_libs();
    let result = vm.execute_string(
        r#"
        local f, msg = load("\27Lux")
        assert(f == nil and msg == "binary string: not a precompiled chunk")
        f, msg = load("\27junk", "=bin")
        assert(f == nil and msg == "bin: not a precompiled chunk")
        f, msg = load("\27", "=bin", "t")
        assert(f == nil and msg == "attempt to load a binary chunk (mode is 't')")
        "#,
    );
    assert!(result.is_ok());
}
