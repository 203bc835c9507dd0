// String library
// Implements: byte, char, dump, find, format, gmatch, gsub, len, lower,
// match, rep, reverse, sub, upper
mod pattern;
mod string_format;

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaString, LuaValue, LuaValueKind};
use crate::lua_vm::lua_limits::{MAX_STRING_SIZE, lua_upvalueindex};
use crate::lua_vm::{LuaResult, LuaState};
use pattern::{CaptureValue, MatchState};

pub fn create_string_lib() -> LibraryModule {
    crate::lib_module!("string", {
        "byte" => string_byte,
        "char" => string_char,
        "dump" => string_dump,
        "find" => string_find,
        "format" => string_format::string_format,
        "gmatch" => string_gmatch,
        "gsub" => string_gsub,
        "len" => string_len,
        "lower" => string_lower,
        "match" => string_match,
        "rep" => string_rep,
        "reverse" => string_reverse,
        "sub" => string_sub,
        "upper" => string_upper,
    })
    .with_initializer(set_string_metatable)
}

/// Strings index the string table: `("x"):upper()`
fn set_string_metatable(l: &mut LuaState) -> LuaResult<()> {
    l.create_table(0, 1)?;
    l.push_string("")?;
    l.push_index(-2)?;
    l.set_metatable(-2)?;
    l.pop(1);
    l.push_index(-2)?;
    l.set_field(-2, "__index")?;
    l.pop(1);
    Ok(())
}

/// Translate a relative string position: negative means back from end
fn posrelat(pos: i64, len: usize) -> i64 {
    if pos >= 0 {
        pos
    } else if pos.unsigned_abs() > len as u64 {
        0
    } else {
        len as i64 + pos + 1
    }
}

fn string_len(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    l.push_integer(s.len() as i64)?;
    Ok(1)
}

fn string_sub(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let len = s.len();
    let start = posrelat(l.check_integer(2)?, len).max(1);
    let end = posrelat(l.opt_integer(3, -1)?, len).min(len as i64);
    if start <= end {
        l.push_string(&s.as_bytes()[start as usize - 1..end as usize])?;
    } else {
        l.push_string("")?;
    }
    Ok(1)
}

fn string_reverse(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    l.push_string(bytes)?;
    Ok(1)
}

fn string_lower(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    l.push_string(s.as_bytes().to_ascii_lowercase())?;
    Ok(1)
}

fn string_upper(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    l.push_string(s.as_bytes().to_ascii_uppercase())?;
    Ok(1)
}

fn string_rep(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let n = l.check_integer(2)?;
    let sep = l.opt_lstring(3, "")?;
    if n <= 0 {
        l.push_string("")?;
        return Ok(1);
    }
    let n = n as usize;
    let unit = s.len() + sep.len();
    if unit.checked_mul(n).is_none_or(|total| total >= MAX_STRING_SIZE) {
        return Err(l.error("resulting string too large"));
    }
    let mut out = Vec::with_capacity(unit * n - sep.len());
    for i in 0..n {
        if i > 0 {
            out.extend_from_slice(sep.as_bytes());
        }
        out.extend_from_slice(s.as_bytes());
    }
    l.push_string(out)?;
    Ok(1)
}

fn string_byte(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let len = s.len();
    let posi = posrelat(l.opt_integer(2, 1)?, len);
    let pose = posrelat(l.opt_integer(3, posi)?, len).min(len as i64);
    let posi = posi.max(1);
    if posi > pose {
        // empty interval; return no values
        return Ok(0);
    }
    let n = (pose - posi + 1) as usize;
    l.check_stack_msg(n, "string slice too long")?;
    for &b in &s.as_bytes()[posi as usize - 1..pose as usize] {
        l.push_integer(b as i64)?;
    }
    Ok(n)
}

fn string_char(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    let mut out = Vec::with_capacity(n);
    for i in 1..=n {
        let c = l.check_integer(i)?;
        l.arg_check((0..=255).contains(&c), i, "value out of range")?;
        out.push(c as u8);
    }
    l.push_string(out)?;
    Ok(1)
}

fn string_dump(l: &mut LuaState) -> LuaResult<usize> {
    l.check_type(1, LuaValueKind::Function)?;
    l.set_top(1);
    match l.dump(false) {
        Some(bytes) => {
            l.push_string(bytes)?;
            Ok(1)
        }
        None => Err(l.error("unable to dump given function")),
    }
}

// ===== Pattern matching =====

/// Raise a pattern error as a Lua error
fn pattern_result<T>(l: &mut LuaState, r: Result<T, String>) -> LuaResult<T> {
    r.map_err(|msg| l.error(msg))
}

fn push_capture_value(l: &mut LuaState, cv: CaptureValue<'_>) -> LuaResult<()> {
    match cv {
        CaptureValue::Str(bytes) => l.push_string(bytes),
        CaptureValue::Position(pos) => l.push_integer(pos as i64),
    }
}

fn push_one_capture(l: &mut LuaState, ms: &MatchState<'_>, i: usize, s: usize, e: usize) -> LuaResult<()> {
    let cv = pattern_result(l, ms.get_capture(i, s, e))?;
    push_capture_value(l, cv)
}

/// Push the captures of a match of `src[s..e]`; with no captures and a
/// known start, the whole match
fn push_captures(l: &mut LuaState, ms: &MatchState<'_>, s: Option<usize>, e: usize) -> LuaResult<usize> {
    let n = ms.capture_count(s.is_some());
    l.check_stack_msg(n, "too many captures")?;
    for i in 0..n {
        push_one_capture(l, ms, i, s.unwrap_or(0), e)?;
    }
    Ok(n)
}

fn str_find_aux(l: &mut LuaState, find: bool) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let p = l.check_lstring(2)?;
    let (src, pat) = (s.as_bytes(), p.as_bytes());
    let init = posrelat(l.opt_integer(3, 1)?, src.len()).max(1);
    if init > src.len() as i64 + 1 {
        // start after string's end: cannot find anything
        l.push_nil()?;
        return Ok(1);
    }
    let init = init as usize - 1;
    if find && (l.to_boolean(4) || pattern::is_plain_pattern(pat)) {
        if let Some(pos) = pattern::find_plain(src, pat, init) {
            l.push_integer(pos as i64 + 1)?;
            l.push_integer((pos + pat.len()) as i64)?;
            return Ok(2);
        }
    } else {
        let anchor = pat.first() == Some(&b'^');
        let mut ms = MatchState::new(src, if anchor { &pat[1..] } else { pat });
        let mut s1 = init;
        loop {
            ms.reset();
            let res = ms.do_match(s1, 0);
            if let Some(e) = pattern_result(l, res)? {
                if find {
                    l.push_integer(s1 as i64 + 1)?;
                    l.push_integer(e as i64)?;
                    return Ok(push_captures(l, &ms, None, 0)? + 2);
                }
                return push_captures(l, &ms, Some(s1), e);
            }
            s1 += 1;
            if anchor || s1 > src.len() {
                break;
            }
        }
    }
    l.push_nil()?;
    Ok(1)
}

fn string_find(l: &mut LuaState) -> LuaResult<usize> {
    str_find_aux(l, true)
}

fn string_match(l: &mut LuaState) -> LuaResult<usize> {
    str_find_aux(l, false)
}

/// Iterator state lives in the upvalues: subject, pattern, next position
fn gmatch_aux(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.value_at(lua_upvalueindex(1)).to_plain_string();
    let p = l.value_at(lua_upvalueindex(2)).to_plain_string();
    let start = l.value_at(lua_upvalueindex(3)).as_number().unwrap_or(0.0) as usize;
    let src = s.as_bytes();
    let mut ms = MatchState::new(src, p.as_bytes());
    for pos in start..=src.len() {
        ms.reset();
        let res = ms.do_match(pos, 0);
        if let Some(e) = pattern_result(l, res)? {
            // an empty match advances at least one position
            let next = if e == pos { e + 1 } else { e };
            l.push_integer(next as i64)?;
            l.replace(lua_upvalueindex(3));
            return push_captures(l, &ms, Some(pos), e);
        }
    }
    Ok(0)
}

fn string_gmatch(l: &mut LuaState) -> LuaResult<usize> {
    l.check_lstring(1)?;
    l.check_lstring(2)?;
    l.set_top(2);
    l.push_integer(0)?;
    l.push_rust_closure(gmatch_aux, 3)?;
    Ok(1)
}

/// Expand a replacement string: `%0`-`%9` are captures, `%%` is '%'
fn add_s(l: &mut LuaState, out: &mut Vec<u8>, ms: &MatchState<'_>, news: &[u8], s: usize, e: usize) -> LuaResult<()> {
    let mut i = 0;
    while i < news.len() {
        let c = news[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        match news.get(i).copied() {
            Some(d) if d.is_ascii_digit() => {
                if d == b'0' {
                    out.extend_from_slice(&ms.src[s..e]);
                } else {
                    push_one_capture(l, ms, (d - b'1') as usize, s, e)?;
                    let v = l.pop_value();
                    out.extend_from_slice(v.to_plain_string().as_bytes());
                }
            }
            Some(b'%') => out.push(b'%'),
            _ => return Err(l.error("invalid use of '%' in replacement string")),
        }
        i += 1;
    }
    Ok(())
}

fn add_value(
    l: &mut LuaState,
    out: &mut Vec<u8>,
    ms: &MatchState<'_>,
    repl: &LuaValue,
    s: usize,
    e: usize,
) -> LuaResult<()> {
    match repl {
        LuaValue::Function(_) => {
            l.push_value(repl.clone())?;
            let n = push_captures(l, ms, Some(s), e)?;
            l.call(n, 1)?;
        }
        LuaValue::Table(_) => {
            push_one_capture(l, ms, 0, s, e)?;
            l.get_table(3)?;
        }
        _ => {
            let news = repl.to_plain_string();
            return add_s(l, out, ms, news.as_bytes(), s, e);
        }
    }
    match l.pop_value() {
        // nil or false keeps the original text
        LuaValue::Nil | LuaValue::Boolean(false) => out.extend_from_slice(&ms.src[s..e]),
        v @ (LuaValue::String(_) | LuaValue::Number(_)) => out.extend_from_slice(v.to_plain_string().as_bytes()),
        v => {
            return Err(l.error(format!("invalid replacement value (a {})", v.type_name())));
        }
    }
    Ok(())
}

fn string_gsub(l: &mut LuaState) -> LuaResult<usize> {
    let s = l.check_lstring(1)?;
    let p = l.check_lstring(2)?;
    let tr = l.type_at(3);
    let max_s = match l.opt_integer(4, s.len() as i64 + 1)? {
        // a negative limit wraps around to "unlimited"
        n if n < 0 => usize::MAX,
        n => n as usize,
    };
    l.arg_check(
        matches!(
            tr,
            LuaValueKind::Number | LuaValueKind::String | LuaValueKind::Function | LuaValueKind::Table
        ),
        3,
        "string/function/table expected",
    )?;
    let repl = l.value_at(3);
    let (src, pat) = (s.as_bytes(), p.as_bytes());
    let anchor = pat.first() == Some(&b'^');
    let mut ms = MatchState::new(src, if anchor { &pat[1..] } else { pat });
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0;
    let mut n = 0;
    while n < max_s {
        ms.reset();
        let res = ms.do_match(pos, 0);
        let e = pattern_result(l, res)?;
        if let Some(e) = e {
            n += 1;
            add_value(l, &mut out, &ms, &repl, pos, e)?;
        }
        match e {
            Some(e) if e > pos => pos = e,
            _ if pos < src.len() => {
                out.push(src[pos]);
                pos += 1;
            }
            _ => break,
        }
        if anchor {
            break;
        }
    }
    out.extend_from_slice(&src[pos..]);
    l.push_string(LuaString::from(out))?;
    l.push_integer(n as i64)?;
    Ok(2)
}

#[cfg(test)]
mod tests {
    use super::posrelat;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_posrelat() {
        assert_eq!(posrelat(3, 10), 3);
        assert_eq!(posrelat(-1, 10), 10);
        assert_eq!(posrelat(-10, 10), 1);
        assert_eq!(posrelat(-11, 10), 0);
    }

    #[test]
    fn test_basic_functions() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r##"
            assert(string.len("abc") == 3 and #"" == 0)
            assert(("hello"):sub(2, 3) == "el")
            assert(("hello"):sub(-3) == "llo")
            assert(("hello"):sub(10) == "")
            assert(("abc"):rep(3, ",") == "abc,abc,abc")
            assert(("x"):rep(0) == "")
            assert(("Hello"):upper() == "HELLO" and ("Hello"):lower() == "hello")
            assert(("abc"):reverse() == "cba")
            local a, b, c = ("ABC"):byte(1, -1)
            assert(a == 65 and b == 66 and c == 67)
            assert(string.char(72, 105) == "Hi")
            assert(select("#", ("abc"):byte(10)) == 0)
            local ok, msg = pcall(string.char, 256)
            assert(not ok and msg:find("value out of range", 1, true))
            "##,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_find_and_match() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            assert(string.find("hello world", "o w") == 5)
            local s, e = string.find("hello", "l+")
            assert(s == 3 and e == 4)
            assert(string.find("a.b", ".", 1, true) == 2)
            assert(string.find("abc", "b", -1) == nil)
            assert(string.find("abc", "", 10) == nil)
            assert(string.find("abc", "", 4) == 4)
            local k, v = string.match("key = value", "(%w+)%s*=%s*(%w+)")
            assert(k == "key" and v == "value")
            assert(string.match("  trim  ", "^%s*(.-)%s*$") == "trim")
            assert(string.match("hello", "()ll()") == 3)
            local ok, msg = pcall(string.find, "abc", "[a")
            assert(not ok and msg:find("malformed pattern", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_gmatch_and_gsub() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            local words = {}
            for w in string.gmatch("one two  three", "%a+") do words[#words + 1] = w end
            assert(#words == 3 and words[3] == "three")
            local t = {}
            for k, v in string.gmatch("a=1, b=2", "(%w+)=(%w+)") do t[k] = tonumber(v) end
            assert(t.a == 1 and t.b == 2)
            local r, n = string.gsub("hello world", "%w+", string.upper)
            assert(r == "HELLO WORLD" and n == 2)
            assert(string.gsub("hello", "l", "L", 1) == "heLlo")
            assert(string.gsub("abc", "%w", "%0%0") == "aabbcc")
            assert(string.gsub("$name is $age", "%$(%w+)", {name = "Bob", age = 42}) == "Bob is 42")
            assert(string.gsub("abc", "", "-") == "-a-b-c-")
            assert(string.gsub("xax", "^x", "") == "ax")
            assert(string.gsub("abc", "b", function() return false end) == "abc")
            local ok, msg = pcall(string.gsub, "abc", "b", "%2")
            assert(not ok and msg:find("invalid capture index", 1, true))
            ok, msg = pcall(string.gsub, "abc", "b", function() return {} end)
            assert(not ok and msg:find("invalid replacement value (a table)", 1, true))
            ok, msg = pcall(string.gsub, "abc", "b", "%")
            assert(not ok and msg:find("invalid use of '%' in replacement string", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }
}
