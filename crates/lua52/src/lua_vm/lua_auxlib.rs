// Auxiliary helpers for host functions: argument checking, error
// messages with positions, `__tostring`-aware conversion, metatable
// registration, references and file loading.

use std::borrow::Cow;
use std::io::Read;

use crate::lua_value::chunk_serializer::LUA_SIGNATURE;
use crate::lua_value::{LuaString, LuaValue, LuaValueKind, TableRef, UserdataRef, number_to_unsigned};
use crate::lua_vm::execute::metamethod::get_metatable;
use crate::lua_vm::lua_limits::LUA_REGISTRYINDEX;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Reference returned by `ref_value` for nil
pub const LUA_REFNIL: i32 = -1;
/// Never returned by `ref_value`
pub const LUA_NOREF: i32 = -2;

/// Text of an OS error without the "(os error N)" suffix
pub fn io_error_message(e: &std::io::Error) -> String {
    let text = e.to_string();
    match text.find(" (os error") {
        Some(pos) => text[..pos].to_string(),
        None => text,
    }
}

impl LuaState {
    // ===== Errors =====

    /// "chunkname:currentline: " of the function at `level`, or "" when it
    /// is not a Lua function
    pub fn where_(&mut self, level: usize) -> String {
        if let Some(mut ar) = self.get_stack(level) {
            self.get_info("Sl", &mut ar);
            if ar.current_line > 0 {
                return format!("{}:{}: ", ar.short_src, ar.current_line);
            }
        }
        String::new()
    }

    /// Raise `msg` prefixed with the position of the calling Lua code
    #[cold]
    #[inline(never)]
    pub fn error(&mut self, msg: impl Into<String>) -> LuaError {
        let full = format!("{}{}", self.where_(1), msg.into());
        self.throw(LuaValue::from(full))
    }

    /// "bad argument #narg to 'fname' (extramsg)"
    #[cold]
    #[inline(never)]
    pub fn arg_error(&mut self, narg: usize, extramsg: &str) -> LuaError {
        let Some(mut ar) = self.get_stack(0) else {
            return self.error(format!("bad argument #{} ({})", narg, extramsg));
        };
        self.get_info("n", &mut ar);
        let mut narg = narg;
        if ar.namewhat == "method" {
            narg -= 1;
            if narg == 0 {
                let name = ar.name.unwrap_or_else(|| "?".to_string());
                return self.error(format!("calling '{}' on bad self ({})", name, extramsg));
            }
        }
        let name = match ar.name {
            Some(name) => name,
            None => {
                let func = self.stack[self.current_ci().func].clone();
                self.global_func_name(&func).unwrap_or_else(|| "?".to_string())
            }
        };
        self.error(format!("bad argument #{} to '{}' ({})", narg, name, extramsg))
    }

    /// "<tname> expected, got <type of argument narg>"
    #[cold]
    pub fn type_arg_error(&mut self, narg: usize, tname: &str) -> LuaError {
        let got = self.type_name_at(narg as i32);
        let msg = format!("{} expected, got {}", tname, got);
        self.arg_error(narg, &msg)
    }

    // ===== Argument checks =====

    pub fn check_any(&mut self, narg: usize) -> LuaResult<LuaValue> {
        match self.get_arg(narg) {
            Some(v) => Ok(v),
            None => Err(self.arg_error(narg, "value expected")),
        }
    }

    pub fn check_type(&mut self, narg: usize, kind: LuaValueKind) -> LuaResult<LuaValue> {
        match self.get_arg(narg) {
            Some(v) if v.kind() == kind => Ok(v),
            _ => Err(self.type_arg_error(narg, kind.name())),
        }
    }

    pub fn check_number(&mut self, narg: usize) -> LuaResult<f64> {
        match self.get_arg(narg).and_then(|v| v.to_number()) {
            Some(n) => Ok(n),
            None => Err(self.type_arg_error(narg, "number")),
        }
    }

    pub fn check_integer(&mut self, narg: usize) -> LuaResult<i64> {
        self.check_number(narg).map(|n| n as i64)
    }

    pub fn check_unsigned(&mut self, narg: usize) -> LuaResult<u32> {
        self.check_number(narg).map(number_to_unsigned)
    }

    /// String argument; a number argument is converted in place
    pub fn check_lstring(&mut self, narg: usize) -> LuaResult<LuaString> {
        if self.get_arg(narg).is_some() {
            if let Some(s) = self.to_lstring(narg as i32) {
                return Ok(s);
            }
        }
        Err(self.type_arg_error(narg, "string"))
    }

    pub fn check_table(&mut self, narg: usize) -> LuaResult<TableRef> {
        match self.get_arg(narg) {
            Some(LuaValue::Table(t)) => Ok(t),
            _ => Err(self.type_arg_error(narg, "table")),
        }
    }

    pub fn opt_number(&mut self, narg: usize, def: f64) -> LuaResult<f64> {
        if self.is_none_or_nil(narg as i32) { Ok(def) } else { self.check_number(narg) }
    }

    pub fn opt_integer(&mut self, narg: usize, def: i64) -> LuaResult<i64> {
        if self.is_none_or_nil(narg as i32) { Ok(def) } else { self.check_integer(narg) }
    }

    pub fn opt_lstring(&mut self, narg: usize, def: &str) -> LuaResult<LuaString> {
        if self.is_none_or_nil(narg as i32) {
            Ok(LuaString::from(def))
        } else {
            self.check_lstring(narg)
        }
    }

    /// Index of the string argument in `list`
    pub fn check_option(&mut self, narg: usize, def: Option<&str>, list: &[&str]) -> LuaResult<usize> {
        let name = match def {
            Some(d) if self.is_none_or_nil(narg as i32) => LuaString::from(d),
            _ => self.check_lstring(narg)?,
        };
        match list.iter().position(|opt| opt.as_bytes() == name.as_bytes()) {
            Some(i) => Ok(i),
            None => {
                let msg = format!("invalid option '{}'", name);
                Err(self.arg_error(narg, &msg))
            }
        }
    }

    /// `cond` or a "bad argument" error
    #[inline]
    pub fn arg_check(&mut self, cond: bool, narg: usize, extramsg: &str) -> LuaResult<()> {
        if cond { Ok(()) } else { Err(self.arg_error(narg, extramsg)) }
    }

    /// Grow the stack by `n` slots or raise "stack overflow (msg)"
    pub fn check_stack_msg(&mut self, n: usize, msg: &str) -> LuaResult<()> {
        if self.ensure_stack(n) {
            Ok(())
        } else {
            Err(self.error(format!("stack overflow ({})", msg)))
        }
    }

    // ===== Metatables =====

    /// Field `event` of the metatable of `obj` (nil when absent)
    pub fn get_metafield(&self, obj: &LuaValue, event: &str) -> LuaValue {
        match get_metatable(self, obj) {
            Some(mt) => mt.borrow().get_str(event),
            None => LuaValue::Nil,
        }
    }

    /// Call metamethod `event` of `obj` with `obj` as argument and push
    /// its result. Returns false (nothing pushed) when there is none.
    pub fn call_meta(&mut self, obj: &LuaValue, event: &str) -> LuaResult<bool> {
        let tm = self.get_metafield(obj, event);
        if tm.is_nil() {
            return Ok(false);
        }
        self.push_value(tm)?;
        self.push_value(obj.clone())?;
        self.call(1, 1)?;
        Ok(true)
    }

    /// Registry table `tname`, created when missing. Returns true when
    /// it was created. The table is pushed either way.
    pub fn new_metatable(&mut self, tname: &str) -> LuaResult<bool> {
        let existing = self.global.registry.borrow().get_str(tname);
        if !existing.is_nil() {
            self.push_value(existing)?;
            return Ok(false);
        }
        self.create_table(0, 2)?;
        let mt = self.value_at(-1);
        self.global.registry.borrow_mut().set_str(tname, mt);
        Ok(true)
    }

    /// Userdata argument whose metatable is the registry's `tname`
    pub fn test_udata(&self, narg: usize, tname: &str) -> Option<UserdataRef> {
        let LuaValue::Userdata(u) = self.get_arg(narg)? else {
            return None;
        };
        let expected = self.global.registry.borrow().get_str(tname);
        let mt = u.borrow().metatable()?;
        match expected {
            LuaValue::Table(t) if std::rc::Rc::ptr_eq(&t, &mt) => Some(u),
            _ => None,
        }
    }

    pub fn check_udata(&mut self, narg: usize, tname: &str) -> LuaResult<UserdataRef> {
        match self.test_udata(narg, tname) {
            Some(u) => Ok(u),
            None => Err(self.type_arg_error(narg, tname)),
        }
    }

    // ===== Conversions =====

    /// String form of any value, honouring `__tostring`
    pub fn to_display_string(&mut self, value: &LuaValue) -> LuaResult<LuaString> {
        if self.call_meta(value, "__tostring")? {
            return match self.pop_value() {
                LuaValue::String(s) => Ok(s),
                LuaValue::Number(n) => Ok(LuaString::from(crate::lua_value::number_to_string(n))),
                _ => Err(self.error("'__tostring' must return a string")),
            };
        }
        Ok(value.to_plain_string())
    }

    /// `#` of the value at `idx` as an integer
    pub fn len_of(&mut self, idx: i32) -> LuaResult<i64> {
        self.len(idx)?;
        match self.pop_value().as_number() {
            Some(n) => Ok(n as i64),
            None => Err(self.error("object length is not a number")),
        }
    }

    // ===== References =====

    /// Pop a value into the table at `t` and return a fresh integer key
    /// for it (`LUA_REFNIL` for nil)
    pub fn ref_value(&mut self, t: i32) -> LuaResult<i32> {
        let target = self.value_at(t);
        let v = self.pop_value();
        if v.is_nil() {
            return Ok(LUA_REFNIL);
        }
        let LuaValue::Table(table) = target else {
            return Err(self.error("table expected for reference"));
        };
        let mut table = table.borrow_mut();
        let free = table.get_int(0).as_number().unwrap_or(0.0) as i64;
        let r = if free != 0 {
            let next = table.get_int(free);
            table.set_int(0, next);
            free
        } else {
            table.len() as i64 + 1
        };
        table.set_int(r, v);
        Ok(r as i32)
    }

    /// Release a reference made by `ref_value`
    pub fn unref_value(&mut self, t: i32, r: i32) {
        if r < 0 {
            return;
        }
        if let LuaValue::Table(table) = self.value_at(t) {
            let mut table = table.borrow_mut();
            let free = table.get_int(0);
            table.set_int(r as i64, free);
            table.set_int(0, LuaValue::integer(r as i64));
        }
    }

    /// Registry reference helpers
    pub fn registry_ref(&mut self) -> LuaResult<i32> {
        self.ref_value(LUA_REGISTRYINDEX)
    }

    // ===== Loading =====

    /// Load a source or binary chunk from `s`, named after its contents
    pub fn load_string(&mut self, s: &str) -> LuaResult<()> {
        self.load(s.as_bytes(), s, None)
    }

    /// Load the file `filename` (stdin when `None`). A UTF-8 byte order
    /// mark and a first line starting with '#' are skipped.
    pub fn load_file(&mut self, filename: Option<&str>, mode: Option<&str>) -> LuaResult<()> {
        let (chunkname, data) = match filename {
            Some(name) => {
                let chunkname = format!("@{}", name);
                match std::fs::read(name) {
                    Ok(data) => (chunkname, data),
                    Err(e) => {
                        let msg = format!("cannot open {}: {}", name, io_error_message(&e));
                        self.push_string(msg)?;
                        return Err(LuaError::FileError);
                    }
                }
            }
            None => {
                let mut data = Vec::new();
                if let Err(e) = std::io::stdin().read_to_end(&mut data) {
                    let msg = format!("cannot read stdin: {}", io_error_message(&e));
                    self.push_string(msg)?;
                    return Err(LuaError::FileError);
                }
                ("=stdin".to_string(), data)
            }
        };
        let chunk = skip_prefix(&data);
        self.load(&chunk, &chunkname, mode)
    }
}

/// Drop a UTF-8 BOM and a '#' first line. A text chunk keeps the newline
/// so line numbers stay right.
fn skip_prefix(data: &[u8]) -> Cow<'_, [u8]> {
    let data = data.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(data);
    if data.first() != Some(&b'#') {
        return Cow::Borrowed(data);
    }
    let Some(pos) = data.iter().position(|&c| c == b'\n') else {
        return Cow::Borrowed(&[]);
    };
    let rest = &data[pos + 1..];
    if rest.first() == LUA_SIGNATURE.first() {
        Cow::Borrowed(rest)
    } else {
        Cow::Borrowed(&data[pos..])
    }
}

#[cfg(test)]
mod tests {
    use super::skip_prefix;

    #[test]
    fn test_skip_prefix() {
        assert_eq!(&*skip_prefix(b"\xEF\xBB\xBFreturn 1"), b"return 1");
        assert_eq!(&*skip_prefix(b"#!/usr/bin/lua\nreturn 1"), b"\nreturn 1");
        assert_eq!(&*skip_prefix(b"#only a comment"), b"");
        assert_eq!(&*skip_prefix(b"return 1"), b"return 1");
        assert_eq!(&*skip_prefix(b"#!lua\n\x1bLua"), b"\x1bLua");
    }
}
