// Embedding API: stack-oriented access to a thread for host code.
//
// Positive indices count from the function of the running frame (1 is its
// first argument), negative indices count down from the top. Pseudo-indices
// address the registry (`LUA_REGISTRYINDEX`) and the upvalues of the running
// host closure (`lua_upvalueindex(n)`).

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::compiler;
use crate::lua_value::chunk_serializer::{LUA_SIGNATURE, display_name, dump_chunk, undump_chunk};
use crate::lua_value::{
    CFunction, Chunk, LuaClosure, LuaFunction, LuaString, LuaTable, LuaUpvalue, LuaUserdata, LuaValue,
    LuaValueKind, RustClosure, ThreadRef,
};
use crate::lua_vm::debug_info::ValueSlot;
use crate::lua_vm::execute::arithmetic::{ArithOp, arith, less_equal, less_than};
use crate::lua_vm::execute::concat::{concat, obj_len};
use crate::lua_vm::execute::metamethod::{equal_obj, get_metatable};
use crate::lua_vm::execute::table_ops::{get_table, raw_set_error, set_table};
use crate::lua_vm::lua_limits::{EXTRA_STACK, LUA_REGISTRYINDEX, LUA_RIDX_GLOBALS, LUAI_MAXSTACK};
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// Comparison selector for `compare`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
}

impl LuaState {
    // ===== Indices =====

    #[inline]
    fn is_pseudo(idx: i32) -> bool {
        idx <= LUA_REGISTRYINDEX
    }

    /// Absolute stack position of an acceptable non-pseudo index
    pub(crate) fn stack_slot(&self, idx: i32) -> usize {
        let func = self.current_ci().func;
        if idx > 0 {
            func + idx as usize
        } else {
            (self.top as i64 + idx as i64) as usize
        }
    }

    /// Value at `idx`, or `None` when the index is not valid
    fn index_value(&self, idx: i32) -> Option<LuaValue> {
        let func = self.current_ci().func;
        if idx == 0 {
            None
        } else if idx > 0 {
            let pos = func + idx as usize;
            if pos < self.top { Some(self.stack[pos].clone()) } else { None }
        } else if !Self::is_pseudo(idx) {
            let pos = self.top as i64 + idx as i64;
            if pos > func as i64 { Some(self.stack[pos as usize].clone()) } else { None }
        } else if idx == LUA_REGISTRYINDEX {
            Some(LuaValue::Table(self.global.registry.clone()))
        } else {
            let n = (LUA_REGISTRYINDEX - idx) as usize;
            match &self.stack[func] {
                LuaValue::Function(LuaFunction::Rust(c)) => c.upvalues.borrow().get(n - 1).cloned(),
                _ => None,
            }
        }
    }

    /// Store `value` at `idx` (stack slot or upvalue of the running closure)
    fn set_index_value(&mut self, idx: i32, value: LuaValue) {
        if !Self::is_pseudo(idx) {
            let pos = self.stack_slot(idx);
            self.stack[pos] = value;
        } else if idx != LUA_REGISTRYINDEX {
            let n = (LUA_REGISTRYINDEX - idx) as usize;
            let func = self.current_ci().func;
            if let LuaValue::Function(LuaFunction::Rust(c)) = &self.stack[func] {
                if let Some(slot) = c.upvalues.borrow_mut().get_mut(n - 1) {
                    *slot = value;
                }
            }
        }
    }

    /// The value at `idx` (nil for an invalid index)
    pub fn value_at(&self, idx: i32) -> LuaValue {
        self.index_value(idx).unwrap_or_default()
    }

    /// Turn a relative index into an absolute one
    pub fn abs_index(&self, idx: i32) -> i32 {
        if idx > 0 || Self::is_pseudo(idx) {
            idx
        } else {
            (self.top - self.current_ci().func) as i32 + idx
        }
    }

    // ===== Stack manipulation =====

    /// Number of values in the running frame
    pub fn get_top(&self) -> usize {
        self.top - (self.current_ci().func + 1)
    }

    /// Set the number of values in the frame (negative: relative to the top)
    pub fn set_top(&mut self, idx: i32) {
        let func = self.current_ci().func;
        if idx >= 0 {
            let new_top = func + 1 + idx as usize;
            if new_top + EXTRA_STACK > self.stack.len() {
                self.stack.resize(new_top + EXTRA_STACK, LuaValue::Nil);
            }
            while self.top < new_top {
                self.stack[self.top] = LuaValue::Nil;
                self.top += 1;
            }
            for slot in &mut self.stack[new_top..self.top] {
                *slot = LuaValue::Nil;
            }
            self.top = new_top;
        } else {
            let new_top = (self.top as i64 + idx as i64 + 1) as usize;
            for slot in &mut self.stack[new_top..self.top] {
                *slot = LuaValue::Nil;
            }
            self.top = new_top;
        }
    }

    pub fn pop(&mut self, n: usize) {
        self.set_top(-(n as i32) - 1);
    }

    /// Push a copy of the value at `idx`
    pub fn push_index(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_at(idx);
        self.push_value(v)
    }

    /// Remove the value at `idx`, shifting down the values above it
    pub fn remove(&mut self, idx: i32) {
        let pos = self.stack_slot(idx);
        for p in pos..self.top - 1 {
            self.stack[p] = std::mem::take(&mut self.stack[p + 1]);
        }
        self.top -= 1;
        self.stack[self.top] = LuaValue::Nil;
    }

    /// Move the top value into `idx`, shifting up the values above it
    pub fn insert(&mut self, idx: i32) {
        let pos = self.stack_slot(idx);
        let top = self.top;
        let v = std::mem::take(&mut self.stack[top - 1]);
        for p in (pos + 1..top).rev() {
            self.stack[p] = std::mem::take(&mut self.stack[p - 1]);
        }
        self.stack[pos] = v;
    }

    /// Pop the top value into `idx`
    pub fn replace(&mut self, idx: i32) {
        let v = self.value_at(-1);
        self.set_index_value(idx, v);
        self.pop(1);
    }

    /// Copy the value at `from` into `to`
    pub fn copy(&mut self, from: i32, to: i32) {
        let v = self.value_at(from);
        self.set_index_value(to, v);
    }

    /// Make room for `n` more values; false when the stack cannot grow
    pub fn ensure_stack(&mut self, n: usize) -> bool {
        if self.top + n > LUAI_MAXSTACK.min(self.global.option.max_stack_size) {
            return false;
        }
        if self.check_stack(n).is_err() {
            return false;
        }
        let top = self.top + n;
        let ci = self.current_ci_mut();
        if ci.top < top {
            ci.top = top;
        }
        true
    }

    /// Pop `n` values from this thread and push them onto `to`
    pub fn xmove(&mut self, to: &mut LuaState, n: usize) -> LuaResult<()> {
        to.check_stack(n)?;
        let first = self.top - n;
        for i in 0..n {
            let v = std::mem::take(&mut self.stack[first + i]);
            to.push_unchecked(v);
        }
        self.top = first;
        Ok(())
    }

    // ===== Pushing values =====

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.push_value(LuaValue::Nil)
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.push_value(LuaValue::Boolean(b))
    }

    pub fn push_number(&mut self, n: f64) -> LuaResult<()> {
        self.push_value(LuaValue::Number(n))
    }

    pub fn push_integer(&mut self, n: i64) -> LuaResult<()> {
        self.push_value(LuaValue::integer(n))
    }

    pub fn push_unsigned(&mut self, n: u32) -> LuaResult<()> {
        self.push_value(LuaValue::Number(n as f64))
    }

    pub fn push_string(&mut self, s: impl Into<LuaString>) -> LuaResult<()> {
        self.push_value(LuaValue::String(s.into()))
    }

    /// Push a host function; with `nup > 0` the top `nup` values become its
    /// upvalues
    pub fn push_rust_closure(&mut self, func: CFunction, nup: usize) -> LuaResult<()> {
        if nup == 0 {
            return self.push_value(LuaValue::Function(LuaFunction::Light(func)));
        }
        let first = self.top - nup;
        let upvalues: Vec<LuaValue> = self.stack[first..self.top].iter_mut().map(std::mem::take).collect();
        self.top = first;
        let closure = RustClosure {
            func,
            upvalues: RefCell::new(upvalues),
        };
        self.push_value(LuaValue::Function(LuaFunction::Rust(Rc::new(closure))))
    }

    pub fn push_cfunction(&mut self, func: CFunction) -> LuaResult<()> {
        self.push_rust_closure(func, 0)
    }

    pub fn push_light_userdata(&mut self, p: usize) -> LuaResult<()> {
        self.push_value(LuaValue::LightUserdata(p))
    }

    /// Push a new full userdata wrapping `data`
    pub fn new_userdata(&mut self, data: LuaUserdata) -> LuaResult<()> {
        self.push_value(LuaValue::Userdata(Rc::new(RefCell::new(data))))
    }

    /// Push this thread; true when it is the main thread
    pub fn push_thread(&mut self) -> LuaResult<bool> {
        let v = self.thread_value();
        self.push_value(v)?;
        Ok(self.is_main_thread())
    }

    /// Create a thread and push it
    pub fn new_thread_value(&mut self) -> LuaResult<ThreadRef> {
        let t = self.new_thread();
        self.push_value(LuaValue::Thread(t.clone()))?;
        Ok(t)
    }

    // ===== Inspection =====

    /// Type of the value at `idx` (`None` for an invalid index)
    pub fn type_at(&self, idx: i32) -> LuaValueKind {
        match self.index_value(idx) {
            Some(v) => v.kind(),
            None => LuaValueKind::None,
        }
    }

    pub fn type_name_at(&self, idx: i32) -> &'static str {
        self.type_at(idx).name()
    }

    pub fn is_none(&self, idx: i32) -> bool {
        self.type_at(idx) == LuaValueKind::None
    }

    pub fn is_none_or_nil(&self, idx: i32) -> bool {
        matches!(self.type_at(idx), LuaValueKind::None | LuaValueKind::Nil)
    }

    /// Number or a string convertible to a number
    pub fn is_number(&self, idx: i32) -> bool {
        self.value_at(idx).to_number().is_some()
    }

    /// String or number
    pub fn is_string(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), LuaValue::String(_) | LuaValue::Number(_))
    }

    pub fn is_cfunction(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), LuaValue::Function(f) if !f.is_lua())
    }

    pub fn is_userdata(&self, idx: i32) -> bool {
        matches!(self.value_at(idx), LuaValue::Userdata(_) | LuaValue::LightUserdata(_))
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        self.value_at(idx).to_number()
    }

    /// Integral part of the number at `idx`, truncated toward zero
    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        self.to_number(idx).map(|n| n as i64)
    }

    /// Number at `idx` reduced modulo 2^32
    pub fn to_unsigned(&self, idx: i32) -> Option<u32> {
        self.to_number(idx).map(crate::lua_value::number_to_unsigned)
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.value_at(idx).is_truthy()
    }

    /// String at `idx`; a number is converted in place
    pub fn to_lstring(&mut self, idx: i32) -> Option<LuaString> {
        match self.value_at(idx) {
            LuaValue::String(s) => Some(s),
            LuaValue::Number(n) => {
                let s = LuaString::from(crate::lua_value::number_to_string(n));
                self.set_index_value(idx, LuaValue::String(s.clone()));
                Some(s)
            }
            _ => None,
        }
    }

    pub fn to_cfunction(&self, idx: i32) -> Option<CFunction> {
        match self.value_at(idx) {
            LuaValue::Function(LuaFunction::Light(f)) => Some(f),
            LuaValue::Function(LuaFunction::Rust(c)) => Some(c.func),
            _ => None,
        }
    }

    pub fn to_userdata(&self, idx: i32) -> Option<LuaValue> {
        match self.value_at(idx) {
            v @ (LuaValue::Userdata(_) | LuaValue::LightUserdata(_)) => Some(v),
            _ => None,
        }
    }

    pub fn to_thread(&self, idx: i32) -> Option<ThreadRef> {
        match self.value_at(idx) {
            LuaValue::Thread(t) => Some(t),
            _ => None,
        }
    }

    pub fn to_pointer(&self, idx: i32) -> usize {
        self.value_at(idx).pointer()
    }

    /// Length without metamethods
    pub fn raw_len(&self, idx: i32) -> usize {
        match self.value_at(idx) {
            LuaValue::String(s) => s.len(),
            LuaValue::Table(t) => t.borrow().len(),
            _ => 0,
        }
    }

    pub fn raw_equal(&self, idx1: i32, idx2: i32) -> bool {
        match (self.index_value(idx1), self.index_value(idx2)) {
            (Some(a), Some(b)) => a.raw_equal(&b),
            _ => false,
        }
    }

    /// Compare two values, running metamethods
    pub fn compare(&mut self, idx1: i32, idx2: i32, op: CompareOp) -> LuaResult<bool> {
        let (Some(a), Some(b)) = (self.index_value(idx1), self.index_value(idx2)) else {
            return Ok(false);
        };
        match op {
            CompareOp::Eq => equal_obj(self, &a, &b),
            CompareOp::Lt => less_than(self, &a, &b),
            CompareOp::Le => less_equal(self, &a, &b),
        }
    }

    // ===== Operations =====

    /// Apply `op` to the two values on top (one for `Unm`), popping them
    /// and pushing the result
    pub fn arith(&mut self, op: ArithOp) -> LuaResult<()> {
        if op == ArithOp::Unm {
            let v = self.value_at(-1);
            self.push_value(v)?;
        }
        let a = self.value_at(-2);
        let b = self.value_at(-1);
        let r = match (&a, &b) {
            (LuaValue::Number(x), LuaValue::Number(y)) => {
                LuaValue::Number(crate::lua_vm::execute::arithmetic::arith_number(op, *x, *y))
            }
            _ => arith(self, op, &a, ValueSlot::Other, &b, ValueSlot::Other)?,
        };
        self.pop(2);
        self.push_value(r)
    }

    /// Concatenate the `n` values on top of the stack
    pub fn concat(&mut self, n: usize) -> LuaResult<()> {
        match n {
            0 => self.push_string(""),
            1 => Ok(()),
            _ => concat(self, n),
        }
    }

    /// Push the length of the value at `idx` (`#` operator)
    pub fn len(&mut self, idx: i32) -> LuaResult<()> {
        let v = self.value_at(idx);
        let n = obj_len(self, &v, ValueSlot::Other)?;
        self.push_value(n)
    }

    // ===== Tables =====

    pub fn create_table(&mut self, narray: usize, nhash: usize) -> LuaResult<()> {
        self.push_value(LuaValue::table(LuaTable::new(narray, nhash)))
    }

    pub fn new_table(&mut self) -> LuaResult<()> {
        self.create_table(0, 0)
    }

    /// Push `t[k]` where `t` is at `idx` and `k` is popped from the top
    pub fn get_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.value_at(idx);
        let key = self.pop_value();
        let v = get_table(self, &t, &key, ValueSlot::Other)?;
        self.push_value(v)
    }

    pub fn get_field(&mut self, idx: i32, k: &str) -> LuaResult<()> {
        let t = self.value_at(idx);
        let v = get_table(self, &t, &LuaValue::from(k), ValueSlot::Other)?;
        self.push_value(v)
    }

    /// `t[k] = v` where `t` is at `idx`, and `k`, `v` are popped
    pub fn set_table(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.value_at(idx);
        let v = self.pop_value();
        let key = self.pop_value();
        set_table(self, &t, key, v, ValueSlot::Other)
    }

    /// `t[k] = v` with `v` popped
    pub fn set_field(&mut self, idx: i32, k: &str) -> LuaResult<()> {
        let t = self.value_at(idx);
        let v = self.pop_value();
        set_table(self, &t, LuaValue::from(k), v, ValueSlot::Other)
    }

    pub fn get_global(&mut self, name: &str) -> LuaResult<()> {
        let g = self.global.globals();
        let v = get_table(self, &g, &LuaValue::from(name), ValueSlot::Other)?;
        self.push_value(v)
    }

    /// Pop a value into the global `name`
    pub fn set_global(&mut self, name: &str) -> LuaResult<()> {
        let g = self.global.globals();
        let v = self.pop_value();
        set_table(self, &g, LuaValue::from(name), v, ValueSlot::Other)
    }

    fn table_at(&self, idx: i32) -> Option<crate::lua_value::TableRef> {
        match self.value_at(idx) {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Push `t[k]` without metamethods, `k` popped
    pub fn raw_get(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx);
        let key = self.pop_value();
        let v = t.map(|t| t.borrow().get(&key)).unwrap_or_default();
        self.push_value(v)
    }

    pub fn raw_get_int(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let v = self.table_at(idx).map(|t| t.borrow().get_int(n)).unwrap_or_default();
        self.push_value(v)
    }

    /// `t[k] = v` without metamethods; `k` and `v` popped
    pub fn raw_set(&mut self, idx: i32) -> LuaResult<()> {
        let t = self.table_at(idx);
        let v = self.pop_value();
        let key = self.pop_value();
        if let Some(t) = t {
            let result = t.borrow_mut().set(key, v);
            result.map_err(|e| raw_set_error(self, e))?;
        }
        Ok(())
    }

    pub fn raw_set_int(&mut self, idx: i32, n: i64) -> LuaResult<()> {
        let t = self.table_at(idx);
        let v = self.pop_value();
        if let Some(t) = t {
            t.borrow_mut().set_int(n, v);
        }
        Ok(())
    }

    /// Pop a key and push the next key-value pair of the table at `idx`.
    /// Returns false (pushing nothing) after the last pair.
    pub fn next(&mut self, idx: i32) -> LuaResult<bool> {
        let t = self.table_at(idx);
        let key = self.pop_value();
        let Some(t) = t else {
            return Ok(false);
        };
        let step = t.borrow().next(&key);
        match step {
            Ok(Some((k, v))) => {
                self.push_value(k)?;
                self.push_value(v)?;
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(()) => Err(self.runtime_error("invalid key to 'next'")),
        }
    }

    /// Push the metatable of the value at `idx`; false (nothing pushed)
    /// when it has none
    pub fn get_metatable(&mut self, idx: i32) -> LuaResult<bool> {
        let v = self.value_at(idx);
        match get_metatable(self, &v) {
            Some(mt) => {
                self.push_value(LuaValue::Table(mt))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pop a table (or nil) and make it the metatable of the value at `idx`
    pub fn set_metatable(&mut self, idx: i32) -> LuaResult<()> {
        let obj = self.value_at(idx);
        let mt = match self.pop_value() {
            LuaValue::Table(t) => Some(t),
            _ => None,
        };
        match obj {
            LuaValue::Table(t) => t.borrow_mut().set_metatable(mt),
            LuaValue::Userdata(u) => u.borrow_mut().metatable = mt,
            other => {
                let kind = other.kind();
                if kind != LuaValueKind::None {
                    self.global.type_metatables.borrow_mut()[kind as i8 as usize] = mt;
                }
            }
        }
        Ok(())
    }

    /// Push the environment table of the userdata at `idx` (nil if none)
    pub fn get_uservalue(&mut self, idx: i32) -> LuaResult<()> {
        let v = match self.value_at(idx) {
            LuaValue::Userdata(u) => u.borrow().env().map(LuaValue::Table).unwrap_or_default(),
            _ => LuaValue::Nil,
        };
        self.push_value(v)
    }

    /// Pop a table (or nil) into the environment of the userdata at `idx`
    pub fn set_uservalue(&mut self, idx: i32) {
        let obj = self.value_at(idx);
        let env = match self.pop_value() {
            LuaValue::Table(t) => Some(t),
            _ => None,
        };
        if let LuaValue::Userdata(u) = obj {
            u.borrow_mut().env = env;
        }
    }

    // ===== Load and dump =====

    /// Compile or undump `chunk` and push the resulting function. `mode`
    /// restricts the chunk kind ("t", "b" or "bt"). On failure the error
    /// message is pushed instead.
    pub fn load(&mut self, chunk: &[u8], chunk_name: &str, mode: Option<&str>) -> LuaResult<()> {
        debug!(chunk = chunk_name, size = chunk.len(), "loading chunk");
        // the escape byte alone marks a binary chunk; the loader checks the rest
        let binary = chunk.first() == LUA_SIGNATURE.first();
        let (kind, letter) = if binary { ("binary", 'b') } else { ("text", 't') };
        if let Some(mode) = mode {
            if !mode.contains(letter) {
                let msg = format!("attempt to load a {} chunk (mode is '{}')", kind, mode);
                self.push_string(msg)?;
                return Err(LuaError::SyntaxError);
            }
        }
        let proto = if binary {
            undump_chunk(chunk).map_err(|why| {
                format!("{}: {} precompiled chunk", display_name(chunk_name.as_bytes()), why)
            })
        } else {
            compiler::compile(chunk, chunk_name).map_err(|e| e.to_string())
        };
        match proto {
            Ok(p) => self.push_main_closure(p),
            Err(msg) => {
                self.push_string(msg)?;
                Err(LuaError::SyntaxError)
            }
        }
    }

    /// Wrap a main prototype in a closure with closed upvalues; a single
    /// upvalue is the globals table (`_ENV`)
    fn push_main_closure(&mut self, p: Chunk) -> LuaResult<()> {
        let nups = p.upvalue_descs.len();
        let globals = self.global.registry.borrow().get_int(LUA_RIDX_GLOBALS);
        let upvalues = (0..nups)
            .map(|_| {
                let v = if nups == 1 { globals.clone() } else { LuaValue::Nil };
                Rc::new(RefCell::new(LuaUpvalue::Closed(v)))
            })
            .collect();
        let cl = LuaClosure::new(Rc::new(p), upvalues);
        self.push_value(LuaValue::Function(LuaFunction::Lua(Rc::new(cl))))
    }

    /// Precompiled form of the Lua function on top of the stack
    pub fn dump(&self, strip: bool) -> Option<Vec<u8>> {
        match self.value_at(-1) {
            LuaValue::Function(LuaFunction::Lua(c)) => Some(dump_chunk(&c.proto, strip)),
            _ => None,
        }
    }

    // ===== Errors =====

    /// Raise the value on top of the stack as an error
    pub fn throw_top(&mut self) -> LuaError {
        let v = self.pop_value();
        self.throw(v)
    }

    /// Garbage-collector control. Memory is reclaimed by reference
    /// counting, so every option is accepted and reports zero.
    pub fn gc(&mut self, _what: &str, _data: i32) -> i32 {
        0
    }

    // ===== Upvalues =====

    /// Push upvalue `n` of the function at `funcindex`; returns its name
    pub fn get_upvalue(&mut self, funcindex: i32, n: usize) -> Option<LuaString> {
        let f = self.value_at(funcindex);
        let (name, v) = self.upvalue_info(&f, n)?;
        let _ = self.push_value(v);
        Some(name)
    }

    /// Pop a value into upvalue `n` of the function at `funcindex`
    pub fn set_upvalue(&mut self, funcindex: i32, n: usize) -> Option<LuaString> {
        let f = self.value_at(funcindex);
        let (name, _) = self.upvalue_info(&f, n)?;
        let v = self.pop_value();
        match f.as_function()? {
            LuaFunction::Lua(c) => {
                let uv = c.upvalue(n - 1)?;
                self.upvalue_set(&uv, v);
            }
            LuaFunction::Rust(c) => {
                c.upvalues.borrow_mut()[n - 1] = v;
            }
            LuaFunction::Light(_) => return None,
        }
        Some(name)
    }

    /// Identity of upvalue `n` of the function at `funcindex`
    pub fn upvalue_id(&self, funcindex: i32, n: usize) -> Option<usize> {
        match self.value_at(funcindex).as_function()? {
            LuaFunction::Lua(c) => c.upvalue(n.checked_sub(1)?).map(|uv| Rc::as_ptr(&uv) as *const u8 as usize),
            LuaFunction::Rust(c) => {
                let ups = c.upvalues.borrow();
                let slot = ups.get(n.checked_sub(1)?)?;
                Some(slot as *const LuaValue as usize)
            }
            LuaFunction::Light(_) => None,
        }
    }

    /// Make upvalue `n1` of the closure at `f1` refer to upvalue `n2` of
    /// the closure at `f2`
    pub fn upvalue_join(&mut self, f1: i32, n1: usize, f2: i32, n2: usize) -> bool {
        let (LuaValue::Function(LuaFunction::Lua(c1)), LuaValue::Function(LuaFunction::Lua(c2))) =
            (self.value_at(f1), self.value_at(f2))
        else {
            return false;
        };
        let Some(uv) = c2.upvalue(n2.wrapping_sub(1)) else {
            return false;
        };
        let mut ups = c1.upvalues.borrow_mut();
        match ups.get_mut(n1.wrapping_sub(1)) {
            Some(slot) => {
                *slot = uv;
                true
            }
            None => false,
        }
    }

    // ===== Argument access for host functions =====

    /// Argument `i` (1-based) of the running host function
    #[inline]
    pub fn get_arg(&self, i: usize) -> Option<LuaValue> {
        let pos = self.current_ci().func + i;
        if i > 0 && pos < self.top { Some(self.stack[pos].clone()) } else { None }
    }

    #[inline]
    pub fn arg_count(&self) -> usize {
        self.get_top()
    }

    pub fn get_args(&self) -> Vec<LuaValue> {
        let base = self.current_ci().func + 1;
        self.stack[base..self.top].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use crate::lua_value::LuaValue;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_stack_rotation() {
        let vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        for i in 1..=4 {
            l.push_integer(i).unwrap();
        }
        assert_eq!(l.get_top(), 4);
        l.insert(1);
        assert_eq!(l.value_at(1), LuaValue::integer(4));
        assert_eq!(l.value_at(2), LuaValue::integer(1));
        l.remove(2);
        assert_eq!(l.get_top(), 3);
        assert_eq!(l.value_at(-1), LuaValue::integer(3));
        l.copy(1, -1);
        assert_eq!(l.value_at(3), LuaValue::integer(4));
        l.set_top(0);
        assert_eq!(l.get_top(), 0);
        assert!(l.is_none(1));
    }

    #[test]
    fn test_index_zero_is_not_a_slot() {
        let vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        l.push_integer(7).unwrap();
        l.pop(1);
        // the vacated slot above the top must not be visible through index 0
        assert!(l.is_none(0));
        assert_eq!(l.value_at(0), LuaValue::Nil);
        l.push_integer(1).unwrap();
        assert!(l.is_none(0));
    }

    #[test]
    fn test_table_access_through_api() {
        let vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        l.new_table().unwrap();
        l.push_string("value").unwrap();
        l.set_field(-2, "key").unwrap();
        l.get_field(-1, "key").unwrap();
        assert_eq!(l.to_lstring(-1).unwrap().as_bytes(), b"value");
        l.pop(1);
        l.push_nil().unwrap();
        assert!(l.next(-2).unwrap());
        assert_eq!(l.value_at(-2), LuaValue::from("key"));
        l.pop(1);
        assert!(!l.next(-2).unwrap());
    }

    #[test]
    fn test_load_mode_is_checked() {
        let vm = LuaVM::new(SafeOption::default());
        let mut l = vm.main_state();
        assert!(l.load(b"return 1", "=chunk", Some("b")).is_err());
        let msg = l.pop_value();
        assert_eq!(msg, LuaValue::from("attempt to load a text chunk (mode is 'b')"));
        assert!(l.load(b"return 1", "=chunk", Some("bt")).is_ok());
        let bytes = l.dump(false).unwrap();
        l.pop(1);
        assert!(l.load(&bytes, "=chunk", Some("t")).is_err());
        l.pop(1);
        assert!(l.load(&bytes, "=chunk", None).is_ok());
        l.call(0, 1).unwrap();
        assert_eq!(l.value_at(-1), LuaValue::integer(1));
    }
}
