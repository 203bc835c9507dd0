// Concatenation and the length operator (luaV_concat / luaV_objlen)

use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::debug_info::ValueSlot;
use crate::lua_vm::execute::metamethod::{TmKind, call_bin_tm, call_tm, fast_tm, get_tm_by_obj};
use crate::lua_vm::lua_limits::MAX_STRING_SIZE;
use crate::lua_vm::{LuaResult, LuaState};

#[inline]
fn is_concat_convertible(value: &LuaValue) -> bool {
    matches!(value, LuaValue::String(_) | LuaValue::Number(_))
}

fn append_bytes(value: &LuaValue, buf: &mut Vec<u8>) {
    match value {
        LuaValue::String(s) => buf.extend_from_slice(s.as_bytes()),
        LuaValue::Number(n) => buf.extend_from_slice(crate::lua_value::number_to_string(*n).as_bytes()),
        _ => {}
    }
}

/// Concatenate the `total` values on top of the stack, leaving the result
/// in the lowest of those slots. `l.top` is lowered accordingly.
pub(crate) fn concat(l: &mut LuaState, mut total: usize) -> LuaResult<()> {
    while total > 1 {
        let top = l.top;
        let mut n = 2usize;
        let first = l.stack[top - 2].clone();
        let second = l.stack[top - 1].clone();
        if !is_concat_convertible(&first) || !is_concat_convertible(&second) {
            match call_bin_tm(l, &first, &second, TmKind::Concat)? {
                Some(v) => l.stack[top - 2] = v,
                None => {
                    return Err(l.concat_error(
                        &first,
                        ValueSlot::Stack(top - 2),
                        &second,
                        ValueSlot::Stack(top - 1),
                    ));
                }
            }
        } else if matches!(&second, LuaValue::String(s) if s.is_empty()) {
            // result is the first operand as a string
            if let LuaValue::Number(x) = first {
                l.stack[top - 2] = LuaValue::String(LuaString::from(crate::lua_value::number_to_string(x)));
            }
        } else if matches!(&first, LuaValue::String(s) if s.is_empty()) {
            l.stack[top - 2] = second;
        } else {
            // gather as many string operands as possible
            let mut len = 0usize;
            n = 0;
            while n < total && is_concat_convertible(&l.stack[top - n - 1]) {
                len += match &l.stack[top - n - 1] {
                    LuaValue::String(s) => s.len(),
                    _ => 24,
                };
                if len >= MAX_STRING_SIZE {
                    return Err(l.runtime_error("string length overflow"));
                }
                n += 1;
            }
            let mut buf = Vec::with_capacity(len);
            for slot in &l.stack[top - n..top] {
                append_bytes(slot, &mut buf);
            }
            l.stack[top - n] = LuaValue::String(LuaString::from(buf));
        }
        total -= n - 1;
        l.top -= n - 1;
    }
    Ok(())
}

/// `#value`
pub(crate) fn obj_len(l: &mut LuaState, value: &LuaValue, slot: ValueSlot) -> LuaResult<LuaValue> {
    let tm = match value {
        LuaValue::Table(t) => {
            let mt = t.borrow().metatable();
            let tm = fast_tm(l, mt.as_ref(), TmKind::Len);
            if tm.is_nil() {
                return Ok(LuaValue::Number(t.borrow().len() as f64));
            }
            tm
        }
        LuaValue::String(s) => return Ok(LuaValue::Number(s.len() as f64)),
        other => {
            let tm = get_tm_by_obj(l, other, TmKind::Len);
            if tm.is_nil() {
                return Err(l.type_error(other, slot, "get length of"));
            }
            tm
        }
    };
    call_tm(l, tm, value.clone(), value.clone())
}
