// Indexing with __index / __newindex chains (luaV_gettable / luaV_settable)

use crate::lua_value::{InvalidKey, LuaValue};
use crate::lua_vm::debug_info::ValueSlot;
use crate::lua_vm::execute::metamethod::{TmKind, call_tm, call_tm_noresult, fast_tm, get_tm_by_obj};
use crate::lua_vm::lua_limits::MAXTAGLOOP;
use crate::lua_vm::{LuaError, LuaResult, LuaState};

/// `t[key]`
pub(crate) fn get_table(l: &mut LuaState, t: &LuaValue, key: &LuaValue, slot: ValueSlot) -> LuaResult<LuaValue> {
    let mut t = t.clone();
    let mut slot = slot;
    for _ in 0..MAXTAGLOOP {
        let tm = if let LuaValue::Table(table) = &t {
            let (res, mt) = {
                let h = table.borrow();
                (h.get(key), h.metatable())
            };
            if !res.is_nil() {
                return Ok(res);
            }
            let tm = fast_tm(l, mt.as_ref(), TmKind::Index);
            if tm.is_nil() {
                return Ok(LuaValue::Nil);
            }
            tm
        } else {
            let tm = get_tm_by_obj(l, &t, TmKind::Index);
            if tm.is_nil() {
                return Err(l.type_error(&t, slot, "index"));
            }
            tm
        };
        if tm.is_function() {
            return call_tm(l, tm, t, key.clone());
        }
        t = tm;
        slot = ValueSlot::Other;
    }
    Err(l.runtime_error("loop in gettable"))
}

/// `t[key] = value`
pub(crate) fn set_table(
    l: &mut LuaState,
    t: &LuaValue,
    key: LuaValue,
    value: LuaValue,
    slot: ValueSlot,
) -> LuaResult<()> {
    let mut t = t.clone();
    let mut slot = slot;
    for _ in 0..MAXTAGLOOP {
        let tm = if let LuaValue::Table(table) = &t {
            let (present, mt) = {
                let h = table.borrow();
                (!h.get(&key).is_nil(), h.metatable())
            };
            let tm = if present { LuaValue::Nil } else { fast_tm(l, mt.as_ref(), TmKind::NewIndex) };
            if tm.is_nil() {
                let result = table.borrow_mut().set(key, value);
                return result.map_err(|e| raw_set_error(l, e));
            }
            tm
        } else {
            let tm = get_tm_by_obj(l, &t, TmKind::NewIndex);
            if tm.is_nil() {
                return Err(l.type_error(&t, slot, "index"));
            }
            tm
        };
        if tm.is_function() {
            return call_tm_noresult(l, tm, t, key, value);
        }
        t = tm;
        slot = ValueSlot::Other;
    }
    Err(l.runtime_error("loop in settable"))
}

#[cold]
pub(crate) fn raw_set_error(l: &mut LuaState, e: InvalidKey) -> LuaError {
    l.runtime_error(e.to_string())
}
