// Tag methods: lookup, fast absence cache and calls (ltm.c)

use crate::lua_value::{LuaValue, LuaValueKind, TableRef};
use crate::lua_vm::execute::call::call;
use crate::lua_vm::{LuaResult, LuaState};

/// Tag Method types. The first six are cached as absent in the
/// metatable's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TmKind {
    Index = 0,
    NewIndex = 1,
    Gc = 2,
    Mode = 3,
    Len = 4,
    Eq = 5,
    Add = 6,
    Sub = 7,
    Mul = 8,
    Div = 9,
    Mod = 10,
    Pow = 11,
    Unm = 12,
    Lt = 13,
    Le = 14,
    Concat = 15,
    Call = 16,
}

impl TmKind {
    pub const ALL: [TmKind; 17] = [
        TmKind::Index,
        TmKind::NewIndex,
        TmKind::Gc,
        TmKind::Mode,
        TmKind::Len,
        TmKind::Eq,
        TmKind::Add,
        TmKind::Sub,
        TmKind::Mul,
        TmKind::Div,
        TmKind::Mod,
        TmKind::Pow,
        TmKind::Unm,
        TmKind::Lt,
        TmKind::Le,
        TmKind::Concat,
        TmKind::Call,
    ];

    /// Field name in a metatable
    pub const fn name(self) -> &'static str {
        match self {
            TmKind::Index => "__index",
            TmKind::NewIndex => "__newindex",
            TmKind::Gc => "__gc",
            TmKind::Mode => "__mode",
            TmKind::Len => "__len",
            TmKind::Eq => "__eq",
            TmKind::Add => "__add",
            TmKind::Sub => "__sub",
            TmKind::Mul => "__mul",
            TmKind::Div => "__div",
            TmKind::Mod => "__mod",
            TmKind::Pow => "__pow",
            TmKind::Unm => "__unm",
            TmKind::Lt => "__lt",
            TmKind::Le => "__le",
            TmKind::Concat => "__concat",
            TmKind::Call => "__call",
        }
    }

    #[inline(always)]
    fn has_fast_flag(self) -> bool {
        (self as u8) <= TmKind::Eq as u8
    }
}

/// Metatable of any value: its own for tables and full userdata, the
/// per-type one otherwise
pub(crate) fn get_metatable(l: &LuaState, value: &LuaValue) -> Option<TableRef> {
    match value {
        LuaValue::Table(t) => t.borrow().metatable(),
        LuaValue::Userdata(u) => u.borrow().metatable(),
        other => {
            let kind = other.kind();
            if kind == LuaValueKind::None {
                return None;
            }
            l.global.type_metatables.borrow()[kind as i8 as usize].clone()
        }
    }
}

/// Event `tm` of a metatable, consulting and updating the absence cache
pub(crate) fn fast_tm(l: &LuaState, mt: Option<&TableRef>, tm: TmKind) -> LuaValue {
    let Some(mt) = mt else {
        return LuaValue::Nil;
    };
    let table = mt.borrow();
    if tm.has_fast_flag() && table.tm_known_absent(tm as u8) {
        return LuaValue::Nil;
    }
    let name = l.global.tm_name(tm);
    let value = table.get(&LuaValue::String(name.clone()));
    if value.is_nil() && tm.has_fast_flag() {
        table.mark_tm_absent(tm as u8);
    }
    value
}

/// Event `tm` of the metatable of `value` (nil when absent)
pub(crate) fn get_tm_by_obj(l: &LuaState, value: &LuaValue, tm: TmKind) -> LuaValue {
    match get_metatable(l, value) {
        Some(mt) => {
            let name = l.global.tm_name(tm).clone();
            mt.borrow().get(&LuaValue::String(name))
        }
        None => LuaValue::Nil,
    }
}

/// Call a tag method with two arguments and return its first result
pub(crate) fn call_tm(l: &mut LuaState, f: LuaValue, p1: LuaValue, p2: LuaValue) -> LuaResult<LuaValue> {
    l.check_stack(3)?;
    let func = l.top;
    l.push_unchecked(f);
    l.push_unchecked(p1);
    l.push_unchecked(p2);
    call(l, func, 1, false)?;
    Ok(l.pop_value())
}

/// Call a tag method with three arguments and no result (`__newindex`)
pub(crate) fn call_tm_noresult(
    l: &mut LuaState,
    f: LuaValue,
    p1: LuaValue,
    p2: LuaValue,
    p3: LuaValue,
) -> LuaResult<()> {
    l.check_stack(4)?;
    let func = l.top;
    l.push_unchecked(f);
    l.push_unchecked(p1);
    l.push_unchecked(p2);
    l.push_unchecked(p3);
    call(l, func, 0, false)
}

/// Binary event handler: first operand's, then the second's
pub(crate) fn call_bin_tm(
    l: &mut LuaState,
    p1: &LuaValue,
    p2: &LuaValue,
    tm: TmKind,
) -> LuaResult<Option<LuaValue>> {
    let mut f = get_tm_by_obj(l, p1, tm);
    if f.is_nil() {
        f = get_tm_by_obj(l, p2, tm);
    }
    if f.is_nil() {
        return Ok(None);
    }
    call_tm(l, f, p1.clone(), p2.clone()).map(Some)
}

/// Comparison handler; `None` when neither operand has one
pub(crate) fn call_order_tm(
    l: &mut LuaState,
    p1: &LuaValue,
    p2: &LuaValue,
    tm: TmKind,
) -> LuaResult<Option<bool>> {
    Ok(call_bin_tm(l, p1, p2, tm)?.map(|v| v.is_truthy()))
}

/// `__eq` shared by two metatables (identical handlers count as shared)
fn get_equal_tm(l: &LuaState, mt1: Option<TableRef>, mt2: Option<TableRef>) -> LuaValue {
    let tm1 = fast_tm(l, mt1.as_ref(), TmKind::Eq);
    if tm1.is_nil() {
        return LuaValue::Nil;
    }
    if let (Some(a), Some(b)) = (&mt1, &mt2) {
        if std::rc::Rc::ptr_eq(a, b) {
            return tm1;
        }
    }
    let tm2 = fast_tm(l, mt2.as_ref(), TmKind::Eq);
    if tm2.is_nil() || !tm1.raw_equal(&tm2) {
        return LuaValue::Nil;
    }
    tm1
}

/// Equality with `__eq` for tables and full userdata of different identity
pub(crate) fn equal_obj(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    let tm = match (a, b) {
        (LuaValue::Table(x), LuaValue::Table(y)) => {
            if std::rc::Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let mt1 = x.borrow().metatable();
            let mt2 = y.borrow().metatable();
            get_equal_tm(l, mt1, mt2)
        }
        (LuaValue::Userdata(x), LuaValue::Userdata(y)) => {
            if std::rc::Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            let mt1 = x.borrow().metatable();
            let mt2 = y.borrow().metatable();
            get_equal_tm(l, mt1, mt2)
        }
        _ => return Ok(a.raw_equal(b)),
    };
    if tm.is_nil() {
        return Ok(false);
    }
    Ok(call_tm(l, tm, a.clone(), b.clone())?.is_truthy())
}
