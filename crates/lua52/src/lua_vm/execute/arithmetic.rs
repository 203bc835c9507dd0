// Arithmetic and ordering with coercion and metamethod fallback (lvm.c)

use crate::lua_value::LuaValue;
use crate::lua_vm::debug_info::ValueSlot;
use crate::lua_vm::execute::metamethod::{TmKind, call_bin_tm, call_order_tm};
use crate::lua_vm::{LuaResult, LuaState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
}

impl ArithOp {
    pub fn from_index(op: i32) -> Option<Self> {
        Some(match op {
            0 => ArithOp::Add,
            1 => ArithOp::Sub,
            2 => ArithOp::Mul,
            3 => ArithOp::Div,
            4 => ArithOp::Mod,
            5 => ArithOp::Pow,
            6 => ArithOp::Unm,
            _ => return None,
        })
    }

    fn event(self) -> TmKind {
        match self {
            ArithOp::Add => TmKind::Add,
            ArithOp::Sub => TmKind::Sub,
            ArithOp::Mul => TmKind::Mul,
            ArithOp::Div => TmKind::Div,
            ArithOp::Mod => TmKind::Mod,
            ArithOp::Pow => TmKind::Pow,
            ArithOp::Unm => TmKind::Unm,
        }
    }
}

/// `a - floor(a/b)*b`
#[inline(always)]
pub(crate) fn lua_mod(a: f64, b: f64) -> f64 {
    a - (a / b).floor() * b
}

#[inline(always)]
pub fn arith_number(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Mod => lua_mod(a, b),
        ArithOp::Pow => a.powf(b),
        ArithOp::Unm => -a,
    }
}

/// Slow path of the arithmetic opcodes: string coercion, then the
/// operands' handlers
pub(crate) fn arith(
    l: &mut LuaState,
    op: ArithOp,
    rb: &LuaValue,
    sb: ValueSlot,
    rc: &LuaValue,
    sc: ValueSlot,
) -> LuaResult<LuaValue> {
    if let (Some(b), Some(c)) = (rb.to_number(), rc.to_number()) {
        return Ok(LuaValue::Number(arith_number(op, b, c)));
    }
    match call_bin_tm(l, rb, rc, op.event())? {
        Some(v) => Ok(v),
        None => Err(l.arith_error(rb, sb, rc, sc)),
    }
}

pub(crate) fn less_than(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x < y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() < y.as_bytes()),
        _ => match call_order_tm(l, a, b, TmKind::Lt)? {
            Some(r) => Ok(r),
            None => Err(l.order_error(a, b)),
        },
    }
}

pub(crate) fn less_equal(l: &mut LuaState, a: &LuaValue, b: &LuaValue) -> LuaResult<bool> {
    match (a, b) {
        (LuaValue::Number(x), LuaValue::Number(y)) => Ok(x <= y),
        (LuaValue::String(x), LuaValue::String(y)) => Ok(x.as_bytes() <= y.as_bytes()),
        _ => {
            if let Some(r) = call_order_tm(l, a, b, TmKind::Le)? {
                return Ok(r);
            }
            // a <= b  is  not (b < a)
            match call_order_tm(l, b, a, TmKind::Lt)? {
                Some(r) => Ok(!r),
                None => Err(l.order_error(a, b)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mod_follows_divisor_sign() {
        assert_eq!(arith_number(ArithOp::Mod, 5.0, 3.0), 2.0);
        assert_eq!(arith_number(ArithOp::Mod, -5.0, 3.0), 1.0);
        assert_eq!(arith_number(ArithOp::Mod, 5.0, -3.0), -1.0);
        assert!(arith_number(ArithOp::Mod, 1.0, 0.0).is_nan());
        assert_eq!(arith_number(ArithOp::Pow, 2.0, 10.0), 1024.0);
        assert_eq!(arith_number(ArithOp::Unm, 3.0, 3.0), -3.0);
    }
}
