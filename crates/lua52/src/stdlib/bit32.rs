// Bitwise operations on 32-bit unsigned integers
// Implements: arshift, band, bnot, bor, btest, bxor, extract, lrotate,
// lshift, replace, rrotate, rshift

use crate::lib_registry::LibraryModule;
use crate::lua_vm::{LuaResult, LuaState};

const LUA_NBITS: i64 = 32;

pub fn create_bit32_lib() -> LibraryModule {
    crate::lib_module!("bit32", {
        "arshift" => b_arshift,
        "band" => b_and,
        "bnot" => b_not,
        "bor" => b_or,
        "bxor" => b_xor,
        "btest" => b_test,
        "extract" => b_extract,
        "lrotate" => b_lrot,
        "lshift" => b_lshift,
        "replace" => b_replace,
        "rrotate" => b_rrot,
        "rshift" => b_rshift,
    })
}

/// Fold every argument with `op`, starting from `init`
fn fold_args(l: &mut LuaState, init: u32, op: fn(u32, u32) -> u32) -> LuaResult<u32> {
    let n = l.get_top();
    let mut r = init;
    for i in 1..=n {
        r = op(r, l.check_unsigned(i)?);
    }
    Ok(r)
}

fn b_and(l: &mut LuaState) -> LuaResult<usize> {
    let r = fold_args(l, !0, |a, b| a & b)?;
    l.push_unsigned(r)?;
    Ok(1)
}

fn b_test(l: &mut LuaState) -> LuaResult<usize> {
    let r = fold_args(l, !0, |a, b| a & b)?;
    l.push_boolean(r != 0)?;
    Ok(1)
}

fn b_or(l: &mut LuaState) -> LuaResult<usize> {
    let r = fold_args(l, 0, |a, b| a | b)?;
    l.push_unsigned(r)?;
    Ok(1)
}

fn b_xor(l: &mut LuaState) -> LuaResult<usize> {
    let r = fold_args(l, 0, |a, b| a ^ b)?;
    l.push_unsigned(r)?;
    Ok(1)
}

fn b_not(l: &mut LuaState) -> LuaResult<usize> {
    let r = !l.check_unsigned(1)?;
    l.push_unsigned(r)?;
    Ok(1)
}

/// Logical shift; negative displacements shift the other way
fn shift(r: u32, i: i64) -> u32 {
    if i < 0 {
        let i = i.unsigned_abs();
        if i >= LUA_NBITS as u64 { 0 } else { r >> i }
    } else if i >= LUA_NBITS {
        0
    } else {
        r << i
    }
}

fn b_lshift(l: &mut LuaState) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let i = l.check_integer(2)?;
    l.push_unsigned(shift(r, i))?;
    Ok(1)
}

fn b_rshift(l: &mut LuaState) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let i = l.check_integer(2)?;
    l.push_unsigned(shift(r, i.saturating_neg()))?;
    Ok(1)
}

fn b_arshift(l: &mut LuaState) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let i = l.check_integer(2)?;
    if i < 0 || r & 0x8000_0000 == 0 {
        l.push_unsigned(shift(r, i.saturating_neg()))?;
    } else {
        // arithmetic shift of a negative number
        let res = if i >= LUA_NBITS { !0 } else { ((r as i32) >> i) as u32 };
        l.push_unsigned(res)?;
    }
    Ok(1)
}

fn rotate(l: &mut LuaState, left: bool) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let i = l.check_integer(2)?;
    let i = (if left { i } else { i.wrapping_neg() }).rem_euclid(LUA_NBITS) as u32;
    l.push_unsigned(r.rotate_left(i))?;
    Ok(1)
}

fn b_lrot(l: &mut LuaState) -> LuaResult<usize> {
    rotate(l, true)
}

fn b_rrot(l: &mut LuaState) -> LuaResult<usize> {
    rotate(l, false)
}

/// Field position and width arguments starting at `farg`
fn field_args(l: &mut LuaState, farg: usize) -> LuaResult<(u32, u32)> {
    let f = l.check_integer(farg)?;
    let w = l.opt_integer(farg + 1, 1)?;
    l.arg_check(0 <= f, farg, "field cannot be negative")?;
    l.arg_check(0 < w, farg + 1, "width must be positive")?;
    if f + w > LUA_NBITS {
        return Err(l.error("trying to access non-existent bits"));
    }
    Ok((f as u32, w as u32))
}

fn mask(w: u32) -> u32 {
    if w >= 32 { !0 } else { (1u32 << w) - 1 }
}

fn b_extract(l: &mut LuaState) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let (f, w) = field_args(l, 2)?;
    l.push_unsigned((r >> f) & mask(w))?;
    Ok(1)
}

fn b_replace(l: &mut LuaState) -> LuaResult<usize> {
    let r = l.check_unsigned(1)?;
    let v = l.check_unsigned(2)?;
    let (f, w) = field_args(l, 3)?;
    let m = mask(w);
    let res = (r & !(m << f)) | ((v & m) << f);
    l.push_unsigned(res)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::shift;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_shift() {
        assert_eq!(shift(1, 4), 16);
        assert_eq!(shift(16, -4), 1);
        assert_eq!(shift(1, 32), 0);
        assert_eq!(shift(0xffff_ffff, -40), 0);
    }

    #[test]
    fn test_bit32_library() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            assert(bit32.band(0xff, 0x0f) == 0x0f)
            assert(bit32.band() == 0xffffffff)
            assert(bit32.bor(1, 2, 4) == 7 and bit32.bxor(3, 1) == 2)
            assert(bit32.bnot(0) == 0xffffffff)
            assert(bit32.bnot(-1) == 0)
            assert(bit32.lshift(1, 31) == 0x80000000)
            assert(bit32.rshift(0x80000000, 31) == 1)
            assert(bit32.arshift(0x80000000, 1) == 0xc0000000)
            assert(bit32.arshift(-1, 40) == 0xffffffff)
            assert(bit32.lrotate(0x80000001, 1) == 3)
            assert(bit32.rrotate(3, 1) == 0x80000001)
            assert(bit32.btest(1, 3) and not bit32.btest(1, 2))
            assert(bit32.extract(0xf0, 4, 4) == 0xf)
            assert(bit32.replace(0, 5, 8, 3) == 0x500)
            local ok, msg = pcall(bit32.extract, 1, 30, 4)
            assert(not ok and msg:find("trying to access non-existent bits", 1, true))
            ok, msg = pcall(bit32.extract, 1, -1)
            assert(not ok and msg:find("field cannot be negative", 1, true))
            ok, msg = pcall(bit32.extract, 1, 0, 0)
            assert(not ok and msg:find("width must be positive", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }
}
