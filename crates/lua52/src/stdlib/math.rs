// Math library
// Implements: abs, acos, asin, atan, atan2, ceil, cos, cosh, deg, exp,
// floor, fmod, frexp, ldexp, log, log10, max, min, modf, pow, rad, random,
// randomseed, sin, sinh, sqrt, tan, tanh, pi, huge

use std::cell::RefCell;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lib_registry::LibraryModule;
use crate::lua_value::{LuaValue, ldexp};
use crate::lua_vm::{LuaResult, LuaState};

thread_local! {
    static RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(0));
}

pub fn create_math_lib() -> LibraryModule {
    crate::lib_module!("math", {
        "abs" => math_abs,
        "acos" => math_acos,
        "asin" => math_asin,
        "atan2" => math_atan2,
        "atan" => math_atan,
        "ceil" => math_ceil,
        "cosh" => math_cosh,
        "cos" => math_cos,
        "deg" => math_deg,
        "exp" => math_exp,
        "floor" => math_floor,
        "fmod" => math_fmod,
        "frexp" => math_frexp,
        "ldexp" => math_ldexp,
        "log10" => math_log10,
        "log" => math_log,
        "max" => math_max,
        "min" => math_min,
        "modf" => math_modf,
        "pow" => math_pow,
        "rad" => math_rad,
        "random" => math_random,
        "randomseed" => math_randomseed,
        "sinh" => math_sinh,
        "sin" => math_sin,
        "sqrt" => math_sqrt,
        "tanh" => math_tanh,
        "tan" => math_tan,
    })
    .with_value("pi", |_| LuaValue::Number(std::f64::consts::PI))
    .with_value("huge", |_| LuaValue::Number(f64::INFINITY))
}

/// One-argument functions that map a number to a number
macro_rules! unary_math {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(
            fn $name(l: &mut LuaState) -> LuaResult<usize> {
                let x = l.check_number(1)?;
                let f: fn(f64) -> f64 = $f;
                l.push_number(f(x))?;
                Ok(1)
            }
        )*
    };
}

unary_math! {
    math_abs => f64::abs,
    math_acos => f64::acos,
    math_asin => f64::asin,
    math_atan => f64::atan,
    math_ceil => f64::ceil,
    math_cos => f64::cos,
    math_cosh => f64::cosh,
    math_deg => f64::to_degrees,
    math_exp => f64::exp,
    math_floor => f64::floor,
    math_log10 => f64::log10,
    math_rad => f64::to_radians,
    math_sin => f64::sin,
    math_sinh => f64::sinh,
    math_sqrt => f64::sqrt,
    math_tan => f64::tan,
    math_tanh => f64::tanh,
}

fn math_atan2(l: &mut LuaState) -> LuaResult<usize> {
    let y = l.check_number(1)?;
    let x = l.check_number(2)?;
    l.push_number(y.atan2(x))?;
    Ok(1)
}

fn math_fmod(l: &mut LuaState) -> LuaResult<usize> {
    let a = l.check_number(1)?;
    let b = l.check_number(2)?;
    l.push_number(a % b)?;
    Ok(1)
}

fn math_pow(l: &mut LuaState) -> LuaResult<usize> {
    let x = l.check_number(1)?;
    let y = l.check_number(2)?;
    l.push_number(x.powf(y))?;
    Ok(1)
}

fn math_modf(l: &mut LuaState) -> LuaResult<usize> {
    let x = l.check_number(1)?;
    let ip = x.trunc();
    let fp = if x.is_infinite() { 0.0 } else { x - ip };
    l.push_number(ip)?;
    l.push_number(fp)?;
    Ok(2)
}

/// Split `x` into a mantissa in [0.5, 1) and a power of two
pub(crate) fn frexp(x: f64) -> (f64, i32) {
    if x == 0.0 || !x.is_finite() {
        return (x, 0);
    }
    let bits = x.to_bits();
    let exp = ((bits >> 52) & 0x7ff) as i32;
    if exp == 0 {
        // subnormal: scale into the normal range first
        let (m, e) = frexp(x * 2f64.powi(64));
        return (m, e - 64);
    }
    let mantissa = f64::from_bits((bits & !(0x7ffu64 << 52)) | (1022u64 << 52));
    (mantissa, exp - 1022)
}

fn math_frexp(l: &mut LuaState) -> LuaResult<usize> {
    let (m, e) = frexp(l.check_number(1)?);
    l.push_number(m)?;
    l.push_integer(e as i64)?;
    Ok(2)
}

fn math_ldexp(l: &mut LuaState) -> LuaResult<usize> {
    let x = l.check_number(1)?;
    let e = l.check_integer(2)?;
    l.push_number(ldexp(x, e.clamp(i32::MIN as i64, i32::MAX as i64) as i32))?;
    Ok(1)
}

fn math_log(l: &mut LuaState) -> LuaResult<usize> {
    let x = l.check_number(1)?;
    let res = if l.is_none_or_nil(2) {
        x.ln()
    } else {
        let base = l.check_number(2)?;
        if base == 10.0 { x.log10() } else { x.ln() / base.ln() }
    };
    l.push_number(res)?;
    Ok(1)
}

fn math_min(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    let mut dmin = l.check_number(1)?;
    for i in 2..=n {
        let d = l.check_number(i)?;
        if d < dmin {
            dmin = d;
        }
    }
    l.push_number(dmin)?;
    Ok(1)
}

fn math_max(l: &mut LuaState) -> LuaResult<usize> {
    let n = l.get_top();
    let mut dmax = l.check_number(1)?;
    for i in 2..=n {
        let d = l.check_number(i)?;
        if d > dmax {
            dmax = d;
        }
    }
    l.push_number(dmax)?;
    Ok(1)
}

fn math_random(l: &mut LuaState) -> LuaResult<usize> {
    let r: f64 = RNG.with(|rng| rng.borrow_mut().r#gen());
    match l.get_top() {
        0 => l.push_number(r)?,
        1 => {
            let u = l.check_number(1)?;
            l.arg_check(1.0 <= u, 1, "interval is empty")?;
            l.push_number((r * u).floor() + 1.0)?;
        }
        2 => {
            let lo = l.check_number(1)?;
            let up = l.check_number(2)?;
            l.arg_check(lo <= up, 2, "interval is empty")?;
            l.push_number((r * (up - lo + 1.0)).floor() + lo)?;
        }
        _ => return Err(l.error("wrong number of arguments")),
    }
    Ok(1)
}

fn math_randomseed(l: &mut LuaState) -> LuaResult<usize> {
    let seed = l.check_unsigned(1)?;
    RNG.with(|rng| *rng.borrow_mut() = StdRng::seed_from_u64(seed as u64));
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::frexp;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_frexp() {
        assert_eq!(frexp(8.0), (0.5, 4));
        assert_eq!(frexp(-3.0), (-0.75, 2));
        assert_eq!(frexp(0.0), (0.0, 0));
        let (m, e) = frexp(f64::MIN_POSITIVE / 4.0);
        assert_eq!((m, e), (0.5, -1023));
    }

    #[test]
    fn test_math_functions() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            assert(math.floor(3.7) == 3 and math.ceil(3.2) == 4)
            assert(math.max(1, 5, 3) == 5 and math.min(4, 2, 8) == 2)
            assert(math.abs(-2) == 2 and math.sqrt(16) == 4)
            assert(math.huge > 1e308 and -math.huge < -1e308)
            assert(math.fmod(7, 3) == 1 and math.fmod(-7, 3) == -1)
            local i, f = math.modf(3.5)
            assert(i == 3 and f == 0.5)
            assert(math.log(8, 2) == 3 and math.log10(1000) == 3)
            assert(math.pow(2, 10) == 1024 and math.ldexp(1, 4) == 16)
            assert(tostring(math.pi) == "3.1415926535898")
            local ok, msg = pcall(math.floor, "x")
            assert(not ok and msg:find("number expected", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn test_random_ranges() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            math.randomseed(42)
            for _ = 1, 100 do
                local r = math.random()
                assert(r >= 0 and r < 1)
                local n = math.random(6)
                assert(n >= 1 and n <= 6 and n == math.floor(n))
                local m = math.random(-3, 3)
                assert(m >= -3 and m <= 3)
            end
            math.randomseed(7)
            local a = math.random(1000)
            math.randomseed(7)
            assert(math.random(1000) == a)
            local ok, msg = pcall(math.random, 0)
            assert(not ok and msg:find("interval is empty", 1, true))
            ok, msg = pcall(math.random, 1, 2, 3)
            assert(not ok and msg:find("wrong number of arguments", 1, true))
            "#,
        );
        assert!(result.is_ok());
    }
}
