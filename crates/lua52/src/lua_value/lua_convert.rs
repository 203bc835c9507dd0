// Number <-> string conversions shared by the scanner, coercions and the
// string library.

use crate::lua_vm::lua_limits::LUAI_NUMDIGITS;

#[inline]
fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

/// Convert a string to a number: decimal or hexadecimal, surrounded by
/// optional whitespace. `inf` and `nan` spellings are rejected.
pub fn str_to_number(s: &[u8]) -> Option<f64> {
    if s.iter().any(|&c| c == b'n' || c == b'N') {
        return None;
    }
    let start = s.iter().position(|&c| !is_space(c))?;
    let end = s.iter().rposition(|&c| !is_space(c))? + 1;
    let body = &s[start..end];
    if body.iter().any(|&c| c == b'x' || c == b'X') {
        return hex_to_number(body);
    }
    if !body
        .iter()
        .all(|c| c.is_ascii_digit() || matches!(c, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }
    std::str::from_utf8(body).ok()?.parse::<f64>().ok()
}

fn hex_digit(c: Option<&u8>) -> Option<f64> {
    c.and_then(|c| (*c as char).to_digit(16)).map(|d| d as f64)
}

fn hex_to_number(s: &[u8]) -> Option<f64> {
    let mut i = 0;
    let neg = match s.first() {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    if s.get(i) != Some(&b'0') || !matches!(s.get(i + 1), Some(b'x') | Some(b'X')) {
        return None;
    }
    i += 2;
    let mut r = 0.0f64;
    let mut int_digits = 0;
    while let Some(d) = hex_digit(s.get(i)) {
        r = r * 16.0 + d;
        int_digits += 1;
        i += 1;
    }
    let mut frac_digits = 0i32;
    if s.get(i) == Some(&b'.') {
        i += 1;
        while let Some(d) = hex_digit(s.get(i)) {
            r = r * 16.0 + d;
            frac_digits += 1;
            i += 1;
        }
    }
    if int_digits == 0 && frac_digits == 0 {
        return None;
    }
    let mut e = -4 * frac_digits;
    if matches!(s.get(i), Some(b'p') | Some(b'P')) {
        i += 1;
        let eneg = match s.get(i) {
            Some(b'-') => {
                i += 1;
                true
            }
            Some(b'+') => {
                i += 1;
                false
            }
            _ => false,
        };
        if !s.get(i).is_some_and(|c| c.is_ascii_digit()) {
            return None;
        }
        let mut exp1: i32 = 0;
        while let Some(c) = s.get(i).filter(|c| c.is_ascii_digit()) {
            exp1 = exp1.saturating_mul(10).saturating_add((c - b'0') as i32);
            i += 1;
        }
        e = e.saturating_add(if eneg { -exp1 } else { exp1 });
    }
    if i != s.len() {
        return None;
    }
    let v = ldexp(r, e);
    Some(if neg { -v } else { v })
}

/// x * 2^e without intermediate overflow of the power
pub(crate) fn ldexp(mut x: f64, mut e: i32) -> f64 {
    while e > 1000 {
        x *= 2f64.powi(1000);
        e -= 1000;
        if x.is_infinite() {
            return x;
        }
    }
    while e < -1000 {
        x *= 2f64.powi(-1000);
        e += 1000;
        if x == 0.0 {
            return x;
        }
    }
    x * 2f64.powi(e)
}

/// Reduce a number modulo 2^32 (`lua_Unsigned` conversion)
pub fn number_to_unsigned(n: f64) -> u32 {
    const SUPUNSIGNED: f64 = 4_294_967_296.0;
    if !n.is_finite() {
        return 0;
    }
    let n = n.floor();
    (n - (n / SUPUNSIGNED).floor() * SUPUNSIGNED) as u32
}

/// Convert a number to its string form (`%.14g`)
pub fn number_to_string(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e14 && !(n == 0.0 && n.is_sign_negative()) {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format_float(n, b'g', Some(LUAI_NUMDIGITS), false)
}

/// printf-style float conversion for `e`, `f` and `g` (and their upper-case
/// forms). Sign flags and padding are left to the caller.
pub fn format_float(n: f64, conv: u8, precision: Option<usize>, alt: bool) -> String {
    let upper = conv.is_ascii_uppercase();
    if !n.is_finite() {
        let s = if n.is_nan() {
            if n.is_sign_negative() { "-nan" } else { "nan" }
        } else if n < 0.0 {
            "-inf"
        } else {
            "inf"
        };
        return if upper { s.to_ascii_uppercase() } else { s.to_string() };
    }
    let prec = precision.unwrap_or(6);
    let s = match conv.to_ascii_lowercase() {
        b'f' => fmt_fixed(n, prec, alt),
        b'e' => fmt_exp(n, prec, alt),
        _ => fmt_general(n, prec, alt),
    };
    if upper { s.to_ascii_uppercase() } else { s }
}

fn fmt_fixed(n: f64, prec: usize, alt: bool) -> String {
    let mut s = format!("{:.*}", prec, n);
    if alt && prec == 0 {
        s.push('.');
    }
    s
}

fn fmt_exp(n: f64, prec: usize, alt: bool) -> String {
    let s = format!("{:.*e}", prec, n);
    let Some((mant, exp)) = s.split_once('e') else {
        return s;
    };
    let exp: i32 = exp.parse().unwrap_or(0);
    let mut out = String::with_capacity(mant.len() + 5);
    out.push_str(mant);
    if alt && prec == 0 {
        out.push('.');
    }
    out.push('e');
    out.push(if exp < 0 { '-' } else { '+' });
    let a = exp.unsigned_abs();
    if a < 10 {
        out.push('0');
    }
    let mut buf = itoa::Buffer::new();
    out.push_str(buf.format(a));
    out
}

fn fmt_general(n: f64, prec: usize, alt: bool) -> String {
    let p = prec.max(1);
    let probe = format!("{:.*e}", p - 1, n);
    let x: i32 = probe
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let s = if x < -4 || x >= p as i32 {
        fmt_exp(n, p - 1, alt)
    } else {
        fmt_fixed(n, (p as i32 - 1 - x) as usize, alt)
    };
    if alt { s } else { strip_trailing_zeros(s) }
}

fn strip_trailing_zeros(s: String) -> String {
    let (mant, exp) = match s.find('e') {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => (s.as_str(), ""),
    };
    if !mant.contains('.') {
        return s;
    }
    let trimmed = mant.trim_end_matches('0').trim_end_matches('.');
    format!("{}{}", trimmed, exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(10.0), "10");
        assert_eq!(number_to_string(-3.0), "-3");
        assert_eq!(number_to_string(0.5), "0.5");
        assert_eq!(number_to_string(1.0 / 3.0), "0.33333333333333");
        assert_eq!(number_to_string(1e100), "1e+100");
        assert_eq!(number_to_string(1e14), "1e+14");
        assert_eq!(number_to_string(99999999999999.0), "99999999999999");
        assert_eq!(number_to_string(-0.0), "-0");
        assert_eq!(number_to_string(2.5e-7), "2.5e-07");
        assert_eq!(number_to_string(f64::INFINITY), "inf");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_str_to_number() {
        assert_eq!(str_to_number(b"10"), Some(10.0));
        assert_eq!(str_to_number(b"  0x10  "), Some(16.0));
        assert_eq!(str_to_number(b"0x.8"), Some(0.5));
        assert_eq!(str_to_number(b"0x1p4"), Some(16.0));
        assert_eq!(str_to_number(b"-0x10"), Some(-16.0));
        assert_eq!(str_to_number(b"1e2"), Some(100.0));
        assert_eq!(str_to_number(b".5"), Some(0.5));
        assert_eq!(str_to_number(b"5."), Some(5.0));
        assert_eq!(str_to_number(b"inf"), None);
        assert_eq!(str_to_number(b"nan"), None);
        assert_eq!(str_to_number(b"1e"), None);
        assert_eq!(str_to_number(b"0x"), None);
        assert_eq!(str_to_number(b"12abc"), None);
        assert_eq!(str_to_number(b""), None);
        assert_eq!(str_to_number(b"   "), None);
    }

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(3.14159, b'f', Some(2), false), "3.14");
        assert_eq!(format_float(1234.5, b'e', Some(2), false), "1.23e+03");
        assert_eq!(format_float(1234.5, b'E', None, false), "1.234500E+03");
        assert_eq!(format_float(0.0001, b'g', None, false), "0.0001");
        assert_eq!(format_float(0.00001, b'g', None, false), "1e-05");
        assert_eq!(format_float(100000.0, b'g', None, false), "100000");
        assert_eq!(format_float(1000000.0, b'g', None, false), "1e+06");
        assert_eq!(format_float(2.0, b'g', None, true), "2.00000");
    }
}
