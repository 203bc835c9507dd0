// string.format: printf-style conversions over Lua values

use crate::lua_value::format_float;
use crate::lua_vm::{LuaResult, LuaState};

const FLAGS: &[u8] = b"-+ #0";

/// One parsed `%` directive
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct FormatSpec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: usize,
    precision: Option<usize>,
    conv: u8,
}

/// Parse the directive after a '%' at `fmt[*i..]`, advancing `*i` past the
/// conversion character
fn scan_format(fmt: &[u8], i: &mut usize) -> Result<FormatSpec, String> {
    let mut spec = FormatSpec::default();
    let start = *i;
    while let Some(&c) = fmt.get(*i) {
        if !FLAGS.contains(&c) {
            break;
        }
        match c {
            b'-' => spec.left = true,
            b'+' => spec.plus = true,
            b' ' => spec.space = true,
            b'#' => spec.alt = true,
            _ => spec.zero = true,
        }
        *i += 1;
    }
    if *i - start > FLAGS.len() {
        return Err("invalid format (repeated flags)".to_string());
    }
    let digits = |i: &mut usize| {
        let mut n = None;
        // two digits at most
        for _ in 0..2 {
            match fmt.get(*i) {
                Some(c) if c.is_ascii_digit() => {
                    n = Some(n.unwrap_or(0) * 10 + (c - b'0') as usize);
                    *i += 1;
                }
                _ => break,
            }
        }
        n
    };
    spec.width = digits(i).unwrap_or(0);
    if fmt.get(*i) == Some(&b'.') {
        *i += 1;
        spec.precision = Some(digits(i).unwrap_or(0));
    }
    if fmt.get(*i).is_some_and(u8::is_ascii_digit) {
        return Err("invalid format (width or precision too long)".to_string());
    }
    spec.conv = fmt.get(*i).copied().unwrap_or(0);
    *i += 1;
    Ok(spec)
}

impl FormatSpec {
    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }

    /// Lay out sign, prefix and digits within the field width
    fn pad_number(&self, out: &mut Vec<u8>, negative: bool, prefix: &str, digits: &str, zero_ok: bool) {
        let sign = self.sign(negative);
        let len = sign.len() + prefix.len() + digits.len();
        let fill = self.width.saturating_sub(len);
        if self.left {
            out.extend_from_slice(sign.as_bytes());
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(digits.as_bytes());
            out.extend(std::iter::repeat_n(b' ', fill));
        } else if self.zero && zero_ok {
            out.extend_from_slice(sign.as_bytes());
            out.extend_from_slice(prefix.as_bytes());
            out.extend(std::iter::repeat_n(b'0', fill));
            out.extend_from_slice(digits.as_bytes());
        } else {
            out.extend(std::iter::repeat_n(b' ', fill));
            out.extend_from_slice(sign.as_bytes());
            out.extend_from_slice(prefix.as_bytes());
            out.extend_from_slice(digits.as_bytes());
        }
    }

    fn pad_text(&self, out: &mut Vec<u8>, text: &[u8]) {
        let fill = self.width.saturating_sub(text.len());
        if !self.left {
            out.extend(std::iter::repeat_n(b' ', fill));
        }
        out.extend_from_slice(text);
        if self.left {
            out.extend(std::iter::repeat_n(b' ', fill));
        }
    }

    /// Integer digits with the minimum digit count of the precision
    fn int_digits(&self, digits: String) -> String {
        match self.precision {
            Some(0) if digits == "0" => String::new(),
            Some(p) if digits.len() < p => "0".repeat(p - digits.len()) + &digits,
            _ => digits,
        }
    }
}

/// `%a`: hexadecimal floating point, "0x1.8p+1" style
pub(crate) fn format_hex_float(n: f64, precision: Option<usize>, upper: bool) -> String {
    if !n.is_finite() {
        return format_float(n, if upper { b'G' } else { b'g' }, None, false);
    }
    let negative = n.is_sign_negative();
    let bits = n.abs().to_bits();
    let exp_bits = ((bits >> 52) & 0x7ff) as i32;
    let mut frac = bits & ((1u64 << 52) - 1);
    let (mut lead, exp) = match (exp_bits, frac) {
        (0, 0) => (0u64, 0),
        (0, _) => (0, -1022),
        _ => (1, exp_bits - 1023),
    };
    let mut ndigits = 13;
    if let Some(p) = precision.filter(|&p| p < 13) {
        // round the fraction to `p` hex digits, half to even
        let shift = (13 - p) * 4;
        let rem = frac & ((1u64 << shift) - 1);
        let half = 1u64 << (shift - 1);
        frac >>= shift;
        if rem > half || (rem == half && frac & 1 == 1) {
            frac += 1;
            if frac >> (p * 4) != 0 {
                frac &= (1u64 << (p * 4)) - 1;
                lead += 1;
            }
        }
        ndigits = p;
    }
    let mut hex = if ndigits == 0 { String::new() } else { format!("{:0width$x}", frac, width = ndigits) };
    match precision {
        None => {
            while hex.ends_with('0') {
                hex.pop();
            }
        }
        Some(p) if p > 13 => hex.push_str(&"0".repeat(p - 13)),
        _ => {}
    }
    let mut s = String::new();
    if negative {
        s.push('-');
    }
    s.push_str("0x");
    s.push_str(&lead.to_string());
    if !hex.is_empty() {
        s.push('.');
        s.push_str(&hex);
    }
    s.push_str(&format!("p{:+}", exp));
    if upper { s.to_ascii_uppercase() } else { s }
}

/// `%q`: a string literal that reads back as the same string
fn add_quoted(out: &mut Vec<u8>, s: &[u8]) {
    out.push(b'"');
    for (i, &c) in s.iter().enumerate() {
        match c {
            b'"' | b'\\' | b'\n' => {
                out.push(b'\\');
                out.push(c);
            }
            c if c == 0 || c.is_ascii_control() => {
                let next_is_digit = s.get(i + 1).is_some_and(u8::is_ascii_digit);
                let escaped = if next_is_digit { format!("\\{:03}", c) } else { format!("\\{}", c) };
                out.extend_from_slice(escaped.as_bytes());
            }
            _ => out.push(c),
        }
    }
    out.push(b'"');
}

/// An integral argument for %d and friends. Values outside `lo..hi` (and
/// NaN) are rejected before the cast; fractions truncate toward zero.
fn check_integral<T>(l: &mut LuaState, arg: usize, n: f64, (lo, hi): (f64, f64), cast: fn(f64) -> T) -> LuaResult<T> {
    let in_range = (n >= lo || n > lo - 1.0) && n < hi;
    l.arg_check(in_range, arg, "not a number in proper range")?;
    Ok(cast(n))
}

/// Representable ranges of the signed and unsigned conversions
const SIGNED_RANGE: (f64, f64) = (-9_223_372_036_854_775_808.0, 9_223_372_036_854_775_808.0);
const UNSIGNED_RANGE: (f64, f64) = (0.0, 18_446_744_073_709_551_616.0);

pub fn string_format(l: &mut LuaState) -> LuaResult<usize> {
    let top = l.get_top();
    let fmt = l.check_lstring(1)?;
    let fmt = fmt.as_bytes();
    let mut out = Vec::with_capacity(fmt.len());
    let mut arg = 1;
    let mut i = 0;
    while i < fmt.len() {
        let c = fmt[i];
        i += 1;
        if c != b'%' {
            out.push(c);
            continue;
        }
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        arg += 1;
        if arg > top {
            return Err(l.arg_error(arg, "no value"));
        }
        let spec = match scan_format(fmt, &mut i) {
            Ok(spec) => spec,
            Err(msg) => return Err(l.error(msg)),
        };
        match spec.conv {
            b'c' => {
                let n = l.check_integer(arg)?;
                spec.pad_text(&mut out, &[n as u8]);
            }
            b'd' | b'i' => {
                let n = l.check_number(arg)?;
                let ni = check_integral(l, arg, n, SIGNED_RANGE, |n| n as i64)?;
                let digits = spec.int_digits(ni.unsigned_abs().to_string());
                spec.pad_number(&mut out, ni < 0, "", &digits, spec.precision.is_none());
            }
            b'o' | b'u' | b'x' | b'X' => {
                let n = l.check_number(arg)?;
                let ni = check_integral(l, arg, n, UNSIGNED_RANGE, |n| n as u64)?;
                let digits = match spec.conv {
                    b'o' => format!("{:o}", ni),
                    b'u' => ni.to_string(),
                    b'x' => format!("{:x}", ni),
                    _ => format!("{:X}", ni),
                };
                let digits = spec.int_digits(digits);
                let prefix = match spec.conv {
                    b'o' if spec.alt && !digits.starts_with('0') => "0",
                    b'x' if spec.alt && ni != 0 => "0x",
                    b'X' if spec.alt && ni != 0 => "0X",
                    _ => "",
                };
                let unsigned = FormatSpec { plus: false, space: false, ..spec.clone() };
                unsigned.pad_number(&mut out, false, prefix, &digits, spec.precision.is_none());
            }
            b'e' | b'E' | b'f' | b'g' | b'G' => {
                let n = l.check_number(arg)?;
                let s = format_float(n, spec.conv, spec.precision, spec.alt);
                let (negative, digits) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                spec.pad_number(&mut out, negative, "", digits, n.is_finite());
            }
            b'a' | b'A' => {
                let n = l.check_number(arg)?;
                let s = format_hex_float(n, spec.precision, spec.conv == b'A');
                let (negative, rest) = match s.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                // zero padding goes after the "0x"
                let (prefix, digits) = if n.is_finite() { rest.split_at(2) } else { ("", rest) };
                spec.pad_number(&mut out, negative, prefix, digits, n.is_finite());
            }
            b'q' => {
                let s = l.check_lstring(arg)?;
                add_quoted(&mut out, s.as_bytes());
            }
            b's' => {
                let v = l.value_at(arg as i32);
                let s = l.to_display_string(&v)?;
                let bytes = s.as_bytes();
                let bytes = match spec.precision {
                    Some(p) if p < bytes.len() => &bytes[..p],
                    _ => bytes,
                };
                spec.pad_text(&mut out, bytes);
            }
            other => {
                let shown = if other == 0 { String::new() } else { (other as char).to_string() };
                return Err(l.error(format!("invalid option '%{}' to 'format'", shown)));
            }
        }
    }
    l.push_string(out)?;
    Ok(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lua_vm::{LuaVM, SafeOption};

    #[test]
    fn test_scan_format() {
        let mut i = 0;
        let spec = scan_format(b"-08.3f", &mut i).unwrap();
        assert!(spec.left && spec.zero);
        assert_eq!((spec.width, spec.precision, spec.conv), (8, Some(3), b'f'));
        assert_eq!(i, 6);

        let mut i = 0;
        assert_eq!(
            scan_format(b"--+-+-d", &mut i).unwrap_err(),
            "invalid format (repeated flags)"
        );
        let mut i = 0;
        assert_eq!(
            scan_format(b"100d", &mut i).unwrap_err(),
            "invalid format (width or precision too long)"
        );
    }

    #[test]
    fn test_hex_float() {
        assert_eq!(format_hex_float(1.0, None, false), "0x1p+0");
        assert_eq!(format_hex_float(3.0, None, false), "0x1.8p+1");
        assert_eq!(format_hex_float(-0.5, None, true), "-0X1P-1");
        assert_eq!(format_hex_float(0.0, None, false), "0x0p+0");
        assert_eq!(format_hex_float(1.0, Some(2), false), "0x1.00p+0");
    }

    #[test]
    fn test_quoted() {
        let mut out = Vec::new();
        add_quoted(&mut out, b"a\"b\\\n\x01\x002");
        assert_eq!(out, b"\"a\\\"b\\\\\\\n\\1\\0002\"");
    }

    #[test]
    fn test_format_conversions() {
        let mut vm = LuaVM::new(SafeOption::default());
        vm.open_libs();
        let result = vm.execute_string(
            r#"
            assert(string.format("%5.2f|%-5d|%05d", 3.14159, 42, -42) == " 3.14|42   |-0042")
            assert(string.format("%x %X %#x %o", 255, 255, 255, 8) == "ff FF 0xff 10")
            assert(string.format("%s and %s", "a", 1) == "a and 1")
            assert(string.format("%10s|%-3s|%.2s", "hi", "x", "abc") == "        hi|x  |ab")
            assert(string.format("%q", 'he said "hi"\n') == '"he said \\"hi\\"\\\n"')
            assert(string.format("%c%c", 72, 105) == "Hi")
            assert(string.format("%g %g %e", 1e20, 0.1, 12345.678) == "1e+20 0.1 1.234568e+04")
            assert(string.format("%+d % d %%", 5, 5) == "+5  5 %")
            assert(string.format("%.3d", 7) == "007")
            assert(string.format("%d", 1.5) == "1")
            assert(string.format("%d", -2.75) == "-2")
            local ok, msg = pcall(string.format, "%d", 2^63)
            assert(not ok and msg:find("not a number in proper range", 1, true))
            ok, msg = pcall(string.format, "%x", -2^63 - 4096)
            assert(not ok and msg:find("not a number in proper range", 1, true))
            ok, msg = pcall(string.format, "%d", 0/0)
            assert(not ok and msg:find("not a number in proper range", 1, true))
            assert(string.format("%d", -2^63) == "-9223372036854775808")
            ok, msg = pcall(string.format, "%y", 1)
            assert(not ok and msg:find("invalid option '%y' to 'format'", 1, true))
            ok, msg = pcall(string.format, "%d")
            assert(not ok and msg:find("no value", 1, true))
            local t = setmetatable({}, {__tostring = function() return "T!" end})
            assert(string.format("%s", t) == "T!")
            "#,
        );
        assert!(result.is_ok());
    }
}
