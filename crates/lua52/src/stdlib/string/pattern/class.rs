// Character classes: %a %c %d %g %l %p %s %u %w %x %z (upper case negates)
// and bracket sets

/// C `isspace`: space, \t, \n, \v, \f, \r
#[inline]
fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

/// Does byte `c` belong to class `cl`? A letter that names no class
/// matches itself.
pub fn match_class(c: u8, cl: u8) -> bool {
    let res = match cl.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => is_space(c),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        b'z' => c == 0,
        _ => return cl == c,
    };
    if cl.is_ascii_uppercase() { !res } else { res }
}

/// Match `c` against the set `pat[p..=ec]`, where `pat[p]` is '[' and
/// `pat[ec]` is the closing ']'
pub fn match_bracket_class(c: u8, pat: &[u8], mut p: usize, ec: usize) -> bool {
    let mut sig = true;
    if pat.get(p + 1) == Some(&b'^') {
        sig = false;
        // skip the '^'
        p += 1;
    }
    p += 1;
    while p < ec {
        if pat[p] == b'%' {
            p += 1;
            if match_class(c, pat[p]) {
                return sig;
            }
        } else if pat.get(p + 1) == Some(&b'-') && p + 2 < ec {
            if pat[p] <= c && c <= pat[p + 2] {
                return sig;
            }
            p += 2;
        } else if pat[p] == c {
            return sig;
        }
        p += 1;
    }
    !sig
}

/// Index just past the single-character class starting at `p`
pub fn class_end(pat: &[u8], mut p: usize) -> Result<usize, String> {
    let c = pat[p];
    p += 1;
    match c {
        b'%' => {
            if p >= pat.len() {
                return Err("malformed pattern (ends with '%')".to_string());
            }
            Ok(p + 1)
        }
        b'[' => {
            if pat.get(p) == Some(&b'^') {
                p += 1;
            }
            // look for a ']'; the first character of the set is never it
            loop {
                if p >= pat.len() {
                    return Err("malformed pattern (missing ']')".to_string());
                }
                let cc = pat[p];
                p += 1;
                if cc == b'%' && p < pat.len() {
                    // skip escapes (e.g. '%]')
                    p += 1;
                }
                if pat.get(p) == Some(&b']') {
                    break;
                }
            }
            Ok(p + 1)
        }
        _ => Ok(p),
    }
}

/// Does `c` match the single-character class `pat[p..ep]`?
pub fn single_match(c: u8, pat: &[u8], p: usize, ep: usize) -> bool {
    match pat[p] {
        b'.' => true,
        b'%' => match_class(c, pat[p + 1]),
        b'[' => match_bracket_class(c, pat, p, ep - 1),
        pc => pc == c,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classes() {
        assert!(match_class(b'a', b'a'));
        assert!(!match_class(b'1', b'a'));
        assert!(match_class(b'1', b'A'));
        assert!(match_class(0x0b, b's'));
        assert!(match_class(0, b'z'));
        assert!(match_class(b'.', b'.'));
        assert!(match_class(b'_', b'p'));
    }

    #[test]
    fn test_bracket_sets() {
        let pat = b"[a-c%d_]";
        let ec = class_end(pat, 0).unwrap() - 1;
        assert_eq!(ec, 7);
        assert!(match_bracket_class(b'b', pat, 0, ec));
        assert!(match_bracket_class(b'7', pat, 0, ec));
        assert!(match_bracket_class(b'_', pat, 0, ec));
        assert!(!match_bracket_class(b'd', pat, 0, ec));

        let pat = b"[^]]";
        let ec = class_end(pat, 0).unwrap() - 1;
        assert_eq!(ec, 3);
        assert!(!match_bracket_class(b']', pat, 0, ec));
        assert!(match_bracket_class(b'x', pat, 0, ec));
    }
}
