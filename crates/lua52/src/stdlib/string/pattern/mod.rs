// Lua pattern matching over raw bytes
//
// The pattern is interpreted directly while matching, with index arithmetic
// over `&[u8]` in place of pointers. Captures live in a fixed array and the
// recursion is bounded by a match depth counter.

mod class;
mod matcher;

pub use matcher::{CaptureValue, MatchState};

/// Characters that make a pattern more than a plain substring
const SPECIALS: &[u8] = b"^$*+?.([%-";

/// True when `p` has no magic characters and can be searched for as-is
pub fn is_plain_pattern(p: &[u8]) -> bool {
    !p.iter().any(|c| SPECIALS.contains(c))
}

/// Plain substring search starting at `init`
pub fn find_plain(s: &[u8], p: &[u8], init: usize) -> Option<usize> {
    if p.is_empty() {
        return Some(init);
    }
    if p.len() > s.len().saturating_sub(init) {
        return None;
    }
    s[init..].windows(p.len()).position(|w| w == p).map(|i| i + init)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn first_match(s: &str, p: &str) -> Option<(usize, usize)> {
        let (anchor, p) = match p.strip_prefix('^') {
            Some(rest) => (true, rest),
            None => (false, p),
        };
        let mut ms = MatchState::new(s.as_bytes(), p.as_bytes());
        let mut start = 0;
        loop {
            ms.reset();
            if let Some(e) = ms.do_match(start, 0).unwrap() {
                return Some((start, e));
            }
            start += 1;
            if anchor || start > s.len() {
                return None;
            }
        }
    }

    #[test]
    fn test_plain_detection() {
        assert!(is_plain_pattern(b"hello world"));
        assert!(!is_plain_pattern(b"a.b"));
        assert!(!is_plain_pattern(b"%d"));
        assert_eq!(find_plain(b"hello", b"ll", 0), Some(2));
        assert_eq!(find_plain(b"hello", b"", 3), Some(3));
        assert_eq!(find_plain(b"hello", b"lo", 4), None);
    }

    #[test]
    fn test_basic_matching() {
        assert_eq!(first_match("hello world", "o w"), Some((4, 7)));
        assert_eq!(first_match("abc123", "%d+"), Some((3, 6)));
        assert_eq!(first_match("  x", "^%s*"), Some((0, 2)));
        assert_eq!(first_match("abc", "^b"), None);
        assert_eq!(first_match("key = value", "(%w+)%s*=%s*(%w+)"), Some((0, 11)));
        assert_eq!(first_match("aaa", "a-"), Some((0, 0)));
        assert_eq!(first_match("aaab", "a-b"), Some((0, 4)));
        assert_eq!(first_match("xyz", "[^x]+"), Some((1, 3)));
        assert_eq!(first_match("f(a(b)c)d", "%b()"), Some((1, 8)));
        assert_eq!(first_match("THE (quick) fox", "%f[%a]%a+"), Some((0, 3)));
        assert_eq!(first_match("end", "d$"), Some((2, 3)));
    }

    #[test]
    fn test_captures() {
        let mut ms = MatchState::new(b"hello hello", b"(h%a+) %1");
        assert_eq!(ms.do_match(0, 0).unwrap(), Some(11));
        assert_eq!(ms.level, 1);
        assert_eq!(ms.get_capture(0, 0, 11).unwrap(), CaptureValue::Str(b"hello"));

        let mut ms = MatchState::new(b"abc", b"a()b");
        assert_eq!(ms.do_match(0, 0).unwrap(), Some(2));
        assert_eq!(ms.get_capture(0, 0, 2).unwrap(), CaptureValue::Position(2));
    }

    #[test]
    fn test_malformed_patterns() {
        let err = |p: &str| MatchState::new(b"abc", p.as_bytes()).do_match(0, 0).unwrap_err();
        assert_eq!(err("%"), "malformed pattern (ends with '%')");
        assert_eq!(err("[a"), "malformed pattern (missing ']')");
        assert_eq!(err("a)"), "invalid pattern capture");
        assert_eq!(err("%f"), "missing '[' after '%f' in pattern");
        assert_eq!(err("%b"), "malformed pattern (missing arguments to '%b')");
        assert_eq!(err("%1"), "invalid capture index %1");
    }

    #[test]
    fn test_unfinished_capture() {
        let mut ms = MatchState::new(b"abc", b"(a");
        assert_eq!(ms.do_match(0, 0).unwrap(), Some(1));
        assert_eq!(ms.get_capture(0, 0, 1).unwrap_err(), "unfinished capture");
    }

    #[test]
    fn test_pattern_too_complex() {
        let s = "a".repeat(1000);
        let p = "a?".repeat(300) + "b";
        let mut ms = MatchState::new(s.as_bytes(), p.as_bytes());
        assert_eq!(ms.do_match(0, 0).unwrap_err(), "pattern too complex");
    }
}
