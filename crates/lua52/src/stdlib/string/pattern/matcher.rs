// Backtracking matcher: a direct port of the classic recursive scheme, with
// byte offsets in place of pointers

use super::class::{class_end, match_bracket_class, single_match};
use crate::lua_vm::lua_limits::{LUA_MAXCAPTURES, MAXCCALLS_PATTERN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureLen {
    Unfinished,
    Position,
    Closed(usize),
}

#[derive(Debug, Clone, Copy)]
struct Capture {
    init: usize,
    len: CaptureLen,
}

/// A capture as it is handed to Lua
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureValue<'a> {
    Str(&'a [u8]),
    /// 1-based position from an empty capture `()`
    Position(usize),
}

pub struct MatchState<'a> {
    pub src: &'a [u8],
    pub pat: &'a [u8],
    /// Number of captures (finished or not)
    pub level: usize,
    capture: [Capture; LUA_MAXCAPTURES],
    match_depth: usize,
}

impl<'a> MatchState<'a> {
    pub fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState {
            src,
            pat,
            level: 0,
            capture: [Capture { init: 0, len: CaptureLen::Unfinished }; LUA_MAXCAPTURES],
            match_depth: MAXCCALLS_PATTERN,
        }
    }

    /// Forget the captures of a previous attempt
    pub fn reset(&mut self) {
        self.level = 0;
        debug_assert_eq!(self.match_depth, MAXCCALLS_PATTERN);
    }

    /// Match `pat[p..]` against `src[s..]`; the end of the match on success
    pub fn do_match(&mut self, s: usize, p: usize) -> Result<Option<usize>, String> {
        if self.match_depth == 0 {
            return Err("pattern too complex".to_string());
        }
        self.match_depth -= 1;
        let res = self.match_here(s, p);
        self.match_depth += 1;
        res
    }

    fn match_here(&mut self, mut s: usize, mut p: usize) -> Result<Option<usize>, String> {
        let plen = self.pat.len();
        loop {
            if p == plen {
                return Ok(Some(s));
            }
            match self.pat[p] {
                b'(' => {
                    return if self.pat.get(p + 1) == Some(&b')') {
                        self.start_capture(s, p + 2, CaptureLen::Position)
                    } else {
                        self.start_capture(s, p + 1, CaptureLen::Unfinished)
                    };
                }
                b')' => return self.end_capture(s, p + 1),
                b'$' if p + 1 == plen => {
                    return Ok(if s == self.src.len() { Some(s) } else { None });
                }
                b'%' if p + 1 < plen && self.pat[p + 1] == b'b' => {
                    match self.match_balance(s, p + 2)? {
                        Some(e) => {
                            s = e;
                            p += 4;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                b'%' if p + 1 < plen && self.pat[p + 1] == b'f' => {
                    p += 2;
                    if self.pat.get(p) != Some(&b'[') {
                        return Err("missing '[' after '%f' in pattern".to_string());
                    }
                    let ep = class_end(self.pat, p)?;
                    let previous = if s == 0 { 0 } else { self.src[s - 1] };
                    let current = self.src.get(s).copied().unwrap_or(0);
                    if !match_bracket_class(previous, self.pat, p, ep - 1)
                        && match_bracket_class(current, self.pat, p, ep - 1)
                    {
                        p = ep;
                        continue;
                    }
                    return Ok(None);
                }
                b'%' if p + 1 < plen && self.pat[p + 1].is_ascii_digit() => {
                    match self.match_capture(s, self.pat[p + 1])? {
                        Some(e) => {
                            s = e;
                            p += 2;
                            continue;
                        }
                        None => return Ok(None),
                    }
                }
                _ => {}
            }
            // pattern class plus optional suffix
            let ep = class_end(self.pat, p)?;
            let suffix = self.pat.get(ep).copied();
            if !self.single_match_at(s, p, ep) {
                if matches!(suffix, Some(b'*' | b'?' | b'-')) {
                    // accept empty
                    p = ep + 1;
                    continue;
                }
                return Ok(None);
            }
            match suffix {
                Some(b'?') => {
                    if let Some(res) = self.do_match(s + 1, ep + 1)? {
                        return Ok(Some(res));
                    }
                    p = ep + 1;
                }
                Some(b'+') => return self.max_expand(s + 1, p, ep),
                Some(b'*') => return self.max_expand(s, p, ep),
                Some(b'-') => return self.min_expand(s, p, ep),
                _ => {
                    s += 1;
                    p = ep;
                }
            }
        }
    }

    #[inline]
    fn single_match_at(&self, s: usize, p: usize, ep: usize) -> bool {
        match self.src.get(s) {
            Some(&c) => single_match(c, self.pat, p, ep),
            None => false,
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> Result<Option<usize>, String> {
        let mut i = 0;
        while self.single_match_at(s + i, p, ep) {
            i += 1;
        }
        // try with the longest run, then shorter ones
        loop {
            if let Some(res) = self.do_match(s + i, ep + 1)? {
                return Ok(Some(res));
            }
            if i == 0 {
                return Ok(None);
            }
            i -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> Result<Option<usize>, String> {
        loop {
            if let Some(res) = self.do_match(s, ep + 1)? {
                return Ok(Some(res));
            }
            if self.single_match_at(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: CaptureLen) -> Result<Option<usize>, String> {
        if self.level >= LUA_MAXCAPTURES {
            return Err("too many captures".to_string());
        }
        self.capture[self.level] = Capture { init: s, len: what };
        self.level += 1;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            // undo capture
            self.level -= 1;
        }
        Ok(res)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> Result<Option<usize>, String> {
        let l = self.capture_to_close()?;
        self.capture[l].len = CaptureLen::Closed(s - self.capture[l].init);
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.capture[l].len = CaptureLen::Unfinished;
        }
        Ok(res)
    }

    fn capture_to_close(&self) -> Result<usize, String> {
        (0..self.level)
            .rev()
            .find(|&l| self.capture[l].len == CaptureLen::Unfinished)
            .ok_or_else(|| "invalid pattern capture".to_string())
    }

    fn match_balance(&self, s: usize, p: usize) -> Result<Option<usize>, String> {
        if p + 1 >= self.pat.len() {
            return Err("malformed pattern (missing arguments to '%b')".to_string());
        }
        let (open, close) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&open) {
            return Ok(None);
        }
        let mut depth = 1;
        for (i, &c) in self.src.iter().enumerate().skip(s + 1) {
            if c == close {
                depth -= 1;
                if depth == 0 {
                    return Ok(Some(i + 1));
                }
            } else if c == open {
                depth += 1;
            }
        }
        Ok(None)
    }

    fn check_capture(&self, l: u8) -> Result<usize, String> {
        let idx = l.wrapping_sub(b'1') as usize;
        if idx >= self.level || self.capture[idx].len == CaptureLen::Unfinished {
            return Err(format!("invalid capture index %{}", idx.wrapping_add(1) as u8));
        }
        Ok(idx)
    }

    fn match_capture(&self, s: usize, l: u8) -> Result<Option<usize>, String> {
        let idx = self.check_capture(l)?;
        let CaptureLen::Closed(len) = self.capture[idx].len else {
            // a position capture never matches text
            return Ok(None);
        };
        let init = self.capture[idx].init;
        if self.src.len() - s >= len && self.src[init..init + len] == self.src[s..s + len] {
            Ok(Some(s + len))
        } else {
            Ok(None)
        }
    }

    /// Capture `i` of a match of `src[s..e]`. With no explicit captures,
    /// capture 0 is the whole match.
    pub fn get_capture(&self, i: usize, s: usize, e: usize) -> Result<CaptureValue<'a>, String> {
        if i >= self.level {
            if i == 0 {
                return Ok(CaptureValue::Str(&self.src[s..e]));
            }
            return Err("invalid capture index".to_string());
        }
        let cap = self.capture[i];
        match cap.len {
            CaptureLen::Unfinished => Err("unfinished capture".to_string()),
            CaptureLen::Position => Ok(CaptureValue::Position(cap.init + 1)),
            CaptureLen::Closed(len) => Ok(CaptureValue::Str(&self.src[cap.init..cap.init + len])),
        }
    }

    /// Number of values a match yields: the captures, or the whole match
    pub fn capture_count(&self, whole_match: bool) -> usize {
        if self.level == 0 && whole_match { 1 } else { self.level }
    }
}
