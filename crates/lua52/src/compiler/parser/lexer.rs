use crate::compiler::CompileError;
use crate::compiler::parser::LuaTokenKind;
use crate::lua_value::LuaString;
use crate::lua_vm::chunk_id;
use crate::lua_vm::lua_limits::MAX_INT;

/// Semantic value of the current token
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    None,
    Number(f64),
    Str(LuaString),
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: LuaTokenKind,
    pub value: TokenValue,
}

impl Token {
    fn plain(kind: LuaTokenKind) -> Self {
        Token {
            kind,
            value: TokenValue::None,
        }
    }
}

pub(crate) fn is_newline(c: Option<u8>) -> bool {
    matches!(c, Some(b'\n') | Some(b'\r'))
}

fn is_space(c: Option<u8>) -> bool {
    matches!(c, Some(b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c'))
}

fn is_name_char(c: Option<u8>) -> bool {
    matches!(c, Some(c) if c.is_ascii_alphanumeric() || c == b'_')
}

/// Scanner over a byte buffer with one byte of lookahead and one token of
/// lookahead.
pub struct LuaLexer<'a> {
    source: &'a [u8],
    pos: usize,
    pub(super) current: Option<u8>,
    /// Line of the current byte
    pub line: u32,
    /// Line of the last token consumed
    pub last_line: u32,
    pub token: Token,
    ahead: Option<Token>,
    /// Text of the token being read, for messages
    pub(super) buffer: Vec<u8>,
    chunk_id: String,
}

impl<'a> LuaLexer<'a> {
    pub fn new(source: &'a [u8], chunk_name: &str) -> Self {
        LuaLexer {
            source,
            pos: 0,
            current: source.first().copied(),
            line: 1,
            last_line: 1,
            token: Token::plain(LuaTokenKind::TkEof),
            ahead: None,
            buffer: Vec::new(),
            chunk_id: chunk_id(chunk_name.as_bytes()),
        }
    }

    /// Advance to the next token
    pub fn next(&mut self) -> Result<(), CompileError> {
        self.last_line = self.line;
        self.token = match self.ahead.take() {
            Some(token) => token,
            None => self.lex()?,
        };
        Ok(())
    }

    /// Kind of the token after the current one
    pub fn lookahead(&mut self) -> Result<LuaTokenKind, CompileError> {
        if let Some(token) = &self.ahead {
            return Ok(token.kind);
        }
        let token = self.lex()?;
        let kind = token.kind;
        self.ahead = Some(token);
        Ok(kind)
    }

    #[inline]
    pub fn kind(&self) -> LuaTokenKind {
        self.token.kind
    }

    /// Error at the current line, pointing at `token` when given
    pub fn lex_error(&self, msg: &str, token: Option<LuaTokenKind>) -> CompileError {
        let mut message = format!("{}:{}: {}", self.chunk_id, self.line, msg);
        if let Some(token) = token {
            message.push_str(" near ");
            message.push_str(&self.token_text(token));
        }
        CompileError { message }
    }

    /// Error pointing at the current token
    pub fn syntax_error(&self, msg: &str) -> CompileError {
        self.lex_error(msg, Some(self.token.kind))
    }

    fn token_text(&self, token: LuaTokenKind) -> String {
        match token {
            LuaTokenKind::TkName | LuaTokenKind::TkString | LuaTokenKind::TkNumber => {
                format!("'{}'", String::from_utf8_lossy(&self.buffer))
            }
            other => other.display(),
        }
    }

    #[inline]
    pub(super) fn next_char(&mut self) {
        self.pos += 1;
        self.current = self.source.get(self.pos).copied();
    }

    #[inline]
    pub(super) fn save(&mut self, c: u8) {
        self.buffer.push(c);
    }

    #[inline]
    pub(super) fn save_and_next(&mut self) {
        if let Some(c) = self.current {
            self.buffer.push(c);
        }
        self.next_char();
    }

    /// Save and skip the current byte when it is one of `set`
    pub(super) fn check_next(&mut self, set: &[u8]) -> bool {
        match self.current {
            Some(c) if set.contains(&c) => {
                self.save_and_next();
                true
            }
            _ => false,
        }
    }

    /// Skip a newline sequence (`\n`, `\r`, `\n\r` or `\r\n`)
    fn inc_line_number(&mut self) -> Result<(), CompileError> {
        let old = self.current;
        self.next_char();
        if is_newline(self.current) && self.current != old {
            self.next_char();
        }
        self.line += 1;
        if self.line >= MAX_INT {
            return Err(self.syntax_error("chunk has too many lines"));
        }
        Ok(())
    }

    fn lex(&mut self) -> Result<Token, CompileError> {
        self.buffer.clear();
        loop {
            let Some(c) = self.current else {
                return Ok(Token::plain(LuaTokenKind::TkEof));
            };
            match c {
                b'\n' | b'\r' => self.inc_line_number()?,
                b' ' | b'\t' | b'\x0b' | b'\x0c' => self.next_char(),
                b'-' => {
                    self.next_char();
                    if self.current != Some(b'-') {
                        return Ok(Token::plain(LuaTokenKind::TkChar(b'-')));
                    }
                    // comment
                    self.next_char();
                    if self.current == Some(b'[') {
                        let sep = self.skip_sep();
                        self.buffer.clear();
                        if sep >= 0 {
                            self.read_long_string(false, sep as usize)?;
                            self.buffer.clear();
                            continue;
                        }
                    }
                    while !is_newline(self.current) && self.current.is_some() {
                        self.next_char();
                    }
                }
                b'[' => {
                    let sep = self.skip_sep();
                    if sep >= 0 {
                        let s = self.read_long_string(true, sep as usize)?;
                        return Ok(Token {
                            kind: LuaTokenKind::TkString,
                            value: TokenValue::Str(s),
                        });
                    } else if sep == -1 {
                        return Ok(Token::plain(LuaTokenKind::TkChar(b'[')));
                    }
                    return Err(self.lex_error("invalid long string delimiter", Some(LuaTokenKind::TkString)));
                }
                b'=' => return Ok(self.one_or_two(b'=', LuaTokenKind::TkEq)),
                b'<' => return Ok(self.one_or_two(b'=', LuaTokenKind::TkLe)),
                b'>' => return Ok(self.one_or_two(b'=', LuaTokenKind::TkGe)),
                b'~' => return Ok(self.one_or_two(b'=', LuaTokenKind::TkNe)),
                b':' => return Ok(self.one_or_two(b':', LuaTokenKind::TkDbColon)),
                b'"' | b'\'' => return self.read_string(c),
                b'.' => {
                    self.save_and_next();
                    if self.check_next(b".") {
                        if self.check_next(b".") {
                            return Ok(Token::plain(LuaTokenKind::TkDots));
                        }
                        return Ok(Token::plain(LuaTokenKind::TkConcat));
                    }
                    if !matches!(self.current, Some(d) if d.is_ascii_digit()) {
                        return Ok(Token::plain(LuaTokenKind::TkChar(b'.')));
                    }
                    return self.read_numeral();
                }
                b'0'..=b'9' => return self.read_numeral(),
                c if c.is_ascii_alphabetic() || c == b'_' => {
                    while is_name_char(self.current) {
                        self.save_and_next();
                    }
                    if let Some(word) = LuaTokenKind::reserved(&self.buffer) {
                        return Ok(Token::plain(word));
                    }
                    return Ok(Token {
                        kind: LuaTokenKind::TkName,
                        value: TokenValue::Str(LuaString::new(&self.buffer)),
                    });
                }
                other => {
                    self.next_char();
                    return Ok(Token::plain(LuaTokenKind::TkChar(other)));
                }
            }
        }
    }

    /// `first` alone, or `two` when followed by `second`
    fn one_or_two(&mut self, second: u8, two: LuaTokenKind) -> Token {
        let first = self.current.unwrap_or(0);
        self.next_char();
        if self.current == Some(second) {
            self.next_char();
            Token::plain(two)
        } else {
            Token::plain(LuaTokenKind::TkChar(first))
        }
    }

    /// Read `[=*[` or `]=*]` and return the number of `=`. Returns a
    /// negative value when the bracket is not well formed: -1 for a lone
    /// bracket.
    fn skip_sep(&mut self) -> i32 {
        let s = self.current;
        let mut count = 0;
        self.save_and_next();
        while self.current == Some(b'=') {
            self.save_and_next();
            count += 1;
        }
        if self.current == s { count } else { -count - 1 }
    }

    fn read_long_string(&mut self, keep: bool, sep: usize) -> Result<LuaString, CompileError> {
        self.save_and_next();
        if is_newline(self.current) {
            self.inc_line_number()?;
        }
        loop {
            match self.current {
                None => {
                    let msg = if keep { "unfinished long string" } else { "unfinished long comment" };
                    return Err(self.lex_error(msg, Some(LuaTokenKind::TkEof)));
                }
                Some(b']') => {
                    if self.skip_sep() == sep as i32 {
                        self.save_and_next();
                        break;
                    }
                }
                Some(b'\n') | Some(b'\r') => {
                    self.save(b'\n');
                    self.inc_line_number()?;
                    if !keep {
                        self.buffer.clear();
                    }
                }
                Some(_) => {
                    if keep {
                        self.save_and_next();
                    } else {
                        self.next_char();
                    }
                }
            }
        }
        if !keep {
            return Ok(LuaString::new(b""));
        }
        let delim = 2 + sep;
        Ok(LuaString::new(&self.buffer[delim..self.buffer.len() - delim]))
    }

    /// Report a bad escape sequence, showing what was read of it
    fn escape_error(&mut self, read: &[Option<u8>], msg: &str) -> CompileError {
        self.save(b'\\');
        for c in read.iter().map_while(|c| *c) {
            self.save(c);
        }
        self.lex_error(msg, Some(LuaTokenKind::TkString))
    }

    fn read_hex_escape(&mut self) -> Result<u8, CompileError> {
        let mut read = [Some(b'x'), None, None];
        let mut r = 0u32;
        for i in 1..3 {
            self.next_char();
            read[i] = self.current;
            match self.current.and_then(|c| (c as char).to_digit(16)) {
                Some(d) => r = (r << 4) + d,
                None => return Err(self.escape_error(&read[..=i], "hexadecimal digit expected")),
            }
        }
        Ok(r as u8)
    }

    fn read_decimal_escape(&mut self) -> Result<u8, CompileError> {
        let mut read = [None; 3];
        let mut r = 0u32;
        let mut i = 0;
        while i < 3 {
            match self.current {
                Some(c) if c.is_ascii_digit() => {
                    read[i] = Some(c);
                    r = 10 * r + (c - b'0') as u32;
                    self.next_char();
                    i += 1;
                }
                _ => break,
            }
        }
        if r > u8::MAX as u32 {
            return Err(self.escape_error(&read[..i], "decimal escape too large"));
        }
        Ok(r as u8)
    }

    fn read_string(&mut self, delimiter: u8) -> Result<Token, CompileError> {
        self.save_and_next();
        while self.current != Some(delimiter) {
            match self.current {
                None => return Err(self.lex_error("unfinished string", Some(LuaTokenKind::TkEof))),
                Some(b'\n') | Some(b'\r') => {
                    return Err(self.lex_error("unfinished string", Some(LuaTokenKind::TkString)));
                }
                Some(b'\\') => {
                    self.next_char();
                    let c = match self.current {
                        Some(b'a') => Some(b'\x07'),
                        Some(b'b') => Some(b'\x08'),
                        Some(b'f') => Some(b'\x0c'),
                        Some(b'n') => Some(b'\n'),
                        Some(b'r') => Some(b'\r'),
                        Some(b't') => Some(b'\t'),
                        Some(b'v') => Some(b'\x0b'),
                        Some(b'x') => Some(self.read_hex_escape()?),
                        Some(c @ (b'\\' | b'"' | b'\'')) => Some(c),
                        Some(b'\n') | Some(b'\r') => {
                            self.inc_line_number()?;
                            self.save(b'\n');
                            continue;
                        }
                        // raises "unfinished string" on the next pass
                        None => continue,
                        Some(b'z') => {
                            self.next_char();
                            while is_space(self.current) {
                                if is_newline(self.current) {
                                    self.inc_line_number()?;
                                } else {
                                    self.next_char();
                                }
                            }
                            continue;
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let c = self.read_decimal_escape()?;
                            self.save(c);
                            continue;
                        }
                        Some(c) => return Err(self.escape_error(&[Some(c)], "invalid escape sequence")),
                    };
                    if let Some(c) = c {
                        self.next_char();
                        self.save(c);
                    }
                }
                Some(_) => self.save_and_next(),
            }
        }
        self.save_and_next();
        let s = LuaString::new(&self.buffer[1..self.buffer.len() - 1]);
        Ok(Token {
            kind: LuaTokenKind::TkString,
            value: TokenValue::Str(s),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<LuaTokenKind> {
        let mut lexer = LuaLexer::new(src.as_bytes(), "=test");
        let mut out = Vec::new();
        loop {
            lexer.next().unwrap();
            if lexer.kind() == LuaTokenKind::TkEof {
                break;
            }
            out.push(lexer.kind());
        }
        out
    }

    fn first_string(src: &str) -> Vec<u8> {
        let mut lexer = LuaLexer::new(src.as_bytes(), "=test");
        lexer.next().unwrap();
        match &lexer.token.value {
            TokenValue::Str(s) => s.as_bytes().to_vec(),
            other => panic!("not a string: {:?}", other),
        }
    }

    fn first_error(src: &str) -> String {
        let mut lexer = LuaLexer::new(src.as_bytes(), "=test");
        loop {
            match lexer.next() {
                Err(e) => return e.message,
                Ok(()) if lexer.kind() == LuaTokenKind::TkEof => panic!("no error in {:?}", src),
                Ok(()) => {}
            }
        }
    }

    #[test]
    fn test_symbols_and_keywords() {
        use LuaTokenKind::*;
        assert_eq!(
            tokens("local x = a.b .. c ... == ~= <= >= :: while"),
            vec![TkLocal, TkName, TkChar(b'='), TkName, TkChar(b'.'), TkName, TkConcat, TkName, TkDots, TkEq, TkNe, TkLe, TkGe, TkDbColon, TkWhile]
        );
        assert_eq!(tokens("a -- comment\nb --[==[ long\n comment ]==] c"), vec![TkName, TkName, TkName]);
    }

    #[test]
    fn test_line_counting() {
        let mut lexer = LuaLexer::new(b"a\r\nb\n\rc\n\nd", "=test");
        let mut lines = Vec::new();
        for _ in 0..4 {
            lexer.next().unwrap();
            lines.push(lexer.line);
        }
        assert_eq!(lines, vec![1, 2, 3, 5]);
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(first_string(r#""a\tb\65\x41\\""#), b"a\tbAA\\");
        assert_eq!(first_string("'x\\z   \n  y'"), b"xy");
        assert_eq!(first_string("\"a\\\nb\""), b"a\nb");
        assert_eq!(first_string("[==[\nfirst]]\n]==]"), b"first]]\n");
        assert_eq!(first_string(r#""\0\255""#), b"\0\xff");
    }

    #[test]
    fn test_numbers() {
        for (src, n) in [("3", 3.0), ("3.5e2", 350.0), ("0x10", 16.0), ("0xA.8p1", 21.0), (".5", 0.5)] {
            let mut lexer = LuaLexer::new(src.as_bytes(), "=test");
            lexer.next().unwrap();
            assert_eq!(lexer.token.value, TokenValue::Number(n), "{}", src);
        }
    }

    #[test]
    fn test_lexical_errors() {
        assert_eq!(first_error("x = \"abc"), "test:1: unfinished string near <eof>");
        assert_eq!(first_error("x = \"abc\ny\""), "test:1: unfinished string near '\"abc'");
        assert_eq!(first_error(r#"x = "\q""#), r#"test:1: invalid escape sequence near '"\q'"#);
        assert_eq!(first_error(r#"x = "\300""#), r#"test:1: decimal escape too large near '"\300'"#);
        assert_eq!(first_error(r#"x = "\xg""#), r#"test:1: hexadecimal digit expected near '"\xg'"#);
        assert_eq!(first_error("x = 3a"), "test:1: malformed number near '3a'");
        assert_eq!(first_error("x = 0x1p"), "test:1: malformed number near '0x1p'");
        assert_eq!(first_error("x = [==[ abc"), "test:1: unfinished long string near <eof>");
        assert_eq!(first_error("x = [= abc"), "test:1: invalid long string delimiter near '[='");
    }
}
