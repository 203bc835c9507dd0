use crate::compiler::CompileError;
use crate::compiler::parser::lexer::{Token, TokenValue};
use crate::compiler::parser::{LuaLexer, LuaTokenKind};
use crate::lua_value::str_to_number;

/// Value of a numeral as scanned: decimal with optional fraction and
/// exponent, or hexadecimal with optional fraction and binary exponent.
pub fn numeral_value(text: &[u8]) -> Option<f64> {
    match text.first() {
        Some(c) if c.is_ascii_digit() || *c == b'.' => str_to_number(text),
        _ => None,
    }
}

impl LuaLexer<'_> {
    /// Read a numeral. The scan is permissive (any hex digit or dot
    /// continues it) and the conversion decides whether it is well formed.
    pub(super) fn read_numeral(&mut self) -> Result<Token, CompileError> {
        let first = self.current;
        let mut exponent: &[u8] = b"Ee";
        self.save_and_next();
        if first == Some(b'0') && self.check_next(b"Xx") {
            exponent = b"Pp";
        }
        loop {
            if self.check_next(exponent) {
                self.check_next(b"+-");
            }
            match self.current {
                Some(c) if c.is_ascii_hexdigit() || c == b'.' => self.save_and_next(),
                _ => break,
            }
        }
        match numeral_value(&self.buffer) {
            Some(n) => Ok(Token {
                kind: LuaTokenKind::TkNumber,
                value: TokenValue::Number(n),
            }),
            None => Err(self.lex_error("malformed number", Some(LuaTokenKind::TkNumber))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeral_value() {
        assert_eq!(numeral_value(b"42"), Some(42.0));
        assert_eq!(numeral_value(b"0x1P-1"), Some(0.5));
        assert_eq!(numeral_value(b"1e+2"), Some(100.0));
        assert_eq!(numeral_value(b"1..2"), None);
        assert_eq!(numeral_value(b"0xfg"), None);
    }
}
