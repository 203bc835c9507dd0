use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaTokenKind {
    // KeyWord
    TkAnd,
    TkBreak,
    TkDo,
    TkElse,
    TkElseIf,
    TkEnd,
    TkFalse,
    TkFor,
    TkFunction,
    TkGoto,
    TkIf,
    TkIn,
    TkLocal,
    TkNil,
    TkNot,
    TkOr,
    TkRepeat,
    TkReturn,
    TkThen,
    TkTrue,
    TkUntil,
    TkWhile,

    TkConcat,  // ..
    TkDots,    // ...
    TkEq,      // ==
    TkGe,      // >=
    TkLe,      // <=
    TkNe,      // ~=
    TkDbColon, // ::
    TkEof,     // end of stream

    TkNumber, // numeral
    TkName,   // name
    TkString, // string

    /// Single-byte token: punctuation or any other character
    TkChar(u8),
}

const RESERVED_WORDS: [(&str, LuaTokenKind); 22] = [
    ("and", LuaTokenKind::TkAnd),
    ("break", LuaTokenKind::TkBreak),
    ("do", LuaTokenKind::TkDo),
    ("else", LuaTokenKind::TkElse),
    ("elseif", LuaTokenKind::TkElseIf),
    ("end", LuaTokenKind::TkEnd),
    ("false", LuaTokenKind::TkFalse),
    ("for", LuaTokenKind::TkFor),
    ("function", LuaTokenKind::TkFunction),
    ("goto", LuaTokenKind::TkGoto),
    ("if", LuaTokenKind::TkIf),
    ("in", LuaTokenKind::TkIn),
    ("local", LuaTokenKind::TkLocal),
    ("nil", LuaTokenKind::TkNil),
    ("not", LuaTokenKind::TkNot),
    ("or", LuaTokenKind::TkOr),
    ("repeat", LuaTokenKind::TkRepeat),
    ("return", LuaTokenKind::TkReturn),
    ("then", LuaTokenKind::TkThen),
    ("true", LuaTokenKind::TkTrue),
    ("until", LuaTokenKind::TkUntil),
    ("while", LuaTokenKind::TkWhile),
];

impl LuaTokenKind {
    /// Reserved word spelled by `name`, if any
    pub fn reserved(name: &[u8]) -> Option<LuaTokenKind> {
        RESERVED_WORDS
            .iter()
            .find(|(word, _)| word.as_bytes() == name)
            .map(|(_, kind)| *kind)
    }

    pub fn is_reserved_word(name: &[u8]) -> bool {
        Self::reserved(name).is_some()
    }

    /// Fixed spelling of reserved words and symbols; placeholders for
    /// tokens that carry a value
    pub fn text(self) -> &'static str {
        match self {
            LuaTokenKind::TkConcat => "..",
            LuaTokenKind::TkDots => "...",
            LuaTokenKind::TkEq => "==",
            LuaTokenKind::TkGe => ">=",
            LuaTokenKind::TkLe => "<=",
            LuaTokenKind::TkNe => "~=",
            LuaTokenKind::TkDbColon => "::",
            LuaTokenKind::TkEof => "<eof>",
            LuaTokenKind::TkNumber => "<number>",
            LuaTokenKind::TkName => "<name>",
            LuaTokenKind::TkString => "<string>",
            LuaTokenKind::TkChar(_) => "<char>",
            word => RESERVED_WORDS
                .iter()
                .find(|(_, kind)| *kind == word)
                .map(|(text, _)| *text)
                .unwrap_or("?"),
        }
    }

    /// How the token is shown in "expected" messages
    pub fn display(self) -> String {
        match self {
            LuaTokenKind::TkChar(c) if c.is_ascii_graphic() || c == b' ' => format!("'{}'", c as char),
            LuaTokenKind::TkChar(c) => format!("'<\\{}>'", c),
            LuaTokenKind::TkEof | LuaTokenKind::TkNumber | LuaTokenKind::TkName | LuaTokenKind::TkString => {
                self.text().to_string()
            }
            other => format!("'{}'", other.text()),
        }
    }
}

impl fmt::Display for LuaTokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}
