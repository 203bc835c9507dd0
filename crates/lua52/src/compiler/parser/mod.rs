mod lexer;
mod lua_number;
mod lua_token_kind;

pub use lexer::{LuaLexer, Token, TokenValue};
pub use lua_number::numeral_value;
pub use lua_token_kind::LuaTokenKind;
