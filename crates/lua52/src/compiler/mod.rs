// Single-pass compiler: the scanner feeds a recursive-descent parser that
// generates register code directly, without building a syntax tree.

mod code;
mod expdesc;
mod expr_parser;
mod func_state;
pub mod parser;
mod statement;

use thiserror::Error;
use tracing::debug;

use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::func_state::{Dyndata, FuncState};
use crate::compiler::parser::{LuaLexer, LuaTokenKind, TokenValue};
use crate::lua_value::{Chunk, LuaString};
use crate::lua_vm::lua_limits::LUAI_MAXCCALLS;

/// Error raised while scanning or parsing. The message is complete:
/// `chunkid:line: what near 'token'`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Compile `source` into the prototype of its main function. `chunk_name`
/// is recorded as the prototype source and used in messages.
pub fn compile(source: &[u8], chunk_name: &str) -> Result<Chunk, CompileError> {
    debug!(chunk = chunk_name, size = source.len(), "compiling chunk");
    let compiler = Compiler::new(source, chunk_name);
    compiler.main_func()
}

pub struct Compiler<'a> {
    pub(crate) lex: LuaLexer<'a>,
    /// Function being compiled
    pub(crate) fs: FuncState,
    /// Enclosing functions, outermost first
    pub(crate) outer: Vec<FuncState>,
    pub(crate) dyd: Dyndata,
    pub(crate) env_name: LuaString,
    pub(crate) source: LuaString,
    /// Nesting depth of the recursive descent
    depth: usize,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a [u8], chunk_name: &str) -> Self {
        let source_name = LuaString::from(chunk_name);
        Compiler {
            lex: LuaLexer::new(source, chunk_name),
            fs: FuncState::new(source_name.clone(), 0, 0),
            outer: Vec::new(),
            dyd: Dyndata::default(),
            env_name: LuaString::from("_ENV"),
            source: source_name,
            depth: 0,
        }
    }

    /// The main function is vararg and has `_ENV` as its only upvalue
    fn main_func(mut self) -> CompileResult<Chunk> {
        self.enter_block(false);
        self.fs.chunk.is_vararg = 1;
        let env = ExpDesc::new(ExpKind::VLocal, 0);
        let env_name = self.env_name.clone();
        self.new_upvalue(0, &env_name, &env)?;
        self.lex.next()?;
        self.statement_list()?;
        self.check(LuaTokenKind::TkEof)?;
        self.close_func()
    }

    pub(crate) fn enter_level(&mut self) -> CompileResult<()> {
        self.depth += 1;
        self.check_limit(self.depth, LUAI_MAXCCALLS, "C levels")
    }

    pub(crate) fn leave_level(&mut self) {
        self.depth -= 1;
    }

    pub(crate) fn error_expected(&self, token: LuaTokenKind) -> CompileError {
        self.lex.syntax_error(&format!("{} expected", token.display()))
    }

    pub(crate) fn test_next(&mut self, token: LuaTokenKind) -> CompileResult<bool> {
        if self.lex.kind() == token {
            self.lex.next()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn check(&self, token: LuaTokenKind) -> CompileResult<()> {
        if self.lex.kind() != token {
            return Err(self.error_expected(token));
        }
        Ok(())
    }

    pub(crate) fn check_next(&mut self, token: LuaTokenKind) -> CompileResult<()> {
        self.check(token)?;
        self.lex.next()
    }

    pub(crate) fn check_condition(&self, cond: bool, msg: &str) -> CompileResult<()> {
        if !cond {
            return Err(self.lex.syntax_error(msg));
        }
        Ok(())
    }

    /// Expect `what` closing `who` opened at `line`
    pub(crate) fn check_match(&mut self, what: LuaTokenKind, who: LuaTokenKind, line: u32) -> CompileResult<()> {
        if self.test_next(what)? {
            return Ok(());
        }
        if line == self.lex.line {
            return Err(self.error_expected(what));
        }
        Err(self.lex.syntax_error(&format!(
            "{} expected (to close {} at line {})",
            what.display(),
            who.display(),
            line
        )))
    }

    pub(crate) fn str_check_name(&mut self) -> CompileResult<LuaString> {
        self.check(LuaTokenKind::TkName)?;
        let name = match &self.lex.token.value {
            TokenValue::Str(s) => s.clone(),
            _ => LuaString::from(""),
        };
        self.lex.next()?;
        Ok(name)
    }

    /// Does the current token end a block?
    pub(crate) fn block_follow(&self, with_until: bool) -> bool {
        match self.lex.kind() {
            LuaTokenKind::TkElse | LuaTokenKind::TkElseIf | LuaTokenKind::TkEnd | LuaTokenKind::TkEof => true,
            LuaTokenKind::TkUntil => with_until,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::compile;
    use crate::lua_value::LuaValue;
    use crate::lua_vm::OpCode;

    fn opcodes(source: &str) -> Vec<OpCode> {
        let chunk = compile(source.as_bytes(), "=test").unwrap();
        chunk.code.iter().map(|i| i.get_opcode()).collect()
    }

    fn error_of(source: &str) -> String {
        compile(source.as_bytes(), "=test").unwrap_err().message
    }

    #[test]
    fn test_constant_folding() {
        let chunk = compile(b"local a = 1 + 2 * 3", "=test").unwrap();
        assert_eq!(chunk.code[0].get_opcode(), OpCode::LoadK);
        assert!(matches!(chunk.constants[0], LuaValue::Number(n) if n == 7.0));
        // division by zero is left to run time
        assert!(opcodes("local a = 1 / 0").contains(&OpCode::Div));
    }

    #[test]
    fn test_loadnil_merge() {
        let chunk = compile(b"local a, b, c", "=test").unwrap();
        assert_eq!(chunk.code[0].get_opcode(), OpCode::LoadNil);
        assert_eq!(chunk.code[0].get_a(), 0);
        assert_eq!(chunk.code[0].get_b(), 2);
        assert_eq!(chunk.code[1].get_opcode(), OpCode::Return);
    }

    #[test]
    fn test_main_function_shape() {
        let chunk = compile(b"x = 1", "=test").unwrap();
        assert_eq!(chunk.is_vararg, 1);
        assert_eq!(chunk.upvalue_descs.len(), 1);
        assert_eq!(chunk.code[0].get_opcode(), OpCode::SetTabUp);
        assert_eq!(chunk.line_info.len(), chunk.code.len());
    }

    #[test]
    fn test_tail_call_and_closures() {
        assert!(opcodes("return f()").contains(&OpCode::TailCall));
        let chunk = compile(b"local function f(a, ...) return a end\nreturn f", "=test").unwrap();
        assert_eq!(chunk.child_protos.len(), 1);
        let child = &chunk.child_protos[0];
        assert_eq!(child.param_count, 1);
        assert_eq!(child.is_vararg, 1);
        assert_eq!(child.line_defined, 1);
        assert_eq!(child.last_line_defined, 1);
    }

    #[test]
    fn test_loops() {
        let ops = opcodes("for i = 1, 10 do end");
        assert!(ops.contains(&OpCode::ForPrep));
        assert!(ops.contains(&OpCode::ForLoop));
        let ops = opcodes("for k, v in pairs(t) do end");
        assert!(ops.contains(&OpCode::TForCall));
        assert!(ops.contains(&OpCode::TForLoop));
    }

    #[test]
    fn test_syntax_errors() {
        assert_eq!(error_of("x = = 1"), "test:1: unexpected symbol near '='");
        assert_eq!(error_of("f("), "test:1: unexpected symbol near <eof>");
        assert_eq!(error_of("x"), "test:1: syntax error near <eof>");
        assert_eq!(
            error_of("if x then\n\nprint(1)"),
            "test:3: 'end' expected (to close 'if' at line 1) near <eof>"
        );
        assert_eq!(error_of("for i do end"), "test:1: '=' or 'in' expected near 'do'");
        assert_eq!(
            error_of("function f() return ... end"),
            "test:1: cannot use '...' outside a vararg function near '...'"
        );
    }

    #[test]
    fn test_goto_errors() {
        assert_eq!(error_of("goto x"), "test:1: no visible label 'x' for <goto> at line 1");
        assert_eq!(error_of("break"), "test:1: <break> at line 1 not inside a loop");
        assert_eq!(error_of("::a:: ::a::"), "test:1: label 'a' already defined on line 1");
        assert_eq!(
            error_of("goto f\nlocal x\n::f:: print(x)"),
            "test:3: <goto f> at line 1 jumps into the scope of local 'x'"
        );
        // a label at the end of a block is outside the scope of its locals
        assert!(compile(b"do goto f; local x; ::f:: end", "=test").is_ok());
        assert!(compile(b"while true do if x then break end end", "=test").is_ok());
    }

    #[test]
    fn test_nesting_limit() {
        let source = format!("x = {}1{}", "(".repeat(300), ")".repeat(300));
        let msg = error_of(&source);
        assert!(msg.contains("C levels"), "{msg}");
    }
}
