// Expressions: precedence climbing over the descriptor-based code generator

use crate::compiler::code::{BinOpr, UnOpr};
use crate::compiler::expdesc::{ExpDesc, ExpKind};
use crate::compiler::parser::{LuaTokenKind, TokenValue};
use crate::compiler::{CompileResult, Compiler};
use crate::lua_value::LuaString;
use crate::lua_vm::{OpCode, float8_encode};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, LUA_MULTRET, MAX_INT, UNARY_PRIORITY};

use LuaTokenKind::TkChar;

/// State of a table constructor
struct ConsControl {
    /// Last list item read
    v: ExpDesc,
    /// The table register
    table: i32,
    /// Number of record fields
    nh: i32,
    /// Number of list items
    na: i32,
    /// List items pending to be stored
    tostore: i32,
}

fn unary_op(token: LuaTokenKind) -> Option<UnOpr> {
    match token {
        LuaTokenKind::TkNot => Some(UnOpr::Not),
        TkChar(b'-') => Some(UnOpr::Minus),
        TkChar(b'#') => Some(UnOpr::Len),
        _ => None,
    }
}

fn binary_op(token: LuaTokenKind) -> Option<BinOpr> {
    let op = match token {
        TkChar(b'+') => BinOpr::Add,
        TkChar(b'-') => BinOpr::Sub,
        TkChar(b'*') => BinOpr::Mul,
        TkChar(b'/') => BinOpr::Div,
        TkChar(b'%') => BinOpr::Mod,
        TkChar(b'^') => BinOpr::Pow,
        LuaTokenKind::TkConcat => BinOpr::Concat,
        LuaTokenKind::TkNe => BinOpr::Ne,
        LuaTokenKind::TkEq => BinOpr::Eq,
        TkChar(b'<') => BinOpr::Lt,
        LuaTokenKind::TkLe => BinOpr::Le,
        TkChar(b'>') => BinOpr::Gt,
        LuaTokenKind::TkGe => BinOpr::Ge,
        LuaTokenKind::TkAnd => BinOpr::And,
        LuaTokenKind::TkOr => BinOpr::Or,
        _ => return None,
    };
    Some(op)
}

impl Compiler<'_> {
    pub(crate) fn expr(&mut self) -> CompileResult<ExpDesc> {
        let mut v = ExpDesc::void();
        self.subexpr(&mut v, 0)?;
        Ok(v)
    }

    /// subexpr -> (simpleexp | unop subexpr) { binop subexpr }
    /// where binop is any binary operator with a priority above `limit`.
    /// Returns the first operator not handled.
    fn subexpr(&mut self, v: &mut ExpDesc, limit: u8) -> CompileResult<Option<BinOpr>> {
        self.enter_level()?;
        if let Some(uop) = unary_op(self.lex.kind()) {
            let line = self.lex.line;
            self.lex.next()?;
            self.subexpr(v, UNARY_PRIORITY)?;
            self.prefix(uop, v, line)?;
        } else {
            self.simple_exp(v)?;
        }
        let mut op = binary_op(self.lex.kind());
        while let Some(bop) = op {
            let (left, right) = bop.priority();
            if left <= limit {
                break;
            }
            let line = self.lex.line;
            self.lex.next()?;
            self.infix(bop, v)?;
            let mut v2 = ExpDesc::void();
            let next_op = self.subexpr(&mut v2, right)?;
            self.posfix(bop, v, &mut v2, line)?;
            op = next_op;
        }
        self.leave_level();
        Ok(op)
    }

    /// simpleexp -> NUMBER | STRING | NIL | TRUE | FALSE | ... |
    ///              constructor | FUNCTION body | suffixedexp
    fn simple_exp(&mut self, v: &mut ExpDesc) -> CompileResult<()> {
        match self.lex.kind() {
            LuaTokenKind::TkNumber => {
                let n = match self.lex.token.value {
                    TokenValue::Number(n) => n,
                    _ => 0.0,
                };
                *v = ExpDesc::number(n);
            }
            LuaTokenKind::TkString => {
                let s = self.token_string();
                *v = self.string_constant(s);
            }
            LuaTokenKind::TkNil => *v = ExpDesc::new(ExpKind::VNil, 0),
            LuaTokenKind::TkTrue => *v = ExpDesc::new(ExpKind::VTrue, 0),
            LuaTokenKind::TkFalse => *v = ExpDesc::new(ExpKind::VFalse, 0),
            LuaTokenKind::TkDots => {
                self.check_condition(
                    self.fs.chunk.is_vararg != 0,
                    "cannot use '...' outside a vararg function",
                )?;
                let pc = self.code_abc(OpCode::VarArg, 0, 1, 0)?;
                *v = ExpDesc::new(ExpKind::VVararg, pc);
            }
            TkChar(b'{') => return self.constructor(v),
            LuaTokenKind::TkFunction => {
                self.lex.next()?;
                let line = self.lex.line;
                return self.body(v, false, line);
            }
            _ => return self.suffixed_exp(v),
        }
        self.lex.next()
    }

    /// Value of the current string token
    pub(crate) fn token_string(&self) -> LuaString {
        match &self.lex.token.value {
            TokenValue::Str(s) => s.clone(),
            _ => LuaString::from(""),
        }
    }

    /// primaryexp -> NAME | '(' expr ')'
    fn primary_exp(&mut self, v: &mut ExpDesc) -> CompileResult<()> {
        match self.lex.kind() {
            TkChar(b'(') => {
                let line = self.lex.line;
                self.lex.next()?;
                *v = self.expr()?;
                self.check_match(TkChar(b')'), TkChar(b'('), line)?;
                self.discharge_vars(v)
            }
            LuaTokenKind::TkName => {
                let name = self.str_check_name()?;
                *v = self.single_var(name)?;
                Ok(())
            }
            _ => Err(self.lex.syntax_error("unexpected symbol")),
        }
    }

    /// suffixedexp -> primaryexp { '.' NAME | '[' exp ']' | ':' NAME funcargs | funcargs }
    pub(crate) fn suffixed_exp(&mut self, v: &mut ExpDesc) -> CompileResult<()> {
        let line = self.lex.line;
        self.primary_exp(v)?;
        loop {
            match self.lex.kind() {
                TkChar(b'.') => self.field_sel(v)?,
                TkChar(b'[') => {
                    self.exp_to_any_reg_up(v)?;
                    let mut key = self.yindex()?;
                    self.indexed(v, &mut key)?;
                }
                TkChar(b':') => {
                    self.lex.next()?;
                    let name = self.str_check_name()?;
                    let mut key = self.string_constant(name);
                    self.code_self(v, &mut key)?;
                    self.func_args(v, line)?;
                }
                TkChar(b'(') | LuaTokenKind::TkString | TkChar(b'{') => {
                    self.exp_to_next_reg(v)?;
                    self.func_args(v, line)?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// fieldsel -> ['.' | ':'] NAME
    pub(crate) fn field_sel(&mut self, v: &mut ExpDesc) -> CompileResult<()> {
        self.exp_to_any_reg_up(v)?;
        // skip the dot or colon
        self.lex.next()?;
        let name = self.str_check_name()?;
        let mut key = self.string_constant(name);
        self.indexed(v, &mut key)
    }

    /// index -> '[' expr ']'
    fn yindex(&mut self) -> CompileResult<ExpDesc> {
        self.lex.next()?;
        let mut v = self.expr()?;
        self.exp_to_val(&mut v)?;
        self.check_next(TkChar(b']'))?;
        Ok(v)
    }

    /// explist -> expr { ',' expr }; returns the number of expressions
    pub(crate) fn exp_list(&mut self, v: &mut ExpDesc) -> CompileResult<i32> {
        let mut n = 1;
        *v = self.expr()?;
        while self.test_next(TkChar(b','))? {
            self.exp_to_next_reg(v)?;
            *v = self.expr()?;
            n += 1;
        }
        Ok(n)
    }

    fn func_args(&mut self, f: &mut ExpDesc, line: u32) -> CompileResult<()> {
        let mut args = ExpDesc::void();
        match self.lex.kind() {
            TkChar(b'(') => {
                self.lex.next()?;
                if self.lex.kind() != TkChar(b')') {
                    self.exp_list(&mut args)?;
                    self.set_multret(&mut args)?;
                }
                self.check_match(TkChar(b')'), TkChar(b'('), line)?;
            }
            TkChar(b'{') => self.constructor(&mut args)?,
            LuaTokenKind::TkString => {
                let s = self.token_string();
                args = self.string_constant(s);
                self.lex.next()?;
            }
            _ => return Err(self.lex.syntax_error("function arguments expected")),
        }
        let base = f.info;
        let nparams = if args.has_multret() {
            // open call
            LUA_MULTRET
        } else {
            if args.kind != ExpKind::VVoid {
                self.exp_to_next_reg(&mut args)?;
            }
            self.fs.freereg as i32 - (base + 1)
        };
        let pc = self.code_abc(OpCode::Call, base, nparams + 1, 2)?;
        *f = ExpDesc::new(ExpKind::VCall, pc);
        self.fix_line(line);
        // the call leaves one result (unless changed later)
        self.fs.freereg = (base + 1) as u8;
        Ok(())
    }

    /// recfield -> (NAME | '[' exp ']') = exp
    fn rec_field(&mut self, cc: &mut ConsControl) -> CompileResult<()> {
        let reg = self.fs.freereg;
        let mut key = if self.lex.kind() == LuaTokenKind::TkName {
            self.check_limit(cc.nh as usize, MAX_INT as usize, "items in a constructor")?;
            let name = self.str_check_name()?;
            self.string_constant(name)
        } else {
            self.yindex()?
        };
        cc.nh += 1;
        self.check_next(TkChar(b'='))?;
        let rk_key = self.exp_to_rk(&mut key)?;
        let mut val = self.expr()?;
        let rk_val = self.exp_to_rk(&mut val)?;
        self.code_abc(OpCode::SetTable, cc.table, rk_key, rk_val)?;
        self.fs.freereg = reg;
        Ok(())
    }

    fn close_list_field(&mut self, cc: &mut ConsControl) -> CompileResult<()> {
        if cc.v.kind == ExpKind::VVoid {
            return Ok(());
        }
        self.exp_to_next_reg(&mut cc.v)?;
        cc.v.kind = ExpKind::VVoid;
        if cc.tostore == LFIELDS_PER_FLUSH as i32 {
            self.set_list(cc.table, cc.na, cc.tostore)?;
            cc.tostore = 0;
        }
        Ok(())
    }

    fn last_list_field(&mut self, cc: &mut ConsControl) -> CompileResult<()> {
        if cc.tostore == 0 {
            return Ok(());
        }
        if cc.v.has_multret() {
            self.set_multret(&mut cc.v)?;
            self.set_list(cc.table, cc.na, LUA_MULTRET)?;
            // the open item is not counted in the size hint
            cc.na -= 1;
        } else {
            if cc.v.kind != ExpKind::VVoid {
                self.exp_to_next_reg(&mut cc.v)?;
            }
            self.set_list(cc.table, cc.na, cc.tostore)?;
        }
        Ok(())
    }

    fn list_field(&mut self, cc: &mut ConsControl) -> CompileResult<()> {
        cc.v = self.expr()?;
        self.check_limit(cc.na as usize, MAX_INT as usize, "items in a constructor")?;
        cc.na += 1;
        cc.tostore += 1;
        Ok(())
    }

    fn field(&mut self, cc: &mut ConsControl) -> CompileResult<()> {
        match self.lex.kind() {
            LuaTokenKind::TkName => {
                if self.lex.lookahead()? != TkChar(b'=') {
                    self.list_field(cc)
                } else {
                    self.rec_field(cc)
                }
            }
            TkChar(b'[') => self.rec_field(cc),
            _ => self.list_field(cc),
        }
    }

    /// constructor -> '{' [ field { sep field } [sep] ] '}'
    fn constructor(&mut self, t: &mut ExpDesc) -> CompileResult<()> {
        let line = self.lex.line;
        let pc = self.code_abc(OpCode::NewTable, 0, 0, 0)?;
        *t = ExpDesc::new(ExpKind::VReloc, pc);
        // fix the table at the stack top
        self.exp_to_next_reg(t)?;
        let mut cc = ConsControl {
            v: ExpDesc::void(),
            table: t.info,
            nh: 0,
            na: 0,
            tostore: 0,
        };
        self.check_next(TkChar(b'{'))?;
        loop {
            if self.lex.kind() == TkChar(b'}') {
                break;
            }
            self.close_list_field(&mut cc)?;
            self.field(&mut cc)?;
            if !(self.test_next(TkChar(b','))? || self.test_next(TkChar(b';'))?) {
                break;
            }
        }
        self.check_match(TkChar(b'}'), TkChar(b'{'), line)?;
        self.last_list_field(&mut cc)?;
        let i = &mut self.fs.chunk.code[pc as usize];
        i.set_b(float8_encode(cc.na as u32));
        i.set_c(float8_encode(cc.nh as u32));
        Ok(())
    }

    /// parlist -> [ param { ',' param } ]
    fn par_list(&mut self) -> CompileResult<()> {
        let mut nparams = 0;
        self.fs.chunk.is_vararg = 0;
        if self.lex.kind() != TkChar(b')') {
            loop {
                match self.lex.kind() {
                    LuaTokenKind::TkName => {
                        let name = self.str_check_name()?;
                        self.new_localvar(name)?;
                        nparams += 1;
                    }
                    LuaTokenKind::TkDots => {
                        self.lex.next()?;
                        self.fs.chunk.is_vararg = 1;
                    }
                    _ => return Err(self.lex.syntax_error("<name> or '...' expected")),
                }
                if self.fs.chunk.is_vararg != 0 || !self.test_next(TkChar(b','))? {
                    break;
                }
            }
        }
        self.adjust_local_vars(nparams);
        self.fs.chunk.param_count = self.fs.nactvar;
        self.reserve_regs(self.fs.nactvar as i32)
    }

    /// body -> '(' parlist ')' block END
    pub(crate) fn body(&mut self, e: &mut ExpDesc, is_method: bool, line: u32) -> CompileResult<()> {
        self.open_func(line as i32);
        self.check_next(TkChar(b'('))?;
        if is_method {
            self.new_localvar_literal("self")?;
            self.adjust_local_vars(1);
        }
        self.par_list()?;
        self.check_next(TkChar(b')'))?;
        self.statement_list()?;
        self.fs.chunk.last_line_defined = self.lex.line as i32;
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFunction, line)?;
        let chunk = self.close_func()?;
        self.fs.chunk.child_protos.push(std::rc::Rc::new(chunk));
        let np = self.fs.chunk.child_protos.len() as u32;
        let pc = self.code_abx(OpCode::Closure, 0, np - 1)?;
        *e = ExpDesc::new(ExpKind::VReloc, pc);
        self.exp_to_next_reg(e)
    }
}
