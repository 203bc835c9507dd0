// Statements, blocks and assignments

use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::parser::LuaTokenKind;
use crate::compiler::{CompileResult, Compiler};
use crate::lua_value::LuaString;
use crate::lua_vm::OpCode;
use crate::lua_vm::lua_limits::{LUA_MULTRET, LUAI_MAXCCALLS};

use LuaTokenKind::TkChar;

impl Compiler<'_> {
    /// statlist -> { stat [';'] }
    pub(crate) fn statement_list(&mut self) -> CompileResult<()> {
        while !self.block_follow(true) {
            if self.lex.kind() == LuaTokenKind::TkReturn {
                // 'return' must be the last statement
                return self.statement();
            }
            self.statement()?;
        }
        Ok(())
    }

    fn statement(&mut self) -> CompileResult<()> {
        let line = self.lex.line;
        self.enter_level()?;
        match self.lex.kind() {
            TkChar(b';') => self.lex.next()?,
            LuaTokenKind::TkIf => self.if_stat(line)?,
            LuaTokenKind::TkWhile => self.while_stat(line)?,
            LuaTokenKind::TkDo => {
                self.lex.next()?;
                self.block()?;
                self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkDo, line)?;
            }
            LuaTokenKind::TkFor => self.for_stat(line)?,
            LuaTokenKind::TkRepeat => self.repeat_stat(line)?,
            LuaTokenKind::TkFunction => self.func_stat(line)?,
            LuaTokenKind::TkLocal => {
                self.lex.next()?;
                if self.test_next(LuaTokenKind::TkFunction)? {
                    self.local_func()?;
                } else {
                    self.local_stat()?;
                }
            }
            LuaTokenKind::TkDbColon => {
                self.lex.next()?;
                let name = self.str_check_name()?;
                self.label_stat(name, line)?;
            }
            LuaTokenKind::TkReturn => {
                self.lex.next()?;
                self.ret_stat()?;
            }
            LuaTokenKind::TkBreak | LuaTokenKind::TkGoto => {
                let pc = self.jump()?;
                self.goto_stat(pc)?;
            }
            _ => self.expr_stat()?,
        }
        debug_assert!(self.fs.chunk.max_stack_size >= self.fs.freereg && self.fs.freereg >= self.fs.nactvar);
        // free registers
        self.fs.freereg = self.fs.nactvar;
        self.leave_level();
        Ok(())
    }

    fn block(&mut self) -> CompileResult<()> {
        self.enter_block(false);
        self.statement_list()?;
        self.leave_block()
    }

    /// Skip statements that generate no code (empty statements and labels)
    fn skip_noop_stat(&mut self) -> CompileResult<()> {
        while matches!(self.lex.kind(), TkChar(b';') | LuaTokenKind::TkDbColon) {
            self.statement()?;
        }
        Ok(())
    }

    /// Condition of a loop; returns its false exit list
    fn cond(&mut self) -> CompileResult<i32> {
        let mut v = self.expr()?;
        if v.kind == ExpKind::VNil {
            // 'falses' are all equal here
            v.kind = ExpKind::VFalse;
        }
        self.go_if_true(&mut v)?;
        Ok(v.f)
    }

    fn goto_stat(&mut self, pc: i32) -> CompileResult<()> {
        let line = self.lex.line;
        let label = if self.test_next(LuaTokenKind::TkGoto)? {
            self.str_check_name()?
        } else {
            // skip 'break'
            self.lex.next()?;
            LuaString::from("break")
        };
        self.new_goto(label, line, pc)
    }

    fn label_stat(&mut self, name: LuaString, line: u32) -> CompileResult<()> {
        self.check_repeated_label(&name)?;
        self.check_next(LuaTokenKind::TkDbColon)?;
        let l = self.create_label(name, line);
        self.skip_noop_stat()?;
        let last_in_block = self.block_follow(false);
        self.solve_label(l, last_in_block)
    }

    fn while_stat(&mut self, line: u32) -> CompileResult<()> {
        self.lex.next()?;
        let while_init = self.get_label();
        let cond_exit = self.cond()?;
        self.enter_block(true);
        self.check_next(LuaTokenKind::TkDo)?;
        self.block()?;
        self.jump_to(while_init)?;
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkWhile, line)?;
        self.leave_block()?;
        // false conditions finish the loop
        self.patch_to_here(cond_exit)
    }

    fn repeat_stat(&mut self, line: u32) -> CompileResult<()> {
        let repeat_init = self.get_label();
        // loop block, then scope block
        self.enter_block(true);
        self.enter_block(false);
        self.lex.next()?;
        self.statement_list()?;
        self.check_match(LuaTokenKind::TkUntil, LuaTokenKind::TkRepeat, line)?;
        // the condition can see the body locals
        let cond_exit = self.cond()?;
        let (upval, nactvar) = {
            let bl = self.fs.block();
            (bl.upval, bl.nactvar)
        };
        if upval {
            self.patch_close(cond_exit, nactvar as i32);
        }
        self.leave_block()?;
        self.patch_list(cond_exit, repeat_init)?;
        self.leave_block()
    }

    /// Evaluate an expression into the next register
    fn exp1(&mut self) -> CompileResult<()> {
        let mut e = self.expr()?;
        self.exp_to_next_reg(&mut e)
    }

    fn for_body(&mut self, base: i32, line: u32, nvars: usize, is_num: bool) -> CompileResult<()> {
        // control variables
        self.adjust_local_vars(3);
        self.check_next(LuaTokenKind::TkDo)?;
        let prep = if is_num { self.code_asbx(OpCode::ForPrep, base, NO_JUMP)? } else { self.jump()? };
        // scope of the declared variables
        self.enter_block(false);
        self.adjust_local_vars(nvars);
        self.reserve_regs(nvars as i32)?;
        self.block()?;
        self.leave_block()?;
        self.patch_to_here(prep)?;
        let end_for = if is_num {
            self.code_asbx(OpCode::ForLoop, base, NO_JUMP)?
        } else {
            self.code_abc(OpCode::TForCall, base, 0, nvars as i32)?;
            self.fix_line(line);
            self.code_asbx(OpCode::TForLoop, base + 2, NO_JUMP)?
        };
        self.patch_list(end_for, prep + 1)?;
        self.fix_line(line);
        Ok(())
    }

    /// fornum -> NAME = exp1,exp1[,exp1] forbody
    fn for_num(&mut self, var_name: LuaString, line: u32) -> CompileResult<()> {
        let base = self.fs.freereg as i32;
        self.new_localvar_literal("(for index)")?;
        self.new_localvar_literal("(for limit)")?;
        self.new_localvar_literal("(for step)")?;
        self.new_localvar(var_name)?;
        self.check_next(TkChar(b'='))?;
        self.exp1()?;
        self.check_next(TkChar(b','))?;
        self.exp1()?;
        if self.test_next(TkChar(b','))? {
            self.exp1()?;
        } else {
            // default step is 1
            let k = self.number_k(1.0);
            let reg = self.fs.freereg as i32;
            self.code_k(reg, k)?;
            self.reserve_regs(1)?;
        }
        self.for_body(base, line, 1, true)
    }

    /// forlist -> NAME {,NAME} IN explist forbody
    fn for_list(&mut self, index_name: LuaString) -> CompileResult<()> {
        let base = self.fs.freereg as i32;
        let mut nvars = 4;
        self.new_localvar_literal("(for generator)")?;
        self.new_localvar_literal("(for state)")?;
        self.new_localvar_literal("(for control)")?;
        self.new_localvar(index_name)?;
        while self.test_next(TkChar(b','))? {
            let name = self.str_check_name()?;
            self.new_localvar(name)?;
            nvars += 1;
        }
        self.check_next(LuaTokenKind::TkIn)?;
        let line = self.lex.line;
        let mut e = ExpDesc::void();
        let nexps = self.exp_list(&mut e)?;
        self.adjust_assign(3, nexps, &mut e)?;
        // extra space to call the generator
        self.check_stack(3)?;
        self.for_body(base, line, nvars - 3, false)
    }

    fn for_stat(&mut self, line: u32) -> CompileResult<()> {
        // scope for the loop and its control variables
        self.enter_block(true);
        self.lex.next()?;
        let var_name = self.str_check_name()?;
        match self.lex.kind() {
            TkChar(b'=') => self.for_num(var_name, line)?,
            TkChar(b',') | LuaTokenKind::TkIn => self.for_list(var_name)?,
            _ => return Err(self.lex.syntax_error("'=' or 'in' expected")),
        }
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkFor, line)?;
        self.leave_block()
    }

    /// test_then_block -> [IF | ELSEIF] cond THEN block
    fn test_then_block(&mut self, escape_list: &mut i32) -> CompileResult<()> {
        // skip IF or ELSEIF
        self.lex.next()?;
        let mut v = self.expr()?;
        self.check_next(LuaTokenKind::TkThen)?;
        let jf;
        if matches!(self.lex.kind(), LuaTokenKind::TkGoto | LuaTokenKind::TkBreak) {
            // 'if x then goto' jumps straight to the label when true
            self.go_if_false(&mut v)?;
            self.enter_block(false);
            self.goto_stat(v.t)?;
            self.skip_noop_stat()?;
            if self.block_follow(false) {
                // nothing else in the block
                return self.leave_block();
            }
            jf = self.jump()?;
        } else {
            self.go_if_true(&mut v)?;
            self.enter_block(false);
            jf = v.f;
        }
        self.statement_list()?;
        self.leave_block()?;
        if matches!(self.lex.kind(), LuaTokenKind::TkElse | LuaTokenKind::TkElseIf) {
            let j = self.jump()?;
            self.concat_jumps(escape_list, j)?;
        }
        self.patch_to_here(jf)
    }

    /// ifstat -> IF cond THEN block {ELSEIF cond THEN block} [ELSE block] END
    fn if_stat(&mut self, line: u32) -> CompileResult<()> {
        let mut escape_list = NO_JUMP;
        self.test_then_block(&mut escape_list)?;
        while self.lex.kind() == LuaTokenKind::TkElseIf {
            self.test_then_block(&mut escape_list)?;
        }
        if self.test_next(LuaTokenKind::TkElse)? {
            self.block()?;
        }
        self.check_match(LuaTokenKind::TkEnd, LuaTokenKind::TkIf, line)?;
        self.patch_to_here(escape_list)
    }

    fn local_func(&mut self) -> CompileResult<()> {
        let name = self.str_check_name()?;
        self.new_localvar(name)?;
        // the function can refer to itself
        self.adjust_local_vars(1);
        let mut b = ExpDesc::void();
        let line = self.lex.line;
        self.body(&mut b, false, line)?;
        // debug information only sees the variable after the closure
        let pc = self.fs.pc() as u32;
        self.local_var(b.info as usize).start_pc = pc;
        Ok(())
    }

    /// stat -> LOCAL NAME {',' NAME} ['=' explist]
    fn local_stat(&mut self) -> CompileResult<()> {
        let mut nvars = 0;
        loop {
            let name = self.str_check_name()?;
            self.new_localvar(name)?;
            nvars += 1;
            if !self.test_next(TkChar(b','))? {
                break;
            }
        }
        let mut e = ExpDesc::void();
        let nexps = if self.test_next(TkChar(b'='))? { self.exp_list(&mut e)? } else { 0 };
        self.adjust_assign(nvars, nexps, &mut e)?;
        self.adjust_local_vars(nvars as usize);
        Ok(())
    }

    /// funcname -> NAME {fieldsel} [':' NAME]; returns whether it is a method
    fn func_name(&mut self, v: &mut ExpDesc) -> CompileResult<bool> {
        let name = self.str_check_name()?;
        *v = self.single_var(name)?;
        while self.lex.kind() == TkChar(b'.') {
            self.field_sel(v)?;
        }
        if self.lex.kind() == TkChar(b':') {
            self.field_sel(v)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn func_stat(&mut self, line: u32) -> CompileResult<()> {
        // skip FUNCTION
        self.lex.next()?;
        let mut v = ExpDesc::void();
        let is_method = self.func_name(&mut v)?;
        let mut b = ExpDesc::void();
        self.body(&mut b, is_method, line)?;
        self.store_var(&v, &mut b)?;
        // definition "happens" in the first line
        self.fix_line(line);
        Ok(())
    }

    /// stat -> func | assignment
    fn expr_stat(&mut self) -> CompileResult<()> {
        let mut v = ExpDesc::void();
        self.suffixed_exp(&mut v)?;
        if matches!(self.lex.kind(), TkChar(b'=') | TkChar(b',')) {
            self.assignment(v)
        } else {
            self.check_condition(v.kind == ExpKind::VCall, "syntax error")?;
            // a call statement uses no results
            self.exp_instruction(&v).set_c(1);
            Ok(())
        }
    }

    /// assignment -> suffixedexp {',' suffixedexp} '=' explist
    ///
    /// Targets are stored right to left, each from the register just
    /// below the free register.
    fn assignment(&mut self, first: ExpDesc) -> CompileResult<()> {
        let mut targets = vec![first];
        loop {
            let last = targets.len() - 1;
            self.check_condition(targets[last].is_var(), "syntax error")?;
            if !self.test_next(TkChar(b','))? {
                break;
            }
            let mut nv = ExpDesc::void();
            self.suffixed_exp(&mut nv)?;
            if nv.kind != ExpKind::VIndexed {
                self.check_conflict(&mut targets, &nv)?;
            }
            self.check_limit(targets.len() + self.depth, LUAI_MAXCCALLS, "C levels")?;
            targets.push(nv);
        }
        self.check_next(TkChar(b'='))?;
        let nvars = targets.len() as i32;
        let mut e = ExpDesc::void();
        let nexps = self.exp_list(&mut e)?;
        let mut pending = targets.into_iter().rev();
        if nexps != nvars {
            self.adjust_assign(nvars, nexps, &mut e)?;
            if nexps > nvars {
                // remove extra values
                self.fs.freereg -= (nexps - nvars) as u8;
            }
        } else if let Some(last) = pending.next() {
            self.set_one_ret(&mut e);
            self.store_var(&last, &mut e)?;
        }
        for var in pending {
            let mut e = ExpDesc::new(ExpKind::VNonReloc, self.fs.freereg as i32 - 1);
            self.store_var(&var, &mut e)?;
        }
        Ok(())
    }

    /// A local or upvalue assigned in a multiple assignment may also be the
    /// table or key of an earlier indexed target; such targets get a copy
    /// of the old value made before the assignment.
    fn check_conflict(&mut self, targets: &mut [ExpDesc], v: &ExpDesc) -> CompileResult<()> {
        let extra = self.fs.freereg as i32;
        let mut conflict = false;
        for lh in targets.iter_mut().filter(|lh| lh.kind == ExpKind::VIndexed) {
            if lh.ind.vt == v.kind && lh.ind.t == v.info {
                conflict = true;
                lh.ind.vt = ExpKind::VLocal;
                lh.ind.t = extra;
            }
            if v.kind == ExpKind::VLocal && lh.ind.idx == v.info {
                conflict = true;
                lh.ind.idx = extra;
            }
        }
        if conflict {
            let op = if v.kind == ExpKind::VLocal { OpCode::Move } else { OpCode::GetUpval };
            self.code_abc(op, extra, v.info, 0)?;
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    /// Match `nexps` values to `nvars` variables
    fn adjust_assign(&mut self, nvars: i32, nexps: i32, e: &mut ExpDesc) -> CompileResult<()> {
        let mut extra = nvars - nexps;
        if e.has_multret() {
            // the call or vararg itself provides one value
            extra = (extra + 1).max(0);
            self.set_returns(e, extra)?;
            if extra > 1 {
                self.reserve_regs(extra - 1)?;
            }
        } else {
            if e.kind != ExpKind::VVoid {
                self.exp_to_next_reg(e)?;
            }
            if extra > 0 {
                let reg = self.fs.freereg as i32;
                self.reserve_regs(extra)?;
                self.code_nil(reg, extra)?;
            }
        }
        Ok(())
    }

    /// stat -> RETURN [explist] [';']
    fn ret_stat(&mut self) -> CompileResult<()> {
        let (first, nret);
        if self.block_follow(true) || self.lex.kind() == TkChar(b';') {
            first = 0;
            nret = 0;
        } else {
            let mut e = ExpDesc::void();
            let n = self.exp_list(&mut e)?;
            if e.has_multret() {
                self.set_multret(&mut e)?;
                if e.kind == ExpKind::VCall && n == 1 {
                    self.exp_instruction(&e).set_opcode(OpCode::TailCall);
                }
                first = self.fs.nactvar as i32;
                nret = LUA_MULTRET;
            } else if n == 1 {
                first = self.exp_to_any_reg(&mut e)?;
                nret = 1;
            } else {
                self.exp_to_next_reg(&mut e)?;
                first = self.fs.nactvar as i32;
                nret = n;
            }
        }
        self.ret(first, nret)?;
        self.test_next(TkChar(b';'))?;
        Ok(())
    }
}
