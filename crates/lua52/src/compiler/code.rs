// Code generator: instruction emission, jump lists, register allocation
// and expression discharge

use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::func_state::ConstKey;
use crate::compiler::{CompileResult, Compiler};
use crate::lua_value::{LuaString, LuaValue};
use crate::lua_vm::lua_limits::{LFIELDS_PER_FLUSH, LUA_MULTRET, MAXREGS};
use crate::lua_vm::{Instruction, OpCode};

const NO_REG: i32 = Instruction::NO_REG as i32;

/// Binary operators in priority-table order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOpr {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOpr {
    Minus,
    Not,
    Len,
}

impl BinOpr {
    /// Left and right priority
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOpr::Add | BinOpr::Sub => (6, 6),
            BinOpr::Mul | BinOpr::Div | BinOpr::Mod => (7, 7),
            // right associative
            BinOpr::Pow => (10, 9),
            BinOpr::Concat => (5, 4),
            BinOpr::Eq | BinOpr::Lt | BinOpr::Le | BinOpr::Ne | BinOpr::Gt | BinOpr::Ge => (3, 3),
            BinOpr::And => (2, 2),
            BinOpr::Or => (1, 1),
        }
    }

    fn arith_opcode(self) -> OpCode {
        match self {
            BinOpr::Add => OpCode::Add,
            BinOpr::Sub => OpCode::Sub,
            BinOpr::Mul => OpCode::Mul,
            BinOpr::Div => OpCode::Div,
            BinOpr::Mod => OpCode::Mod,
            _ => OpCode::Pow,
        }
    }
}

/// Compile-time arithmetic, with the same results as the engine
fn fold_arith(op: OpCode, a: f64, b: f64) -> f64 {
    match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Mod => a - (a / b).floor() * b,
        OpCode::Pow => a.powf(b),
        OpCode::Unm => -a,
        _ => a,
    }
}

impl Compiler<'_> {
    #[inline]
    fn instruction(&mut self, pc: i32) -> &mut Instruction {
        &mut self.fs.chunk.code[pc as usize]
    }

    /// Instruction produced by a relocatable or call expression
    #[inline]
    pub(crate) fn exp_instruction(&mut self, e: &ExpDesc) -> &mut Instruction {
        self.instruction(e.info)
    }

    fn code(&mut self, i: Instruction) -> CompileResult<i32> {
        // pending jumps to here get their real target
        self.discharge_jpc()?;
        self.fs.chunk.code.push(i);
        self.fs.chunk.line_info.push(self.lex.last_line as i32);
        Ok(self.fs.pc() - 1)
    }

    pub(crate) fn code_abc(&mut self, op: OpCode, a: i32, b: i32, c: i32) -> CompileResult<i32> {
        self.code(Instruction::create_abc(op, a as u32, b as u32, c as u32))
    }

    pub(crate) fn code_abx(&mut self, op: OpCode, a: i32, bx: u32) -> CompileResult<i32> {
        self.code(Instruction::create_abx(op, a as u32, bx))
    }

    pub(crate) fn code_asbx(&mut self, op: OpCode, a: i32, sbx: i32) -> CompileResult<i32> {
        self.code(Instruction::create_asbx(op, a as u32, sbx))
    }

    fn code_extra_arg(&mut self, a: u32) -> CompileResult<i32> {
        self.code(Instruction::create_ax(OpCode::ExtraArg, a))
    }

    /// Load constant `k` into `reg`
    pub(crate) fn code_k(&mut self, reg: i32, k: usize) -> CompileResult<i32> {
        if k as u32 <= Instruction::MAX_BX {
            self.code_abx(OpCode::LoadK, reg, k as u32)
        } else {
            let p = self.code_abx(OpCode::LoadKx, reg, 0)?;
            self.code_extra_arg(k as u32)?;
            Ok(p)
        }
    }

    /// Set `n` registers from `from` to nil, merging with a LOADNIL just
    /// before when the ranges touch
    pub(crate) fn code_nil(&mut self, mut from: i32, n: i32) -> CompileResult<()> {
        let mut l = from + n - 1;
        if self.fs.pc() > self.fs.last_target {
            let pc = self.fs.pc() - 1;
            let previous = *self.instruction(pc);
            if previous.get_opcode() == OpCode::LoadNil {
                let pfrom = previous.get_a() as i32;
                let pl = pfrom + previous.get_b() as i32;
                if (pfrom <= from && from <= pl + 1) || (from <= pfrom && pfrom <= l + 1) {
                    from = from.min(pfrom);
                    l = l.max(pl);
                    let prev = self.instruction(pc);
                    prev.set_a(from as u32);
                    prev.set_b((l - from) as u32);
                    return Ok(());
                }
            }
        }
        self.code_abc(OpCode::LoadNil, from, n - 1, 0)?;
        Ok(())
    }

    /// Emit an open jump; jumps pending to here are chained to it
    pub(crate) fn jump(&mut self) -> CompileResult<i32> {
        let jpc = self.fs.jpc;
        self.fs.jpc = NO_JUMP;
        let mut j = self.code_asbx(OpCode::Jmp, 0, NO_JUMP)?;
        self.concat_jumps(&mut j, jpc)?;
        Ok(j)
    }

    pub(crate) fn jump_to(&mut self, target: i32) -> CompileResult<()> {
        let j = self.jump()?;
        self.patch_list(j, target)
    }

    pub(crate) fn ret(&mut self, first: i32, nret: i32) -> CompileResult<()> {
        self.code_abc(OpCode::Return, first, nret + 1, 0)?;
        Ok(())
    }

    fn cond_jump(&mut self, op: OpCode, a: i32, b: i32, c: i32) -> CompileResult<i32> {
        self.code_abc(op, a, b, c)?;
        self.jump()
    }

    fn fix_jump(&mut self, pc: i32, dest: i32) -> CompileResult<()> {
        let offset = dest - (pc + 1);
        if offset.abs() > Instruction::MAX_SBX {
            return Err(self.lex.syntax_error("control structure too long"));
        }
        self.instruction(pc).set_sbx(offset);
        Ok(())
    }

    /// Mark the current position as a jump target
    pub(crate) fn get_label(&mut self) -> i32 {
        self.fs.last_target = self.fs.pc();
        self.fs.pc()
    }

    fn get_jump(&mut self, pc: i32) -> i32 {
        let offset = self.instruction(pc).get_sbx();
        if offset == NO_JUMP {
            // a jump to itself ends the list
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    /// The instruction controlling the jump at `pc`: its test, if any
    fn jump_control_pc(&mut self, pc: i32) -> i32 {
        if pc >= 1 && self.instruction(pc - 1).get_opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Does some jump in the list produce a value (not a TESTSET)?
    fn need_value(&mut self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctl = self.jump_control_pc(list);
            if self.instruction(ctl).get_opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    /// Point the TESTSET controlling `node` at `reg`, or turn it into a
    /// TEST when no register needs the value
    fn patch_test_reg(&mut self, node: i32, reg: i32) -> bool {
        let ctl = self.jump_control_pc(node);
        let i = self.instruction(ctl);
        if i.get_opcode() != OpCode::TestSet {
            return false;
        }
        if reg != NO_REG && reg != i.get_b() as i32 {
            i.set_a(reg as u32);
        } else {
            *i = Instruction::create_abc(OpCode::Test, i.get_b(), 0, i.get_c());
        }
        true
    }

    fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    fn patch_list_aux(&mut self, mut list: i32, vtarget: i32, reg: i32, dtarget: i32) -> CompileResult<()> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    fn discharge_jpc(&mut self) -> CompileResult<()> {
        let pc = self.fs.pc();
        let jpc = std::mem::replace(&mut self.fs.jpc, NO_JUMP);
        self.patch_list_aux(jpc, pc, NO_REG, pc)
    }

    pub(crate) fn patch_list(&mut self, list: i32, target: i32) -> CompileResult<()> {
        if target == self.fs.pc() {
            self.patch_to_here(list)
        } else {
            self.patch_list_aux(list, target, NO_REG, target)
        }
    }

    /// Make every jump in the list close upvalues from register `level`
    pub(crate) fn patch_close(&mut self, mut list: i32, level: i32) {
        // A is level + 1 so that 0 means "close nothing"
        let level = level + 1;
        while list != NO_JUMP {
            let next = self.get_jump(list);
            self.instruction(list).set_a(level as u32);
            list = next;
        }
    }

    pub(crate) fn patch_to_here(&mut self, list: i32) -> CompileResult<()> {
        self.get_label();
        let mut jpc = self.fs.jpc;
        self.concat_jumps(&mut jpc, list)?;
        self.fs.jpc = jpc;
        Ok(())
    }

    /// Append jump list `l2` to `l1`
    pub(crate) fn concat_jumps(&mut self, l1: &mut i32, l2: i32) -> CompileResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2)
    }

    pub(crate) fn check_stack(&mut self, n: i32) -> CompileResult<()> {
        let new_stack = self.fs.freereg as i32 + n;
        if new_stack > self.fs.chunk.max_stack_size as i32 {
            if new_stack >= MAXREGS as i32 {
                return Err(self.lex.syntax_error("function or expression too complex"));
            }
            self.fs.chunk.max_stack_size = new_stack as u8;
        }
        Ok(())
    }

    pub(crate) fn reserve_regs(&mut self, n: i32) -> CompileResult<()> {
        self.check_stack(n)?;
        self.fs.freereg += n as u8;
        Ok(())
    }

    fn free_reg(&mut self, reg: i32) {
        if !Instruction::is_k(reg as u32) && reg >= self.fs.nactvar as i32 {
            self.fs.freereg -= 1;
        }
    }

    fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::VNonReloc {
            self.free_reg(e.info);
        }
    }

    pub(crate) fn string_k(&mut self, s: LuaString) -> usize {
        self.fs.add_constant(ConstKey::Str(s.clone()), LuaValue::String(s))
    }

    pub(crate) fn number_k(&mut self, n: f64) -> usize {
        self.fs.add_constant(ConstKey::Num(n.to_bits()), LuaValue::Number(n))
    }

    fn bool_k(&mut self, b: bool) -> usize {
        self.fs.add_constant(ConstKey::Bool(b), LuaValue::Boolean(b))
    }

    fn nil_k(&mut self) -> usize {
        self.fs.add_constant(ConstKey::Nil, LuaValue::Nil)
    }

    pub(crate) fn string_constant(&mut self, s: LuaString) -> ExpDesc {
        let k = self.string_k(s);
        ExpDesc::new(ExpKind::VK, k as i32)
    }

    /// Fix the number of results of an open call or vararg
    pub(crate) fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) -> CompileResult<()> {
        match e.kind {
            ExpKind::VCall => self.exp_instruction(e).set_c((nresults + 1) as u32),
            ExpKind::VVararg => {
                let freereg = self.fs.freereg as u32;
                let i = self.exp_instruction(e);
                i.set_b((nresults + 1) as u32);
                i.set_a(freereg);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub(crate) fn set_multret(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        self.set_returns(e, LUA_MULTRET)
    }

    /// Keep only the first result of a call or vararg
    pub(crate) fn set_one_ret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::VCall => {
                e.info = self.exp_instruction(e).get_a() as i32;
                e.kind = ExpKind::VNonReloc;
            }
            ExpKind::VVararg => {
                self.exp_instruction(e).set_b(2);
                e.kind = ExpKind::VReloc;
            }
            _ => {}
        }
    }

    /// Turn a variable into a value: registers stay, upvalues and indexed
    /// loads become relocatable instructions
    pub(crate) fn discharge_vars(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        match e.kind {
            ExpKind::VLocal => e.kind = ExpKind::VNonReloc,
            ExpKind::VUpval => {
                e.info = self.code_abc(OpCode::GetUpval, 0, e.info, 0)?;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VIndexed => {
                let mut op = OpCode::GetTabUp;
                self.free_reg(e.ind.idx);
                if e.ind.vt == ExpKind::VLocal {
                    self.free_reg(e.ind.t);
                    op = OpCode::GetTable;
                }
                e.info = self.code_abc(op, 0, e.ind.t, e.ind.idx)?;
                e.kind = ExpKind::VReloc;
            }
            ExpKind::VVararg | ExpKind::VCall => self.set_one_ret(e),
            _ => {}
        }
        Ok(())
    }

    fn code_label(&mut self, a: i32, b: i32, jump: i32) -> CompileResult<i32> {
        // may be a jump target
        self.get_label();
        self.code_abc(OpCode::LoadBool, a, b, jump)
    }

    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: i32) -> CompileResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::VNil => self.code_nil(reg, 1)?,
            ExpKind::VFalse | ExpKind::VTrue => {
                self.code_abc(OpCode::LoadBool, reg, (e.kind == ExpKind::VTrue) as i32, 0)?;
            }
            ExpKind::VK => {
                self.code_k(reg, e.info as usize)?;
            }
            ExpKind::VKNum => {
                let k = self.number_k(e.nval);
                self.code_k(reg, k)?;
            }
            ExpKind::VReloc => self.exp_instruction(e).set_a(reg as u32),
            ExpKind::VNonReloc => {
                if reg != e.info {
                    self.code_abc(OpCode::Move, reg, e.info, 0)?;
                }
            }
            // nothing to do for void and jumps
            _ => return Ok(()),
        }
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        if e.kind != ExpKind::VNonReloc {
            self.reserve_regs(1)?;
            let reg = self.fs.freereg as i32 - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    /// Materialize `e` in `reg`, resolving its jump lists
    fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: i32) -> CompileResult<()> {
        self.discharge_to_reg(e, reg)?;
        if e.kind == ExpKind::VJmp {
            let mut t = e.t;
            self.concat_jumps(&mut t, e.info)?;
            e.t = t;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::VJmp { NO_JUMP } else { self.jump()? };
                p_f = self.code_label(reg, 0, 1)?;
                p_t = self.code_label(reg, 1, 0)?;
                self.patch_to_here(fj)?;
            }
            // position after the whole expression
            let final_pc = self.get_label();
            self.patch_list_aux(e.f, final_pc, reg, p_f)?;
            self.patch_list_aux(e.t, final_pc, reg, p_t)?;
        }
        e.f = NO_JUMP;
        e.t = NO_JUMP;
        e.info = reg;
        e.kind = ExpKind::VNonReloc;
        Ok(())
    }

    pub(crate) fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs.freereg as i32 - 1;
        self.exp_to_reg(e, reg)
    }

    pub(crate) fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> CompileResult<i32> {
        self.discharge_vars(e)?;
        if e.kind == ExpKind::VNonReloc {
            if !e.has_jumps() {
                return Ok(e.info);
            }
            if e.info >= self.fs.nactvar as i32 {
                // not a local: put the final value in the same register
                let reg = e.info;
                self.exp_to_reg(e, reg)?;
                return Ok(e.info);
            }
        }
        self.exp_to_next_reg(e)?;
        Ok(e.info)
    }

    /// Register or upvalue
    pub(crate) fn exp_to_any_reg_up(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        if e.kind != ExpKind::VUpval || e.has_jumps() {
            self.exp_to_any_reg(e)?;
        }
        Ok(())
    }

    pub(crate) fn exp_to_val(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
            Ok(())
        } else {
            self.discharge_vars(e)
        }
    }

    /// Register or constant operand
    pub(crate) fn exp_to_rk(&mut self, e: &mut ExpDesc) -> CompileResult<i32> {
        self.exp_to_val(e)?;
        match e.kind {
            ExpKind::VTrue | ExpKind::VFalse | ExpKind::VNil => {
                if self.fs.nk() <= Instruction::MAX_INDEX_RK as usize {
                    let k = match e.kind {
                        ExpKind::VNil => self.nil_k(),
                        kind => self.bool_k(kind == ExpKind::VTrue),
                    };
                    e.info = k as i32;
                    e.kind = ExpKind::VK;
                    return Ok(Instruction::rk_as_k(e.info as u32) as i32);
                }
            }
            ExpKind::VKNum | ExpKind::VK => {
                if e.kind == ExpKind::VKNum {
                    e.info = self.number_k(e.nval) as i32;
                    e.kind = ExpKind::VK;
                }
                if e.info as u32 <= Instruction::MAX_INDEX_RK {
                    return Ok(Instruction::rk_as_k(e.info as u32) as i32);
                }
            }
            _ => {}
        }
        // not a constant in range: put it in a register
        self.exp_to_any_reg(e)
    }

    /// Assign `ex` to variable `var`
    pub(crate) fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> CompileResult<()> {
        match var.kind {
            ExpKind::VLocal => {
                self.free_exp(ex);
                return self.exp_to_reg(ex, var.info);
            }
            ExpKind::VUpval => {
                let e = self.exp_to_any_reg(ex)?;
                self.code_abc(OpCode::SetUpval, e, var.info, 0)?;
            }
            ExpKind::VIndexed => {
                let op = if var.ind.vt == ExpKind::VLocal { OpCode::SetTable } else { OpCode::SetTabUp };
                let e = self.exp_to_rk(ex)?;
                self.code_abc(op, var.ind.t, var.ind.idx, e)?;
            }
            _ => {}
        }
        self.free_exp(ex);
        Ok(())
    }

    /// `e:key` - method lookup leaving the function and the receiver in
    /// consecutive registers
    pub(crate) fn code_self(&mut self, e: &mut ExpDesc, key: &mut ExpDesc) -> CompileResult<()> {
        self.exp_to_any_reg(e)?;
        let ereg = e.info;
        self.free_exp(e);
        e.info = self.fs.freereg as i32;
        e.kind = ExpKind::VNonReloc;
        self.reserve_regs(2)?;
        let k = self.exp_to_rk(key)?;
        self.code_abc(OpCode::Self_, e.info, ereg, k)?;
        self.free_exp(key);
        Ok(())
    }

    fn invert_jump(&mut self, e: &ExpDesc) {
        let ctl = self.jump_control_pc(e.info);
        let i = self.instruction(ctl);
        let a = i.get_a();
        i.set_a((a == 0) as u32);
    }

    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> CompileResult<i32> {
        if e.kind == ExpKind::VReloc {
            let ie = *self.exp_instruction(e);
            if ie.get_opcode() == OpCode::Not {
                // drop the NOT and test its operand the other way
                self.fs.chunk.code.pop();
                self.fs.chunk.line_info.pop();
                return self.cond_jump(OpCode::Test, ie.get_b() as i32, 0, (!cond) as i32);
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        self.cond_jump(OpCode::TestSet, NO_REG, e.info, cond as i32)
    }

    /// Fall through when `e` is true, jump (false list) otherwise
    pub(crate) fn go_if_true(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::VJmp => {
                self.invert_jump(e);
                e.info
            }
            // always true
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => NO_JUMP,
            _ => self.jump_on_cond(e, false)?,
        };
        let mut f = e.f;
        self.concat_jumps(&mut f, pc)?;
        e.f = f;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Fall through when `e` is false, jump (true list) otherwise
    pub(crate) fn go_if_false(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::VJmp => e.info,
            // always false
            ExpKind::VNil | ExpKind::VFalse => NO_JUMP,
            _ => self.jump_on_cond(e, true)?,
        };
        let mut t = e.t;
        self.concat_jumps(&mut t, pc)?;
        e.t = t;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> CompileResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::VNil | ExpKind::VFalse => e.kind = ExpKind::VTrue,
            ExpKind::VK | ExpKind::VKNum | ExpKind::VTrue => e.kind = ExpKind::VFalse,
            ExpKind::VJmp => self.invert_jump(e),
            ExpKind::VReloc | ExpKind::VNonReloc => {
                self.discharge_to_any_reg(e)?;
                self.free_exp(e);
                e.info = self.code_abc(OpCode::Not, 0, e.info, 0)?;
                e.kind = ExpKind::VReloc;
            }
            _ => {}
        }
        std::mem::swap(&mut e.f, &mut e.t);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    /// Turn `t` into the indexed expression `t[k]`
    pub(crate) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> CompileResult<()> {
        t.ind.t = t.info;
        t.ind.idx = self.exp_to_rk(k)?;
        t.ind.vt = if t.kind == ExpKind::VUpval { ExpKind::VUpval } else { ExpKind::VLocal };
        t.kind = ExpKind::VIndexed;
        Ok(())
    }

    /// Fold arithmetic on two number literals. Division and modulo by zero
    /// are left to run time.
    fn const_folding(op: OpCode, e1: &mut ExpDesc, e2: &ExpDesc) -> bool {
        if !e1.is_numeral() || !e2.is_numeral() {
            return false;
        }
        if matches!(op, OpCode::Div | OpCode::Mod) && e2.nval == 0.0 {
            return false;
        }
        e1.nval = fold_arith(op, e1.nval, e2.nval);
        true
    }

    fn code_arith(&mut self, op: OpCode, e1: &mut ExpDesc, e2: &mut ExpDesc, line: u32) -> CompileResult<()> {
        if Self::const_folding(op, e1, e2) {
            return Ok(());
        }
        let o2 = if op != OpCode::Unm && op != OpCode::Len { self.exp_to_rk(e2)? } else { 0 };
        let o1 = self.exp_to_rk(e1)?;
        if o1 > o2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
        e1.info = self.code_abc(op, 0, o1, o2)?;
        e1.kind = ExpKind::VReloc;
        self.fix_line(line);
        Ok(())
    }

    fn code_comp(&mut self, op: OpCode, mut cond: bool, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CompileResult<()> {
        let mut o1 = self.exp_to_rk(e1)?;
        let mut o2 = self.exp_to_rk(e2)?;
        self.free_exp(e2);
        self.free_exp(e1);
        if !cond && op != OpCode::Eq {
            // a > b is b < a, a >= b is b <= a
            std::mem::swap(&mut o1, &mut o2);
            cond = true;
        }
        e1.info = self.cond_jump(op, cond as i32, o1, o2)?;
        e1.kind = ExpKind::VJmp;
        Ok(())
    }

    pub(crate) fn prefix(&mut self, op: UnOpr, e: &mut ExpDesc, line: u32) -> CompileResult<()> {
        let mut e2 = ExpDesc::number(0.0);
        match op {
            UnOpr::Minus => {
                if e.is_numeral() {
                    e.nval = -e.nval;
                } else {
                    self.exp_to_any_reg(e)?;
                    self.code_arith(OpCode::Unm, e, &mut e2, line)?;
                }
            }
            UnOpr::Not => self.code_not(e)?,
            UnOpr::Len => {
                // no folding for lengths
                self.exp_to_any_reg(e)?;
                self.code_arith(OpCode::Len, e, &mut e2, line)?;
            }
        }
        Ok(())
    }

    /// Prepare the left operand before the right one is parsed
    pub(crate) fn infix(&mut self, op: BinOpr, v: &mut ExpDesc) -> CompileResult<()> {
        match op {
            BinOpr::And => self.go_if_true(v)?,
            BinOpr::Or => self.go_if_false(v)?,
            // operand must be on the stack
            BinOpr::Concat => self.exp_to_next_reg(v)?,
            BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div | BinOpr::Mod | BinOpr::Pow => {
                if !v.is_numeral() {
                    self.exp_to_rk(v)?;
                }
            }
            _ => {
                self.exp_to_rk(v)?;
            }
        }
        Ok(())
    }

    pub(crate) fn posfix(&mut self, op: BinOpr, e1: &mut ExpDesc, e2: &mut ExpDesc, line: u32) -> CompileResult<()> {
        match op {
            BinOpr::And => {
                self.discharge_vars(e2)?;
                let mut f = e2.f;
                self.concat_jumps(&mut f, e1.f)?;
                e2.f = f;
                *e1 = *e2;
            }
            BinOpr::Or => {
                self.discharge_vars(e2)?;
                let mut t = e2.t;
                self.concat_jumps(&mut t, e1.t)?;
                e2.t = t;
                *e1 = *e2;
            }
            BinOpr::Concat => {
                self.exp_to_val(e2)?;
                if e2.kind == ExpKind::VReloc && self.exp_instruction(e2).get_opcode() == OpCode::Concat {
                    // extend the CONCAT of the right operand
                    self.free_exp(e1);
                    let start = e1.info as u32;
                    self.exp_instruction(e2).set_b(start);
                    e1.kind = ExpKind::VReloc;
                    e1.info = e2.info;
                } else {
                    self.exp_to_next_reg(e2)?;
                    self.code_arith(OpCode::Concat, e1, e2, line)?;
                }
            }
            BinOpr::Add | BinOpr::Sub | BinOpr::Mul | BinOpr::Div | BinOpr::Mod | BinOpr::Pow => {
                self.code_arith(op.arith_opcode(), e1, e2, line)?;
            }
            BinOpr::Eq => self.code_comp(OpCode::Eq, true, e1, e2)?,
            BinOpr::Lt => self.code_comp(OpCode::Lt, true, e1, e2)?,
            BinOpr::Le => self.code_comp(OpCode::Le, true, e1, e2)?,
            BinOpr::Ne => self.code_comp(OpCode::Eq, false, e1, e2)?,
            BinOpr::Gt => self.code_comp(OpCode::Lt, false, e1, e2)?,
            BinOpr::Ge => self.code_comp(OpCode::Le, false, e1, e2)?,
        }
        Ok(())
    }

    /// Attribute the last instruction to `line`
    pub(crate) fn fix_line(&mut self, line: u32) {
        if let Some(last) = self.fs.chunk.line_info.last_mut() {
            *last = line as i32;
        }
    }

    /// Store `nelems` list items of a constructor, `tostore` of them
    /// pending in registers above `base` (`LUA_MULTRET` for an open tail)
    pub(crate) fn set_list(&mut self, base: i32, nelems: i32, tostore: i32) -> CompileResult<()> {
        let c = (nelems - 1) / LFIELDS_PER_FLUSH as i32 + 1;
        let b = if tostore == LUA_MULTRET { 0 } else { tostore };
        if c as u32 <= Instruction::MAX_C {
            self.code_abc(OpCode::SetList, base, b, c)?;
        } else if c as u32 <= Instruction::MAX_AX {
            self.code_abc(OpCode::SetList, base, b, 0)?;
            self.code_extra_arg(c as u32)?;
        } else {
            return Err(self.lex.syntax_error("constructor too long"));
        }
        // free the registers holding the list values
        self.fs.freereg = (base + 1) as u8;
        Ok(())
    }
}
