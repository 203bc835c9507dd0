// Per-function compilation state, lexical scopes, variables and labels

use ahash::AHashMap;

use crate::compiler::expdesc::{ExpDesc, ExpKind, NO_JUMP};
use crate::compiler::{CompileError, CompileResult, Compiler};
use crate::lua_value::{Chunk, LocVar, LuaString, LuaValue, UpvalueDesc};
use crate::lua_vm::lua_limits::{MAXUPVAL, MAXVARS};

/// Key of the constant table lookup. Numbers are keyed by their bits so
/// 0.0 and -0.0 (and NaN) get separate entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstKey {
    Nil,
    Bool(bool),
    Num(u64),
    Str(LuaString),
}

/// A lexical block
#[derive(Debug, Clone)]
pub struct BlockCnt {
    /// Index of the first label of this block
    pub first_label: usize,
    /// Index of the first pending goto of this block
    pub first_goto: usize,
    /// Active locals outside the block
    pub nactvar: u8,
    /// Some local of the block is captured as an upvalue
    pub upval: bool,
    pub is_loop: bool,
}

/// A label or a pending goto
#[derive(Debug, Clone)]
pub struct LabelDesc {
    pub name: LuaString,
    pub pc: i32,
    pub line: u32,
    /// Active locals at that position
    pub nactvar: u8,
}

/// Parser data shared by all nested functions
#[derive(Debug, Default)]
pub struct Dyndata {
    /// Active local variables: indices into the owning function's `locals`
    pub actvar: Vec<usize>,
    pub gt: Vec<LabelDesc>,
    pub label: Vec<LabelDesc>,
}

pub struct FuncState {
    pub chunk: Chunk,
    /// Open blocks, innermost last
    pub blocks: Vec<BlockCnt>,
    /// Pc of the last jump target
    pub last_target: i32,
    /// Jumps pending to the next instruction
    pub jpc: i32,
    /// First local of this function in `Dyndata::actvar`
    pub first_local: usize,
    pub nactvar: u8,
    pub freereg: u8,
    constants: AHashMap<ConstKey, usize>,
}

impl FuncState {
    pub fn new(source: LuaString, line_defined: i32, first_local: usize) -> Self {
        let chunk = Chunk {
            source: Some(source),
            line_defined,
            // registers 0 and 1 are always valid
            max_stack_size: 2,
            ..Chunk::default()
        };
        FuncState {
            chunk,
            blocks: Vec::new(),
            last_target: 0,
            jpc: NO_JUMP,
            first_local,
            nactvar: 0,
            freereg: 0,
            constants: AHashMap::new(),
        }
    }

    #[inline]
    pub fn pc(&self) -> i32 {
        self.chunk.code.len() as i32
    }

    #[inline]
    pub fn nk(&self) -> usize {
        self.chunk.constants.len()
    }

    pub fn nups(&self) -> usize {
        self.chunk.upvalue_descs.len()
    }

    /// Index of `value` in the constant table, adding it if needed
    pub fn add_constant(&mut self, key: ConstKey, value: LuaValue) -> usize {
        if let Some(&idx) = self.constants.get(&key) {
            return idx;
        }
        let idx = self.chunk.constants.len();
        self.chunk.constants.push(value);
        self.constants.insert(key, idx);
        idx
    }

    pub fn block(&self) -> &BlockCnt {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn block_mut(&mut self) -> &mut BlockCnt {
        let n = self.blocks.len() - 1;
        &mut self.blocks[n]
    }

    /// Mark the block declaring local `level` as having a captured local
    pub fn mark_upval(&mut self, level: usize) {
        if let Some(bl) = self.blocks.iter_mut().rev().find(|bl| bl.nactvar as usize <= level) {
            bl.upval = true;
        }
    }

    pub fn search_upvalue(&self, name: &LuaString) -> Option<usize> {
        self.chunk
            .upvalue_descs
            .iter()
            .position(|up| up.name.as_ref() == Some(name))
    }
}

impl Compiler<'_> {
    fn fs_at(&self, level: usize) -> &FuncState {
        if level == self.outer.len() { &self.fs } else { &self.outer[level] }
    }

    fn fs_at_mut(&mut self, level: usize) -> &mut FuncState {
        if level == self.outer.len() { &mut self.fs } else { &mut self.outer[level] }
    }

    pub(crate) fn error_limit(&self, line_defined: i32, limit: usize, what: &str) -> CompileError {
        let location = if line_defined == 0 {
            "main function".to_string()
        } else {
            format!("function at line {}", line_defined)
        };
        self.lex
            .syntax_error(&format!("too many {} (limit is {}) in {}", what, limit, location))
    }

    pub(crate) fn check_limit(&self, v: usize, limit: usize, what: &str) -> CompileResult<()> {
        if v > limit {
            return Err(self.error_limit(self.fs.chunk.line_defined, limit, what));
        }
        Ok(())
    }

    /// Error without the "near" part
    pub(crate) fn semantic_error(&self, msg: &str) -> CompileError {
        self.lex.lex_error(msg, None)
    }

    /// Debug record of the `i`-th active local of the current function
    pub(crate) fn local_var(&mut self, i: usize) -> &mut LocVar {
        let idx = self.dyd.actvar[self.fs.first_local + i];
        &mut self.fs.chunk.locals[idx]
    }

    pub(crate) fn new_localvar(&mut self, name: LuaString) -> CompileResult<()> {
        let idx = self.fs.chunk.locals.len();
        if idx >= i16::MAX as usize {
            return Err(self.error_limit(self.fs.chunk.line_defined, i16::MAX as usize, "local variables"));
        }
        self.fs.chunk.locals.push(LocVar {
            name: Some(name),
            start_pc: 0,
            end_pc: 0,
        });
        self.check_limit(self.dyd.actvar.len() + 1 - self.fs.first_local, MAXVARS, "local variables")?;
        self.dyd.actvar.push(idx);
        Ok(())
    }

    pub(crate) fn new_localvar_literal(&mut self, name: &str) -> CompileResult<()> {
        self.new_localvar(LuaString::from(name))
    }

    /// Bring the last `nvars` declared locals into scope
    pub(crate) fn adjust_local_vars(&mut self, nvars: usize) {
        self.fs.nactvar += nvars as u8;
        let pc = self.fs.pc() as u32;
        for i in (self.fs.nactvar as usize - nvars)..self.fs.nactvar as usize {
            self.local_var(i).start_pc = pc;
        }
    }

    pub(crate) fn remove_vars(&mut self, to_level: u8) {
        let n = (self.fs.nactvar - to_level) as usize;
        let pc = self.fs.pc() as u32;
        while self.fs.nactvar > to_level {
            self.fs.nactvar -= 1;
            let i = self.fs.nactvar as usize;
            self.local_var(i).end_pc = pc;
        }
        let len = self.dyd.actvar.len() - n;
        self.dyd.actvar.truncate(len);
    }

    fn search_var(&self, level: usize, name: &LuaString) -> Option<usize> {
        let fs = self.fs_at(level);
        (0..fs.nactvar as usize).rev().find(|&i| {
            let idx = self.dyd.actvar[fs.first_local + i];
            fs.chunk.locals[idx].name.as_ref() == Some(name)
        })
    }

    pub(crate) fn new_upvalue(&mut self, level: usize, name: &LuaString, v: &ExpDesc) -> CompileResult<usize> {
        let fs = self.fs_at(level);
        if fs.nups() + 1 > MAXUPVAL {
            return Err(self.error_limit(fs.chunk.line_defined, MAXUPVAL, "upvalues"));
        }
        let fs = self.fs_at_mut(level);
        fs.chunk.upvalue_descs.push(UpvalueDesc {
            name: Some(name.clone()),
            in_stack: v.kind == ExpKind::VLocal,
            index: v.info as u8,
        });
        Ok(fs.nups() - 1)
    }

    /// Resolve `name` in the function at `level`: a local, an upvalue, or
    /// `None` for a global
    fn single_var_aux(&mut self, level: usize, name: &LuaString, base: bool) -> CompileResult<Option<ExpDesc>> {
        if let Some(v) = self.search_var(level, name) {
            if !base {
                // the local will be used as an upvalue
                self.fs_at_mut(level).mark_upval(v);
            }
            return Ok(Some(ExpDesc::new(ExpKind::VLocal, v as i32)));
        }
        let idx = match self.fs_at(level).search_upvalue(name) {
            Some(idx) => idx,
            None => {
                if level == 0 {
                    return Ok(None);
                }
                let Some(var) = self.single_var_aux(level - 1, name, false)? else {
                    return Ok(None);
                };
                self.new_upvalue(level, name, &var)?
            }
        };
        Ok(Some(ExpDesc::new(ExpKind::VUpval, idx as i32)))
    }

    /// Resolve a variable name; globals become `_ENV[name]`
    pub(crate) fn single_var(&mut self, name: LuaString) -> CompileResult<ExpDesc> {
        let level = self.outer.len();
        if let Some(var) = self.single_var_aux(level, &name, true)? {
            return Ok(var);
        }
        let env_name = self.env_name.clone();
        let Some(mut var) = self.single_var_aux(level, &env_name, true)? else {
            return Err(self.semantic_error("cannot resolve _ENV"));
        };
        let mut key = self.string_constant(name);
        self.indexed(&mut var, &mut key)?;
        Ok(var)
    }

    /// Set up a new function being compiled; the enclosing one is saved
    pub(crate) fn open_func(&mut self, line_defined: i32) {
        let fs = FuncState::new(self.source.clone(), line_defined, self.dyd.actvar.len());
        let parent = std::mem::replace(&mut self.fs, fs);
        self.outer.push(parent);
        self.enter_block(false);
    }

    /// Finish the current function and return its prototype; the
    /// enclosing function becomes current again
    pub(crate) fn close_func(&mut self) -> CompileResult<Chunk> {
        self.ret(0, 0)?;
        self.leave_block()?;
        let parent = self.outer.pop();
        let fs = match parent {
            Some(parent) => std::mem::replace(&mut self.fs, parent),
            None => std::mem::replace(&mut self.fs, FuncState::new(self.source.clone(), 0, 0)),
        };
        Ok(fs.chunk)
    }

    pub(crate) fn enter_block(&mut self, is_loop: bool) {
        let bl = BlockCnt {
            first_label: self.dyd.label.len(),
            first_goto: self.dyd.gt.len(),
            nactvar: self.fs.nactvar,
            upval: false,
            is_loop,
        };
        self.fs.blocks.push(bl);
    }

    pub(crate) fn leave_block(&mut self) -> CompileResult<()> {
        let has_previous = self.fs.blocks.len() > 1;
        let (upval, nactvar, is_loop) = {
            let bl = self.fs.block();
            (bl.upval, bl.nactvar, bl.is_loop)
        };
        if has_previous && upval {
            // a jump to here closes the captured locals
            let j = self.jump()?;
            self.patch_close(j, nactvar as i32);
            self.patch_to_here(j)?;
        }
        if is_loop {
            self.break_label()?;
        }
        let Some(bl) = self.fs.blocks.pop() else {
            return Ok(());
        };
        self.remove_vars(bl.nactvar);
        self.fs.freereg = self.fs.nactvar;
        self.dyd.label.truncate(bl.first_label);
        if has_previous {
            self.move_gotos_out(&bl)?;
        } else if bl.first_goto < self.dyd.gt.len() {
            return Err(self.undefined_goto(bl.first_goto));
        }
        Ok(())
    }

    fn undefined_goto(&self, g: usize) -> CompileError {
        let gt = &self.dyd.gt[g];
        let msg = if gt.name.as_bytes() == b"break" {
            format!("<{}> at line {} not inside a loop", gt.name, gt.line)
        } else {
            format!("no visible label '{}' for <goto> at line {}", gt.name, gt.line)
        };
        self.semantic_error(&msg)
    }

    /// Resolve pending goto `g` to `label` and drop it from the list
    fn close_goto(&mut self, g: usize, label: &LabelDesc) -> CompileResult<()> {
        let gt = self.dyd.gt[g].clone();
        if gt.nactvar < label.nactvar {
            let vname = self
                .local_var(gt.nactvar as usize)
                .name
                .clone()
                .unwrap_or_else(|| LuaString::from("?"));
            let msg = format!(
                "<goto {}> at line {} jumps into the scope of local '{}'",
                gt.name, gt.line, vname
            );
            return Err(self.semantic_error(&msg));
        }
        self.patch_list(gt.pc, label.pc)?;
        self.dyd.gt.remove(g);
        Ok(())
    }

    /// Try to close goto `g` with a visible label of the current block
    fn find_label(&mut self, g: usize) -> CompileResult<bool> {
        let bl = self.fs.block().clone();
        let gt = self.dyd.gt[g].clone();
        let found = self.dyd.label[bl.first_label..]
            .iter()
            .find(|lb| lb.name == gt.name)
            .cloned();
        let Some(lb) = found else {
            return Ok(false);
        };
        if gt.nactvar > lb.nactvar && (bl.upval || self.dyd.label.len() > bl.first_label) {
            self.patch_close(gt.pc, lb.nactvar as i32);
        }
        self.close_goto(g, &lb)?;
        Ok(true)
    }

    fn new_label_entry(labels: &mut Vec<LabelDesc>, name: LuaString, line: u32, pc: i32, nactvar: u8) -> usize {
        labels.push(LabelDesc {
            name,
            pc,
            line,
            nactvar,
        });
        labels.len() - 1
    }

    /// Close the pending gotos of the current block that match `lb`
    fn find_gotos(&mut self, lb: &LabelDesc) -> CompileResult<()> {
        let mut i = self.fs.block().first_goto;
        while i < self.dyd.gt.len() {
            if self.dyd.gt[i].name == lb.name {
                self.close_goto(i, lb)?;
            } else {
                i += 1;
            }
        }
        Ok(())
    }

    /// Hand the pending gotos of a finished block to the enclosing block
    fn move_gotos_out(&mut self, bl: &BlockCnt) -> CompileResult<()> {
        let mut i = bl.first_goto;
        while i < self.dyd.gt.len() {
            if self.dyd.gt[i].nactvar > bl.nactvar {
                if bl.upval {
                    self.patch_close(self.dyd.gt[i].pc, bl.nactvar as i32);
                }
                self.dyd.gt[i].nactvar = bl.nactvar;
            }
            if !self.find_label(i)? {
                i += 1;
            }
        }
        Ok(())
    }

    /// Target of the pending `break`s of a loop block
    fn break_label(&mut self) -> CompileResult<()> {
        let pc = self.fs.pc();
        let nactvar = self.fs.nactvar;
        let l = Self::new_label_entry(&mut self.dyd.label, LuaString::from("break"), 0, pc, nactvar);
        let lb = self.dyd.label[l].clone();
        self.find_gotos(&lb)
    }

    /// Register a `goto` (or `break`) whose jump is at `pc`
    pub(crate) fn new_goto(&mut self, name: LuaString, line: u32, pc: i32) -> CompileResult<()> {
        let nactvar = self.fs.nactvar;
        let g = Self::new_label_entry(&mut self.dyd.gt, name, line, pc, nactvar);
        self.find_label(g)?;
        Ok(())
    }

    /// Define a label at the current position; returns its index
    pub(crate) fn create_label(&mut self, name: LuaString, line: u32) -> usize {
        let pc = self.get_label();
        let nactvar = self.fs.nactvar;
        Self::new_label_entry(&mut self.dyd.label, name, line, pc, nactvar)
    }

    /// Resolve the pending gotos that target label `l`
    pub(crate) fn solve_label(&mut self, l: usize, last_in_block: bool) -> CompileResult<()> {
        if last_in_block {
            // locals are already out of scope at the end of the block
            self.dyd.label[l].nactvar = self.fs.block().nactvar;
        }
        let lb = self.dyd.label[l].clone();
        self.find_gotos(&lb)
    }

    pub(crate) fn check_repeated_label(&self, name: &LuaString) -> CompileResult<()> {
        let first = self.fs.block().first_label;
        if let Some(lb) = self.dyd.label[first..].iter().find(|lb| &lb.name == name) {
            let msg = format!("label '{}' already defined on line {}", name, lb.line);
            return Err(self.semantic_error(&msg));
        }
        Ok(())
    }
}
