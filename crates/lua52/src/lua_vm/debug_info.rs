// Debug information: chunk ids, names of values for error messages,
// activation records, hooks and tracebacks.

use std::fmt::Write as _;

use tracing::trace;

use crate::lua_value::{Chunk, LuaFunction, LuaString, LuaTable, LuaValue};
use crate::lua_vm::call_info::call_status::{CIST_HOOKED, CIST_TAIL};
use crate::lua_vm::lua_limits::{LEVELS1, LEVELS2, LUA_IDSIZE, LUA_MINSTACK};
use crate::lua_vm::{Instruction, LuaError, LuaResult, LuaState, OpCode, TmKind};

/// Hook callback. Receives the activation record of the event.
pub type LuaHook = fn(&mut LuaState, &LuaDebug) -> LuaResult<()>;

/// Event masks for `set_hook`
pub mod hook_mask {
    pub const MASK_CALL: u8 = 1 << 0;
    pub const MASK_RET: u8 = 1 << 1;
    pub const MASK_LINE: u8 = 1 << 2;
    pub const MASK_COUNT: u8 = 1 << 3;
}

use hook_mask::{MASK_CALL, MASK_COUNT, MASK_LINE, MASK_RET};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookEvent {
    #[default]
    Call,
    Return,
    Line,
    Count,
    TailCall,
}

impl HookEvent {
    pub fn name(self) -> &'static str {
        match self {
            HookEvent::Call => "call",
            HookEvent::Return => "return",
            HookEvent::Line => "line",
            HookEvent::Count => "count",
            HookEvent::TailCall => "tail call",
        }
    }
}

/// Activation record (`lua_Debug`)
#[derive(Debug, Clone, Default)]
pub struct LuaDebug {
    pub event: HookEvent,
    pub name: Option<String>,
    /// "global", "local", "method", "field", "upvalue", "metamethod",
    /// "for iterator" or ""
    pub namewhat: &'static str,
    /// "Lua", "C", "main"
    pub what: &'static str,
    pub source: String,
    pub current_line: i32,
    pub nups: u8,
    pub nparams: u8,
    pub is_vararg: bool,
    pub is_tail_call: bool,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub short_src: String,
    /// Frame the record describes
    pub(crate) i_ci: usize,
}

/// Printable form of a chunk name, bounded by `LUA_IDSIZE`
pub fn chunk_id(source: &[u8]) -> String {
    const RETS: &str = "...";
    const PRE: &str = "[string \"";
    const POS: &str = "\"]";
    let text = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
    match source.first() {
        Some(b'=') => {
            let body = &source[1..];
            text(&body[..body.len().min(LUA_IDSIZE - 1)])
        }
        Some(b'@') => {
            let body = &source[1..];
            if source.len() <= LUA_IDSIZE {
                text(body)
            } else {
                let keep = LUA_IDSIZE - RETS.len() - 1;
                format!("{}{}", RETS, text(&body[body.len() - keep..]))
            }
        }
        _ => {
            let avail = LUA_IDSIZE - (PRE.len() + RETS.len() + POS.len()) - 1;
            let newline = source.iter().position(|&c| c == b'\n');
            if source.len() < avail && newline.is_none() {
                format!("{}{}{}", PRE, text(source), POS)
            } else {
                let len = newline.unwrap_or(source.len()).min(avail);
                format!("{}{}{}{}", PRE, text(&source[..len]), RETS, POS)
            }
        }
    }
}

// ===== Symbolic execution =====

/// Where an operand came from, for naming it in error messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueSlot {
    /// Absolute stack index
    Stack(usize),
    /// Upvalue of the running closure
    Upvalue(usize),
    Other,
}

fn upvalue_name(p: &Chunk, uv: usize) -> String {
    match p.upvalue_descs.get(uv).and_then(|d| d.name.as_ref()) {
        Some(name) => name.to_string(),
        None => "?".to_string(),
    }
}

/// Last instruction before `last_pc` that changed register `reg`
fn find_set_reg(p: &Chunk, last_pc: usize, reg: u32) -> Option<usize> {
    let mut set_reg = None;
    let mut jmp_target = 0usize;
    let filter = |pc: usize, jmp_target: usize| if pc < jmp_target { None } else { Some(pc) };
    for pc in 0..last_pc.min(p.code.len()) {
        let i = p.code[pc];
        let op = i.get_opcode();
        let a = i.get_a();
        match op {
            OpCode::LoadNil => {
                let b = i.get_b();
                if a <= reg && reg <= a + b {
                    set_reg = filter(pc, jmp_target);
                }
            }
            OpCode::TForCall => {
                if reg >= a + 2 {
                    set_reg = filter(pc, jmp_target);
                }
            }
            OpCode::Call | OpCode::TailCall => {
                if reg >= a {
                    set_reg = filter(pc, jmp_target);
                }
            }
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + i.get_sbx() as i64;
                // forward jump that does not skip `last_pc`
                if (pc as i64) < dest && dest <= last_pc as i64 && dest as usize > jmp_target {
                    jmp_target = dest as usize;
                }
            }
            OpCode::Test => {
                if reg == a {
                    set_reg = filter(pc, jmp_target);
                }
            }
            _ => {
                if op.sets_a() && reg == a {
                    set_reg = filter(pc, jmp_target);
                }
            }
        }
    }
    set_reg
}

fn constant_name(p: &Chunk, pc: usize, c: u32) -> String {
    if Instruction::is_k(c) {
        if let Some(LuaValue::String(s)) = p.constants.get(Instruction::index_k(c) as usize) {
            return s.to_string();
        }
    } else if let Some(("constant", name)) = object_name(p, pc, c) {
        return name;
    }
    "?".to_string()
}

/// Kind and name of the value in register `reg` at `last_pc`
pub(crate) fn object_name(p: &Chunk, last_pc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = p.local_name(reg as usize + 1, last_pc) {
        return Some(("local", name.to_string()));
    }
    let pc = find_set_reg(p, last_pc, reg)?;
    let i = p.code[pc];
    match i.get_opcode() {
        OpCode::Move => {
            let b = i.get_b();
            if b < i.get_a() {
                return object_name(p, pc, b);
            }
            None
        }
        op @ (OpCode::GetTabUp | OpCode::GetTable) => {
            let t = i.get_b();
            let table_name = if op == OpCode::GetTable {
                p.local_name(t as usize + 1, pc).map(|s| s.to_string())
            } else {
                Some(upvalue_name(p, t as usize))
            };
            let name = constant_name(p, pc, i.get_c());
            let kind = if table_name.as_deref() == Some("_ENV") { "global" } else { "field" };
            Some((kind, name))
        }
        OpCode::GetUpval => Some(("upvalue", upvalue_name(p, i.get_b() as usize))),
        op @ (OpCode::LoadK | OpCode::LoadKx) => {
            let b = if op == OpCode::LoadK {
                i.get_bx()
            } else {
                p.code.get(pc + 1).map(|x| x.get_ax()).unwrap_or(0)
            };
            match p.constants.get(b as usize) {
                Some(LuaValue::String(s)) => Some(("constant", s.to_string())),
                _ => None,
            }
        }
        OpCode::Self_ => Some(("method", constant_name(p, pc, i.get_c()))),
        _ => None,
    }
}

impl LuaState {
    pub(crate) fn ci_proto(&self, ci: usize) -> Option<std::rc::Rc<Chunk>> {
        let frame = &self.call_stack[ci];
        if !frame.is_lua() {
            return None;
        }
        self.stack[frame.func].as_function().and_then(LuaFunction::proto).cloned()
    }

    /// Index of the instruction a Lua frame is running
    pub(crate) fn current_pc(&self, ci: usize) -> usize {
        self.call_stack[ci].saved_pc.saturating_sub(1)
    }

    pub(crate) fn current_line(&self, ci: usize) -> i32 {
        match self.ci_proto(ci) {
            Some(p) => p.line_at(self.current_pc(ci)),
            None => -1,
        }
    }

    /// How the function running in frame `ci` was called, as seen by its caller
    pub(crate) fn func_name_for(&self, ci: usize) -> Option<(&'static str, String)> {
        if ci == 0 || self.call_stack[ci].is_tail() || !self.call_stack[ci - 1].is_lua() {
            return None;
        }
        let caller = ci - 1;
        let p = self.ci_proto(caller)?;
        let pc = self.current_pc(caller);
        let i = *p.code.get(pc)?;
        let tm = match i.get_opcode() {
            OpCode::Call | OpCode::TailCall => return object_name(&p, pc, i.get_a()),
            OpCode::TForCall => return Some(("for iterator", "for iterator".to_string())),
            OpCode::Self_ | OpCode::GetTabUp | OpCode::GetTable => TmKind::Index,
            OpCode::SetTabUp | OpCode::SetTable => TmKind::NewIndex,
            OpCode::Eq => TmKind::Eq,
            OpCode::Add => TmKind::Add,
            OpCode::Sub => TmKind::Sub,
            OpCode::Mul => TmKind::Mul,
            OpCode::Div => TmKind::Div,
            OpCode::Mod => TmKind::Mod,
            OpCode::Pow => TmKind::Pow,
            OpCode::Unm => TmKind::Unm,
            OpCode::Len => TmKind::Len,
            OpCode::Lt => TmKind::Lt,
            OpCode::Le => TmKind::Le,
            OpCode::Concat => TmKind::Concat,
            _ => return None,
        };
        Some(("metamethod", tm.name().to_string()))
    }

    fn var_info(&self, slot: ValueSlot) -> Option<(&'static str, String)> {
        let ci = self.ci;
        let p = self.ci_proto(ci)?;
        match slot {
            ValueSlot::Upvalue(i) => Some(("upvalue", upvalue_name(&p, i))),
            ValueSlot::Stack(idx) => {
                let frame = &self.call_stack[ci];
                if idx >= frame.base && idx < frame.top {
                    object_name(&p, self.current_pc(ci), (idx - frame.base) as u32)
                } else {
                    None
                }
            }
            ValueSlot::Other => None,
        }
    }

    /// "attempt to <op> <kind> '<name>' (a <type> value)"
    #[cold]
    pub(crate) fn type_error(&mut self, value: &LuaValue, slot: ValueSlot, op: &str) -> LuaError {
        let t = value.type_name();
        match self.var_info(slot) {
            Some((kind, name)) => {
                self.runtime_error(format!("attempt to {} {} '{}' (a {} value)", op, kind, name, t))
            }
            None => self.runtime_error(format!("attempt to {} a {} value", op, t)),
        }
    }

    #[cold]
    pub(crate) fn arith_error(
        &mut self,
        p1: &LuaValue,
        s1: ValueSlot,
        p2: &LuaValue,
        s2: ValueSlot,
    ) -> LuaError {
        if p1.to_number().is_none() {
            self.type_error(p1, s1, "perform arithmetic on")
        } else {
            self.type_error(p2, s2, "perform arithmetic on")
        }
    }

    #[cold]
    pub(crate) fn concat_error(
        &mut self,
        p1: &LuaValue,
        s1: ValueSlot,
        p2: &LuaValue,
        s2: ValueSlot,
    ) -> LuaError {
        if matches!(p1, LuaValue::String(_) | LuaValue::Number(_)) {
            self.type_error(p2, s2, "concatenate")
        } else {
            self.type_error(p1, s1, "concatenate")
        }
    }

    #[cold]
    pub(crate) fn order_error(&mut self, p1: &LuaValue, p2: &LuaValue) -> LuaError {
        let t1 = p1.type_name();
        let t2 = p2.type_name();
        if t1 == t2 {
            self.runtime_error(format!("attempt to compare two {} values", t1))
        } else {
            self.runtime_error(format!("attempt to compare {} with {}", t1, t2))
        }
    }

    // ===== Activation records =====

    /// Frame at `level` (0 = running function)
    pub fn get_stack(&self, level: usize) -> Option<LuaDebug> {
        if level >= self.ci {
            return None;
        }
        Some(LuaDebug {
            i_ci: self.ci - level,
            ..LuaDebug::default()
        })
    }

    /// Fill `ar` with the fields selected by `what` ("SlnutfL"). With a
    /// leading '>' the function is popped from the stack instead of taken
    /// from `ar`. 'f' and 'L' push their results.
    pub fn get_info(&mut self, what: &str, ar: &mut LuaDebug) -> bool {
        let (func, ci, options) = if let Some(rest) = what.strip_prefix('>') {
            (self.pop_value(), None, rest)
        } else {
            (self.stack[self.call_stack[ar.i_ci].func].clone(), Some(ar.i_ci), what)
        };
        let closure = func.as_function().cloned();
        let mut ok = true;
        for opt in options.chars() {
            match opt {
                'S' => {
                    match closure.as_ref().and_then(LuaFunction::proto) {
                        Some(p) => {
                            ar.source = String::from_utf8_lossy(p.source_name()).into_owned();
                            ar.line_defined = p.line_defined;
                            ar.last_line_defined = p.last_line_defined;
                            ar.what = if p.line_defined == 0 { "main" } else { "Lua" };
                        }
                        None => {
                            ar.source = "=[C]".to_string();
                            ar.line_defined = -1;
                            ar.last_line_defined = -1;
                            ar.what = "C";
                        }
                    }
                    ar.short_src = chunk_id(ar.source.as_bytes());
                }
                'l' => {
                    ar.current_line = match ci {
                        Some(c) if self.call_stack[c].is_lua() => self.current_line(c),
                        _ => -1,
                    };
                }
                'u' => match &closure {
                    Some(LuaFunction::Lua(c)) => {
                        ar.nups = c.upvalues.borrow().len() as u8;
                        ar.is_vararg = c.proto.is_vararg != 0;
                        ar.nparams = c.proto.param_count;
                    }
                    Some(LuaFunction::Rust(c)) => {
                        ar.nups = c.upvalues.borrow().len() as u8;
                        ar.is_vararg = true;
                        ar.nparams = 0;
                    }
                    _ => {
                        ar.nups = 0;
                        ar.is_vararg = true;
                        ar.nparams = 0;
                    }
                },
                't' => {
                    ar.is_tail_call = ci.map(|c| self.call_stack[c].is_tail()).unwrap_or(false);
                }
                'n' => match ci.and_then(|c| self.func_name_for(c)) {
                    Some((namewhat, name)) => {
                        ar.namewhat = namewhat;
                        ar.name = Some(name);
                    }
                    None => {
                        ar.namewhat = "";
                        ar.name = None;
                    }
                },
                'f' | 'L' => {}
                _ => ok = false,
            }
        }
        if options.contains('f') {
            let _ = self.push_value(func.clone());
        }
        if options.contains('L') {
            let lines = match closure.as_ref().and_then(LuaFunction::proto) {
                Some(p) => {
                    let mut t = LuaTable::new(0, p.line_info.len());
                    for &line in &p.line_info {
                        t.set_int(line as i64, LuaValue::Boolean(true));
                    }
                    LuaValue::table(t)
                }
                None => LuaValue::Nil,
            };
            let _ = self.push_value(lines);
        }
        ok
    }

    fn find_vararg(&self, ci: usize, n: i32) -> Option<usize> {
        let frame = &self.call_stack[ci];
        let nparams = self.ci_proto(ci)?.param_count as i64;
        let nvarargs = frame.base as i64 - frame.func as i64 - nparams - 1;
        if (-n as i64) > nvarargs {
            None
        } else {
            Some((frame.func as i64 + nparams - n as i64) as usize)
        }
    }

    fn find_local(&self, ci: usize, n: i32) -> Option<(String, usize)> {
        let frame = &self.call_stack[ci];
        let mut name = None;
        let base = if frame.is_lua() {
            if n < 0 {
                return self.find_vararg(ci, n).map(|pos| ("(*vararg)".to_string(), pos));
            }
            let p = self.ci_proto(ci)?;
            name = p.local_name(n as usize, self.current_pc(ci)).map(|s| s.to_string());
            frame.base
        } else {
            frame.func + 1
        };
        if name.is_none() {
            let limit = if ci == self.ci { self.top } else { self.call_stack[ci + 1].func };
            if n > 0 && limit >= base && limit - base >= n as usize {
                name = Some(if frame.is_lua() { "(*temporary)" } else { "(*C temporary)" }.to_string());
            } else {
                return None;
            }
        }
        name.map(|nm| (nm, base + n as usize - 1))
    }

    /// Name of local `n` of the frame in `ar`; its value is pushed. Without
    /// a record, names the parameters of the function on top of the stack.
    pub fn get_local(&mut self, ar: Option<&LuaDebug>, n: i32) -> Option<String> {
        match ar {
            None => {
                let top = self.stack[self.top - 1].clone();
                let p = top.as_function().and_then(LuaFunction::proto)?;
                if n <= 0 {
                    return None;
                }
                p.local_name(n as usize, 0).map(|s| s.to_string())
            }
            Some(ar) => {
                let (name, pos) = self.find_local(ar.i_ci, n)?;
                let v = self.stack[pos].clone();
                let _ = self.push_value(v);
                Some(name)
            }
        }
    }

    /// Assign the value on top of the stack to local `n`; pops it
    pub fn set_local(&mut self, ar: &LuaDebug, n: i32) -> Option<String> {
        let found = self.find_local(ar.i_ci, n);
        let v = self.pop_value();
        let (name, pos) = found?;
        self.stack[pos] = v;
        Some(name)
    }

    // ===== Hooks =====

    pub fn set_hook(&mut self, func: Option<LuaHook>, mask: u8, count: i32) {
        let (func, mask) = match func {
            Some(f) if mask != 0 => (Some(f), mask),
            _ => (None, 0),
        };
        if self.current_ci().is_lua() {
            self.old_pc = self.current_ci().saved_pc;
        }
        trace!(thread = self.id, mask, count, "hook installed");
        self.hook = func;
        self.base_hook_count = count;
        self.hook_count = count;
        self.hook_mask = mask;
    }

    pub fn get_hook(&self) -> Option<LuaHook> {
        self.hook
    }

    pub fn get_hook_mask(&self) -> u8 {
        self.hook_mask
    }

    pub fn get_hook_count(&self) -> i32 {
        self.base_hook_count
    }

    /// Run the hook for `event` in the current frame
    pub(crate) fn run_hook(&mut self, event: HookEvent, line: i32) -> LuaResult<()> {
        let Some(hook) = self.hook else {
            return Ok(());
        };
        if !self.allow_hook {
            return Ok(());
        }
        let ci = self.ci;
        let top = self.top;
        let ci_top = self.call_stack[ci].top;
        self.check_stack(LUA_MINSTACK)?;
        self.call_stack[ci].top = self.top + LUA_MINSTACK;
        self.allow_hook = false;
        self.call_stack[ci].call_status |= CIST_HOOKED;
        let ar = LuaDebug {
            event,
            current_line: line,
            i_ci: ci,
            ..LuaDebug::default()
        };
        hook(self, &ar)?;
        if self.status == crate::lua_vm::ThreadStatus::Yield
            && !matches!(event, HookEvent::Line | HookEvent::Count)
        {
            // only line and count hooks may yield
            self.status = crate::lua_vm::ThreadStatus::Ok;
        }
        self.allow_hook = true;
        self.call_stack[ci].top = ci_top;
        self.top = top;
        self.call_stack[ci].call_status &= !CIST_HOOKED;
        Ok(())
    }

    /// Call hook of a Lua function that was just entered
    pub(crate) fn call_hook(&mut self) -> LuaResult<()> {
        let ci = self.ci;
        let mut event = HookEvent::Call;
        // hooks assume the pc is already incremented
        self.call_stack[ci].saved_pc += 1;
        if ci > 0 && self.call_stack[ci - 1].is_lua() {
            let caller = ci - 1;
            let tail = self
                .ci_proto(caller)
                .and_then(|p| p.code.get(self.current_pc(caller)).copied())
                .map(|i| i.get_opcode() == OpCode::TailCall)
                .unwrap_or(false);
            if tail {
                self.call_stack[ci].call_status |= CIST_TAIL;
                event = HookEvent::TailCall;
            }
        }
        self.run_hook(event, -1)?;
        self.call_stack[ci].saved_pc -= 1;
        Ok(())
    }

    pub(crate) fn hooks_on_return(&self) -> bool {
        self.hook_mask & (MASK_RET | MASK_LINE) != 0
    }

    pub(crate) fn hooks_on_call(&self) -> bool {
        self.hook_mask & MASK_CALL != 0
    }

    pub(crate) fn hooks_on_return_only(&self) -> bool {
        self.hook_mask & MASK_RET != 0
    }

    pub(crate) fn hooks_traced(&self) -> bool {
        self.hook_mask & (MASK_LINE | MASK_COUNT) != 0
    }

    pub(crate) fn hooks_on_line(&self) -> bool {
        self.hook_mask & MASK_LINE != 0
    }

    pub(crate) fn hooks_on_count(&self) -> bool {
        self.hook_mask & MASK_COUNT != 0
    }

    // ===== Traceback =====

    /// Name under which a function is reachable from `package.loaded`
    pub(crate) fn global_func_name(&self, func: &LuaValue) -> Option<String> {
        let loaded = self.global.registry.borrow().get_str("_LOADED");
        let loaded = loaded.as_table()?.borrow();
        let search = |module: &LuaValue| -> Option<LuaValue> {
            let t = module.as_table()?.borrow();
            t.iter().find(|(_, v)| v.raw_equal(func)).map(|(k, _)| k)
        };
        if let Some(LuaValue::String(name)) = search(&loaded.get_str("_G")) {
            return Some(name.to_string());
        }
        for (modname, module) in loaded.iter() {
            if modname.as_string().map(|s| s.as_bytes() == b"_G").unwrap_or(false) {
                continue;
            }
            if let (LuaValue::String(m), Some(LuaValue::String(name))) = (&modname, search(&module)) {
                return Some(format!("{}.{}", m, name));
            }
        }
        None
    }

    fn describe_function(&self, ar: &LuaDebug, func: &LuaValue) -> String {
        if !ar.namewhat.is_empty() {
            format!("function '{}'", ar.name.as_deref().unwrap_or("?"))
        } else if ar.what == "main" {
            "main chunk".to_string()
        } else if ar.what == "C" {
            match self.global_func_name(func) {
                Some(name) => format!("function '{}'", name),
                None => "?".to_string(),
            }
        } else {
            format!("function <{}:{}>", ar.short_src, ar.line_defined)
        }
    }

    /// Standard traceback of this thread starting at `level`
    pub fn traceback(&mut self, msg: Option<&str>, mut level: usize) -> String {
        let mut out = String::new();
        if let Some(m) = msg {
            out.push_str(m);
            out.push('\n');
        }
        out.push_str("stack traceback:");
        let num_levels = self.ci;
        let mark = if num_levels > LEVELS1 + LEVELS2 { LEVELS1 } else { usize::MAX };
        while let Some(mut ar) = self.get_stack(level) {
            level += 1;
            if level == mark {
                out.push_str("\n\t...");
                level = num_levels - LEVELS2;
                continue;
            }
            let top = self.top;
            self.get_info("Slnt", &mut ar);
            self.top = top;
            let func = self.stack[self.call_stack[ar.i_ci].func].clone();
            let _ = write!(out, "\n\t{}:", ar.short_src);
            if ar.current_line > 0 {
                let _ = write!(out, "{}:", ar.current_line);
            }
            out.push_str(" in ");
            out.push_str(&self.describe_function(&ar, &func));
            if ar.is_tail_call {
                out.push_str("\n\t(...tail calls...)");
            }
        }
        out
    }

    /// Name of upvalue `n` (1-based) of a function value and a copy of its value
    pub(crate) fn upvalue_info(&self, func: &LuaValue, n: usize) -> Option<(LuaString, LuaValue)> {
        match func.as_function()? {
            LuaFunction::Rust(c) => {
                let v = c.upvalues.borrow().get(n.checked_sub(1)?)?.clone();
                Some((LuaString::from(""), v))
            }
            LuaFunction::Lua(c) => {
                let uv = c.upvalue(n.checked_sub(1)?)?;
                let name = c.proto.upvalue_descs.get(n - 1).and_then(|d| d.name.clone());
                Some((name.unwrap_or_else(|| LuaString::from("")), self.upvalue_get(&uv)))
            }
            LuaFunction::Light(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_forms() {
        assert_eq!(chunk_id(b"=stdin"), "stdin");
        assert_eq!(chunk_id(b"@script.lua"), "script.lua");
        assert_eq!(chunk_id(b"print(1)"), "[string \"print(1)\"]");
        assert_eq!(chunk_id(b"x = 1\ny = 2"), "[string \"x = 1...\"]");
        let long = format!("@{}", "d/".repeat(40));
        let id = chunk_id(long.as_bytes());
        assert!(id.starts_with("..."));
        assert_eq!(id.len(), LUA_IDSIZE - 1);
        let long_src = "a".repeat(100);
        assert_eq!(chunk_id(long_src.as_bytes()).len(), 9 + 45 + 3 + 2);
    }
}
