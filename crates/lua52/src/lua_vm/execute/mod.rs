/*----------------------------------------------------------------------
  Lua 5.2 VM Execution Engine

  `lua_execute` runs the frame `l.ci` until a frame that was not entered
  through reentry returns. Calls from Lua to Lua do not grow the Rust stack:
  the callee frame is marked CIST_REENTRY and the loop restarts at
  'newframe, exactly like the C implementation's `goto newframe`.

  Registers are addressed by stack index, so a stack reallocation during a
  metamethod or hook never invalidates `base`.
----------------------------------------------------------------------*/

pub(crate) mod arithmetic;
pub(crate) mod call;
pub(crate) mod concat;
pub(crate) mod metamethod;
pub(crate) mod table_ops;

use std::rc::Rc;

use crate::lua_value::{Chunk, LuaClosure, LuaFunction, LuaTable, LuaUpvalue, LuaValue};
use crate::lua_vm::call_info::call_status::{CIST_HOOKYIELD, CIST_REENTRY, CIST_TAIL};
use crate::lua_vm::debug_info::{HookEvent, ValueSlot, hook_mask};
use crate::lua_vm::lua_limits::LFIELDS_PER_FLUSH;
use crate::lua_vm::{
    Instruction, LuaError, LuaResult, LuaState, OpCode, ThreadStatus, float8_decode,
};

use arithmetic::{ArithOp, arith, arith_number, less_equal, less_than};
use call::{call, poscall, precall};
use concat::{concat, obj_len};
use metamethod::equal_obj;
use table_ops::{get_table, set_table};

/// Run Lua code starting at the current frame
pub(crate) fn lua_execute(l: &mut LuaState) -> LuaResult<()> {
    'newframe: loop {
        let ci = l.ci;
        let cl = match &l.stack[l.call_stack[ci].func] {
            LuaValue::Function(LuaFunction::Lua(c)) => c.clone(),
            _ => return Err(l.runtime_error("attempt to run a frame without a Lua function")),
        };
        let proto = cl.proto.clone();
        let code = &proto.code;
        let k = &proto.constants;
        let base = l.call_stack[ci].base;
        let mut pc = l.call_stack[ci].saved_pc;

        macro_rules! rk {
            ($x:expr) => {{
                let x = $x;
                if Instruction::is_k(x) {
                    k[Instruction::index_k(x) as usize].clone()
                } else {
                    l.stack[base + x as usize].clone()
                }
            }};
        }
        macro_rules! rk_slot {
            ($x:expr) => {{
                let x = $x;
                if Instruction::is_k(x) { ValueSlot::Other } else { ValueSlot::Stack(base + x as usize) }
            }};
        }
        macro_rules! upvalue {
            ($idx:expr) => {{
                let uv = cl.upvalues.borrow()[$idx as usize].clone();
                uv
            }};
        }
        // conditional jump: the next instruction is a JMP
        macro_rules! do_next_jump {
            () => {{
                let ni = code[pc];
                let a = ni.get_a() as usize;
                if a > 0 {
                    l.close_upvalues(base + a - 1);
                }
                pc = (pc as i64 + ni.get_sbx() as i64 + 1) as usize;
            }};
        }
        macro_rules! arith_op {
            ($i:expr, $ra:expr, $op:expr) => {{
                let b = $i.get_b();
                let c = $i.get_c();
                let rb = rk!(b);
                let rc = rk!(c);
                let v = match (&rb, &rc) {
                    (LuaValue::Number(x), LuaValue::Number(y)) => {
                        LuaValue::Number(arith_number($op, *x, *y))
                    }
                    _ => arith(l, $op, &rb, rk_slot!(b), &rc, rk_slot!(c))?,
                };
                l.stack[$ra] = v;
            }};
        }

        loop {
            let i = code[pc];
            pc += 1;
            l.call_stack[ci].saved_pc = pc;
            if l.hook_mask & (hook_mask::MASK_LINE | hook_mask::MASK_COUNT) != 0 {
                l.hook_count = l.hook_count.wrapping_sub(1);
                if l.hook_count == 0 || l.hooks_on_line() {
                    trace_exec(l)?;
                }
            }
            let ra = base + i.get_a() as usize;
            match i.get_opcode() {
                OpCode::Move => {
                    let v = l.stack[base + i.get_b() as usize].clone();
                    l.stack[ra] = v;
                }
                OpCode::LoadK => {
                    l.stack[ra] = k[i.get_bx() as usize].clone();
                }
                OpCode::LoadKx => {
                    let ax = code[pc].get_ax();
                    pc += 1;
                    l.stack[ra] = k[ax as usize].clone();
                }
                OpCode::LoadBool => {
                    l.stack[ra] = LuaValue::Boolean(i.get_b() != 0);
                    if i.get_c() != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    let b = i.get_b() as usize;
                    for slot in &mut l.stack[ra..=ra + b] {
                        *slot = LuaValue::Nil;
                    }
                }
                OpCode::GetUpval => {
                    let uv = upvalue!(i.get_b());
                    l.stack[ra] = l.upvalue_get(&uv);
                }
                OpCode::GetTabUp => {
                    let b = i.get_b();
                    let t = l.upvalue_get(&upvalue!(b));
                    let key = rk!(i.get_c());
                    let v = get_table(l, &t, &key, ValueSlot::Upvalue(b as usize))?;
                    l.stack[ra] = v;
                }
                OpCode::GetTable => {
                    let b = base + i.get_b() as usize;
                    let t = l.stack[b].clone();
                    let key = rk!(i.get_c());
                    let v = match &t {
                        LuaValue::Table(h) => {
                            let v = h.borrow().get(&key);
                            if v.is_nil() { get_table(l, &t, &key, ValueSlot::Stack(b))? } else { v }
                        }
                        _ => get_table(l, &t, &key, ValueSlot::Stack(b))?,
                    };
                    l.stack[ra] = v;
                }
                OpCode::SetTabUp => {
                    let a = i.get_a();
                    let t = l.upvalue_get(&upvalue!(a));
                    let key = rk!(i.get_b());
                    let value = rk!(i.get_c());
                    set_table(l, &t, key, value, ValueSlot::Upvalue(a as usize))?;
                }
                OpCode::SetUpval => {
                    let uv = upvalue!(i.get_b());
                    let v = l.stack[ra].clone();
                    l.upvalue_set(&uv, v);
                }
                OpCode::SetTable => {
                    let t = l.stack[ra].clone();
                    let key = rk!(i.get_b());
                    let value = rk!(i.get_c());
                    set_table(l, &t, key, value, ValueSlot::Stack(ra))?;
                }
                OpCode::NewTable => {
                    let narray = float8_decode(i.get_b());
                    let nhash = float8_decode(i.get_c());
                    l.stack[ra] = LuaValue::table(LuaTable::new(narray, nhash));
                }
                OpCode::Self_ => {
                    let b = base + i.get_b() as usize;
                    let obj = l.stack[b].clone();
                    l.stack[ra + 1] = obj.clone();
                    let key = rk!(i.get_c());
                    let v = get_table(l, &obj, &key, ValueSlot::Stack(b))?;
                    l.stack[ra] = v;
                }
                OpCode::Add => arith_op!(i, ra, ArithOp::Add),
                OpCode::Sub => arith_op!(i, ra, ArithOp::Sub),
                OpCode::Mul => arith_op!(i, ra, ArithOp::Mul),
                OpCode::Div => arith_op!(i, ra, ArithOp::Div),
                OpCode::Mod => arith_op!(i, ra, ArithOp::Mod),
                OpCode::Pow => arith_op!(i, ra, ArithOp::Pow),
                OpCode::Unm => {
                    let b = base + i.get_b() as usize;
                    let rb = l.stack[b].clone();
                    let v = match rb {
                        LuaValue::Number(x) => LuaValue::Number(-x),
                        _ => arith(l, ArithOp::Unm, &rb, ValueSlot::Stack(b), &rb, ValueSlot::Stack(b))?,
                    };
                    l.stack[ra] = v;
                }
                OpCode::Not => {
                    let v = l.stack[base + i.get_b() as usize].is_falsy();
                    l.stack[ra] = LuaValue::Boolean(v);
                }
                OpCode::Len => {
                    let b = base + i.get_b() as usize;
                    let rb = l.stack[b].clone();
                    let v = obj_len(l, &rb, ValueSlot::Stack(b))?;
                    l.stack[ra] = v;
                }
                OpCode::Concat => {
                    let b = i.get_b() as usize;
                    let c = i.get_c() as usize;
                    l.top = base + c + 1;
                    concat(l, c - b + 1)?;
                    let v = l.stack[base + b].clone();
                    l.stack[ra] = v;
                    l.top = l.call_stack[ci].top;
                }
                OpCode::Jmp => {
                    let a = i.get_a() as usize;
                    if a > 0 {
                        l.close_upvalues(base + a - 1);
                    }
                    pc = (pc as i64 + i.get_sbx() as i64) as usize;
                }
                OpCode::Eq => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    let eq = match (&rb, &rc) {
                        (LuaValue::Number(x), LuaValue::Number(y)) => x == y,
                        _ => equal_obj(l, &rb, &rc)?,
                    };
                    if eq != (i.get_a() != 0) {
                        pc += 1;
                    } else {
                        do_next_jump!();
                    }
                }
                OpCode::Lt => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    if less_than(l, &rb, &rc)? != (i.get_a() != 0) {
                        pc += 1;
                    } else {
                        do_next_jump!();
                    }
                }
                OpCode::Le => {
                    let rb = rk!(i.get_b());
                    let rc = rk!(i.get_c());
                    if less_equal(l, &rb, &rc)? != (i.get_a() != 0) {
                        pc += 1;
                    } else {
                        do_next_jump!();
                    }
                }
                OpCode::Test => {
                    let falsy = l.stack[ra].is_falsy();
                    let skip = if i.get_c() != 0 { falsy } else { !falsy };
                    if skip {
                        pc += 1;
                    } else {
                        do_next_jump!();
                    }
                }
                OpCode::TestSet => {
                    let rb = l.stack[base + i.get_b() as usize].clone();
                    let falsy = rb.is_falsy();
                    let skip = if i.get_c() != 0 { falsy } else { !falsy };
                    if skip {
                        pc += 1;
                    } else {
                        l.stack[ra] = rb;
                        do_next_jump!();
                    }
                }
                OpCode::Call => {
                    let b = i.get_b() as usize;
                    let nresults = i.get_c() as i32 - 1;
                    if b != 0 {
                        l.top = ra + b;
                    }
                    if precall(l, ra, nresults)? {
                        if nresults >= 0 {
                            l.top = l.call_stack[ci].top;
                        }
                    } else {
                        let callee = l.ci;
                        l.call_stack[callee].call_status |= CIST_REENTRY;
                        continue 'newframe;
                    }
                }
                OpCode::TailCall => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        l.top = ra + b;
                    }
                    if !precall(l, ra, crate::lua_vm::lua_limits::LUA_MULTRET)? {
                        tail_call_frame(l);
                        continue 'newframe;
                    }
                }
                OpCode::Return => {
                    let b = i.get_b() as usize;
                    if b != 0 {
                        l.top = ra + b - 1;
                    }
                    l.close_upvalues(base);
                    let fixed = poscall(l, ra)?;
                    if l.call_stack[ci].call_status & CIST_REENTRY == 0 {
                        return Ok(());
                    }
                    if fixed {
                        l.top = l.call_stack[l.ci].top;
                    }
                    continue 'newframe;
                }
                OpCode::ForLoop => {
                    let step = l.stack[ra + 2].as_number().unwrap_or(0.0);
                    let idx = l.stack[ra].as_number().unwrap_or(0.0) + step;
                    let limit = l.stack[ra + 1].as_number().unwrap_or(0.0);
                    let go_on = if 0.0 < step { idx <= limit } else { limit <= idx };
                    if go_on {
                        pc = (pc as i64 + i.get_sbx() as i64) as usize;
                        l.stack[ra] = LuaValue::Number(idx);
                        l.stack[ra + 3] = LuaValue::Number(idx);
                    }
                }
                OpCode::ForPrep => {
                    for_prep(l, ra)?;
                    pc = (pc as i64 + i.get_sbx() as i64) as usize;
                }
                OpCode::TForCall => {
                    let cb = ra + 3;
                    l.stack[cb + 2] = l.stack[ra + 2].clone();
                    l.stack[cb + 1] = l.stack[ra + 1].clone();
                    l.stack[cb] = l.stack[ra].clone();
                    l.top = cb + 3;
                    call(l, cb, i.get_c() as i32, true)?;
                    l.top = l.call_stack[ci].top;
                    // the TFORLOOP that follows runs without its own dispatch
                    let ni = code[pc];
                    pc += 1;
                    l.call_stack[ci].saved_pc = pc;
                    let ra = base + ni.get_a() as usize;
                    if !l.stack[ra + 1].is_nil() {
                        l.stack[ra] = l.stack[ra + 1].clone();
                        pc = (pc as i64 + ni.get_sbx() as i64) as usize;
                    }
                }
                OpCode::TForLoop => {
                    if !l.stack[ra + 1].is_nil() {
                        l.stack[ra] = l.stack[ra + 1].clone();
                        pc = (pc as i64 + i.get_sbx() as i64) as usize;
                    }
                }
                OpCode::SetList => {
                    let mut n = i.get_b() as usize;
                    let mut c = i.get_c() as usize;
                    if n == 0 {
                        n = l.top - ra - 1;
                    }
                    if c == 0 {
                        c = code[pc].get_ax() as usize;
                        pc += 1;
                    }
                    let LuaValue::Table(h) = l.stack[ra].clone() else {
                        return Err(l.runtime_error("table expected in list constructor"));
                    };
                    let first = (c - 1) * LFIELDS_PER_FLUSH as usize;
                    {
                        let mut t = h.borrow_mut();
                        for j in 1..=n {
                            t.set_int((first + j) as i64, l.stack[ra + j].clone());
                        }
                    }
                    l.top = l.call_stack[ci].top;
                }
                OpCode::Closure => {
                    let p = proto.child_protos[i.get_bx() as usize].clone();
                    let ncl = match cached_closure(l, &p, &cl, base) {
                        Some(c) => c,
                        None => push_closure(l, p, &cl, base),
                    };
                    l.stack[ra] = LuaValue::Function(LuaFunction::Lua(ncl));
                }
                OpCode::VarArg => {
                    let func = l.call_stack[ci].func;
                    let n = base - func - 1 - proto.param_count as usize;
                    let wanted = i.get_b() as i32 - 1;
                    let b = if wanted < 0 {
                        l.check_stack(n)?;
                        l.top = ra + n;
                        n
                    } else {
                        wanted as usize
                    };
                    for j in 0..b {
                        l.stack[ra + j] = if j < n { l.stack[base - n + j].clone() } else { LuaValue::Nil };
                    }
                }
                OpCode::ExtraArg => {
                    return Err(l.runtime_error("unexpected EXTRAARG instruction"));
                }
            }
        }
    }
}

/// Replace the caller frame by the frame `precall` just entered
fn tail_call_frame(l: &mut LuaState) {
    let nci = l.ci;
    let oci = nci - 1;
    let nfunc = l.call_stack[nci].func;
    let ofunc = l.call_stack[oci].func;
    let nbase = l.call_stack[nci].base;
    let nparams = match &l.stack[nfunc] {
        LuaValue::Function(LuaFunction::Lua(c)) => c.proto.param_count as usize,
        _ => 0,
    };
    let lim = nbase + nparams;
    l.close_upvalues(l.call_stack[oci].base);
    let mut aux = 0;
    while nfunc + aux < lim {
        l.stack[ofunc + aux] = std::mem::take(&mut l.stack[nfunc + aux]);
        aux += 1;
    }
    let new_top = ofunc + (l.top - nfunc);
    let saved_pc = l.call_stack[nci].saved_pc;
    let frame = &mut l.call_stack[oci];
    frame.base = ofunc + (nbase - nfunc);
    frame.top = new_top;
    frame.saved_pc = saved_pc;
    frame.call_status |= CIST_TAIL;
    l.top = new_top;
    l.ci = oci;
}

#[cold]
#[inline(never)]
fn for_prep(l: &mut LuaState, ra: usize) -> LuaResult<()> {
    let Some(init) = l.stack[ra].to_number() else {
        return Err(l.runtime_error("'for' initial value must be a number"));
    };
    let Some(limit) = l.stack[ra + 1].to_number() else {
        return Err(l.runtime_error("'for' limit must be a number"));
    };
    let Some(step) = l.stack[ra + 2].to_number() else {
        return Err(l.runtime_error("'for' step must be a number"));
    };
    if step == 0.0 {
        return Err(l.runtime_error("'for' step is zero"));
    }
    l.stack[ra + 1] = LuaValue::Number(limit);
    l.stack[ra + 2] = LuaValue::Number(step);
    l.stack[ra] = LuaValue::Number(init - step);
    Ok(())
}

/// The last closure built from `p`, if its upvalues are the ones a new
/// closure would get
fn cached_closure(l: &LuaState, p: &Chunk, enclosing: &LuaClosure, base: usize) -> Option<Rc<LuaClosure>> {
    let c = p.cache.borrow().upgrade()?;
    {
        let ups = c.upvalues.borrow();
        let enc = enclosing.upvalues.borrow();
        for (idx, desc) in p.upvalue_descs.iter().enumerate() {
            let uv = ups.get(idx)?;
            let same = if desc.in_stack {
                match &*uv.borrow() {
                    LuaUpvalue::Open { thread_id, index, .. } => {
                        *thread_id == l.id && *index == base + desc.index as usize
                    }
                    LuaUpvalue::Closed(_) => false,
                }
            } else {
                enc.get(desc.index as usize).map(|e| Rc::ptr_eq(e, uv)).unwrap_or(false)
            };
            if !same {
                return None;
            }
        }
    }
    Some(c)
}

fn push_closure(l: &mut LuaState, p: Rc<Chunk>, enclosing: &LuaClosure, base: usize) -> Rc<LuaClosure> {
    let mut upvalues = Vec::with_capacity(p.upvalue_descs.len());
    for desc in &p.upvalue_descs {
        let uv = if desc.in_stack {
            l.find_upvalue(base + desc.index as usize)
        } else {
            enclosing.upvalues.borrow()[desc.index as usize].clone()
        };
        upvalues.push(uv);
    }
    let ncl = Rc::new(LuaClosure::new(p.clone(), upvalues));
    *p.cache.borrow_mut() = Rc::downgrade(&ncl);
    ncl
}

/// Line and count hooks before an instruction runs
#[cold]
#[inline(never)]
fn trace_exec(l: &mut LuaState) -> LuaResult<()> {
    let ci = l.ci;
    let mask = l.hook_mask;
    let count_hook = mask & hook_mask::MASK_COUNT != 0 && l.hook_count == 0;
    if count_hook {
        l.hook_count = l.base_hook_count;
    }
    if l.call_stack[ci].call_status & CIST_HOOKYIELD != 0 {
        // resumed after a hook yield: the hook already ran for this instruction
        l.call_stack[ci].call_status &= !CIST_HOOKYIELD;
        return Ok(());
    }
    if count_hook {
        l.run_hook(HookEvent::Count, -1)?;
    }
    if mask & hook_mask::MASK_LINE != 0 {
        if let Some(p) = l.ci_proto(ci) {
            let saved = l.call_stack[ci].saved_pc;
            let npc = saved - 1;
            let new_line = p.line_at(npc);
            if npc == 0 || saved <= l.old_pc || new_line != p.line_at(l.old_pc.wrapping_sub(1)) {
                l.run_hook(HookEvent::Line, new_line)?;
            }
        }
    }
    l.old_pc = l.call_stack[ci].saved_pc;
    if l.status == ThreadStatus::Yield {
        if count_hook {
            l.hook_count = 1;
        }
        let frame = &mut l.call_stack[ci];
        frame.saved_pc -= 1;
        frame.call_status |= CIST_HOOKYIELD;
        frame.func = l.top - 1;
        return Err(LuaError::Yield);
    }
    Ok(())
}

/// Complete the instruction of a Lua frame whose callee finished after a
/// resume
pub(crate) fn finish_op(l: &mut LuaState) {
    let ci = l.ci;
    let Some(p) = l.ci_proto(ci) else {
        return;
    };
    let Some(inst) = p.code.get(l.call_stack[ci].saved_pc.wrapping_sub(1)).copied() else {
        return;
    };
    match inst.get_opcode() {
        OpCode::Call => {
            if inst.get_c() as i32 - 1 >= 0 {
                l.top = l.call_stack[ci].top;
            }
        }
        OpCode::TForCall => {
            l.top = l.call_stack[ci].top;
        }
        _ => {}
    }
}
