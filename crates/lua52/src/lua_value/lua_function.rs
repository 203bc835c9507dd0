// Functions: compiled prototypes, closures and upvalues.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::{CFunction, LuaString, LuaValue};
use crate::lua_vm::{Instruction, LuaState};

/// Debug record of a local variable: active in `[start_pc, end_pc)`
#[derive(Debug, Clone, PartialEq)]
pub struct LocVar {
    pub name: Option<LuaString>,
    pub start_pc: u32,
    pub end_pc: u32,
}

/// How a closure finds an upvalue when it is created
#[derive(Debug, Clone, PartialEq)]
pub struct UpvalueDesc {
    pub name: Option<LuaString>,
    /// Captures a register of the enclosing function (otherwise one of its upvalues)
    pub in_stack: bool,
    pub index: u8,
}

/// A compiled function prototype. Immutable after construction except for the
/// closure cache.
#[derive(Debug, Default)]
pub struct Chunk {
    pub code: Vec<Instruction>,
    pub constants: Vec<LuaValue>,
    pub child_protos: Vec<Rc<Chunk>>,
    /// Source line of each instruction
    pub line_info: Vec<i32>,
    pub locals: Vec<LocVar>,
    pub upvalue_descs: Vec<UpvalueDesc>,
    pub source: Option<LuaString>,
    pub line_defined: i32,
    pub last_line_defined: i32,
    pub param_count: u8,
    pub is_vararg: u8,
    pub max_stack_size: u8,
    /// Last closure built from this prototype
    pub(crate) cache: RefCell<Weak<LuaClosure>>,
}

impl Chunk {
    /// Name of the `local_number`-th local active at `pc` (1-based)
    pub fn local_name(&self, mut local_number: usize, pc: usize) -> Option<&LuaString> {
        for var in &self.locals {
            if var.start_pc as usize > pc {
                break;
            }
            if pc < var.end_pc as usize {
                local_number -= 1;
                if local_number == 0 {
                    return var.name.as_ref();
                }
            }
        }
        None
    }

    pub fn source_name(&self) -> &[u8] {
        match &self.source {
            Some(s) => s.as_bytes(),
            None => b"=?",
        }
    }

    pub fn line_at(&self, pc: usize) -> i32 {
        self.line_info.get(pc).copied().unwrap_or(-1)
    }
}

/// State of a captured variable
pub enum LuaUpvalue {
    /// Still lives in a stack slot of its thread
    Open {
        thread_id: u64,
        thread: Weak<RefCell<LuaState>>,
        index: usize,
    },
    /// Owns its value
    Closed(LuaValue),
}

pub type UpvalueRef = Rc<RefCell<LuaUpvalue>>;

impl LuaUpvalue {
    pub fn is_open(&self) -> bool {
        matches!(self, LuaUpvalue::Open { .. })
    }

    pub fn stack_index(&self) -> Option<usize> {
        match self {
            LuaUpvalue::Open { index, .. } => Some(*index),
            LuaUpvalue::Closed(_) => None,
        }
    }
}

/// Closure over a prototype
pub struct LuaClosure {
    pub proto: Rc<Chunk>,
    pub upvalues: RefCell<Vec<UpvalueRef>>,
}

impl LuaClosure {
    pub fn new(proto: Rc<Chunk>, upvalues: Vec<UpvalueRef>) -> Self {
        LuaClosure {
            proto,
            upvalues: RefCell::new(upvalues),
        }
    }

    #[inline(always)]
    pub fn upvalue(&self, i: usize) -> Option<UpvalueRef> {
        self.upvalues.borrow().get(i).cloned()
    }
}

/// Host function with captured values
pub struct RustClosure {
    pub func: CFunction,
    pub upvalues: RefCell<Vec<LuaValue>>,
}

#[derive(Clone)]
pub enum LuaFunction {
    Lua(Rc<LuaClosure>),
    Rust(Rc<RustClosure>),
    /// Plain host function without upvalues
    Light(CFunction),
}

impl LuaFunction {
    pub fn pointer(&self) -> usize {
        match self {
            LuaFunction::Lua(c) => Rc::as_ptr(c) as *const u8 as usize,
            LuaFunction::Rust(c) => Rc::as_ptr(c) as *const u8 as usize,
            LuaFunction::Light(f) => *f as usize,
        }
    }

    pub fn is_lua(&self) -> bool {
        matches!(self, LuaFunction::Lua(_))
    }

    pub fn proto(&self) -> Option<&Rc<Chunk>> {
        match self {
            LuaFunction::Lua(c) => Some(&c.proto),
            _ => None,
        }
    }
}

impl PartialEq for LuaFunction {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LuaFunction::Lua(a), LuaFunction::Lua(b)) => Rc::ptr_eq(a, b),
            (LuaFunction::Rust(a), LuaFunction::Rust(b)) => Rc::ptr_eq(a, b),
            (LuaFunction::Light(a), LuaFunction::Light(b)) => *a as usize == *b as usize,
            _ => false,
        }
    }
}
