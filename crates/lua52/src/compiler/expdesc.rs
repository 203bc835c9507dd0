/// Expression descriptor - tracks expression evaluation state so code is
/// generated lazily and constants can still be folded or used as RK
/// operands.

/// No jump in a patch list
pub const NO_JUMP: i32 = -1;

/// Expression kind - determines how the expression value is represented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpKind {
    /// No value (empty expression list)
    VVoid,
    VNil,
    VTrue,
    VFalse,
    /// Constant in the constant table (info = constant index)
    VK,
    /// Number literal (nval = value)
    VKNum,
    /// Value in a fixed register (info = register)
    VNonReloc,
    /// Local variable (info = register)
    VLocal,
    /// Upvalue (info = upvalue index)
    VUpval,
    /// Indexed variable (ind)
    VIndexed,
    /// Comparison or test (info = pc of its jump)
    VJmp,
    /// Result can go to any register (info = pc of the instruction)
    VReloc,
    /// Function call (info = pc of the CALL)
    VCall,
    /// Vararg expression (info = pc of the VARARG)
    VVararg,
}

/// Table and key of an indexed expression
#[derive(Debug, Clone, Copy)]
pub struct IndexInfo {
    /// Table register or upvalue index
    pub t: i32,
    /// Key as an RK operand
    pub idx: i32,
    /// Whether `t` is a register (`VLocal`) or an upvalue (`VUpval`)
    pub vt: ExpKind,
}

#[derive(Debug, Clone, Copy)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Generic info field - meaning depends on kind
    pub info: i32,
    pub ind: IndexInfo,
    pub nval: f64,
    /// Patch list of 'exit when true'
    pub t: i32,
    /// Patch list of 'exit when false'
    pub f: i32,
}

impl ExpDesc {
    pub fn new(kind: ExpKind, info: i32) -> Self {
        ExpDesc {
            kind,
            info,
            ind: IndexInfo {
                t: 0,
                idx: 0,
                vt: ExpKind::VLocal,
            },
            nval: 0.0,
            t: NO_JUMP,
            f: NO_JUMP,
        }
    }

    pub fn void() -> Self {
        Self::new(ExpKind::VVoid, 0)
    }

    pub fn number(n: f64) -> Self {
        let mut e = Self::new(ExpKind::VKNum, 0);
        e.nval = n;
        e
    }

    #[inline]
    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// Number literal with no pending jumps
    #[inline]
    pub fn is_numeral(&self) -> bool {
        self.kind == ExpKind::VKNum && self.t == NO_JUMP && self.f == NO_JUMP
    }

    /// Can appear on the left side of an assignment
    pub fn is_var(&self) -> bool {
        matches!(self.kind, ExpKind::VLocal | ExpKind::VUpval | ExpKind::VIndexed)
    }

    /// Produces a variable number of values
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExpKind::VCall | ExpKind::VVararg)
    }
}
