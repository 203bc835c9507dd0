mod instruction;

pub use instruction::{Instruction, float8_decode, float8_encode};

/// Instruction format modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How an instruction uses its B or C argument
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMask {
    /// Argument is not used
    N,
    /// Argument is used, but is not a register or constant
    U,
    /// Argument is a register or a jump offset
    R,
    /// Argument is a constant or register/constant
    K,
}

/// The 40 opcodes of the instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0, // R[A] := R[B]
    LoadK,    // R[A] := K[Bx]
    LoadKx,   // R[A] := K[extra arg]
    LoadBool, // R[A] := (Bool)B; if (C) pc++
    LoadNil,  // R[A], R[A+1], ..., R[A+B] := nil

    GetUpval, // R[A] := UpValue[B]
    GetTabUp, // R[A] := UpValue[B][RK(C)]
    GetTable, // R[A] := R[B][RK(C)]

    SetTabUp, // UpValue[A][RK(B)] := RK(C)
    SetUpval, // UpValue[B] := R[A]
    SetTable, // R[A][RK(B)] := RK(C)

    NewTable, // R[A] := {} (size = B,C)

    Self_, // R[A+1] := R[B]; R[A] := R[B][RK(C)]

    Add, // R[A] := RK(B) + RK(C)
    Sub, // R[A] := RK(B) - RK(C)
    Mul, // R[A] := RK(B) * RK(C)
    Div, // R[A] := RK(B) / RK(C)
    Mod, // R[A] := RK(B) % RK(C)
    Pow, // R[A] := RK(B) ^ RK(C)
    Unm, // R[A] := -R[B]
    Not, // R[A] := not R[B]
    Len, // R[A] := length of R[B]

    Concat, // R[A] := R[B].. ... ..R[C]

    Jmp, // pc+=sBx; if (A) close all upvalues >= R[A - 1]
    Eq,  // if ((RK(B) == RK(C)) ~= A) then pc++
    Lt,  // if ((RK(B) <  RK(C)) ~= A) then pc++
    Le,  // if ((RK(B) <= RK(C)) ~= A) then pc++

    Test,    // if not (R[A] <=> C) then pc++
    TestSet, // if (R[B] <=> C) then R[A] := R[B] else pc++

    Call,     // R[A], ... ,R[A+C-2] := R[A](R[A+1], ... ,R[A+B-1])
    TailCall, // return R[A](R[A+1], ... ,R[A+B-1])
    Return,   // return R[A], ... ,R[A+B-2]

    ForLoop, // R[A]+=R[A+2]; if R[A] <?= R[A+1] then { pc+=sBx; R[A+3]=R[A] }
    ForPrep, // R[A]-=R[A+2]; pc+=sBx

    TForCall, // R[A+3], ... ,R[A+2+C] := R[A](R[A+1], R[A+2])
    TForLoop, // if R[A+1] ~= nil then { R[A]=R[A+1]; pc += sBx }

    SetList, // R[A][(C-1)*FPF+i] := R[A+i], 1 <= i <= B

    Closure, // R[A] := closure(KPROTO[Bx])

    VarArg, // R[A], R[A+1], ..., R[A+B-2] = vararg

    ExtraArg, // extra (larger) argument for previous opcode
}

pub const NUM_OPCODES: usize = 40;

struct OpModeInfo {
    test: bool,
    set_a: bool,
    b: OpArgMask,
    c: OpArgMask,
    mode: OpMode,
}

const fn opmode(test: bool, set_a: bool, b: OpArgMask, c: OpArgMask, mode: OpMode) -> OpModeInfo {
    OpModeInfo {
        test,
        set_a,
        b,
        c,
        mode,
    }
}

use OpArgMask::{K, N, R, U};
use OpMode::{IABC, IABx, IAsBx, IAx};

//                                  T      A      B  C  mode
const OP_MODES: [OpModeInfo; NUM_OPCODES] = [
    opmode(false, true, R, N, IABC),   // MOVE
    opmode(false, true, K, N, IABx),   // LOADK
    opmode(false, true, N, N, IABx),   // LOADKX
    opmode(false, true, U, U, IABC),   // LOADBOOL
    opmode(false, true, U, N, IABC),   // LOADNIL
    opmode(false, true, U, N, IABC),   // GETUPVAL
    opmode(false, true, U, K, IABC),   // GETTABUP
    opmode(false, true, R, K, IABC),   // GETTABLE
    opmode(false, false, K, K, IABC),  // SETTABUP
    opmode(false, false, U, N, IABC),  // SETUPVAL
    opmode(false, false, K, K, IABC),  // SETTABLE
    opmode(false, true, U, U, IABC),   // NEWTABLE
    opmode(false, true, R, K, IABC),   // SELF
    opmode(false, true, K, K, IABC),   // ADD
    opmode(false, true, K, K, IABC),   // SUB
    opmode(false, true, K, K, IABC),   // MUL
    opmode(false, true, K, K, IABC),   // DIV
    opmode(false, true, K, K, IABC),   // MOD
    opmode(false, true, K, K, IABC),   // POW
    opmode(false, true, R, N, IABC),   // UNM
    opmode(false, true, R, N, IABC),   // NOT
    opmode(false, true, R, N, IABC),   // LEN
    opmode(false, true, R, R, IABC),   // CONCAT
    opmode(false, false, R, N, IAsBx), // JMP
    opmode(true, false, K, K, IABC),   // EQ
    opmode(true, false, K, K, IABC),   // LT
    opmode(true, false, K, K, IABC),   // LE
    opmode(true, false, N, U, IABC),   // TEST
    opmode(true, true, R, U, IABC),    // TESTSET
    opmode(false, true, U, U, IABC),   // CALL
    opmode(false, true, U, U, IABC),   // TAILCALL
    opmode(false, false, U, N, IABC),  // RETURN
    opmode(false, true, R, N, IAsBx),  // FORLOOP
    opmode(false, true, R, N, IAsBx),  // FORPREP
    opmode(false, false, N, U, IABC),  // TFORCALL
    opmode(false, true, R, N, IAsBx),  // TFORLOOP
    opmode(false, false, U, U, IABC),  // SETLIST
    opmode(false, true, U, N, IABx),   // CLOSURE
    opmode(false, true, U, N, IABC),   // VARARG
    opmode(false, false, U, U, IAx),   // EXTRAARG
];

pub const ALL_OPCODES: [OpCode; NUM_OPCODES] = {
    use OpCode::*;
    [
        Move, LoadK, LoadKx, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp, SetUpval,
        SetTable, NewTable, Self_, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len, Concat, Jmp, Eq,
        Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep, TForCall, TForLoop,
        SetList, Closure, VarArg, ExtraArg,
    ]
};

const OPCODE_NAMES: [&str; NUM_OPCODES] = [
    "MOVE", "LOADK", "LOADKX", "LOADBOOL", "LOADNIL", "GETUPVAL", "GETTABUP", "GETTABLE",
    "SETTABUP", "SETUPVAL", "SETTABLE", "NEWTABLE", "SELF", "ADD", "SUB", "MUL", "DIV", "MOD",
    "POW", "UNM", "NOT", "LEN", "CONCAT", "JMP", "EQ", "LT", "LE", "TEST", "TESTSET", "CALL",
    "TAILCALL", "RETURN", "FORLOOP", "FORPREP", "TFORCALL", "TFORLOOP", "SETLIST", "CLOSURE",
    "VARARG", "EXTRAARG",
];

impl OpCode {
    /// Decode an opcode number; `None` for values outside the instruction set.
    #[inline(always)]
    pub fn from_u8(byte: u8) -> Option<Self> {
        ALL_OPCODES.get(byte as usize).copied()
    }

    #[inline(always)]
    fn info(self) -> &'static OpModeInfo {
        &OP_MODES[self as usize]
    }

    /// Instruction layout
    pub fn get_mode(self) -> OpMode {
        self.info().mode
    }

    /// How argument B is used
    pub fn b_mode(self) -> OpArgMask {
        self.info().b
    }

    /// How argument C is used
    pub fn c_mode(self) -> OpArgMask {
        self.info().c
    }

    /// Whether the instruction writes register A
    pub fn sets_a(self) -> bool {
        self.info().set_a
    }

    /// Test instructions are always followed by a jump
    pub fn is_test(self) -> bool {
        self.info().test
    }

    pub fn name(self) -> &'static str {
        OPCODE_NAMES[self as usize]
    }
}

impl std::fmt::Display for OpCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_numbering() {
        assert_eq!(OpCode::Move as u8, 0);
        assert_eq!(OpCode::Self_ as u8, 12);
        assert_eq!(OpCode::Jmp as u8, 23);
        assert_eq!(OpCode::Return as u8, 31);
        assert_eq!(OpCode::ExtraArg as u8, 39);
        for (i, op) in ALL_OPCODES.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(OpCode::from_u8(i as u8), Some(*op));
        }
        assert_eq!(OpCode::from_u8(40), None);
    }

    #[test]
    fn test_mode_table() {
        assert_eq!(OpCode::LoadK.get_mode(), OpMode::IABx);
        assert_eq!(OpCode::Jmp.get_mode(), OpMode::IAsBx);
        assert_eq!(OpCode::ExtraArg.get_mode(), OpMode::IAx);
        assert!(OpCode::Eq.is_test());
        assert!(OpCode::TestSet.is_test() && OpCode::TestSet.sets_a());
        assert!(!OpCode::SetTable.sets_a());
        assert_eq!(OpCode::Add.b_mode(), OpArgMask::K);
        assert_eq!(OpCode::Concat.c_mode(), OpArgMask::R);
        assert_eq!(OpCode::TForCall.b_mode(), OpArgMask::N);
    }
}
