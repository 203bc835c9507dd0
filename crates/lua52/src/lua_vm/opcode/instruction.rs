/*----------------------------------------------------------------------
  Instruction encoding

  All instructions are unsigned 32-bit integers with the opcode in the
  low 6 bits.

        3 3 2 2 2 2 2 2 2 2 2 2 1 1 1 1 1 1 1 1 1 1 0 0 0 0 0 0 0 0 0 0
        1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0 9 8 7 6 5 4 3 2 1 0
  iABC        B(9)       |       C(9)        |     A(8)      |  Op(6)    |
  iABx                Bx(18)                 |     A(8)      |  Op(6)    |
  iAsBx              sBx(18)                 |     A(8)      |  Op(6)    |
  iAx                           Ax(26)                       |  Op(6)    |

  sBx is stored in excess-K form with K = MAX_BX >> 1.
  The top bit of a 9-bit B or C marks a constant index (RK operand).
----------------------------------------------------------------------*/

use super::OpCode;

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Instruction(u32);

impl Instruction {
    #[inline(always)]
    pub const fn from_u32(value: u32) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    pub const SIZE_OP: u32 = 6;
    pub const SIZE_A: u32 = 8;
    pub const SIZE_B: u32 = 9;
    pub const SIZE_C: u32 = 9;
    pub const SIZE_BX: u32 = Self::SIZE_B + Self::SIZE_C; // 18
    pub const SIZE_AX: u32 = Self::SIZE_BX + Self::SIZE_A; // 26

    pub const POS_OP: u32 = 0;
    pub const POS_A: u32 = Self::POS_OP + Self::SIZE_OP;
    pub const POS_C: u32 = Self::POS_A + Self::SIZE_A;
    pub const POS_B: u32 = Self::POS_C + Self::SIZE_C;
    pub const POS_BX: u32 = Self::POS_C;
    pub const POS_AX: u32 = Self::POS_A;

    pub const MAX_A: u32 = (1 << Self::SIZE_A) - 1;
    pub const MAX_B: u32 = (1 << Self::SIZE_B) - 1;
    pub const MAX_C: u32 = (1 << Self::SIZE_C) - 1;
    pub const MAX_BX: u32 = (1 << Self::SIZE_BX) - 1;
    pub const MAX_SBX: i32 = (Self::MAX_BX >> 1) as i32;
    pub const MAX_AX: u32 = (1 << Self::SIZE_AX) - 1;

    /// Marks an RK operand as a constant index
    pub const BITRK: u32 = 1 << (Self::SIZE_B - 1);
    /// Largest constant index that fits in an RK operand
    pub const MAX_INDEX_RK: u32 = Self::BITRK - 1;
    /// "No register" marker used by the code generator
    pub const NO_REG: u32 = Self::MAX_A;

    #[inline(always)]
    const fn mask1(n: u32, p: u32) -> u32 {
        (!((!0u32) << n)) << p
    }

    #[inline(always)]
    fn get_arg(self, pos: u32, size: u32) -> u32 {
        (self.0 >> pos) & Self::mask1(size, 0)
    }

    #[inline(always)]
    fn set_arg(&mut self, v: u32, pos: u32, size: u32) {
        let mask = Self::mask1(size, pos);
        self.0 = (self.0 & !mask) | ((v << pos) & mask);
    }

    #[inline(always)]
    pub fn raw_opcode(self) -> u8 {
        self.get_arg(Self::POS_OP, Self::SIZE_OP) as u8
    }

    /// Decoded opcode. Instructions are validated when a chunk is built or
    /// loaded, so an out-of-range opcode only shows up in hand-made code and
    /// decodes as EXTRAARG, which the engine never executes directly.
    #[inline(always)]
    pub fn get_opcode(self) -> OpCode {
        OpCode::from_u8(self.raw_opcode()).unwrap_or(OpCode::ExtraArg)
    }

    #[inline(always)]
    pub fn set_opcode(&mut self, op: OpCode) {
        self.set_arg(op as u32, Self::POS_OP, Self::SIZE_OP);
    }

    #[inline(always)]
    pub fn get_a(self) -> u32 {
        self.get_arg(Self::POS_A, Self::SIZE_A)
    }

    #[inline(always)]
    pub fn set_a(&mut self, v: u32) {
        self.set_arg(v, Self::POS_A, Self::SIZE_A);
    }

    #[inline(always)]
    pub fn get_b(self) -> u32 {
        self.get_arg(Self::POS_B, Self::SIZE_B)
    }

    #[inline(always)]
    pub fn set_b(&mut self, v: u32) {
        self.set_arg(v, Self::POS_B, Self::SIZE_B);
    }

    #[inline(always)]
    pub fn get_c(self) -> u32 {
        self.get_arg(Self::POS_C, Self::SIZE_C)
    }

    #[inline(always)]
    pub fn set_c(&mut self, v: u32) {
        self.set_arg(v, Self::POS_C, Self::SIZE_C);
    }

    #[inline(always)]
    pub fn get_bx(self) -> u32 {
        self.get_arg(Self::POS_BX, Self::SIZE_BX)
    }

    #[inline(always)]
    pub fn set_bx(&mut self, v: u32) {
        self.set_arg(v, Self::POS_BX, Self::SIZE_BX);
    }

    #[inline(always)]
    pub fn get_sbx(self) -> i32 {
        self.get_bx() as i32 - Self::MAX_SBX
    }

    #[inline(always)]
    pub fn set_sbx(&mut self, v: i32) {
        self.set_bx((v + Self::MAX_SBX) as u32);
    }

    #[inline(always)]
    pub fn get_ax(self) -> u32 {
        self.get_arg(Self::POS_AX, Self::SIZE_AX)
    }

    #[inline(always)]
    pub fn set_ax(&mut self, v: u32) {
        self.set_arg(v, Self::POS_AX, Self::SIZE_AX);
    }

    pub fn create_abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        Self(
            ((op as u32) << Self::POS_OP)
                | (a << Self::POS_A)
                | (b << Self::POS_B)
                | (c << Self::POS_C),
        )
    }

    pub fn create_abx(op: OpCode, a: u32, bx: u32) -> Self {
        Self(((op as u32) << Self::POS_OP) | (a << Self::POS_A) | (bx << Self::POS_BX))
    }

    pub fn create_asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::create_abx(op, a, (sbx + Self::MAX_SBX) as u32)
    }

    pub fn create_ax(op: OpCode, ax: u32) -> Self {
        Self(((op as u32) << Self::POS_OP) | (ax << Self::POS_AX))
    }

    /// Does this RK operand name a constant?
    #[inline(always)]
    pub const fn is_k(x: u32) -> bool {
        x & Self::BITRK != 0
    }

    /// Constant index of an RK operand
    #[inline(always)]
    pub const fn index_k(x: u32) -> u32 {
        x & !Self::BITRK
    }

    /// Encode a constant index as an RK operand
    #[inline(always)]
    pub const fn rk_as_k(x: u32) -> u32 {
        x | Self::BITRK
    }
}

/// Encode a size hint as a "floating point byte": (eeeeexxx), where the
/// real value is (1xxx) * 2^(eeeee - 1) if eeeee != 0 and (xxx) otherwise.
pub fn float8_encode(mut x: u32) -> u32 {
    let mut e = 0;
    if x < 8 {
        return x;
    }
    while x >= 0x10 {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Decode a "floating point byte" size hint
pub fn float8_decode(x: u32) -> usize {
    let e = (x >> 3) & 0x1f;
    if e == 0 {
        x as usize
    } else {
        (((x & 7) + 8) as usize) << (e - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abc_fields() {
        let i = Instruction::create_abc(OpCode::Add, 3, Instruction::rk_as_k(7), 300);
        assert_eq!(i.get_opcode(), OpCode::Add);
        assert_eq!(i.get_a(), 3);
        assert!(Instruction::is_k(i.get_b()));
        assert_eq!(Instruction::index_k(i.get_b()), 7);
        assert_eq!(i.get_c(), 300);
        assert!(Instruction::is_k(i.get_c()));
    }

    #[test]
    fn test_signed_bx() {
        let mut i = Instruction::create_asbx(OpCode::Jmp, 0, -5);
        assert_eq!(i.get_sbx(), -5);
        i.set_sbx(Instruction::MAX_SBX);
        assert_eq!(i.get_sbx(), Instruction::MAX_SBX);
        i.set_a(2);
        assert_eq!(i.get_a(), 2);
        assert_eq!(i.get_opcode(), OpCode::Jmp);
        // a zero offset jump encodes Bx = MAX_SBX
        assert_eq!(Instruction::create_asbx(OpCode::Jmp, 0, 0).get_bx(), 131071);
    }

    #[test]
    fn test_ax_field() {
        let i = Instruction::create_ax(OpCode::ExtraArg, Instruction::MAX_AX);
        assert_eq!(i.get_ax(), Instruction::MAX_AX);
        assert_eq!(i.get_opcode(), OpCode::ExtraArg);
    }

    #[test]
    fn test_float8() {
        for x in 0..8 {
            assert_eq!(float8_encode(x), x);
            assert_eq!(float8_decode(x), x as usize);
        }
        // encoding rounds up, decoding never returns less than the hint
        for x in [8u32, 9, 17, 50, 100, 1000, 65536] {
            let fb = float8_encode(x);
            assert!(fb < 256);
            assert!(float8_decode(fb) >= x as usize);
        }
        assert_eq!(float8_decode(0x10), 16);
    }
}
