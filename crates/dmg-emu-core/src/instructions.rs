//! Opcode decoding.
//!
//! Every opcode byte maps to an [`Instruction`] descriptor that names the
//! operation and its operands. The CPU interprets descriptors with a handful
//! of generic handlers, so e.g. all 64 `LD r, r'` opcodes share one arm.
//! Both opcode spaces are decoded once at compile time into flat tables.

/// 8-bit operand slot, in opcode encoding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R8 {
    B,
    C,
    D,
    E,
    H,
    L,
    /// The byte at address HL.
    HlInd,
    A,
}

impl R8 {
    const fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => R8::B,
            1 => R8::C,
            2 => R8::D,
            3 => R8::E,
            4 => R8::H,
            5 => R8::L,
            6 => R8::HlInd,
            _ => R8::A,
        }
    }

    pub const fn is_memory(self) -> bool {
        matches!(self, R8::HlInd)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16 {
    BC,
    DE,
    HL,
    SP,
}

impl R16 {
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => R16::BC,
            1 => R16::DE,
            2 => R16::HL,
            _ => R16::SP,
        }
    }
}

/// Register pairs as seen by PUSH and POP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16Stack {
    BC,
    DE,
    HL,
    AF,
}

impl R16Stack {
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => R16Stack::BC,
            1 => R16Stack::DE,
            2 => R16Stack::HL,
            _ => R16Stack::AF,
        }
    }
}

/// Indirect addressing through a register pair, with HL post-increment/decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum R16Mem {
    BC,
    DE,
    HLI,
    HLD,
}

impl R16Mem {
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => R16Mem::BC,
            1 => R16Mem::DE,
            2 => R16Mem::HLI,
            _ => R16Mem::HLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    NZ,
    Z,
    NC,
    C,
}

impl Cond {
    const fn from_bits(bits: u8) -> Self {
        match bits & 3 {
            0 => Cond::NZ,
            1 => Cond::Z,
            2 => Cond::NC,
            _ => Cond::C,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Xor,
    Or,
    Cp,
}

impl AluOp {
    const fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => AluOp::Add,
            1 => AluOp::Adc,
            2 => AluOp::Sub,
            3 => AluOp::Sbc,
            4 => AluOp::And,
            5 => AluOp::Xor,
            6 => AluOp::Or,
            _ => AluOp::Cp,
        }
    }
}

/// Rotate and shift group of the 0xCB space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbOp {
    Rlc,
    Rrc,
    Rl,
    Rr,
    Sla,
    Sra,
    Swap,
    Srl,
}

impl CbOp {
    const fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => CbOp::Rlc,
            1 => CbOp::Rrc,
            2 => CbOp::Rl,
            3 => CbOp::Rr,
            4 => CbOp::Sla,
            5 => CbOp::Sra,
            6 => CbOp::Swap,
            _ => CbOp::Srl,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Stop,
    Halt,
    Di,
    Ei,
    Ld8 { dst: R8, src: R8 },
    Ld8Imm(R8),
    Ld16Imm(R16),
    /// LD (r16), A
    LdMemA(R16Mem),
    /// LD A, (r16)
    LdAMem(R16Mem),
    /// LD (a16), SP
    LdAbsSp,
    Inc16(R16),
    Dec16(R16),
    AddHl(R16),
    Inc8(R8),
    Dec8(R8),
    Rlca,
    Rrca,
    Rla,
    Rra,
    Daa,
    Cpl,
    Scf,
    Ccf,
    Jr(Option<Cond>),
    Alu { op: AluOp, src: R8 },
    AluImm(AluOp),
    Ret(Option<Cond>),
    Reti,
    Pop(R16Stack),
    Push(R16Stack),
    Jp(Option<Cond>),
    JpHl,
    Call(Option<Cond>),
    /// Restart to the given vector.
    Rst(u8),
    /// LDH (a8), A
    LdhImmA,
    /// LDH A, (a8)
    LdhAImm,
    /// LDH (C), A
    LdhCA,
    /// LDH A, (C)
    LdhAC,
    LdAbsA,
    LdAAbs,
    AddSpImm,
    LdHlSpImm,
    LdSpHl,
    /// 0xCB; the next byte selects a [`CbInstruction`].
    Prefix,
    Illegal(u8),
}

impl Instruction {
    /// Decode an opcode from the unprefixed space.
    pub const fn decode(op: u8) -> Self {
        let x = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let p = y >> 1;
        let q = y & 1;
        match x {
            0 => match z {
                0 => match y {
                    0 => Instruction::Nop,
                    1 => Instruction::LdAbsSp,
                    2 => Instruction::Stop,
                    3 => Instruction::Jr(None),
                    _ => Instruction::Jr(Some(Cond::from_bits(y - 4))),
                },
                1 => {
                    if q == 0 {
                        Instruction::Ld16Imm(R16::from_bits(p))
                    } else {
                        Instruction::AddHl(R16::from_bits(p))
                    }
                }
                2 => {
                    if q == 0 {
                        Instruction::LdMemA(R16Mem::from_bits(p))
                    } else {
                        Instruction::LdAMem(R16Mem::from_bits(p))
                    }
                }
                3 => {
                    if q == 0 {
                        Instruction::Inc16(R16::from_bits(p))
                    } else {
                        Instruction::Dec16(R16::from_bits(p))
                    }
                }
                4 => Instruction::Inc8(R8::from_bits(y)),
                5 => Instruction::Dec8(R8::from_bits(y)),
                6 => Instruction::Ld8Imm(R8::from_bits(y)),
                _ => match y {
                    0 => Instruction::Rlca,
                    1 => Instruction::Rrca,
                    2 => Instruction::Rla,
                    3 => Instruction::Rra,
                    4 => Instruction::Daa,
                    5 => Instruction::Cpl,
                    6 => Instruction::Scf,
                    _ => Instruction::Ccf,
                },
            },
            1 => {
                if op == 0x76 {
                    Instruction::Halt
                } else {
                    Instruction::Ld8 {
                        dst: R8::from_bits(y),
                        src: R8::from_bits(z),
                    }
                }
            }
            2 => Instruction::Alu {
                op: AluOp::from_bits(y),
                src: R8::from_bits(z),
            },
            _ => match z {
                0 => match y {
                    0..=3 => Instruction::Ret(Some(Cond::from_bits(y))),
                    4 => Instruction::LdhImmA,
                    5 => Instruction::AddSpImm,
                    6 => Instruction::LdhAImm,
                    _ => Instruction::LdHlSpImm,
                },
                1 => {
                    if q == 0 {
                        Instruction::Pop(R16Stack::from_bits(p))
                    } else {
                        match p {
                            0 => Instruction::Ret(None),
                            1 => Instruction::Reti,
                            2 => Instruction::JpHl,
                            _ => Instruction::LdSpHl,
                        }
                    }
                }
                2 => match y {
                    0..=3 => Instruction::Jp(Some(Cond::from_bits(y))),
                    4 => Instruction::LdhCA,
                    5 => Instruction::LdAbsA,
                    6 => Instruction::LdhAC,
                    _ => Instruction::LdAAbs,
                },
                3 => match y {
                    0 => Instruction::Jp(None),
                    1 => Instruction::Prefix,
                    6 => Instruction::Di,
                    7 => Instruction::Ei,
                    _ => Instruction::Illegal(op),
                },
                4 => match y {
                    0..=3 => Instruction::Call(Some(Cond::from_bits(y))),
                    _ => Instruction::Illegal(op),
                },
                5 => {
                    if q == 0 {
                        Instruction::Push(R16Stack::from_bits(p))
                    } else if p == 0 {
                        Instruction::Call(None)
                    } else {
                        Instruction::Illegal(op)
                    }
                }
                6 => Instruction::AluImm(AluOp::from_bits(y)),
                _ => Instruction::Rst(y * 8),
            },
        }
    }

    /// M-cycles consumed as `(not taken, taken)`; the two only differ for
    /// conditional control flow. For [`Instruction::Prefix`] the total comes
    /// from the decoded [`CbInstruction`].
    pub const fn m_cycles(self) -> (u8, u8) {
        let n = match self {
            Instruction::Nop
            | Instruction::Stop
            | Instruction::Halt
            | Instruction::Di
            | Instruction::Ei
            | Instruction::Rlca
            | Instruction::Rrca
            | Instruction::Rla
            | Instruction::Rra
            | Instruction::Daa
            | Instruction::Cpl
            | Instruction::Scf
            | Instruction::Ccf
            | Instruction::JpHl
            | Instruction::Illegal(_) => 1,
            Instruction::Ld8 { dst, src } => {
                if dst.is_memory() || src.is_memory() {
                    2
                } else {
                    1
                }
            }
            Instruction::Ld8Imm(dst) => {
                if dst.is_memory() {
                    3
                } else {
                    2
                }
            }
            Instruction::Inc8(r) | Instruction::Dec8(r) => {
                if r.is_memory() {
                    3
                } else {
                    1
                }
            }
            Instruction::Alu { src, .. } => {
                if src.is_memory() {
                    2
                } else {
                    1
                }
            }
            Instruction::Ld16Imm(_) => 3,
            Instruction::LdMemA(_) | Instruction::LdAMem(_) => 2,
            Instruction::LdAbsSp => 5,
            Instruction::Inc16(_) | Instruction::Dec16(_) | Instruction::AddHl(_) => 2,
            Instruction::AluImm(_) => 2,
            Instruction::Jr(None) => 3,
            Instruction::Jr(Some(_)) => return (2, 3),
            Instruction::Ret(None) | Instruction::Reti => 4,
            Instruction::Ret(Some(_)) => return (2, 5),
            Instruction::Pop(_) => 3,
            Instruction::Push(_) => 4,
            Instruction::Jp(None) => 4,
            Instruction::Jp(Some(_)) => return (3, 4),
            Instruction::Call(None) => 6,
            Instruction::Call(Some(_)) => return (3, 6),
            Instruction::Rst(_) => 4,
            Instruction::LdhImmA | Instruction::LdhAImm => 3,
            Instruction::LdhCA | Instruction::LdhAC => 2,
            Instruction::LdAbsA | Instruction::LdAAbs => 4,
            Instruction::AddSpImm => 4,
            Instruction::LdHlSpImm => 3,
            Instruction::LdSpHl => 2,
            Instruction::Prefix => 2,
        };
        (n, n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbInstruction {
    Shift(CbOp, R8),
    Bit(u8, R8),
    Res(u8, R8),
    Set(u8, R8),
}

impl CbInstruction {
    /// Decode the byte following a 0xCB prefix.
    pub const fn decode(op: u8) -> Self {
        let target = R8::from_bits(op);
        let y = (op >> 3) & 7;
        match op >> 6 {
            0 => CbInstruction::Shift(CbOp::from_bits(y), target),
            1 => CbInstruction::Bit(y, target),
            2 => CbInstruction::Res(y, target),
            _ => CbInstruction::Set(y, target),
        }
    }

    pub const fn target(self) -> R8 {
        match self {
            CbInstruction::Shift(_, r)
            | CbInstruction::Bit(_, r)
            | CbInstruction::Res(_, r)
            | CbInstruction::Set(_, r) => r,
        }
    }

    /// Total M-cycles including the prefix fetch.
    pub const fn m_cycles(self) -> u8 {
        match (self, self.target().is_memory()) {
            (_, false) => 2,
            (CbInstruction::Bit(..), true) => 3,
            (_, true) => 4,
        }
    }
}

const fn build_table() -> [Instruction; 256] {
    let mut table = [Instruction::Nop; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = Instruction::decode(i as u8);
        i += 1;
    }
    table
}

const fn build_cb_table() -> [CbInstruction; 256] {
    let mut table = [CbInstruction::Bit(0, R8::B); 256];
    let mut i = 0;
    while i < 256 {
        table[i] = CbInstruction::decode(i as u8);
        i += 1;
    }
    table
}

pub static OPCODES: [Instruction; 256] = build_table();
pub static CB_OPCODES: [CbInstruction; 256] = build_cb_table();

/// The eleven opcodes with no defined behavior.
pub const ILLEGAL_OPCODES: [u8; 11] = [
    0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exactly_the_undefined_opcodes_are_illegal() {
        let illegal: Vec<u8> = (0..=255u8)
            .filter(|&op| matches!(OPCODES[op as usize], Instruction::Illegal(_)))
            .collect();
        assert_eq!(illegal, ILLEGAL_OPCODES);
    }

    #[test]
    fn spot_check_decode() {
        assert_eq!(OPCODES[0x00], Instruction::Nop);
        assert_eq!(OPCODES[0x08], Instruction::LdAbsSp);
        assert_eq!(OPCODES[0x10], Instruction::Stop);
        assert_eq!(OPCODES[0x20], Instruction::Jr(Some(Cond::NZ)));
        assert_eq!(OPCODES[0x22], Instruction::LdMemA(R16Mem::HLI));
        assert_eq!(OPCODES[0x3A], Instruction::LdAMem(R16Mem::HLD));
        assert_eq!(OPCODES[0x39], Instruction::AddHl(R16::SP));
        assert_eq!(OPCODES[0x34], Instruction::Inc8(R8::HlInd));
        assert_eq!(OPCODES[0x27], Instruction::Daa);
        assert_eq!(
            OPCODES[0x41],
            Instruction::Ld8 {
                dst: R8::B,
                src: R8::C
            }
        );
        assert_eq!(OPCODES[0x76], Instruction::Halt);
        assert_eq!(
            OPCODES[0xAE],
            Instruction::Alu {
                op: AluOp::Xor,
                src: R8::HlInd
            }
        );
        assert_eq!(OPCODES[0xC9], Instruction::Ret(None));
        assert_eq!(OPCODES[0xD9], Instruction::Reti);
        assert_eq!(OPCODES[0xE8], Instruction::AddSpImm);
        assert_eq!(OPCODES[0xF1], Instruction::Pop(R16Stack::AF));
        assert_eq!(OPCODES[0xF8], Instruction::LdHlSpImm);
        assert_eq!(OPCODES[0xE2], Instruction::LdhCA);
        assert_eq!(OPCODES[0xFA], Instruction::LdAAbs);
        assert_eq!(OPCODES[0xCB], Instruction::Prefix);
        assert_eq!(OPCODES[0xCD], Instruction::Call(None));
        assert_eq!(OPCODES[0xFE], Instruction::AluImm(AluOp::Cp));
        assert_eq!(OPCODES[0xFF], Instruction::Rst(0x38));
    }

    #[test]
    fn cb_space_is_structural() {
        assert_eq!(CB_OPCODES[0x00], CbInstruction::Shift(CbOp::Rlc, R8::B));
        assert_eq!(CB_OPCODES[0x37], CbInstruction::Shift(CbOp::Swap, R8::A));
        assert_eq!(CB_OPCODES[0x7E], CbInstruction::Bit(7, R8::HlInd));
        assert_eq!(CB_OPCODES[0x86], CbInstruction::Res(0, R8::HlInd));
        assert_eq!(CB_OPCODES[0xFF], CbInstruction::Set(7, R8::A));
    }

    #[test]
    fn cycle_costs() {
        assert_eq!(OPCODES[0x00].m_cycles(), (1, 1));
        assert_eq!(OPCODES[0x08].m_cycles(), (5, 5));
        assert_eq!(OPCODES[0x36].m_cycles(), (3, 3));
        assert_eq!(OPCODES[0x20].m_cycles(), (2, 3));
        assert_eq!(OPCODES[0xC0].m_cycles(), (2, 5));
        assert_eq!(OPCODES[0xC4].m_cycles(), (3, 6));
        assert_eq!(OPCODES[0xCD].m_cycles(), (6, 6));
        assert_eq!(OPCODES[0xF5].m_cycles(), (4, 4));
        assert_eq!(CB_OPCODES[0x11].m_cycles(), 2);
        assert_eq!(CB_OPCODES[0x46].m_cycles(), 3);
        assert_eq!(CB_OPCODES[0xC6].m_cycles(), 4);
    }
}
