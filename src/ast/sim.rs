//! This module is used for holding simulation instructions ([`SimInstr`]),
//! which are instructions that directly map to machine code words.
//!
//! Decoding follows the PDP-11 opcode layout: bit 15 selects byte/word for the
//! operand instructions, bits 14..12 select the double operand group, and the
//! remaining groups are picked apart by the bits that follow.

use super::{Operand, Reg, Size};

/// A branch condition.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Cond {
    /// `BR`: always
    Always,
    /// `BNE`: Z = 0
    Ne,
    /// `BEQ`: Z = 1
    Eq,
    /// `BGE`: N ^ V = 0
    Ge,
    /// `BLT`: N ^ V = 1
    Lt,
    /// `BGT`: Z | (N ^ V) = 0
    Gt,
    /// `BLE`: Z | (N ^ V) = 1
    Le,
    /// `BPL`: N = 0
    Pl,
    /// `BMI`: N = 1
    Mi,
    /// `BHI`: C | Z = 0
    Hi,
    /// `BLOS`: C | Z = 1
    Los,
    /// `BVC`: V = 0
    Vc,
    /// `BVS`: V = 1
    Vs,
    /// `BCC` (also `BHIS`): C = 0
    Cc,
    /// `BCS` (also `BLO`): C = 1
    Cs,
}
impl Cond {
    /// Decodes bits 15 and 10..8 of a branch instruction.
    fn decode(word: u16) -> Option<Self> {
        let index = ((word >> 12) & 0o10) | ((word >> 8) & 0o7);
        let cond = match index {
            0o01 => Cond::Always,
            0o02 => Cond::Ne,
            0o03 => Cond::Eq,
            0o04 => Cond::Ge,
            0o05 => Cond::Lt,
            0o06 => Cond::Gt,
            0o07 => Cond::Le,
            0o10 => Cond::Pl,
            0o11 => Cond::Mi,
            0o12 => Cond::Hi,
            0o13 => Cond::Los,
            0o14 => Cond::Vc,
            0o15 => Cond::Vs,
            0o16 => Cond::Cc,
            0o17 => Cond::Cs,
            _ => return None
        };
        Some(cond)
    }

    /// Tests the condition against the `NZVC` bits (bits 3..0 of the PSW).
    pub fn holds(self, cc: u16) -> bool {
        let n = cc & 0o10 != 0;
        let z = cc & 0o4 != 0;
        let v = cc & 0o2 != 0;
        let c = cc & 0o1 != 0;

        match self {
            Cond::Always => true,
            Cond::Ne  => !z,
            Cond::Eq  => z,
            Cond::Ge  => n == v,
            Cond::Lt  => n != v,
            Cond::Gt  => !z && n == v,
            Cond::Le  => z || n != v,
            Cond::Pl  => !n,
            Cond::Mi  => n,
            Cond::Hi  => !c && !z,
            Cond::Los => c || z,
            Cond::Vc  => !v,
            Cond::Vs  => v,
            Cond::Cc  => !c,
            Cond::Cs  => c,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Cond::Always => "BR",
            Cond::Ne  => "BNE",
            Cond::Eq  => "BEQ",
            Cond::Ge  => "BGE",
            Cond::Lt  => "BLT",
            Cond::Gt  => "BGT",
            Cond::Le  => "BLE",
            Cond::Pl  => "BPL",
            Cond::Mi  => "BMI",
            Cond::Hi  => "BHI",
            Cond::Los => "BLOS",
            Cond::Vc  => "BVC",
            Cond::Vs  => "BVS",
            Cond::Cc  => "BCC",
            Cond::Cs  => "BCS",
        }
    }
}

/// Single operand instructions (`0050DD`-`0063DD` and their byte forms).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum SingleOp {
    Clr, Com, Inc, Dec, Neg, Adc, Sbc, Tst, Ror, Rol, Asr, Asl
}
impl SingleOp {
    fn decode(word: u16) -> Option<Self> {
        let op = match (word >> 6) & 0o77 {
            0o50 => SingleOp::Clr,
            0o51 => SingleOp::Com,
            0o52 => SingleOp::Inc,
            0o53 => SingleOp::Dec,
            0o54 => SingleOp::Neg,
            0o55 => SingleOp::Adc,
            0o56 => SingleOp::Sbc,
            0o57 => SingleOp::Tst,
            0o60 => SingleOp::Ror,
            0o61 => SingleOp::Rol,
            0o62 => SingleOp::Asr,
            0o63 => SingleOp::Asl,
            _ => return None
        };
        Some(op)
    }
    fn mnemonic(self) -> &'static str {
        match self {
            SingleOp::Clr => "CLR",
            SingleOp::Com => "COM",
            SingleOp::Inc => "INC",
            SingleOp::Dec => "DEC",
            SingleOp::Neg => "NEG",
            SingleOp::Adc => "ADC",
            SingleOp::Sbc => "SBC",
            SingleOp::Tst => "TST",
            SingleOp::Ror => "ROR",
            SingleOp::Rol => "ROL",
            SingleOp::Asr => "ASR",
            SingleOp::Asl => "ASL",
        }
    }
}

/// Double operand instructions (`01SSDD`-`16SSDD`).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum DoubleOp {
    Mov, Cmp, Bit, Bic, Bis, Add, Sub
}
impl DoubleOp {
    fn mnemonic(self) -> &'static str {
        match self {
            DoubleOp::Mov => "MOV",
            DoubleOp::Cmp => "CMP",
            DoubleOp::Bit => "BIT",
            DoubleOp::Bic => "BIC",
            DoubleOp::Bis => "BIS",
            DoubleOp::Add => "ADD",
            DoubleOp::Sub => "SUB",
        }
    }
}

/// Register-source instructions of the `07RSS` group.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[allow(missing_docs)]
pub enum EisOp {
    Mul, Div, Ash, Ashc, Xor
}
impl EisOp {
    fn mnemonic(self) -> &'static str {
        match self {
            EisOp::Mul  => "MUL",
            EisOp::Div  => "DIV",
            EisOp::Ash  => "ASH",
            EisOp::Ashc => "ASHC",
            EisOp::Xor  => "XOR",
        }
    }
}

/// A decoded machine instruction.
///
/// ```
/// use pdp11::ast::sim::{DoubleOp, SimInstr};
/// use pdp11::ast::{Operand, Size};
///
/// let instr = SimInstr::decode(0o112122).unwrap();
/// assert_eq!(instr, SimInstr::Double(
///     DoubleOp::Mov,
///     Size::Byte,
///     Operand::from_field(0o21),
///     Operand::from_field(0o22),
/// ));
/// assert_eq!(instr.to_string(), "MOVB (R1)+, (R2)+");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum SimInstr {
    /// `HALT` (`000000`)
    Halt,
    /// `WAIT` (`000001`)
    Wait,
    /// `RTI` (`000002`)
    Rti,
    /// `BPT` (`000003`)
    Bpt,
    /// `IOT` (`000004`)
    Iot,
    /// `RESET` (`000005`)
    Reset,
    /// `RTT` (`000006`)
    Rtt,
    /// `MFPT` (`000007`), not implemented by this processor model
    Mfpt,
    /// `JMP dst` (`0001DD`)
    Jmp(Operand),
    /// `RTS Rn` (`00020R`)
    Rts(Reg),
    /// `SPL n` (`00023N`)
    Spl(u8),
    /// Clear the `NZVC` bits in the mask (`000240`-`000257`)
    ClearCc(u8),
    /// Set the `NZVC` bits in the mask (`000260`-`000277`)
    SetCc(u8),
    /// `SWAB dst` (`0003DD`)
    Swab(Operand),
    /// Conditional branch with a signed word offset.
    Br(Cond, i8),
    /// `JSR Rn, dst` (`004RDD`)
    Jsr(Reg, Operand),
    /// `CLR`, `COM`, ... `ASL` and byte forms.
    Single(SingleOp, Size, Operand),
    /// `MARK nn` (`0064NN`)
    Mark(u8),
    /// `MFPI src` (`0065SS`)
    Mfpi(Operand),
    /// `MTPI dst` (`0066DD`)
    Mtpi(Operand),
    /// `SXT dst` (`0067DD`)
    Sxt(Operand),
    /// `MOV`, `CMP`, ... `SUB` and byte forms.
    ///
    /// The operands are `(src, dst)`.
    Double(DoubleOp, Size, Operand, Operand),
    /// `MUL`, `DIV`, `ASH`, `ASHC`, `XOR` (`07xRSS`).
    Eis(EisOp, Reg, Operand),
    /// `SOB Rn, nn` (`077RNN`)
    Sob(Reg, u8),
    /// `EMT n` (`104000`-`104377`)
    Emt(u8),
    /// `TRAP n` (`104400`-`104777`)
    Trap(u8),
    /// `SETD` (`170011`), accepted and ignored
    Setd,
}

impl SimInstr {
    /// Decodes a machine code word into an instruction.
    ///
    /// `None` means the word does not encode an instruction this processor implements
    /// (the CPU raises the invalid instruction trap).
    pub fn decode(word: u16) -> Option<Self> {
        let dst = Operand::from_field(word);
        let src = Operand::from_field(word >> 6);
        let size = Size::from_byte_bit(word);

        let instr = match word >> 6 {
            0o0000 => match word {
                0 => SimInstr::Halt,
                1 => SimInstr::Wait,
                2 => SimInstr::Rti,
                3 => SimInstr::Bpt,
                4 => SimInstr::Iot,
                5 => SimInstr::Reset,
                6 => SimInstr::Rtt,
                7 => SimInstr::Mfpt,
                _ => return None
            },
            0o0001 => SimInstr::Jmp(dst),
            0o0002 => match (word >> 3) & 0o7 {
                0 => SimInstr::Rts(Reg::from_field(word)),
                3 => SimInstr::Spl((word & 0o7) as u8),
                4 | 5 => SimInstr::ClearCc((word & 0o17) as u8),
                6 | 7 => SimInstr::SetCc((word & 0o17) as u8),
                _ => return None
            },
            0o0003 => SimInstr::Swab(dst),
            0o0004..=0o0037 | 0o1000..=0o1037 => SimInstr::Br(Cond::decode(word)?, word as u8 as i8),
            0o0040..=0o0047 => SimInstr::Jsr(Reg::from_field(word >> 6), dst),
            0o0050..=0o0063 | 0o1050..=0o1063 => SimInstr::Single(SingleOp::decode(word)?, size, dst),
            0o0064 => SimInstr::Mark((word & 0o77) as u8),
            0o0065 => SimInstr::Mfpi(dst),
            0o0066 => SimInstr::Mtpi(dst),
            0o0067 => SimInstr::Sxt(dst),
            0o0100..=0o0677 | 0o1100..=0o1677 => {
                let op = match (word >> 12) & 0o7 {
                    1 => DoubleOp::Mov,
                    2 => DoubleOp::Cmp,
                    3 => DoubleOp::Bit,
                    4 => DoubleOp::Bic,
                    5 => DoubleOp::Bis,
                    _ => match size {
                        Size::Word => DoubleOp::Add,
                        Size::Byte => DoubleOp::Sub,
                    }
                };
                // ADD and SUB are word-only; bit 15 picks the operation.
                let size = match op {
                    DoubleOp::Add | DoubleOp::Sub => Size::Word,
                    _ => size
                };
                SimInstr::Double(op, size, src, dst)
            },
            0o0700..=0o0777 => {
                let reg = Reg::from_field(word >> 6);
                let op = match (word >> 9) & 0o7 {
                    0 => EisOp::Mul,
                    1 => EisOp::Div,
                    2 => EisOp::Ash,
                    3 => EisOp::Ashc,
                    4 => EisOp::Xor,
                    7 => return Some(SimInstr::Sob(reg, (word & 0o77) as u8)),
                    _ => return None
                };
                SimInstr::Eis(op, reg, dst)
            },
            0o1040..=0o1043 => SimInstr::Emt(word as u8),
            0o1044..=0o1047 => SimInstr::Trap(word as u8),
            0o1700..=0o1777 if word == 0o170011 => SimInstr::Setd,
            _ => return None
        };

        Some(instr)
    }
}

impl std::fmt::Display for SimInstr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn sized(f: &mut std::fmt::Formatter<'_>, m: &str, size: Size) -> std::fmt::Result {
            f.write_str(m)?;
            match size {
                Size::Byte => f.write_str("B"),
                Size::Word => Ok(()),
            }
        }
        match *self {
            SimInstr::Halt  => f.write_str("HALT"),
            SimInstr::Wait  => f.write_str("WAIT"),
            SimInstr::Rti   => f.write_str("RTI"),
            SimInstr::Bpt   => f.write_str("BPT"),
            SimInstr::Iot   => f.write_str("IOT"),
            SimInstr::Reset => f.write_str("RESET"),
            SimInstr::Rtt   => f.write_str("RTT"),
            SimInstr::Mfpt  => f.write_str("MFPT"),
            SimInstr::Jmp(dst) => write!(f, "JMP {dst}"),
            SimInstr::Rts(r)   => write!(f, "RTS {r}"),
            SimInstr::Spl(n)   => write!(f, "SPL {n}"),
            SimInstr::ClearCc(mask) => write!(f, "CCC {mask:o}"),
            SimInstr::SetCc(mask)   => write!(f, "SCC {mask:o}"),
            SimInstr::Swab(dst) => write!(f, "SWAB {dst}"),
            SimInstr::Br(cond, off) => write!(f, "{} .{:+}", cond.mnemonic(), (i16::from(off) + 1) * 2),
            SimInstr::Jsr(r, dst) => write!(f, "JSR {r}, {dst}"),
            SimInstr::Single(op, size, dst) => {
                sized(f, op.mnemonic(), size)?;
                write!(f, " {dst}")
            },
            SimInstr::Mark(n)   => write!(f, "MARK {n}"),
            SimInstr::Mfpi(src) => write!(f, "MFPI {src}"),
            SimInstr::Mtpi(dst) => write!(f, "MTPI {dst}"),
            SimInstr::Sxt(dst)  => write!(f, "SXT {dst}"),
            SimInstr::Double(op, size, src, dst) => {
                sized(f, op.mnemonic(), size)?;
                write!(f, " {src}, {dst}")
            },
            SimInstr::Eis(EisOp::Xor, r, dst) => write!(f, "XOR {r}, {dst}"),
            SimInstr::Eis(op, r, src) => write!(f, "{} {src}, {r}", op.mnemonic()),
            SimInstr::Sob(r, n)  => write!(f, "SOB {r}, {n}"),
            SimInstr::Emt(n)  => write!(f, "EMT {n:o}"),
            SimInstr::Trap(n) => write!(f, "TRAP {n:o}"),
            SimInstr::Setd    => f.write_str("SETD"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::{R0, R1, R2, R5, PC};
    use crate::ast::{Operand, Size};

    use super::{Cond, DoubleOp, EisOp, SimInstr, SingleOp};

    fn op(field: u16) -> Operand {
        Operand::from_field(field)
    }

    #[test]
    fn test_decode_misc() {
        assert_eq!(SimInstr::decode(0o000000), Some(SimInstr::Halt));
        assert_eq!(SimInstr::decode(0o000002), Some(SimInstr::Rti));
        assert_eq!(SimInstr::decode(0o000006), Some(SimInstr::Rtt));
        assert_eq!(SimInstr::decode(0o000010), None);
        assert_eq!(SimInstr::decode(0o000137), Some(SimInstr::Jmp(op(0o37))));
        assert_eq!(SimInstr::decode(0o000207), Some(SimInstr::Rts(PC)));
        assert_eq!(SimInstr::decode(0o000215), None);
        assert_eq!(SimInstr::decode(0o000234), Some(SimInstr::Spl(4)));
        assert_eq!(SimInstr::decode(0o000240), Some(SimInstr::ClearCc(0))); // NOP
        assert_eq!(SimInstr::decode(0o000241), Some(SimInstr::ClearCc(1))); // CLC
        assert_eq!(SimInstr::decode(0o000277), Some(SimInstr::SetCc(0o17))); // SCC
        assert_eq!(SimInstr::decode(0o000301), Some(SimInstr::Swab(op(0o01))));
    }

    #[test]
    fn test_decode_branches() {
        assert_eq!(SimInstr::decode(0o000777), Some(SimInstr::Br(Cond::Always, -1)));
        assert_eq!(SimInstr::decode(0o001003), Some(SimInstr::Br(Cond::Ne, 3)));
        assert_eq!(SimInstr::decode(0o003400), Some(SimInstr::Br(Cond::Le, 0)));
        assert_eq!(SimInstr::decode(0o100376), Some(SimInstr::Br(Cond::Pl, -2)));
        assert_eq!(SimInstr::decode(0o103401), Some(SimInstr::Br(Cond::Cs, 1)));
    }

    #[test]
    fn test_decode_operand_groups() {
        assert_eq!(SimInstr::decode(0o004737), Some(SimInstr::Jsr(PC, op(0o37))));
        assert_eq!(SimInstr::decode(0o005001), Some(SimInstr::Single(SingleOp::Clr, Size::Word, op(0o01))));
        assert_eq!(SimInstr::decode(0o105001), Some(SimInstr::Single(SingleOp::Clr, Size::Byte, op(0o01))));
        assert_eq!(SimInstr::decode(0o006322), Some(SimInstr::Single(SingleOp::Asl, Size::Word, op(0o22))));
        assert_eq!(SimInstr::decode(0o006403), Some(SimInstr::Mark(3)));
        assert_eq!(SimInstr::decode(0o006546), Some(SimInstr::Mfpi(op(0o46))));
        assert_eq!(SimInstr::decode(0o006626), Some(SimInstr::Mtpi(op(0o26))));
        assert_eq!(SimInstr::decode(0o006700), Some(SimInstr::Sxt(op(0o00))));
        assert_eq!(SimInstr::decode(0o106400), None); // MTPS
        assert_eq!(SimInstr::decode(0o007000), None);

        assert_eq!(SimInstr::decode(0o010001), Some(SimInstr::Double(DoubleOp::Mov, Size::Word, op(0o00), op(0o01))));
        assert_eq!(SimInstr::decode(0o120102), Some(SimInstr::Double(DoubleOp::Cmp, Size::Byte, op(0o01), op(0o02))));
        assert_eq!(SimInstr::decode(0o060001), Some(SimInstr::Double(DoubleOp::Add, Size::Word, op(0o00), op(0o01))));
        assert_eq!(SimInstr::decode(0o160001), Some(SimInstr::Double(DoubleOp::Sub, Size::Word, op(0o00), op(0o01))));
    }

    #[test]
    fn test_decode_eis_and_traps() {
        assert_eq!(SimInstr::decode(0o070102), Some(SimInstr::Eis(EisOp::Mul, R1, op(0o02))));
        assert_eq!(SimInstr::decode(0o071027), Some(SimInstr::Eis(EisOp::Div, R0, op(0o27))));
        assert_eq!(SimInstr::decode(0o072200), Some(SimInstr::Eis(EisOp::Ash, R2, op(0o00))));
        assert_eq!(SimInstr::decode(0o073001), Some(SimInstr::Eis(EisOp::Ashc, R0, op(0o01))));
        assert_eq!(SimInstr::decode(0o074501), Some(SimInstr::Eis(EisOp::Xor, R5, op(0o01))));
        assert_eq!(SimInstr::decode(0o075000), None); // FIS
        assert_eq!(SimInstr::decode(0o077003), Some(SimInstr::Sob(R0, 3)));
        assert_eq!(SimInstr::decode(0o104017), Some(SimInstr::Emt(0o17)));
        assert_eq!(SimInstr::decode(0o104400), Some(SimInstr::Trap(0)));
        assert_eq!(SimInstr::decode(0o104777), Some(SimInstr::Trap(0o377)));
        assert_eq!(SimInstr::decode(0o170011), Some(SimInstr::Setd));
        assert_eq!(SimInstr::decode(0o170012), None);
    }

    #[test]
    fn test_cond_holds() {
        const N: u16 = 0o10;
        const Z: u16 = 0o4;
        const V: u16 = 0o2;
        const C: u16 = 0o1;

        assert!(Cond::Always.holds(0));
        assert!(Cond::Eq.holds(Z) && !Cond::Ne.holds(Z));
        assert!(Cond::Lt.holds(N) && Cond::Lt.holds(V) && !Cond::Lt.holds(N | V));
        assert!(Cond::Ge.holds(N | V));
        assert!(Cond::Gt.holds(0) && !Cond::Gt.holds(Z));
        assert!(Cond::Le.holds(Z) && Cond::Le.holds(N));
        assert!(Cond::Hi.holds(0) && !Cond::Hi.holds(C) && !Cond::Hi.holds(Z));
        assert!(Cond::Los.holds(C) && Cond::Los.holds(Z));
        assert!(Cond::Cs.holds(C) && Cond::Cc.holds(N | Z | V));
        assert!(Cond::Mi.holds(N) && Cond::Pl.holds(Z));
        assert!(Cond::Vs.holds(V) && Cond::Vc.holds(C));
    }

    #[test]
    fn test_display() {
        assert_eq!(SimInstr::decode(0o012706).unwrap().to_string(), "MOV (PC)+, SP");
        assert_eq!(SimInstr::decode(0o105711).unwrap().to_string(), "TSTB (R1)");
        assert_eq!(SimInstr::decode(0o071027).unwrap().to_string(), "DIV (PC)+, R0");
        assert_eq!(SimInstr::decode(0o100376).unwrap().to_string(), "BPL .-2");
    }
}
