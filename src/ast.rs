//! Components relating to the representation of PDP-11 instructions.
//!
//! These components together are used to construct [`sim::SimInstr`]
//! (a data structure holding a decoded machine instruction).
//!
//! The operand pieces shared by every instruction group live here:
//! - [`Reg`]: one of the eight general registers,
//! - [`Size`]: whether an instruction operates on bytes or words,
//! - [`AddrMode`] and [`Operand`]: the 6-bit `mode:reg` operand field.

pub mod sim;

use std::num::TryFromIntError;

/// A register. Must be between 0 and 7.
///
/// `R6` is the stack pointer of the current processor mode and `R7` is the program counter.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// ## Examples
///
/// ```text
/// MOV R0, R1
///     ~~  ~~
/// JSR PC, @(R5)+
///     ~~     ~~
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register in the register file.
    pub const R0: Reg = Reg(0);
    /// The 1st register in the register file.
    pub const R1: Reg = Reg(1);
    /// The 2nd register in the register file.
    pub const R2: Reg = Reg(2);
    /// The 3rd register in the register file.
    pub const R3: Reg = Reg(3);
    /// The 4th register in the register file.
    pub const R4: Reg = Reg(4);
    /// The 5th register in the register file.
    pub const R5: Reg = Reg(5);
    /// The 6th register in the register file (the stack pointer).
    pub const R6: Reg = Reg(6);
    /// The 7th register in the register file (the program counter).
    pub const R7: Reg = Reg(7);

    /// Alias of [`R6`].
    pub const SP: Reg = R6;
    /// Alias of [`R7`].
    pub const PC: Reg = R7;
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Gets the register from the low three bits of a field.
    pub(crate) fn from_field(field: u16) -> Self {
        Reg((field & 0o7) as u8)
    }

    /// The odd register of the register pair starting at this register
    /// (used by `MUL`, `DIV`, `ASHC`).
    ///
    /// For an odd register, this is the register itself.
    pub fn pair(self) -> Self {
        Reg(self.0 | 1)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            6 => f.write_str("SP"),
            7 => f.write_str("PC"),
            n => write!(f, "R{n}"),
        }
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file in [`crate::sim::mem::RegFile`].
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            // HACKy, but there's no other way to create this error
            _     => u8::try_from(256).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}

/// The width of an operation.
///
/// Byte operations compute their condition codes at bit 7,
/// word operations at bit 15.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Size {
    #[allow(missing_docs)]
    Byte,
    #[allow(missing_docs)]
    Word
}
impl Size {
    /// Gets the size from the byte bit (bit 15) of a single or double operand instruction.
    pub(crate) fn from_byte_bit(instr: u16) -> Self {
        match instr & 0o100000 != 0 {
            true  => Size::Byte,
            false => Size::Word,
        }
    }

    /// The sign bit of an operand of this size.
    pub fn msb(self) -> u16 {
        match self {
            Size::Byte => 0o200,
            Size::Word => 0o100000,
        }
    }
    /// The all-ones value of an operand of this size.
    pub fn max(self) -> u16 {
        match self {
            Size::Byte => 0o377,
            Size::Word => 0o177777,
        }
    }
    /// The number of bytes in an operand of this size.
    pub fn bytes(self) -> u16 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
        }
    }
    /// Truncates the value to this size.
    pub fn mask(self, value: u32) -> u16 {
        (value & u32::from(self.max())) as u16
    }
    /// Checks whether the sign bit of the value is set at this size.
    pub fn is_negative(self, value: u16) -> bool {
        value & self.msb() != 0
    }
}

/// The eight general addressing modes.
///
/// | mode | syntax    | name                        |
/// |------|-----------|-----------------------------|
/// | 0    | `Rn`      | register                    |
/// | 1    | `(Rn)`    | register deferred           |
/// | 2    | `(Rn)+`   | autoincrement               |
/// | 3    | `@(Rn)+`  | autoincrement deferred      |
/// | 4    | `-(Rn)`   | autodecrement               |
/// | 5    | `@-(Rn)`  | autodecrement deferred      |
/// | 6    | `X(Rn)`   | index                       |
/// | 7    | `@X(Rn)`  | index deferred              |
///
/// Modes 2, 3, 6, and 7 with `PC` give the immediate, absolute, relative,
/// and relative deferred forms.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AddrMode {
    #[allow(missing_docs)]
    Register,
    #[allow(missing_docs)]
    RegisterDeferred,
    #[allow(missing_docs)]
    Autoincrement,
    #[allow(missing_docs)]
    AutoincrementDeferred,
    #[allow(missing_docs)]
    Autodecrement,
    #[allow(missing_docs)]
    AutodecrementDeferred,
    #[allow(missing_docs)]
    Index,
    #[allow(missing_docs)]
    IndexDeferred,
}
impl AddrMode {
    fn from_field(field: u16) -> Self {
        match field & 0o7 {
            0 => AddrMode::Register,
            1 => AddrMode::RegisterDeferred,
            2 => AddrMode::Autoincrement,
            3 => AddrMode::AutoincrementDeferred,
            4 => AddrMode::Autodecrement,
            5 => AddrMode::AutodecrementDeferred,
            6 => AddrMode::Index,
            _ => AddrMode::IndexDeferred,
        }
    }

    /// Whether this mode goes through an extra pointer in memory.
    pub fn is_deferred(self) -> bool {
        matches!(self,
            | AddrMode::AutoincrementDeferred
            | AddrMode::AutodecrementDeferred
            | AddrMode::IndexDeferred
        )
    }
}

/// A 6-bit operand field (`mode:reg`) of an instruction.
///
/// ## Examples
///
/// ```
/// use pdp11::ast::{AddrMode, Operand};
/// use pdp11::ast::reg_consts::{R3, PC};
///
/// let dst = Operand::from_field(0o23); // (R3)+
/// assert_eq!(dst.mode, AddrMode::Autoincrement);
/// assert_eq!(dst.reg, R3);
///
/// let imm = Operand::from_field(0o27); // #n
/// assert_eq!(imm.reg, PC);
/// assert_eq!(imm.to_string(), "(PC)+");
/// ```
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Operand {
    /// The addressing mode.
    pub mode: AddrMode,
    /// The register the mode is applied to.
    pub reg: Reg
}
impl Operand {
    /// Decodes the low six bits of the provided field.
    pub fn from_field(field: u16) -> Self {
        Self {
            mode: AddrMode::from_field(field >> 3),
            reg: Reg::from_field(field),
        }
    }

    /// Whether this operand names a register directly (mode 0).
    pub fn is_register(self) -> bool {
        self.mode == AddrMode::Register
    }

    /// How far an autoincrement or autodecrement on this operand moves its register.
    ///
    /// Byte operands step by 1, except for deferred modes
    /// and for `SP`/`PC`, which always step by a full word.
    pub fn step(self, size: Size) -> u16 {
        match self.mode.is_deferred() || self.reg.0 >= 6 {
            true  => 2,
            false => size.bytes(),
        }
    }
}
impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = self.reg;
        match self.mode {
            AddrMode::Register => write!(f, "{r}"),
            AddrMode::RegisterDeferred => write!(f, "({r})"),
            AddrMode::Autoincrement => write!(f, "({r})+"),
            AddrMode::AutoincrementDeferred => write!(f, "@({r})+"),
            AddrMode::Autodecrement => write!(f, "-({r})"),
            AddrMode::AutodecrementDeferred => write!(f, "@-({r})"),
            AddrMode::Index => write!(f, "X({r})"),
            AddrMode::IndexDeferred => write!(f, "@X({r})"),
        }
    }
}
