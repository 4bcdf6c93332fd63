//! The KT11 memory management unit.
//!
//! The MMU converts 16-bit virtual addresses into 18-bit physical addresses.
//! Each processor mode has its own table of 16 page registers (8 instruction space
//! pages, which are used for translation, and 8 data space pages, which are only
//! visible through the register interface).
//!
//! Translation is controlled by status register 0 (SR0): while its enable bit is clear,
//! virtual addresses map to themselves, except that the top 8K bytes are relocated to
//! the I/O page.
//!
//! ```
//! use pdp11::sim::Mode;
//! use pdp11::sim::mmu::Mmu;
//!
//! let mut mmu = Mmu::new();
//! assert_eq!(mmu.decode(false, 0o001000, Mode::Kernel), Ok(0o001000));
//! assert_eq!(mmu.decode(false, 0o177570, Mode::Kernel), Ok(0o777570));
//! ```

use tracing::debug;

use super::mem::PhysAddr;
use super::Mode;

/// SR0: fault because the page is not readable.
const SR0_NONRESIDENT: u16 = 1 << 15;
/// SR0: fault because the address is outside the page's length.
const SR0_PAGE_LENGTH: u16 = 1 << 14;
/// SR0: fault because the page is not writable.
const SR0_READ_ONLY: u16 = 1 << 13;
/// SR0: relocation enabled.
const SR0_ENABLE: u16 = 1;
/// SR0 bits software can write.
const SR0_WRITABLE: u16 = 0o160157;

/// PDR: page written since its registers were last loaded.
const PDR_WRITTEN: u16 = 1 << 6;
/// PDR bits software can write.
const PDR_WRITABLE: u16 = 0o077416;

/// The status register addresses.
pub const SR0_ADDR: PhysAddr = 0o777572;
#[allow(missing_docs)]
pub const SR1_ADDR: PhysAddr = 0o777574;
#[allow(missing_docs)]
pub const SR2_ADDR: PhysAddr = 0o777576;

/// Why a translation was refused.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum FaultCause {
    /// The page does not allow reads (access control `x0x`).
    NonResident,
    /// The block of the address lies outside the page's length.
    PageLength,
    /// The access was a write and the page is not read/write (access control `11x`).
    ReadOnly,
}
impl FaultCause {
    fn sr0_bit(self) -> u16 {
        match self {
            FaultCause::NonResident => SR0_NONRESIDENT,
            FaultCause::PageLength  => SR0_PAGE_LENGTH,
            FaultCause::ReadOnly    => SR0_READ_ONLY,
        }
    }
}

/// A failed translation.
///
/// SR0 has already been updated when this is returned.
/// The CPU records the faulting instruction in SR2 and traps to vector 250.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
#[error("{cause:?} fault at virtual address {va:06o} ({mode:?} mode)")]
pub struct MmuFault {
    /// The virtual address that failed to translate.
    pub va: u16,
    /// The mode whose page table was used.
    pub mode: Mode,
    /// The reason for the fault.
    pub cause: FaultCause,
}

/// A page address register/page descriptor register pair.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
struct Page {
    par: u16,
    pdr: u16
}
impl Page {
    fn readable(self) -> bool {
        self.pdr & 0o2 != 0
    }
    fn writable(self) -> bool {
        self.pdr & 0o6 == 0o6
    }
    fn expands_down(self) -> bool {
        self.pdr & 0o10 != 0
    }
    /// Page length field, in 64-byte blocks.
    fn length(self) -> u16 {
        (self.pdr >> 8) & 0o177
    }
    /// Physical base, in 64-byte blocks.
    fn base(self) -> u16 {
        self.par & 0o7777
    }
}

/// Which half of a register pair an I/O page address names.
#[derive(Clone, Copy)]
enum PageReg {
    Pdr,
    Par
}

/// The KT11 memory management unit.
#[derive(Debug, Clone)]
pub struct Mmu {
    pages: [[Page; 16]; 4],
    sr0: u16,
    sr2: u16
}

impl Mmu {
    /// Creates an MMU in its reset state (relocation disabled, all pages cleared).
    pub fn new() -> Self {
        Self {
            pages: [[Page::default(); 16]; 4],
            sr0: 0,
            sr2: 0
        }
    }

    /// Whether relocation is enabled (SR0 bit 0).
    pub fn enabled(&self) -> bool {
        self.sr0 & SR0_ENABLE != 0
    }
    /// The current value of SR0.
    pub fn sr0(&self) -> u16 {
        self.sr0
    }
    /// The current value of SR2 (the virtual address of the last faulting instruction).
    pub fn sr2(&self) -> u16 {
        self.sr2
    }
    /// Records the virtual address of the instruction that caused a fault.
    pub fn set_fault_pc(&mut self, pc: u16) {
        self.sr2 = pc;
    }

    /// Resets the MMU (as the bus `INIT` signal does).
    ///
    /// This disables relocation but keeps the page registers.
    pub fn reset(&mut self) {
        self.sr0 = 0;
    }

    /// Translates a virtual address using the page table of the given mode.
    ///
    /// `write` indicates whether the access writes to memory,
    /// which requires a read/write page and marks the page as written.
    pub fn decode(&mut self, write: bool, va: u16, mode: Mode) -> Result<PhysAddr, MmuFault> {
        if !self.enabled() {
            let pa = PhysAddr::from(va);
            return match va >= 0o170000 {
                true  => Ok(pa + 0o600000),
                false => Ok(pa),
            };
        }

        let page_no = usize::from(va >> 13);
        let page = self.pages[mode as usize][page_no];
        let block = (va >> 6) & 0o177;
        let disp = va & 0o77;

        let cause = if write && !page.writable() {
            Some(FaultCause::ReadOnly)
        } else if !page.readable() {
            Some(FaultCause::NonResident)
        } else if (page.expands_down() && block < page.length()) || (!page.expands_down() && block > page.length()) {
            Some(FaultCause::PageLength)
        } else {
            None
        };

        if let Some(cause) = cause {
            self.sr0 = cause.sr0_bit() | ((mode as u16) << 5) | ((va >> 12) & 0o16) | SR0_ENABLE;
            debug!(va = format_args!("{va:06o}"), ?mode, ?cause, "MMU fault");
            return Err(MmuFault { va, mode, cause });
        }

        if write {
            self.pages[mode as usize][page_no].pdr |= PDR_WRITTEN;
        }
        let pa = ((PhysAddr::from(page.base()) + PhysAddr::from(block)) << 6) + PhysAddr::from(disp);
        Ok(pa & 0o777777)
    }

    /// Finds the page register an I/O page address refers to.
    fn page_reg(addr: PhysAddr) -> Option<(Mode, usize, PageReg)> {
        let (mode, reg) = match addr & !0o77 {
            0o772300 => (Mode::Kernel, PageReg::Pdr),
            0o772200 => (Mode::Supervisor, PageReg::Pdr),
            0o777600 => (Mode::User, PageReg::Pdr),
            _ => return None
        };
        let reg = match addr & 0o40 {
            0 => reg,
            _ => PageReg::Par,
        };
        Some((mode, ((addr & 0o36) >> 1) as usize, reg))
    }

    /// Reads one of the MMU's registers.
    ///
    /// This returns `None` if the address is not an MMU register.
    pub fn read16(&self, addr: PhysAddr) -> Option<u16> {
        match addr & !1 {
            SR0_ADDR => Some(self.sr0),
            SR1_ADDR => Some(0),
            SR2_ADDR => Some(self.sr2),
            a => {
                let (mode, i, reg) = Self::page_reg(a)?;
                let page = self.pages[mode as usize][i];
                match reg {
                    PageReg::Pdr => Some(page.pdr),
                    PageReg::Par => Some(page.par),
                }
            }
        }
    }

    /// Writes one of the MMU's registers.
    ///
    /// This returns whether the address is an MMU register.
    /// Writes to the read-only SR1 and SR2 are accepted and ignored.
    pub fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        match addr & !1 {
            SR0_ADDR => {
                self.sr0 = data & SR0_WRITABLE;
                true
            },
            SR1_ADDR | SR2_ADDR => true,
            a => {
                let Some((mode, i, reg)) = Self::page_reg(a) else { return false };
                let page = &mut self.pages[mode as usize][i];
                match reg {
                    PageReg::Pdr => page.pdr = data & PDR_WRITABLE,
                    PageReg::Par => {
                        page.par = data & 0o7777;
                        page.pdr &= !PDR_WRITTEN;
                    },
                }
                true
            }
        }
    }
}
impl Default for Mmu {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::Mode;

    use super::{FaultCause, Mmu, MmuFault, SR0_ADDR, SR2_ADDR};

    const KPDR0: u32 = 0o772300;
    const KPAR0: u32 = 0o772340;
    const UPDR0: u32 = 0o777600;
    const UPAR0: u32 = 0o777640;

    /// Sets up kernel page 0 as a full-length read/write page at the given base.
    fn mmu_with_kernel_page(base: u16, pdr: u16) -> Mmu {
        let mut mmu = Mmu::new();
        assert!(mmu.write16(KPAR0, base));
        assert!(mmu.write16(KPDR0, pdr));
        assert!(mmu.write16(SR0_ADDR, 1));
        mmu
    }

    #[test]
    fn test_disabled_identity() {
        let mut mmu = Mmu::new();
        assert_eq!(mmu.decode(false, 0o001000, Mode::Kernel), Ok(0o001000));
        assert_eq!(mmu.decode(true, 0o167776, Mode::User), Ok(0o167776));
        assert_eq!(mmu.decode(false, 0o170000, Mode::Kernel), Ok(0o600000 + 0o170000));
        assert_eq!(mmu.decode(false, 0o177776, Mode::User), Ok(0o777776));
    }

    #[test]
    fn test_enabled_relocation() {
        // length 0177 blocks, read/write
        let mut mmu = mmu_with_kernel_page(0o1000, 0o77406);

        let va = 0o3 << 6 | 0o25; // block 3, displacement 025
        assert_eq!(mmu.decode(false, va, Mode::Kernel), Ok((0o1000 << 6) + (3 << 6) + 0o25));
        // reads do not set W
        assert_eq!(mmu.read16(KPDR0), Some(0o77406));

        assert!(mmu.decode(true, va, Mode::Kernel).is_ok());
        assert_eq!(mmu.read16(KPDR0), Some(0o77506));

        // reloading the PAR clears W
        assert!(mmu.write16(KPAR0, 0o1000));
        assert_eq!(mmu.read16(KPDR0), Some(0o77406));
    }

    #[test]
    fn test_mode_tables_are_separate() {
        let mut mmu = mmu_with_kernel_page(0o100, 0o77406);
        assert!(mmu.write16(UPAR0, 0o2000));
        assert!(mmu.write16(UPDR0, 0o77406));

        assert_eq!(mmu.decode(false, 0o10, Mode::Kernel), Ok(0o100 << 6 | 0o10));
        assert_eq!(mmu.decode(false, 0o10, Mode::User), Ok(0o2000 << 6 | 0o10));
    }

    #[test]
    fn test_read_only_fault() {
        // read-only page (ACF = 2)
        let mut mmu = mmu_with_kernel_page(0, 0o77402);
        assert!(mmu.decode(false, 0o100, Mode::Kernel).is_ok());

        let err = mmu.decode(true, 0o100, Mode::Kernel);
        assert_eq!(err, Err(MmuFault { va: 0o100, mode: Mode::Kernel, cause: FaultCause::ReadOnly }));
        assert_eq!(mmu.sr0() & 0o160001, 0o020001);
    }

    #[test]
    fn test_nonresident_fault_records_page_and_mode() {
        let mut mmu = mmu_with_kernel_page(0, 0o77406);
        // user page 2 is not set up
        let err = mmu.decode(false, 0o040000, Mode::User).unwrap_err();
        assert_eq!(err.cause, FaultCause::NonResident);
        assert_eq!(mmu.sr0(), 0o100000 | 0o140 | (2 << 1) | 1);
    }

    #[test]
    fn test_length_fault() {
        // expand-up page with length 3: blocks 0..=3 are valid
        let mut mmu = mmu_with_kernel_page(0, 0o3 << 8 | 0o6);
        assert!(mmu.decode(false, 3 << 6, Mode::Kernel).is_ok());
        assert_eq!(mmu.decode(false, 4 << 6, Mode::Kernel).unwrap_err().cause, FaultCause::PageLength);

        // expand-down page with length 0175: only blocks 0175..=0177 are valid
        let mut mmu = mmu_with_kernel_page(0, 0o175 << 8 | 0o16);
        assert!(mmu.decode(false, 0o177 << 6, Mode::Kernel).is_ok());
        assert!(mmu.decode(false, 0o175 << 6, Mode::Kernel).is_ok());
        assert_eq!(mmu.decode(false, 0o174 << 6, Mode::Kernel).unwrap_err().cause, FaultCause::PageLength);
    }

    #[test]
    fn test_register_interface() {
        let mut mmu = Mmu::new();
        // PDR writes are masked
        assert!(mmu.write16(0o772316, 0o177777));
        assert_eq!(mmu.read16(0o772316), Some(0o077416));
        // D space registers are distinct from I space
        assert!(mmu.write16(0o772360, 0o1234));
        assert_eq!(mmu.read16(0o772360), Some(0o1234));
        assert_eq!(mmu.read16(0o772340), Some(0));
        // supervisor registers exist
        assert!(mmu.write16(0o772240, 0o4321));
        assert_eq!(mmu.read16(0o772240), Some(0o4321));
        // SR2 is read-only
        mmu.set_fault_pc(0o2002);
        assert!(mmu.write16(SR2_ADDR, 0));
        assert_eq!(mmu.read16(SR2_ADDR), Some(0o2002));
        // unrelated addresses are not decoded
        assert_eq!(mmu.read16(0o772400), None);
        assert!(!mmu.write16(0o777700, 0));
    }
}
