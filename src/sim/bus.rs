//! The UNIBUS address dispatcher.
//!
//! Every physical (18-bit) reference the CPU makes goes through [`Unibus`],
//! which routes it to core memory, the MMU's registers, or a device on the I/O page.

use super::device::DeviceHandler;
use super::mem::{CoreMemory, PhysAddr, WordFiller, IO_PAGE_START};
use super::mmu::Mmu;

/// A bus reference that nothing answered.
///
/// The CPU handles this by trapping to the bus error vector (004).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, thiserror::Error)]
pub enum BusError {
    /// A word access to an odd address.
    #[error("odd address {0:06o}")]
    OddAddress(PhysAddr),
    /// No memory or device register at this address.
    #[error("nonexistent address {0:06o}")]
    Nonexistent(PhysAddr),
}

/// The bus and everything attached to it.
#[derive(Debug)]
pub struct Unibus {
    /// Core memory (everything below the I/O page).
    pub core: CoreMemory,
    /// The memory management unit.
    pub mmu: Mmu,
    /// The devices on the I/O page.
    pub devices: DeviceHandler
}

impl Unibus {
    /// Creates a bus with no devices attached.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self {
            core: CoreMemory::new(filler),
            mmu: Mmu::new(),
            devices: DeviceHandler::new()
        }
    }

    /// Reads the word at a physical address.
    pub fn read16(&mut self, addr: PhysAddr) -> Result<u16, BusError> {
        if addr & 1 != 0 { return Err(BusError::OddAddress(addr)) };

        let value = match addr < IO_PAGE_START {
            true  => self.core.read16(addr),
            false => self.mmu.read16(addr).or_else(|| self.devices.read16(addr)),
        };
        value.ok_or(BusError::Nonexistent(addr))
    }

    /// Writes the word at a physical address.
    pub fn write16(&mut self, addr: PhysAddr, data: u16) -> Result<(), BusError> {
        if addr & 1 != 0 { return Err(BusError::OddAddress(addr)) };

        let ok = match addr < IO_PAGE_START {
            true  => self.core.write16(addr, data),
            false => self.mmu.write16(addr, data) || self.devices.write16(addr, data),
        };
        match ok {
            true  => Ok(()),
            false => Err(BusError::Nonexistent(addr))
        }
    }

    /// Resets the MMU and every device (the `INIT` signal).
    ///
    /// Core memory is left alone.
    pub fn reset(&mut self) {
        self.mmu.reset();
        self.devices.reset();
    }
}
