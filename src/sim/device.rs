//! Handlers for devices connected to the UNIBUS.
//!
//! This handles memory-mapped device registers on the I/O page
//! and the interrupts the devices raise.
//!
//! The core types here are:
//! - [`Device`]: A device which can be connected to the bus.
//! - [`DeviceHandler`]: The ordered collection of devices and the address ranges they decode.
//! - [`Interrupt`]: A vectored interrupt request.
//!
//! This module also provides the standard devices:
//! - [`Console`]: KL11 serial console.
//! - [`Rk11`]: RK11 disk controller with RK05 drives.
//! - [`LineClock`]: KW11-L line frequency clock.

mod clock;
mod console;
mod disk;

use std::ops::RangeInclusive;

pub use clock::{LineClock, CLOCK_RANGE};
pub use console::{Console, Stop, CONSOLE_RANGE};
pub use disk::{DiskImage, Rk11, RK11_RANGE};

use super::mem::{CoreMemory, PhysAddr, IO_PAGE_START};
use super::trap::InterruptQueue;
use super::SimErr;

/// A device that sits on the bus.
///
/// A device decodes a range of I/O page addresses, which is given when it is
/// added to the [`DeviceHandler`]. Once per simulator cycle, [`Device::step`]
/// is called so the device can make progress and request an interrupt.
pub trait Device: Send + 'static {
    /// Reads the register at the given physical address.
    ///
    /// If successful, this returns the value returned from that address.
    /// If the address is not decoded by this device, this returns `None`
    /// (which the bus reports as a bus error).
    fn read16(&mut self, addr: PhysAddr) -> Option<u16>;

    /// Writes the register at the given physical address.
    ///
    /// This returns whether the address is decoded by this device.
    fn write16(&mut self, addr: PhysAddr, data: u16) -> bool;

    /// Resets the device (the bus `INIT` signal).
    fn reset(&mut self);

    /// Lets the device make progress.
    ///
    /// This is called once per simulator cycle, and must not block.
    /// Devices that do DMA transfer to and from core memory here.
    /// If the device wants to interrupt the processor, it returns the interrupt.
    fn step(&mut self, core: &mut CoreMemory) -> Option<Interrupt>;

    /// Hacky specialization.
    ///
    /// This allows [`DeviceHandler::add_device`]'s signature to just require a [`Device`]
    /// while the built-in devices are held without a box.
    #[doc(hidden)]
    fn _to_sim_device(self, _: internals::ToSimDeviceToken) -> internals::SimDevice
        where Self: Sized
    {
        internals::SimDevice::Custom(Box::new(self))
    }
}

/// An interrupt request.
///
/// This is output by an implementation of [`Device::step`] if an interrupt should occur.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Interrupt {
    /// Address of the interrupt vector (always even).
    pub vector: u16,
    /// Priority value from 0-7
    pub priority: u8
}
impl Interrupt {
    /// Creates a new vectored interrupt.
    ///
    /// Note that the priority is truncated to 3 bits.
    pub fn vectored(vector: u16, priority: u8) -> Self {
        Self { vector, priority: priority & 0b111 }
    }
}
impl std::fmt::Display for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "vector {:03o} at priority {}", self.vector, self.priority)
    }
}

struct MappedDevice {
    range: RangeInclusive<PhysAddr>,
    dev: internals::SimDevice
}

/// The central hub for all devices on the bus.
///
/// Devices are kept in the order they were added.
/// This order is the order they are stepped in each cycle.
///
/// ```
/// use pdp11::sim::device::{DeviceHandler, LineClock, CLOCK_RANGE};
///
/// let mut handler = DeviceHandler::new();
/// assert!(handler.add_device(LineClock::new(), CLOCK_RANGE).is_ok());
///
/// // the range is taken now:
/// assert!(handler.add_device(LineClock::new(), CLOCK_RANGE).is_err());
///
/// assert_eq!(handler.read16(0o777546), Some(0));
/// assert_eq!(handler.read16(0o777550), None);
/// ```
#[derive(Default)]
pub struct DeviceHandler {
    devices: Vec<MappedDevice>
}

impl DeviceHandler {
    /// Creates a new device handler with no devices.
    pub fn new() -> Self {
        Self { devices: vec![] }
    }

    /// Add a new device.
    ///
    /// This accepts a device and the (inclusive) range of addresses which the device decodes.
    /// If successful, the ID of the device is returned.
    ///
    /// # Errors
    /// If the device cannot be added, it will be returned back to the user.
    ///
    /// The cases where the device cannot be added include:
    /// - The range is not within the I/O page.
    /// - The range overlaps with a range of another device.
    pub fn add_device<D: Device>(&mut self, dev: D, range: RangeInclusive<PhysAddr>) -> Result<usize, D> {
        let (start, end) = (*range.start(), *range.end());
        if start > end || start < IO_PAGE_START || end > 0o777777 { return Err(dev) };

        let overlaps = self.devices.iter()
            .any(|m| start <= *m.range.end() && *m.range.start() <= end);
        if overlaps { return Err(dev) };

        self.devices.push(MappedDevice {
            range,
            dev: dev._to_sim_device(internals::ToSimDeviceToken(()))
        });
        Ok(self.devices.len() - 1)
    }

    /// The number of devices connected.
    pub fn len(&self) -> usize {
        self.devices.len()
    }
    /// Whether there are no devices connected.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    fn find(&mut self, addr: PhysAddr) -> Option<&mut internals::SimDevice> {
        self.devices.iter_mut()
            .find(|m| m.range.contains(&addr))
            .map(|m| &mut m.dev)
    }

    /// Accesses the device mapped to the given address and tries [`Device::read16`] on it.
    pub fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
        self.find(addr)?.read16(addr)
    }

    /// Accesses the device mapped to the given address and tries [`Device::write16`] on it.
    pub fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        match self.find(addr) {
            Some(dev) => dev.write16(addr, data),
            None => false
        }
    }

    /// Resets all the devices connected to this handler.
    pub fn reset(&mut self) {
        self.devices.iter_mut().for_each(|m| m.dev.reset())
    }

    /// Steps every device once, in the order they were added,
    /// queueing any interrupts they request.
    pub fn step(&mut self, core: &mut CoreMemory, pending: &mut InterruptQueue) -> Result<(), SimErr> {
        for m in &mut self.devices {
            if let Some(int) = m.dev.step(core) {
                pending.insert(int)?;
            }
        }
        Ok(())
    }
}
impl std::fmt::Debug for DeviceHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.devices.iter().map(|m| (&m.range, &m.dev)))
            .finish()
    }
}

mod internals {
    use super::{Console, CoreMemory, Device, Interrupt, LineClock, PhysAddr, Rk11};

    pub enum SimDevice {
        Console(Console),
        Disk(Rk11),
        Clock(LineClock),
        Custom(Box<dyn Device>)
    }

    impl Device for SimDevice {
        fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
            match self {
                SimDevice::Console(dev) => dev.read16(addr),
                SimDevice::Disk(dev) => dev.read16(addr),
                SimDevice::Clock(dev) => dev.read16(addr),
                SimDevice::Custom(dev) => dev.read16(addr),
            }
        }

        fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
            match self {
                SimDevice::Console(dev) => dev.write16(addr, data),
                SimDevice::Disk(dev) => dev.write16(addr, data),
                SimDevice::Clock(dev) => dev.write16(addr, data),
                SimDevice::Custom(dev) => dev.write16(addr, data),
            }
        }

        fn reset(&mut self) {
            match self {
                SimDevice::Console(dev) => dev.reset(),
                SimDevice::Disk(dev) => dev.reset(),
                SimDevice::Clock(dev) => dev.reset(),
                SimDevice::Custom(dev) => dev.reset(),
            }
        }

        fn step(&mut self, core: &mut CoreMemory) -> Option<Interrupt> {
            match self {
                SimDevice::Console(dev) => dev.step(core),
                SimDevice::Disk(dev) => dev.step(core),
                SimDevice::Clock(dev) => dev.step(core),
                SimDevice::Custom(dev) => dev.step(core),
            }
        }
    }
    impl std::fmt::Debug for SimDevice {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Console(dev) => dev.fmt(f),
                Self::Disk(dev) => dev.fmt(f),
                Self::Clock(dev) => dev.fmt(f),
                Self::Custom(_) => f.debug_struct("Custom").finish_non_exhaustive(),
            }
        }
    }

    /// Allows `_to_sim_device` to be private to this file only.
    pub struct ToSimDeviceToken(pub ());
}

#[cfg(test)]
mod tests {
    use crate::sim::mem::CoreMemory;
    use crate::sim::trap::InterruptQueue;

    use super::{Device, DeviceHandler, Interrupt, PhysAddr};

    /// A register that raises an interrupt every step once written.
    struct Doorbell {
        reg: u16,
    }
    impl Device for Doorbell {
        fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
            (addr == 0o775000).then_some(self.reg)
        }
        fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
            if addr != 0o775000 { return false };
            self.reg = data;
            true
        }
        fn reset(&mut self) {
            self.reg = 0;
        }
        fn step(&mut self, _core: &mut CoreMemory) -> Option<Interrupt> {
            (self.reg != 0).then(|| Interrupt::vectored(self.reg, 5))
        }
    }

    #[test]
    fn test_ranges() {
        let mut handler = DeviceHandler::new();
        assert!(handler.add_device(Doorbell { reg: 0 }, 0o775000..=0o775001).is_ok());
        // outside the I/O page
        assert!(handler.add_device(Doorbell { reg: 0 }, 0o1000..=0o1001).is_err());
        // overlapping
        assert!(handler.add_device(Doorbell { reg: 0 }, 0o774776..=0o775000).is_err());
        assert_eq!(handler.len(), 1);

        assert!(handler.write16(0o775000, 0o300));
        assert_eq!(handler.read16(0o775000), Some(0o300));
        assert!(!handler.write16(0o775002, 0));
        assert_eq!(handler.read16(0o775002), None);
    }

    #[test]
    fn test_step_queues_interrupts() {
        let mut handler = DeviceHandler::new();
        let mut core = CoreMemory::new(&mut 0u16);
        let mut pending = InterruptQueue::new();

        assert!(handler.add_device(Doorbell { reg: 0 }, 0o775000..=0o775001).is_ok());
        handler.step(&mut core, &mut pending).unwrap();
        assert!(pending.is_empty());

        handler.write16(0o775000, 0o300);
        handler.step(&mut core, &mut pending).unwrap();
        assert_eq!(pending.peek(), Some(Interrupt::vectored(0o300, 5)));

        handler.reset();
        assert_eq!(handler.read16(0o775000), Some(0));
    }
}
