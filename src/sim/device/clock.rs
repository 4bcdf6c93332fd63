use std::ops::RangeInclusive;

use crate::sim::mem::{CoreMemory, PhysAddr};
use crate::sim::trap::INT_CLOCK;

use super::{Device, Interrupt};

/// Addresses decoded by the line clock.
pub const CLOCK_RANGE: RangeInclusive<PhysAddr> = 0o777546..=0o777547;

const LKS: PhysAddr = 0o777546;
const MONITOR: u16 = 1 << 7;
const IE: u16 = 1 << 6;
const CLOCK_PRIORITY: u8 = 6;

/// The KW11-L line frequency clock.
///
/// Rather than following the host's wall clock, this ticks
/// once every `period` device steps.
/// Each tick sets the monitor bit of the status register, and
/// interrupts if interrupts are enabled.
#[derive(Debug, Clone)]
pub struct LineClock {
    csr: u16,
    ticks: u32,
    period: u32
}
impl LineClock {
    /// The default tick period, in device steps.
    pub const DEFAULT_PERIOD: u32 = 1 << 16;

    /// Creates a clock with the default period.
    pub fn new() -> Self {
        Self::with_period(Self::DEFAULT_PERIOD)
    }

    /// Creates a clock which ticks every `period` steps.
    ///
    /// A period of zero is treated as one.
    pub fn with_period(period: u32) -> Self {
        Self { csr: 0, ticks: 0, period: period.max(1) }
    }
}
impl Default for LineClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for LineClock {
    fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
        (addr == LKS).then_some(self.csr)
    }

    fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        if addr != LKS { return false };
        self.csr = data & (MONITOR | IE);
        true
    }

    fn reset(&mut self) {
        self.csr = 0;
        self.ticks = 0;
    }

    fn step(&mut self, _core: &mut CoreMemory) -> Option<Interrupt> {
        self.ticks += 1;
        if self.ticks < self.period { return None };

        self.ticks = 0;
        self.csr |= MONITOR;
        (self.csr & IE != 0).then(|| Interrupt::vectored(INT_CLOCK, CLOCK_PRIORITY))
    }

    fn _to_sim_device(self, _: super::internals::ToSimDeviceToken) -> super::internals::SimDevice
        where Self: Sized
    {
        super::internals::SimDevice::Clock(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::device::{Device, Interrupt};
    use crate::sim::mem::CoreMemory;
    use crate::sim::trap::INT_CLOCK;

    use super::LineClock;

    #[test]
    fn test_tick_without_interrupts() {
        let mut clock = LineClock::with_period(3);
        let mut core = CoreMemory::new(&mut 0u16);

        assert_eq!(clock.step(&mut core), None);
        assert_eq!(clock.step(&mut core), None);
        assert_eq!(clock.read16(0o777546), Some(0));
        assert_eq!(clock.step(&mut core), None);
        assert_eq!(clock.read16(0o777546), Some(0o200));
    }

    #[test]
    fn test_tick_interrupts() {
        let mut clock = LineClock::with_period(2);
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(clock.write16(0o777546, 0o177777));
        assert_eq!(clock.read16(0o777546), Some(0o300));
        assert!(clock.write16(0o777546, 0o100));

        assert_eq!(clock.step(&mut core), None);
        assert_eq!(clock.step(&mut core), Some(Interrupt::vectored(INT_CLOCK, 6)));
        assert_eq!(clock.step(&mut core), None);
        assert_eq!(clock.step(&mut core), Some(Interrupt::vectored(INT_CLOCK, 6)));

        clock.reset();
        assert_eq!(clock.read16(0o777546), Some(0));
    }
}
