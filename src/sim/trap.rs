//! Trap vectors and the pending interrupt table.
//!
//! Traps (synchronous, caused by the executing instruction) and interrupts
//! (asynchronous, raised by devices) are both dispatched through a vector:
//! a pair of words in kernel space holding the new PC and the new PSW.
//! The dispatch itself is [`Simulator::trap_at`].
//!
//! Interrupts wait in an [`InterruptQueue`] until the processor priority drops
//! below theirs.
//!
//! [`Simulator::trap_at`]: super::Simulator::trap_at

use tracing::trace;

use super::device::Interrupt;
use super::SimErr;

/// Bus error: nonexistent address, odd word address, `HALT` outside kernel mode.
pub const INT_BUS: u16 = 0o004;
/// Reserved or unimplemented instruction.
pub const INT_INVAL: u16 = 0o010;
/// `BPT` (breakpoint trap).
pub const INT_DEBUG: u16 = 0o014;
/// `IOT`.
pub const INT_IOT: u16 = 0o020;
/// `EMT`.
pub const INT_EMT: u16 = 0o030;
/// `TRAP`.
pub const INT_TRAP: u16 = 0o034;
/// Console receiver.
pub const INT_TTYIN: u16 = 0o060;
/// Console transmitter.
pub const INT_TTYOUT: u16 = 0o064;
/// Line clock.
pub const INT_CLOCK: u16 = 0o100;
/// RK11 disk controller.
pub const INT_RK: u16 = 0o220;
/// Memory management fault.
pub const INT_FAULT: u16 = 0o250;

/// Capacity of the pending interrupt table.
pub const MAX_PENDING: usize = 8;

/// Pending interrupts, ordered by priority (highest first)
/// and then by vector (lowest first).
///
/// ```
/// use pdp11::sim::device::Interrupt;
/// use pdp11::sim::trap::InterruptQueue;
///
/// let mut queue = InterruptQueue::new();
/// queue.insert(Interrupt::vectored(0o220, 5)).unwrap();
/// queue.insert(Interrupt::vectored(0o100, 6)).unwrap();
///
/// // nothing is above priority 7:
/// assert_eq!(queue.pop_above(7), None);
/// assert_eq!(queue.pop_above(0), Some(Interrupt::vectored(0o100, 6)));
/// assert_eq!(queue.pop_above(0), Some(Interrupt::vectored(0o220, 5)));
/// ```
#[derive(Debug, Default, Clone)]
pub struct InterruptQueue {
    entries: Vec<Interrupt>
}

impl InterruptQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self { entries: Vec::with_capacity(MAX_PENDING) }
    }

    /// Adds an interrupt to the queue, keeping the queue ordered.
    ///
    /// An interrupt that is already pending is not added twice.
    ///
    /// # Errors
    ///
    /// - [`SimErr::OddVector`] if the interrupt's vector is odd.
    /// - [`SimErr::InterruptTableFull`] if the table already holds [`MAX_PENDING`] interrupts.
    pub fn insert(&mut self, int: Interrupt) -> Result<(), SimErr> {
        if int.vector & 1 != 0 { return Err(SimErr::OddVector(int.vector)) };
        if self.entries.contains(&int) { return Ok(()) };
        if self.entries.len() >= MAX_PENDING {
            return Err(SimErr::InterruptTableFull(int));
        }

        let key = |i: &Interrupt| (std::cmp::Reverse(i.priority), i.vector);
        let index = self.entries.partition_point(|e| key(e) <= key(&int));
        self.entries.insert(index, int);
        trace!(%int, pending = self.entries.len(), "interrupt queued");
        Ok(())
    }

    /// The highest priority pending interrupt.
    pub fn peek(&self) -> Option<Interrupt> {
        self.entries.first().copied()
    }

    /// Removes and returns the highest priority pending interrupt,
    /// if its priority is strictly greater than the given processor priority.
    pub fn pop_above(&mut self, priority: u8) -> Option<Interrupt> {
        match self.entries.first() {
            Some(int) if int.priority > priority => Some(self.entries.remove(0)),
            _ => None
        }
    }

    /// The number of pending interrupts.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    /// Whether no interrupts are pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    /// Drops every pending interrupt.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
    /// Iterates over the pending interrupts, in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &Interrupt> + '_ {
        self.entries.iter()
    }
}
