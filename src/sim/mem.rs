//! Memory handling for the PDP-11 simulator.
//!
//! This module consists of:
//! - [`CoreMemory`]: The core (main) memory below the I/O page.
//! - [`RegFile`]: The general register file.
//! - [`MachineInitStrategy`]: How power-on memory contents are chosen.

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;
use crate::ast::reg_consts::{R6, R7};

/// A physical (18-bit) bus address.
pub type PhysAddr = u32;

/// The first address of the I/O page.
///
/// Everything below this is core memory.
pub const IO_PAGE_START: PhysAddr = 0o760000;
/// Number of words of core memory (124K words).
pub const CORE_WORDS: usize = (IO_PAGE_START / 2) as usize;

/// Core memory.
///
/// This is addressed with physical byte addresses and only supports word access.
/// Byte accesses are done by the CPU as word accesses.
///
/// Note that this struct provides two methods of accessing memory:
/// - [`CoreMemory::read16`] and [`CoreMemory::write16`]: fallible bus-style access,
///     which fail for addresses outside of core memory
/// - [`CoreMemory::as_slice`] and [`CoreMemory::as_slice_mut`]: direct access to the words
///
/// ```
/// use pdp11::sim::mem::CoreMemory;
///
/// let mut mem = CoreMemory::new(&mut 0u16);
/// assert!(mem.write16(0o1000, 0o12345));
/// assert_eq!(mem.read16(0o1000), Some(0o12345));
/// assert_eq!(mem.as_slice()[0o1000 / 2], 0o12345);
///
/// // beyond the end of core:
/// assert_eq!(mem.read16(0o760000), None);
/// ```
pub struct CoreMemory {
    data: Box<[u16]>
}
impl CoreMemory {
    /// Creates a new memory with a provided word creation strategy.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take(CORE_WORDS)
                .collect()
        }
    }

    /// Whether the physical address lies inside core memory.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        ((addr >> 1) as usize) < self.data.len()
    }

    /// Reads the word at the given physical address (the low bit is ignored).
    ///
    /// This returns `None` if the address is not backed by core memory.
    pub fn read16(&self, addr: PhysAddr) -> Option<u16> {
        self.data.get((addr >> 1) as usize).copied()
    }

    /// Writes the word at the given physical address (the low bit is ignored).
    ///
    /// This returns whether the address is backed by core memory.
    pub fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        match self.data.get_mut((addr >> 1) as usize) {
            Some(word) => {
                *word = data;
                true
            },
            None => false
        }
    }

    /// Copies a block of words into memory starting at the given physical address.
    ///
    /// Words that would land past the end of core memory are dropped.
    pub fn copy_block(&mut self, start: PhysAddr, words: &[u16]) {
        let si = (start >> 1) as usize;
        if let Some(dst) = self.data.get_mut(si..) {
            let len = words.len().min(dst.len());
            dst[..len].copy_from_slice(&words[..len]);
        }
    }

    /// Gets all the words of memory.
    pub fn as_slice(&self) -> &[u16] {
        &self.data
    }
    /// Gets all the words of memory (mutably).
    pub fn as_slice_mut(&mut self) -> &mut [u16] {
        &mut self.data
    }
}
impl std::fmt::Debug for CoreMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreMemory")
            .field("words", &self.data.len())
            .finish_non_exhaustive()
    }
}

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// `R6` is the stack pointer of whichever processor mode is active.
/// The stack pointers of the inactive modes are held by the simulator
/// and are swapped in on a mode change.
///
/// # Example
///
/// ```
/// use pdp11::sim::mem::RegFile;
/// use pdp11::ast::reg_consts::{R0, R7};
///
/// let mut reg = RegFile::new(&mut 0u16);
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
///
/// reg.set_pc(0o2002);
/// assert_eq!(reg[R7], 0o2002);
/// ```
#[derive(Debug, Clone)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file with arbitrary data.
    pub fn new(filler: &mut impl WordFiller) -> Self {
        Self(std::array::from_fn(|_| filler.generate()))
    }

    /// The program counter (`R7`).
    pub fn pc(&self) -> u16 {
        self[R7]
    }
    /// Sets the program counter (`R7`).
    pub fn set_pc(&mut self, addr: u16) {
        self[R7] = addr;
    }
    /// The stack pointer of the active mode (`R6`).
    pub fn sp(&self) -> u16 {
        self[R6]
    }
    /// Sets the stack pointer of the active mode (`R6`).
    pub fn set_sp(&mut self, addr: u16) {
        self[R6] = addr;
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// Trait that describes types that can be used to create power-on memory contents.
pub trait WordFiller {
    /// Generate the data.
    fn generate(&mut self) -> u16;
}
impl WordFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u16 {
        rand::random()
    }
}
impl WordFiller for u16 {
    /// Sets each word to the given value.
    fn generate(&mut self) -> u16 {
        *self
    }
}
impl WordFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u16 {
        self.gen()
    }
}

/// Strategy used to initialize the core memory and registers of the [`Simulator`].
///
/// Core memory on the real machine holds whatever it held at power-off,
/// so by default this is a known value of zero; the random strategies are useful
/// for checking that software does not depend on cleared memory.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each word randomly and non-deterministically.
    Unseeded,

    /// Initializes each word randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each word to a known value.
    Known {
        /// The value to initialize each value to.
        value: u16
    },

    /// Initializes each word to zero.
    #[default]
    Zeroed
}

impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl WordFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => MIGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => MIGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => MIGenerator::Known(*value),
            MachineInitStrategy::Zeroed => MIGenerator::Known(0),
        }
    }
}

enum MIGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u16)
}
impl WordFiller for MIGenerator {
    fn generate(&mut self) -> u16 {
        match self {
            MIGenerator::Unseeded  => ().generate(),
            MIGenerator::Seeded(r) => r.generate(),
            MIGenerator::Known(k)  => k.generate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CoreMemory, MachineInitStrategy, WordFiller, CORE_WORDS};

    #[test]
    fn test_core_bounds() {
        let mut mem = CoreMemory::new(&mut 0u16);
        assert_eq!(mem.as_slice().len(), CORE_WORDS);
        assert!(mem.contains(0o757776));
        assert!(!mem.contains(0o760000));
        assert!(mem.write16(0o757776, 1));
        assert!(!mem.write16(0o760000, 1));

        // odd addresses select the containing word
        assert!(mem.write16(0o1001, 0o707));
        assert_eq!(mem.read16(0o1000), Some(0o707));
    }

    #[test]
    fn test_copy_block_truncates() {
        let mut mem = CoreMemory::new(&mut 0u16);
        mem.copy_block(0o757774, &[1, 2, 3, 4]);
        assert_eq!(mem.read16(0o757774), Some(1));
        assert_eq!(mem.read16(0o757776), Some(2));
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let strat = MachineInitStrategy::Seeded { seed: 0x11 };
        let a: Vec<_> = { let mut g = strat.generator(); (0..16).map(|_| g.generate()).collect() };
        let b: Vec<_> = { let mut g = strat.generator(); (0..16).map(|_| g.generate()).collect() };
        assert_eq!(a, b);

        let mut zero = MachineInitStrategy::Zeroed.generator();
        assert_eq!(zero.generate(), 0);
    }
}
