//! Simulating and execution for the PDP-11.
//!
//! This module is focused on executing machine code loaded into core memory.
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates the processor (the KB11 CPU).
//! - [`mem`]: The module handling core memory and the register file.
//! - [`mmu`]: The KT11 memory management unit.
//! - [`bus`]: The UNIBUS, which routes physical addresses to memory, the MMU, and devices.
//! - [`trap`]: Trap vectors and the pending interrupt table.
//! - [`device`]: The module handling devices on the I/O page and the interrupts they raise.
//! - [`boot`]: The RK05 bootstrap loader.
//!
//! # Usage
//!
//! To simulate some code, create a Simulator, load words into core memory, and point the PC at them:
//!
//! ```
//! use pdp11::sim::Simulator;
//! use pdp11::ast::reg_consts::R0;
//!
//! let mut sim = Simulator::new(Default::default());
//! sim.load(0o1000, &[
//!     0o012700, 0o000005, // MOV #5, R0
//!     0o005200,           // INC R0
//!     0o000000,           // HALT
//! ]);
//! sim.reg_file.set_pc(0o1000);
//!
//! sim.run().unwrap();
//! assert!(sim.hit_halt());
//! assert_eq!(sim.reg_file[R0], 6);
//! ```
//!
//! ## Execution
//!
//! Beyond the basic [`Simulator::run`] (which runs until halting),
//! there are also:
//! - [`Simulator::step_in`]: manual cycle-by-cycle simulation
//! - [`Simulator::run_while`], [`Simulator::run_with_limit`]: more advanced programmatic execution
//!
//! Every cycle has three parts:
//! 1. [`Simulator::step`]: take a pending interrupt, or fetch and execute one instruction,
//! 2. dispatch any trap or interrupt through its vector ([`Simulator::trap_at`]),
//! 3. step every device once, in the order they were added.
//!
//! ## Devices
//!
//! Devices are attached to the bus's [`DeviceHandler`](device::DeviceHandler):
//!
//! ```
//! use pdp11::sim::Simulator;
//! use pdp11::sim::device::{LineClock, CLOCK_RANGE};
//!
//! let mut sim = Simulator::new(Default::default());
//! assert!(sim.bus.devices.add_device(LineClock::new(), CLOCK_RANGE).is_ok());
//! ```

pub mod boot;
pub mod bus;
pub mod device;
pub mod mem;
pub mod mmu;
pub mod trap;
mod exec;

use tracing::{debug, info, trace};

use crate::ast::sim::SimInstr;
use self::bus::{BusError, Unibus};
use self::device::Interrupt;
use self::mem::{MachineInitStrategy, PhysAddr, RegFile};
use self::trap::{InterruptQueue, INT_BUS, INT_FAULT};

/// Fatal errors that can occur during simulation.
///
/// Most things that go wrong in a program (bus errors, invalid instructions, MMU faults)
/// trap through a vector instead, as they do on the real machine.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum SimErr {
    /// A trap or interrupt used an odd vector.
    #[error("odd vector {0:03o}")]
    OddVector(u16),
    /// `JMP` or `JSR` was given a register as its destination.
    #[error("{0} has a register destination")]
    RegisterOperand(SimInstr),
    /// The pending interrupt table was full.
    #[error("interrupt table full, dropped {0}")]
    InterruptTableFull(Interrupt),
    /// A bus error or MMU fault occurred while dispatching a trap.
    #[error("fault while trapping through vector {0:03o}")]
    DoubleTrap(u16),
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The instruction traps through the given vector.
    Trap(u16),
    /// `HALT` was executed in kernel mode.
    Halt,
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}
impl From<BusError> for StepBreak {
    fn from(value: BusError) -> Self {
        debug!(error = %value, "bus error");
        Self::Trap(INT_BUS)
    }
}

/// The result of a single [`Simulator::step`].
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum StepOutcome {
    /// An instruction executed (or the processor is waiting).
    Continue,
    /// The instruction trapped through the given vector.
    Trap(u16),
    /// A pending interrupt was taken instead of fetching an instruction.
    Interrupt(Interrupt),
    /// `HALT` was executed in kernel mode.
    Halt,
}

/// Reason for why execution paused if it wasn't due to an error.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
enum PauseCondition {
    /// Program reached a halt.
    Halt,
    /// Program hit a tripwire condition.
    Tripwire,
    /// Program hit an error and did not pause successfully.
    #[default]
    Unsuccessful
}

/// Configuration flags for [`Simulator`].
///
/// These can be modified after the `Simulator` is created with [`Simulator::new`]
/// and their effects should still apply.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// The creation strategy for power-on core memory and register contents.
    ///
    /// This flag only goes into effect after a `Simulator::new` or `Simulator::reset` call.
    ///
    /// By default, this flag is [`MachineInitStrategy::default`].
    pub machine_init: MachineInitStrategy,

    /// The value of the front panel switch register (`777570`).
    ///
    /// By default, this is `173030`.
    pub switch_register: u16,
}
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            machine_init: Default::default(),
            switch_register: 0o173030
        }
    }
}

const PSW_ADDR: PhysAddr = 0o777776;
const STACK_LIMIT_ADDR: PhysAddr = 0o777774;
const SWITCH_ADDR: PhysAddr = 0o777570;

/// A processor mode.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[repr(u8)]
pub enum Mode {
    #[allow(missing_docs)]
    Kernel = 0,
    #[allow(missing_docs)]
    Supervisor = 1,
    /// Mode 2 is reserved, but it still has its own stack pointer and page table.
    Illegal = 2,
    #[allow(missing_docs)]
    User = 3,
}
impl Mode {
    fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0 => Mode::Kernel,
            1 => Mode::Supervisor,
            2 => Mode::Illegal,
            _ => Mode::User,
        }
    }
}

/// Executes PDP-11 machine code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The simulator's register file.
    ///
    /// `R6` holds the stack pointer of the current mode.
    pub reg_file: RegFile,

    /// The processor status word. See [`Psw`] for more details.
    psw: Psw,

    /// Stack pointers of each mode.
    ///
    /// The slot of the current mode is stale: its value lives in `R6`.
    stack_pointers: [u16; 4],

    /// The address of the instruction currently executing.
    instr_addr: u16,

    /// The bus, with core memory, the MMU and every device.
    pub bus: Unibus,

    /// Interrupts waiting for the processor priority to drop.
    interrupts: InterruptQueue,

    /// The stack limit register (`777774`). This is stored, but not enforced.
    stack_limit: u16,

    /// The front panel display register (`777570` when written).
    display_register: u16,

    /// Whether `WAIT` is idling the processor until the next interrupt.
    waiting: bool,

    /// The number of instructions successfully run since this `Simulator` was initialized.
    ///
    /// This can be set to 0 to reset the counter.
    pub instructions_run: u64,

    /// The number of cycles (steps, including idle steps) run since this `Simulator` was initialized.
    pub cycles: u64,

    /// Indicates the reason why the last execution (via [`Simulator::run_while`] and adjacent)
    /// had paused.
    pause_condition: PauseCondition,

    // ------------------ CONFIG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Configuration settings for the simulator.
    ///
    /// These are preserved between resets.
    pub flags: SimFlags,
}
impl Simulator where Simulator: Send {}

impl Simulator {
    /// Creates a new simulator in its power-on state.
    ///
    /// The processor starts in kernel mode at priority 0 with relocation disabled
    /// and no devices attached.
    pub fn new(flags: SimFlags) -> Self {
        let mut filler = flags.machine_init.generator();

        Self {
            reg_file: RegFile::new(&mut filler),
            psw: Psw::new(0),
            stack_pointers: [0; 4],
            instr_addr: 0,
            bus: Unibus::new(&mut filler),
            interrupts: InterruptQueue::new(),
            stack_limit: 0,
            display_register: 0,
            waiting: false,
            instructions_run: 0,
            cycles: 0,
            pause_condition: Default::default(),

            flags
        }
    }

    /// Resets the simulator.
    ///
    /// This resets the state of the `Simulator` back to its power-on state,
    /// while preserving configuration.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Devices (which are reset, as by the `RESET` instruction)
    ///
    /// Core memory is recreated, so anything loaded has to be reloaded.
    pub fn reset(&mut self) {
        let flags = self.flags;
        let devices = std::mem::take(&mut self.bus.devices);

        *self = Simulator::new(flags);
        self.bus.devices = devices;
        self.bus.devices.reset();
    }

    /// Copies words into core memory starting at the given physical address,
    /// bypassing the MMU.
    pub fn load(&mut self, addr: PhysAddr, words: &[u16]) {
        self.bus.core.copy_block(addr, words);
    }

    /// Gets the processor status word.
    pub fn psw(&self) -> Psw {
        self.psw
    }

    /// Sets the processor status word.
    ///
    /// This is the only way the processor changes mode:
    /// `R6` is saved as the outgoing mode's stack pointer,
    /// and the incoming mode's stack pointer is loaded into `R6`.
    pub fn write_psw(&mut self, value: u16) {
        self.stack_pointers[self.psw.current_mode() as usize] = self.reg_file.sp();
        self.psw = Psw::new(value);
        self.reg_file.set_sp(self.stack_pointers[self.psw.current_mode() as usize]);
    }

    /// Gets the stack pointer of the given mode.
    pub fn stack_pointer(&self, mode: Mode) -> u16 {
        match mode == self.psw.current_mode() {
            true  => self.reg_file.sp(),
            false => self.stack_pointers[mode as usize],
        }
    }

    /// The value last written to the display register.
    pub fn display_register(&self) -> u16 {
        self.display_register
    }

    /// Gets the value of the prefetch PC.
    ///
    /// This function is useful as it returns the location of the currently
    /// executing (or last executed) instruction in memory.
    pub fn prefetch_pc(&self) -> u16 {
        self.instr_addr
    }

    /// Indicates whether the last execution of the simulator resulted in a `HALT` successfully occurring.
    pub fn hit_halt(&self) -> bool {
        matches!(self.pause_condition, PauseCondition::Halt)
    }

    /// Whether the processor is idling in a `WAIT` instruction.
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// Requests an interrupt, as a device would.
    ///
    /// # Errors
    ///
    /// The request is refused if its vector is odd or the pending table is full.
    pub fn interrupt(&mut self, int: Interrupt) -> Result<(), SimErr> {
        self.interrupts.insert(int)
    }

    /// The interrupts waiting to be taken.
    pub fn pending_interrupts(&self) -> &InterruptQueue {
        &self.interrupts
    }

    /// Reads a physical word, answering the CPU's own registers before asking the bus.
    fn phys_read16(&mut self, addr: PhysAddr) -> Result<u16, BusError> {
        match addr {
            PSW_ADDR => Ok(self.psw.get()),
            STACK_LIMIT_ADDR => Ok(self.stack_limit),
            SWITCH_ADDR => Ok(self.flags.switch_register),
            _ => self.bus.read16(addr)
        }
    }

    /// Writes a physical word, answering the CPU's own registers before asking the bus.
    fn phys_write16(&mut self, addr: PhysAddr, data: u16) -> Result<(), BusError> {
        match addr {
            PSW_ADDR => self.write_psw(data),
            STACK_LIMIT_ADDR => self.stack_limit = data,
            SWITCH_ADDR => self.display_register = data,
            _ => return self.bus.write16(addr, data)
        }
        Ok(())
    }

    /// Translates a virtual address, recording the faulting instruction if the MMU refuses.
    fn translate(&mut self, va: u16, mode: Mode, write: bool) -> Result<PhysAddr, StepBreak> {
        match self.bus.mmu.decode(write, va, mode) {
            Ok(pa) => Ok(pa),
            Err(_) => {
                self.bus.mmu.set_fault_pc(self.instr_addr);
                Err(StepBreak::Trap(INT_FAULT))
            }
        }
    }

    /// Reads the word at a virtual address in the given mode's address space.
    fn read_word(&mut self, va: u16, mode: Mode) -> Result<u16, StepBreak> {
        if va & 1 != 0 { return Err(BusError::OddAddress(PhysAddr::from(va)).into()) };
        let pa = self.translate(va, mode, false)?;
        Ok(self.phys_read16(pa)?)
    }

    /// Writes the word at a virtual address in the given mode's address space.
    fn write_word(&mut self, va: u16, mode: Mode, data: u16) -> Result<(), StepBreak> {
        if va & 1 != 0 { return Err(BusError::OddAddress(PhysAddr::from(va)).into()) };
        let pa = self.translate(va, mode, true)?;
        Ok(self.phys_write16(pa, data)?)
    }

    /// Reads the byte at a virtual address (as a read of its word).
    fn read_byte(&mut self, va: u16, mode: Mode) -> Result<u16, StepBreak> {
        let word = self.read_word(va & !1, mode)?;
        match va & 1 {
            0 => Ok(word & 0xff),
            _ => Ok(word >> 8),
        }
    }

    /// Writes the byte at a virtual address (as a read-modify-write of its word).
    fn write_byte(&mut self, va: u16, mode: Mode, data: u16) -> Result<(), StepBreak> {
        let word = self.read_word(va & !1, mode)?;
        let word = match va & 1 {
            0 => (word & 0xff00) | (data & 0xff),
            _ => (word & 0x00ff) | (data << 8),
        };
        self.write_word(va & !1, mode, word)
    }

    /// Reads the word at the PC and moves the PC past it.
    fn fetch(&mut self) -> Result<u16, StepBreak> {
        let pc = self.reg_file.pc();
        let word = self.read_word(pc, self.psw.current_mode())?;
        self.reg_file.set_pc(pc.wrapping_add(2));
        Ok(word)
    }

    /// Pushes a word onto the current mode's stack.
    fn push(&mut self, data: u16) -> Result<(), StepBreak> {
        let sp = self.reg_file.sp().wrapping_sub(2);
        self.reg_file.set_sp(sp);
        self.write_word(sp, self.psw.current_mode(), data)
    }

    /// Pops a word off the current mode's stack.
    fn pop(&mut self) -> Result<u16, StepBreak> {
        let sp = self.reg_file.sp();
        let data = self.read_word(sp, self.psw.current_mode())?;
        self.reg_file.set_sp(sp.wrapping_add(2));
        Ok(data)
    }

    /// Saves the old PSW and PC on the kernel stack and reads the new PC and PSW from the vector.
    fn enter_trap(&mut self, old: Psw, vector: u16) -> Result<(u16, u16), StepBreak> {
        self.push(old.get())?;
        self.push(self.reg_file.pc())?;
        let pc = self.read_word(vector, Mode::Kernel)?;
        let psw = self.read_word(vector + 2, Mode::Kernel)?;
        Ok((pc, psw))
    }

    /// Dispatches a trap or interrupt through the given vector.
    ///
    /// This switches to kernel mode (recording the old mode as the previous mode),
    /// pushes the old PSW and PC onto the kernel stack,
    /// and loads the new PC and PSW from the vector.
    ///
    /// # Errors
    ///
    /// - [`SimErr::OddVector`] if the vector is odd.
    /// - [`SimErr::DoubleTrap`] if the stack or the vector can't be accessed.
    pub fn trap_at(&mut self, vector: u16) -> Result<(), SimErr> {
        if vector & 1 != 0 { return Err(SimErr::OddVector(vector)) };
        debug!(vector = format_args!("{vector:03o}"), pc = format_args!("{:06o}", self.instr_addr), "trap");

        let old = self.psw;
        let prev = old.current_mode() as u16;
        self.write_psw((old.get() & 0o007777) | (prev << 12));

        match self.enter_trap(old, vector) {
            Ok((pc, psw)) => {
                self.reg_file.set_pc(pc);
                self.write_psw((psw & !0o030000) | (prev << 12));
                Ok(())
            },
            Err(StepBreak::Err(e)) => Err(e),
            Err(_) => Err(SimErr::DoubleTrap(vector)),
        }
    }

    /// Simulates one step: takes a pending interrupt or executes one instruction.
    ///
    /// This does not dispatch the trap or interrupt it reports, nor step the devices.
    /// For a complete cycle, use [`Simulator::step_in`].
    pub fn step(&mut self) -> Result<StepOutcome, SimErr> {
        if let Some(int) = self.interrupts.pop_above(self.psw.priority()) {
            trace!(%int, "interrupt taken");
            self.waiting = false;
            return Ok(StepOutcome::Interrupt(int));
        }
        if self.waiting {
            return Ok(StepOutcome::Continue);
        }

        self.instr_addr = self.reg_file.pc();
        let outcome = match self.execute() {
            Ok(()) => StepOutcome::Continue,
            Err(StepBreak::Trap(vector)) => StepOutcome::Trap(vector),
            Err(StepBreak::Halt) => {
                info!(pc = format_args!("{:06o}", self.instr_addr), "HALT");
                StepOutcome::Halt
            },
            Err(StepBreak::Err(e)) => return Err(e),
        };

        self.instructions_run = self.instructions_run.wrapping_add(1);
        Ok(outcome)
    }

    /// Runs one cycle: a step, the dispatch of its trap or interrupt, and a step of every device.
    fn cycle(&mut self) -> Result<StepOutcome, SimErr> {
        let outcome = self.step()?;
        match outcome {
            StepOutcome::Halt => return Ok(outcome),
            StepOutcome::Trap(vector) => self.trap_at(vector)?,
            StepOutcome::Interrupt(int) => self.trap_at(int.vector)?,
            StepOutcome::Continue => {},
        }

        self.bus.devices.step(&mut self.bus.core, &mut self.interrupts)?;
        self.cycles = self.cycles.wrapping_add(1);
        Ok(outcome)
    }

    /// Runs until the tripwire condition returns false (or `HALT` is executed).
    pub fn run_while(&mut self, mut tripwire: impl FnMut(&mut Simulator) -> bool) -> Result<(), SimErr> {
        std::mem::take(&mut self.pause_condition);

        let result = loop {
            if !tripwire(self) {
                break Ok(PauseCondition::Tripwire);
            }
            match self.cycle() {
                Ok(StepOutcome::Halt) => break Ok(PauseCondition::Halt),
                Ok(_) => {},
                Err(e) => break Err(e),
            }
        };

        self.pause_condition = result?;
        Ok(())
    }

    /// Execute the program.
    ///
    /// This blocks until the program halts.
    /// If you would like to limit the maximum number of cycles to execute, consider [`Simulator::run_with_limit`].
    pub fn run(&mut self) -> Result<(), SimErr> {
        self.run_while(|_| true)
    }

    /// Execute the program with a limit on how many cycles to execute.
    ///
    /// This blocks until the program halts or until the number of cycles to execute has been hit.
    pub fn run_with_limit(&mut self, max_cycles: u64) -> Result<(), SimErr> {
        let i = self.cycles;
        self.run_while(|sim| sim.cycles.wrapping_sub(i) < max_cycles)
    }

    /// Simulate one cycle.
    pub fn step_in(&mut self) -> Result<(), SimErr> {
        std::mem::take(&mut self.pause_condition);
        if self.cycle()? == StepOutcome::Halt {
            self.pause_condition = PauseCondition::Halt;
        }
        Ok(())
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

/// A wrapper over `u16` in order to facilitate the PSW.
///
/// The word is encoded as the following:
/// - `PSW[14..16]`: Current mode
/// - `PSW[12..14]`: Previous mode
/// - `PSW[11]`: Register set
/// - `PSW[5..8]`: Priority
/// - `PSW[4]`: Trace trap (stored, but not acted on)
/// - `PSW[0..4]`: Condition codes (`N`, `Z`, `V`, `C`)
///
/// ```text
///          current mode
///          | previous mode
///          | |          priority
///          | |          |   condition codes
///          V V          V   V
/// 0o140344: 11 00 0000 111 0 0100
///           ~~ ~~      ~~~   ~~~~
/// ```
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Psw(u16);

impl Psw {
    /// Bits 8 to 10 do not exist.
    const MASK: u16 = 0o174377;

    /// Creates a PSW from its bit representation.
    pub fn new(value: u16) -> Self {
        Psw(value & Self::MASK)
    }

    /// Gets the bit representation of the PSW.
    pub fn get(self) -> u16 {
        self.0
    }
    /// The current processor mode.
    pub fn current_mode(self) -> Mode {
        Mode::from_bits(self.0 >> 14)
    }
    /// The processor mode before the last trap (or as set by software).
    pub fn previous_mode(self) -> Mode {
        Mode::from_bits(self.0 >> 12)
    }
    /// The processor priority (0-7).
    pub fn priority(self) -> u8 {
        ((self.0 >> 5) & 0b111) as u8
    }
    /// The condition code bits (`NZVC`).
    pub fn cc(self) -> u16 {
        self.0 & 0o17
    }
    #[allow(missing_docs)]
    pub fn n(self) -> bool {
        self.0 & 0o10 != 0
    }
    #[allow(missing_docs)]
    pub fn z(self) -> bool {
        self.0 & 0o4 != 0
    }
    #[allow(missing_docs)]
    pub fn v(self) -> bool {
        self.0 & 0o2 != 0
    }
    #[allow(missing_docs)]
    pub fn c(self) -> bool {
        self.0 & 0o1 != 0
    }

    fn set_priority(&mut self, priority: u8) {
        self.0 = (self.0 & !0o340) | (u16::from(priority & 0b111) << 5);
    }
    fn set_cc(&mut self, cc: u16) {
        self.0 = (self.0 & !0o17) | (cc & 0o17);
    }
    fn set_nzvc(&mut self, n: bool, z: bool, v: bool, c: bool) {
        self.set_cc(u16::from(n) << 3 | u16::from(z) << 2 | u16::from(v) << 1 | u16::from(c));
    }
}
impl std::fmt::Debug for Psw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;
        struct CC(u16);

        impl std::fmt::Debug for CC {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                for (bit, c) in [(0o10, 'N'), (0o4, 'Z'), (0o2, 'V'), (0o1, 'C')] {
                    if self.0 & bit != 0 { f.write_char(c)?; };
                }
                Ok(())
            }
        }

        f.debug_struct("Psw")
            .field("mode", &self.current_mode())
            .field("previous", &self.previous_mode())
            .field("priority", &self.priority())
            .field("cc", &CC(self.cc()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::R0;
    use crate::sim::boot::{BOOT_ADDR, BOOT_ROM, BOOT_START};
    use crate::sim::device::{DiskImage, Interrupt, Rk11, RK11_RANGE};
    use crate::sim::trap::{INT_CLOCK, INT_TRAP};

    use super::{Mode, SimErr, SimFlags, Simulator, StepOutcome};

    fn sim_at(addr: u32, program: &[u16]) -> Simulator {
        let mut sim = Simulator::new(SimFlags::default());
        sim.load(addr, program);
        sim.reg_file.set_pc(addr as u16);
        sim.reg_file.set_sp(0o1000);
        sim
    }

    #[test]
    fn test_trap_and_rtt_in_kernel() {
        // TRAP 0 ; handler at 3000 is RTT
        let mut sim = sim_at(0o2000, &[0o104400]);
        sim.load(INT_TRAP.into(), &[0o3000, 0o340]);
        sim.load(0o3000, &[0o000006]);
        sim.write_psw(0o17);

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file.pc(), 0o3000);
        assert_eq!(sim.psw().get(), 0o340);
        assert_eq!(sim.reg_file.sp(), 0o774);
        assert_eq!(sim.bus.core.read16(0o774), Some(0o2002));
        assert_eq!(sim.bus.core.read16(0o776), Some(0o17));

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file.pc(), 0o2002);
        assert_eq!(sim.psw().get(), 0o17);
        assert_eq!(sim.reg_file.sp(), 0o1000);
    }

    #[test]
    fn test_trap_from_user_mode() {
        let mut sim = sim_at(0o2000, &[0o104400]);
        sim.load(INT_TRAP.into(), &[0o3000, 0o340]);

        // user mode, with its own stack
        sim.write_psw(0o140000);
        sim.reg_file.set_sp(0o4000);

        sim.step_in().unwrap();
        let psw = sim.psw();
        assert_eq!(psw.current_mode(), Mode::Kernel);
        assert_eq!(psw.previous_mode(), Mode::User);
        assert_eq!(psw.priority(), 7);
        // pushed onto the kernel stack
        assert_eq!(sim.reg_file.sp(), 0o774);
        assert_eq!(sim.bus.core.read16(0o776), Some(0o140000));
        assert_eq!(sim.stack_pointer(Mode::User), 0o4000);
    }

    #[test]
    fn test_rtt_in_user_mode_keeps_priority() {
        // RTT
        let mut sim = sim_at(0o2000, &[0o000006]);
        sim.write_psw(0o140000);
        sim.reg_file.set_sp(0o3774);
        // PC, then a PSW that tries to go to kernel mode at priority 7
        sim.load(0o3774, &[0o2100, 0o000357]);

        sim.step_in().unwrap();
        assert_eq!(sim.reg_file.pc(), 0o2100);
        assert_eq!(sim.psw().current_mode(), Mode::User);
        assert_eq!(sim.psw().priority(), 0);
        assert_eq!(sim.psw().cc(), 0o17);
        assert_eq!(sim.reg_file.sp(), 0o4000);
    }

    #[test]
    fn test_interrupt_dispatch() {
        // INC R0 forever
        let mut sim = sim_at(0o2000, &[0o005200, 0o000776]);
        sim.load(INT_CLOCK.into(), &[0o3000, 0o340]);
        sim.write_psw(0o340);
        sim.interrupt(Interrupt::vectored(INT_CLOCK, 6)).unwrap();

        // priority 7 holds it off
        assert_eq!(sim.step(), Ok(StepOutcome::Continue));
        assert_eq!(sim.reg_file[R0], 1);

        sim.write_psw(0o240);
        let pc = sim.reg_file.pc();
        assert_eq!(sim.step(), Ok(StepOutcome::Interrupt(Interrupt::vectored(INT_CLOCK, 6))));
        // no instruction was fetched
        assert_eq!(sim.reg_file.pc(), pc);
        assert_eq!(sim.reg_file[R0], 1);
        assert!(sim.pending_interrupts().is_empty());
    }

    #[test]
    fn test_wait_idles_until_interrupt() {
        // WAIT
        let mut sim = sim_at(0o2000, &[0o000001]);
        sim.load(INT_CLOCK.into(), &[0o3000, 0o340]);

        sim.step_in().unwrap();
        assert!(sim.is_waiting());
        sim.step_in().unwrap();
        assert_eq!(sim.reg_file.pc(), 0o2002);

        sim.interrupt(Interrupt::vectored(INT_CLOCK, 6)).unwrap();
        sim.step_in().unwrap();
        assert!(!sim.is_waiting());
        assert_eq!(sim.reg_file.pc(), 0o3000);
    }

    #[test]
    fn test_odd_vector_is_fatal() {
        let mut sim = sim_at(0o2000, &[0o000240]);
        assert_eq!(sim.trap_at(0o33), Err(SimErr::OddVector(0o33)));

        // refused before it is ever queued, whatever the processor priority
        sim.write_psw(0o340);
        assert_eq!(sim.interrupt(Interrupt::vectored(0o101, 4)), Err(SimErr::OddVector(0o101)));
        assert!(sim.pending_interrupts().is_empty());
    }

    #[test]
    fn test_double_trap() {
        // the kernel stack points at nonexistent memory
        let mut sim = sim_at(0o2000, &[0o104400]);
        sim.reg_file.set_sp(0o170002);
        assert_eq!(sim.run(), Err(SimErr::DoubleTrap(INT_TRAP)));
    }

    #[test]
    fn test_cpu_registers() {
        let mut sim = sim_at(0o2000, &[
            0o013700, 0o177570, // MOV @#177570, R0
            0o012737, 0o000123, 0o177570, // MOV #123, @#177570
            0o012737, 0o000340, 0o177776, // MOV #340, @#177776
            0o000000,
        ]);
        sim.flags.switch_register = 0o4321;
        sim.run().unwrap();
        assert_eq!(sim.reg_file[R0], 0o4321);
        assert_eq!(sim.display_register(), 0o123);
        assert_eq!(sim.psw().priority(), 7);
    }

    #[test]
    fn test_reset_keeps_devices() {
        let mut sim = sim_at(0o2000, &[0o000000]);
        assert!(sim.bus.devices.add_device(Rk11::new(), RK11_RANGE).is_ok());
        sim.run().unwrap();
        assert!(sim.hit_halt());

        sim.reset();
        assert!(!sim.hit_halt());
        assert_eq!(sim.bus.devices.len(), 1);
        assert_eq!(sim.bus.core.read16(0o2000), Some(0));
    }

    #[test]
    fn test_boot_from_disk() {
        // MOV #1234, R0 ; HALT
        let program: [u16; 3] = [0o012700, 0o1234, 0o000000];
        let image = program.iter().flat_map(|w| w.to_le_bytes()).collect();

        let mut rk = Rk11::new();
        rk.mount(0, DiskImage::from_bytes(image)).unwrap();

        let mut sim = Simulator::new(SimFlags::default());
        assert!(sim.bus.devices.add_device(rk, RK11_RANGE).is_ok());
        sim.load(BOOT_ADDR.into(), &BOOT_ROM);
        sim.reg_file.set_pc(BOOT_START);

        sim.run_with_limit(10_000).unwrap();
        assert!(sim.hit_halt());
        assert_eq!(sim.reg_file[R0], 0o1234);
        assert_eq!(sim.prefetch_pc(), 4);
    }
}
