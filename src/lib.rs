//! A PDP-11/40 emulator.
//!
//! This models the machine at the instruction level: the KB11 processor,
//! the KT11 memory management unit, the UNIBUS with its I/O page, and
//! the console terminal, RK11 disk controller, and line clock devices.
//!
//! # Usage
//!
//! Machine code is loaded into core memory and executed with the simulator:
//! ```
//! use pdp11::sim::Simulator;
//! use pdp11::ast::reg_consts::{R0, R1};
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.load(0o1000, &[
//!     0o012700, 0o000012, // MOV #12, R0
//!     0o005001,           // CLR R1
//!     0o060001,           // ADD R0, R1
//!     0o077002,           // SOB R0, .-2
//!     0o000000,           // HALT
//! ]);
//! simulator.reg_file.set_pc(0o1000);
//! simulator.run().unwrap(); // <-- Result can be handled accordingly
//!
//! assert_eq!(simulator.reg_file[R1], 55);
//! assert_eq!(simulator.reg_file[R0], 0);
//! ```
//!
//! To boot from a disk, attach the devices, load the [bootstrap](sim::boot) and start it:
//! ```no_run
//! use pdp11::sim::Simulator;
//! use pdp11::sim::boot::{BOOT_ADDR, BOOT_ROM, BOOT_START};
//! use pdp11::sim::device::{Console, DiskImage, LineClock, Rk11};
//! use pdp11::sim::device::{CLOCK_RANGE, CONSOLE_RANGE, RK11_RANGE};
//!
//! let mut rk = Rk11::new();
//! rk.mount(0, DiskImage::open("rk0.img").unwrap()).unwrap();
//!
//! let mut simulator = Simulator::new(Default::default());
//! simulator.bus.devices.add_device(rk, RK11_RANGE).unwrap();
//! simulator.bus.devices.add_device(Console::stdio(), CONSOLE_RANGE).unwrap();
//! simulator.bus.devices.add_device(LineClock::new(), CLOCK_RANGE).unwrap();
//!
//! simulator.load(BOOT_ADDR.into(), &BOOT_ROM);
//! simulator.reg_file.set_pc(BOOT_START);
//! simulator.run().unwrap();
//! ```
//!
//! If more granularity is needed for simulation, there are also step and step-in functions.
//! See the [`sim`] module for more details.
#![warn(missing_docs)]

pub mod ast;
pub mod sim;
