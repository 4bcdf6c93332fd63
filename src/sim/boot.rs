//! The RK05 bootstrap.
//!
//! This is the standard bootstrap loader for the RK11: it reads the first two
//! sectors of drive 0 into memory at address 0, waits for the transfer to
//! finish, and jumps to address 0.
//!
//! ```
//! use pdp11::sim::boot::{BOOT_ADDR, BOOT_ROM, BOOT_START};
//!
//! // the first word is the device name, execution starts after it.
//! assert_eq!(BOOT_ROM[0], 0o042113);
//! assert_eq!(BOOT_START, BOOT_ADDR + 2);
//! ```

/// The address the bootstrap is loaded at.
pub const BOOT_ADDR: u16 = 0o2000;
/// The address execution of the bootstrap starts at.
pub const BOOT_START: u16 = 0o2002;

/// The bootstrap's words.
pub const BOOT_ROM: [u16; 29] = [
    0o042113,           // "KD"
    0o012706, 0o2000,   // MOV #2000, SP
    0o012700, 0o000000, // MOV #0, R0           ; unit
    0o010003,           // MOV R0, R3
    0o000303,           // SWAB R3
    0o006303,           // ASL R3
    0o006303,           // ASL R3
    0o006303,           // ASL R3
    0o006303,           // ASL R3
    0o006303,           // ASL R3               ; R3 = unit << 13
    0o012701, 0o177412, // MOV #RKDA, R1
    0o010311,           // MOV R3, (R1)         ; disk address
    0o005041,           // CLR -(R1)            ; bus address
    0o012741, 0o177000, // MOV #-512, -(R1)     ; word count
    0o012741, 0o000005, // MOV #5, -(R1)        ; read, go
    0o005002,           // CLR R2
    0o005003,           // CLR R3
    0o012704, 0o2020,   // MOV #2020, R4
    0o005005,           // CLR R5
    0o105711,           // TSTB (R1)
    0o100376,           // BPL .-2
    0o105011,           // CLRB (R1)
    0o005007,           // CLR PC
];
