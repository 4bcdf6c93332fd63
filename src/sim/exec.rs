//! Operand resolution and instruction execution for the KB11.

use tracing::{debug, trace};

use crate::ast::{AddrMode, Operand, Reg, Size};
use crate::ast::reg_consts::{R5, R6};
use crate::ast::sim::{DoubleOp, EisOp, SimInstr, SingleOp};

use super::trap::{INT_BUS, INT_DEBUG, INT_EMT, INT_INVAL, INT_IOT, INT_TRAP};
use super::{Mode, Psw, SimErr, Simulator, StepBreak};

/// Where a resolved operand lives.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Loc {
    Reg(Reg),
    /// A virtual address in the current mode's address space.
    Mem(u16),
}

impl Simulator {
    /// Resolves an operand to its location, applying any side effects of its addressing mode
    /// (register stepping, index word fetches, pointer reads).
    fn resolve(&mut self, op: Operand, size: Size) -> Result<Loc, StepBreak> {
        let mode = self.psw.current_mode();
        let r = op.reg;

        let addr = match op.mode {
            AddrMode::Register => return Ok(Loc::Reg(r)),
            AddrMode::RegisterDeferred => self.reg_file[r],
            AddrMode::Autoincrement => {
                let addr = self.reg_file[r];
                self.reg_file[r] = addr.wrapping_add(op.step(size));
                addr
            },
            AddrMode::AutoincrementDeferred => {
                let ptr = self.reg_file[r];
                self.reg_file[r] = ptr.wrapping_add(op.step(size));
                self.read_word(ptr, mode)?
            },
            AddrMode::Autodecrement => {
                let addr = self.reg_file[r].wrapping_sub(op.step(size));
                self.reg_file[r] = addr;
                addr
            },
            AddrMode::AutodecrementDeferred => {
                let ptr = self.reg_file[r].wrapping_sub(op.step(size));
                self.reg_file[r] = ptr;
                self.read_word(ptr, mode)?
            },
            AddrMode::Index => {
                let index = self.fetch()?;
                index.wrapping_add(self.reg_file[r])
            },
            AddrMode::IndexDeferred => {
                let index = self.fetch()?;
                self.read_word(index.wrapping_add(self.reg_file[r]), mode)?
            },
        };
        Ok(Loc::Mem(addr))
    }

    fn read_loc(&mut self, loc: Loc, size: Size) -> Result<u16, StepBreak> {
        let mode = self.psw.current_mode();
        match (loc, size) {
            (Loc::Reg(r), _) => Ok(self.reg_file[r] & size.max()),
            (Loc::Mem(addr), Size::Word) => self.read_word(addr, mode),
            (Loc::Mem(addr), Size::Byte) => self.read_byte(addr, mode),
        }
    }

    /// Writes a value to a location.
    ///
    /// Byte writes to a register only replace its low byte.
    fn write_loc(&mut self, loc: Loc, size: Size, data: u16) -> Result<(), StepBreak> {
        let mode = self.psw.current_mode();
        match (loc, size) {
            (Loc::Reg(r), Size::Word) => self.reg_file[r] = data,
            (Loc::Reg(r), Size::Byte) => self.reg_file[r] = (self.reg_file[r] & 0xff00) | (data & 0xff),
            (Loc::Mem(addr), Size::Word) => self.write_word(addr, mode, data)?,
            (Loc::Mem(addr), Size::Byte) => self.write_byte(addr, mode, data)?,
        }
        Ok(())
    }

    /// Resolves the operand of a jump, which must be in memory.
    fn effective_addr(&mut self, instr: SimInstr, op: Operand) -> Result<u16, StepBreak> {
        match self.resolve(op, Size::Word)? {
            Loc::Mem(addr) => Ok(addr),
            Loc::Reg(_) => Err(SimErr::RegisterOperand(instr).into()),
        }
    }

    /// Sets the condition codes, with N and Z taken from the result.
    fn set_flags(&mut self, size: Size, result: u16, v: bool, c: bool) {
        let result = result & size.max();
        self.psw.set_nzvc(size.is_negative(result), result == 0, v, c);
    }

    /// Fetches, decodes, and executes one instruction.
    pub(super) fn execute(&mut self) -> Result<(), StepBreak> {
        let word = self.fetch()?;
        let Some(instr) = SimInstr::decode(word) else {
            debug!(word = format_args!("{word:06o}"), pc = format_args!("{:06o}", self.instr_addr), "invalid instruction");
            return Err(StepBreak::Trap(INT_INVAL));
        };
        trace!(pc = format_args!("{:06o}", self.instr_addr), %instr, psw = ?self.psw, "exec");

        let kernel = self.psw.current_mode() == Mode::Kernel;
        match instr {
            SimInstr::Halt if kernel => return Err(StepBreak::Halt),
            SimInstr::Halt => return Err(StepBreak::Trap(INT_BUS)),
            SimInstr::Wait => self.waiting = true,
            SimInstr::Rti | SimInstr::Rtt => self.return_from_trap()?,
            SimInstr::Bpt => return Err(StepBreak::Trap(INT_DEBUG)),
            SimInstr::Iot => return Err(StepBreak::Trap(INT_IOT)),
            SimInstr::Reset => if kernel {
                debug!("RESET");
                self.bus.reset();
                self.interrupts.clear();
            },
            SimInstr::Mfpt => return Err(StepBreak::Trap(INT_INVAL)),
            SimInstr::Jmp(dst) => {
                let addr = self.effective_addr(instr, dst)?;
                self.reg_file.set_pc(addr);
            },
            SimInstr::Rts(reg) => {
                self.reg_file.set_pc(self.reg_file[reg]);
                let value = self.pop()?;
                self.reg_file[reg] = value;
            },
            SimInstr::Spl(priority) => if kernel {
                self.psw.set_priority(priority);
            },
            SimInstr::ClearCc(bits) => self.psw.set_cc(self.psw.cc() & !u16::from(bits)),
            SimInstr::SetCc(bits) => self.psw.set_cc(self.psw.cc() | u16::from(bits)),
            SimInstr::Swab(dst) => {
                let loc = self.resolve(dst, Size::Word)?;
                let result = self.read_loc(loc, Size::Word)?.swap_bytes();
                self.write_loc(loc, Size::Word, result)?;
                self.set_flags(Size::Byte, result, false, false);
            },
            SimInstr::Br(cond, offset) => if cond.holds(self.psw.cc()) {
                let pc = self.reg_file.pc().wrapping_add_signed(i16::from(offset) * 2);
                self.reg_file.set_pc(pc);
            },
            SimInstr::Jsr(reg, dst) => {
                let addr = self.effective_addr(instr, dst)?;
                self.push(self.reg_file[reg])?;
                self.reg_file[reg] = self.reg_file.pc();
                self.reg_file.set_pc(addr);
            },
            SimInstr::Single(op, size, dst) => self.single(op, size, dst)?,
            SimInstr::Mark(nn) => {
                let sp = self.reg_file.pc().wrapping_add(2 * u16::from(nn));
                self.reg_file.set_sp(sp);
                self.reg_file.set_pc(self.reg_file[R5]);
                let r5 = self.pop()?;
                self.reg_file[R5] = r5;
            },
            SimInstr::Mfpi(src) => self.move_from_previous(src)?,
            SimInstr::Mtpi(dst) => self.move_to_previous(dst)?,
            SimInstr::Sxt(dst) => {
                let n = self.psw.n();
                let result = if n { 0o177777 } else { 0 };
                let loc = self.resolve(dst, Size::Word)?;
                self.write_loc(loc, Size::Word, result)?;
                self.psw.set_nzvc(n, !n, false, self.psw.c());
            },
            SimInstr::Double(op, size, src, dst) => self.double(op, size, src, dst)?,
            SimInstr::Eis(op, reg, operand) => self.eis(op, reg, operand)?,
            SimInstr::Sob(reg, nn) => {
                let count = self.reg_file[reg].wrapping_sub(1);
                self.reg_file[reg] = count;
                if count != 0 {
                    let pc = self.reg_file.pc().wrapping_sub(2 * u16::from(nn));
                    self.reg_file.set_pc(pc);
                }
            },
            SimInstr::Emt(_) => return Err(StepBreak::Trap(INT_EMT)),
            SimInstr::Trap(_) => return Err(StepBreak::Trap(INT_TRAP)),
            SimInstr::Setd => {},
        }

        Ok(())
    }

    /// `RTI`/`RTT`: pops the PC and PSW.
    ///
    /// Outside kernel mode, the priority and register set are kept and
    /// the mode fields can only be kept or raised.
    fn return_from_trap(&mut self) -> Result<(), StepBreak> {
        let pc = self.pop()?;
        let popped = Psw::new(self.pop()?).get();

        let old = self.psw.get();
        let psw = match self.psw.current_mode() {
            Mode::Kernel => popped,
            _ => (popped & 0o170037) | (old & 0o174340),
        };
        self.reg_file.set_pc(pc);
        self.write_psw(psw);
        Ok(())
    }

    fn single(&mut self, op: SingleOp, size: Size, dst: Operand) -> Result<(), StepBreak> {
        let loc = self.resolve(dst, size)?;
        let d = match op {
            SingleOp::Clr => 0,
            _ => self.read_loc(loc, size)?,
        };

        let (msb, max) = (size.msb(), size.max());
        let carry = self.psw.c();
        let cin = u16::from(carry);

        let (result, v, c) = match op {
            SingleOp::Clr => (0, false, false),
            SingleOp::Com => (!d & max, false, true),
            SingleOp::Inc => {
                let r = d.wrapping_add(1) & max;
                (r, r == msb, carry)
            },
            SingleOp::Dec => (d.wrapping_sub(1) & max, d == msb, carry),
            SingleOp::Neg => {
                let r = d.wrapping_neg() & max;
                (r, r == msb, r != 0)
            },
            SingleOp::Adc => (d.wrapping_add(cin) & max, carry && d == msb - 1, carry && d == max),
            SingleOp::Sbc => (d.wrapping_sub(cin) & max, carry && d == msb, carry && d == 0),
            SingleOp::Tst => (d, false, false),
            SingleOp::Ror => shifted(size, (d >> 1) | if carry { msb } else { 0 }, d & 1 != 0),
            SingleOp::Rol => shifted(size, ((d << 1) | cin) & max, d & msb != 0),
            SingleOp::Asr => shifted(size, (d >> 1) | (d & msb), d & 1 != 0),
            SingleOp::Asl => shifted(size, (d << 1) & max, d & msb != 0),
        };

        if op != SingleOp::Tst {
            self.write_loc(loc, size, result)?;
        }
        self.set_flags(size, result, v, c);
        Ok(())
    }

    fn double(&mut self, op: DoubleOp, size: Size, src: Operand, dst: Operand) -> Result<(), StepBreak> {
        let sloc = self.resolve(src, size)?;
        let s = self.read_loc(sloc, size)?;
        let dloc = self.resolve(dst, size)?;

        let d = match op {
            DoubleOp::Mov => 0,
            _ => self.read_loc(dloc, size)?,
        };

        let (msb, max) = (size.msb(), size.max());
        let carry = self.psw.c();

        let (result, v, c, write) = match op {
            DoubleOp::Mov => (s, false, carry, true),
            DoubleOp::Cmp => {
                let r = s.wrapping_sub(d) & max;
                (r, (s ^ d) & msb != 0 && (r ^ s) & msb != 0, s < d, false)
            },
            DoubleOp::Bit => (s & d, false, carry, false),
            DoubleOp::Bic => (!s & d, false, carry, true),
            DoubleOp::Bis => (s | d, false, carry, true),
            DoubleOp::Add => {
                let sum = u32::from(s) + u32::from(d);
                let r = size.mask(sum);
                (r, (s ^ d) & msb == 0 && (r ^ d) & msb != 0, sum > u32::from(max), true)
            },
            DoubleOp::Sub => {
                let r = d.wrapping_sub(s) & max;
                (r, (s ^ d) & msb != 0 && (r ^ d) & msb != 0, d < s, true)
            },
        };

        if write {
            match (op, size, dloc) {
                // MOVB to a register sign extends
                (DoubleOp::Mov, Size::Byte, Loc::Reg(r)) => self.reg_file[r] = result as u8 as i8 as u16,
                _ => self.write_loc(dloc, size, result)?,
            }
        }
        self.set_flags(size, result, v, c);
        Ok(())
    }

    fn eis(&mut self, op: EisOp, reg: Reg, operand: Operand) -> Result<(), StepBreak> {
        let loc = self.resolve(operand, Size::Word)?;
        let s = self.read_loc(loc, Size::Word)?;

        match op {
            EisOp::Mul => {
                let product = i32::from(self.reg_file[reg] as i16) * i32::from(s as i16);
                self.reg_file[reg] = (product >> 16) as u16;
                self.reg_file[reg.pair()] = product as u16;
                self.psw.set_nzvc(product < 0, product == 0, false, i16::try_from(product).is_err());
            },
            EisOp::Div => {
                let dividend = (u32::from(self.reg_file[reg]) << 16 | u32::from(self.reg_file[reg.pair()])) as i32;
                let divisor = i32::from(s as i16);
                if divisor == 0 {
                    self.psw.set_nzvc(false, false, false, true);
                    return Ok(());
                }

                let quotient = dividend.checked_div(divisor)
                    .filter(|&q| i16::try_from(q).is_ok());
                let Some(quotient) = quotient else {
                    self.psw.set_nzvc(false, false, true, false);
                    return Ok(());
                };

                self.reg_file[reg] = quotient as u16;
                self.reg_file[reg.pair()] = (dividend % divisor) as u16;
                self.psw.set_nzvc(quotient < 0, quotient == 0, dividend == 0, false);
            },
            EisOp::Ash => {
                let value = self.reg_file[reg];
                let (result, c) = match shift_count(s) {
                    0 => (value, false),
                    n if n > 0 => {
                        let wide = u64::from(value) << n;
                        (wide as u16, (wide >> 16) & 1 != 0)
                    },
                    n => {
                        let wide = i64::from(value as i16);
                        ((wide >> -n) as u16, (wide >> (-n - 1)) & 1 != 0)
                    },
                };
                self.reg_file[reg] = result;
                self.set_flags(Size::Word, result, (result ^ value) & 0x8000 != 0, c);
            },
            EisOp::Ashc => {
                let value = u32::from(self.reg_file[reg]) << 16 | u32::from(self.reg_file[reg.pair()]);
                let (result, c) = match shift_count(s) {
                    0 => (value, false),
                    n if n > 0 => {
                        let wide = u64::from(value) << n;
                        (wide as u32, (wide >> 32) & 1 != 0)
                    },
                    n => {
                        let wide = i64::from(value as i32);
                        ((wide >> -n) as u32, (wide >> (-n - 1)) & 1 != 0)
                    },
                };
                self.reg_file[reg] = (result >> 16) as u16;
                self.reg_file[reg.pair()] = result as u16;
                let v = (result ^ value) & 0x8000_0000 != 0;
                self.psw.set_nzvc((result as i32) < 0, result == 0, v, c);
            },
            EisOp::Xor => {
                let result = self.reg_file[reg] ^ s;
                self.write_loc(loc, Size::Word, result)?;
                self.set_flags(Size::Word, result, false, self.psw.c());
            },
        }
        Ok(())
    }

    /// `MFPI`: pushes a word from the previous mode's address space.
    fn move_from_previous(&mut self, src: Operand) -> Result<(), StepBreak> {
        let (cur, prev) = (self.psw.current_mode(), self.psw.previous_mode());
        let value = match self.resolve(src, Size::Word)? {
            Loc::Reg(r) if r == R6 && prev != cur => self.stack_pointers[prev as usize],
            Loc::Reg(r) => self.reg_file[r],
            Loc::Mem(addr) => self.read_word(addr, prev)?,
        };
        self.push(value)?;
        self.set_flags(Size::Word, value, false, self.psw.c());
        Ok(())
    }

    /// `MTPI`: pops a word into the previous mode's address space.
    fn move_to_previous(&mut self, dst: Operand) -> Result<(), StepBreak> {
        let (cur, prev) = (self.psw.current_mode(), self.psw.previous_mode());
        let value = self.pop()?;
        match self.resolve(dst, Size::Word)? {
            Loc::Reg(r) if r == R6 && prev != cur => self.stack_pointers[prev as usize] = value,
            Loc::Reg(r) => self.reg_file[r] = value,
            Loc::Mem(addr) => self.write_word(addr, prev, value)?,
        }
        self.set_flags(Size::Word, value, false, self.psw.c());
        Ok(())
    }
}

/// Result and flags of a one-bit shift or rotate: V is N xor C.
fn shifted(size: Size, result: u16, c: bool) -> (u16, bool, bool) {
    (result, size.is_negative(result) ^ c, c)
}

/// The signed shift count of `ASH`/`ASHC` (-32 to 31).
fn shift_count(src: u16) -> i32 {
    let count = i32::from(src & 0o77);
    match count & 0o40 != 0 {
        true  => count - 0o100,
        false => count,
    }
}
