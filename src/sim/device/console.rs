use std::ops::RangeInclusive;
use std::thread::JoinHandle;

use crossbeam_channel as cbc;
use tracing::trace;

use crate::sim::mem::{CoreMemory, PhysAddr};
use crate::sim::trap::{INT_TTYIN, INT_TTYOUT};

use super::{Device, Interrupt};

/// Addresses decoded by the console.
pub const CONSOLE_RANGE: RangeInclusive<PhysAddr> = 0o777560..=0o777567;

const TKS: PhysAddr = 0o777560;
const TKB: PhysAddr = 0o777562;
const TPS: PhysAddr = 0o777564;
const TPB: PhysAddr = 0o777566;

const DONE: u16 = 1 << 7;
const IE: u16 = 1 << 6;
const CONSOLE_PRIORITY: u8 = 4;
/// Number of device steps a transmitted character takes.
const OUTPUT_DELAY: u8 = 32;

/// A helper struct for [`Console::with_io`],
/// indicating the stream is closed and no more reads/writes will come from it.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// The KL11 console terminal interface.
///
/// The receiver side (TKS, TKB) takes bytes from an input channel
/// and the transmitter side (TPS, TPB) sends bytes to an output channel.
/// Both channels are polled without blocking from [`Device::step`].
///
/// ```
/// use pdp11::sim::device::{Console, Device};
/// use pdp11::sim::mem::CoreMemory;
///
/// let (in_tx, in_rx) = crossbeam_channel::bounded(1);
/// let (out_tx, _out_rx) = crossbeam_channel::bounded(1);
/// let mut console = Console::new(in_rx, out_tx);
/// let mut core = CoreMemory::new(&mut 0u16);
///
/// in_tx.send(b'x').unwrap();
/// console.step(&mut core);
/// assert_eq!(console.read16(0o777560), Some(0o200)); // receiver done
/// assert_eq!(console.read16(0o777562), Some(u16::from(b'x')));
/// assert_eq!(console.read16(0o777560), Some(0));
/// ```
pub struct Console {
    input: cbc::Receiver<u8>,
    output: cbc::Sender<u8>,
    write_handler: Option<JoinHandle<()>>,

    tks: u16,
    tkb: u16,
    tps: u16,
    tpb: u16,
    ready: bool,
    /// A transmitter interrupt held back by a receiver interrupt in the same step.
    tx_pending: bool,
    count: u8
}

impl Console {
    /// Creates a console bound to an input and an output channel.
    pub fn new(input: cbc::Receiver<u8>, output: cbc::Sender<u8>) -> Self {
        let mut console = Self {
            input,
            output,
            write_handler: None,
            tks: 0, tkb: 0, tps: 0, tpb: 0,
            ready: true,
            tx_pending: false,
            count: 0
        };
        console.reset();
        console
    }

    /// Creates a console with the given reader and writer.
    ///
    /// The reader function is called on its own thread each time the console can take another byte.
    /// It should block until a byte is ready, or return `Stop` if there are no more bytes.
    /// The writer function is called on its own thread for every byte the console transmits.
    ///
    /// Each direction is a single-slot channel, so the reader thread
    /// waits until the console has consumed the previous byte.
    ///
    /// Dropping the console waits for the writer thread to write every byte already transmitted.
    /// The reader thread is left alone, as it may be blocked on a read.
    pub fn with_io(
        mut reader: impl FnMut() -> Result<u8, Stop> + Send + 'static,
        mut writer: impl FnMut(u8) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::bounded(1);

        std::thread::spawn(move || loop {
            let Ok(byte) = reader() else { return };
            let Ok(()) = read_tx.send(byte) else { return };
        });
        let write_handler = std::thread::spawn(move || {
            for byte in write_rx {
                let Ok(()) = writer(byte) else { return };
            }
        });

        let mut console = Self::new(read_rx, write_tx);
        console.write_handler = Some(write_handler);
        console
    }

    /// Creates a console reading from stdin and writing to stdout.
    ///
    /// Stdout is flushed after every byte.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::with_io(
            || {
                let mut stdin = io::stdin().lock();
                let Ok(&[byte, ..]) = stdin.fill_buf() else { return Err(Stop) };
                stdin.consume(1);
                Ok(byte)
            },
            |byte| {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&[byte]).map_err(|_| Stop)?;
                stdout.flush().map_err(|_| Stop)
            }
        )
    }

    fn receive(&mut self, byte: u8) -> Option<Interrupt> {
        self.tkb = match byte {
            b'\n' => u16::from(b'\r'),
            b => u16::from(b)
        };
        self.tks |= DONE;
        self.ready = false;
        trace!(byte = self.tkb, "console received");
        (self.tks & IE != 0).then(|| Interrupt::vectored(INT_TTYIN, CONSOLE_PRIORITY))
    }

    /// Hands the byte in TPB to the writer, returning whether it was taken.
    fn transmit(&mut self) -> bool {
        match (self.tpb & 0x7f) as u8 {
            b'\r' => true,
            b => match self.output.try_send(b) {
                Ok(()) => true,
                // nobody is listening, so treat the byte as written
                Err(cbc::TrySendError::Disconnected(_)) => true,
                Err(cbc::TrySendError::Full(_)) => false,
            }
        }
    }

    fn take_input(&mut self) -> u16 {
        if self.tks & DONE == 0 { return 0 };
        self.tks &= 0xff7e;
        self.ready = true;
        self.tkb
    }
}

impl Device for Console {
    fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
        match addr {
            TKS => Some(self.tks),
            TKB => Some(self.take_input()),
            TPS => Some(self.tps),
            TPB => Some(0),
            _ => None
        }
    }

    fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        match addr {
            TKS => self.tks = (self.tks & !IE) | (data & IE),
            TKB => {},
            TPS => self.tps = (self.tps & !IE) | (data & IE),
            TPB => {
                self.tpb = data & 0xff;
                self.tps &= !DONE;
            },
            _ => return false
        }
        true
    }

    fn reset(&mut self) {
        self.tks = 0;
        self.tps = DONE;
        self.tkb = 0;
        self.tpb = 0;
        self.ready = true;
        self.tx_pending = false;
    }

    fn step(&mut self, _core: &mut CoreMemory) -> Option<Interrupt> {
        let mut int = None;
        if self.ready {
            if let Ok(byte) = self.input.try_recv() {
                int = self.receive(byte);
            }
        }

        self.count = self.count.wrapping_add(1);
        if self.count % OUTPUT_DELAY == 0 && self.tps & DONE == 0 && self.transmit() {
            self.tps |= DONE;
            self.tx_pending = self.tps & IE != 0;
        }

        // one interrupt per step, so the transmitter waits for the receiver
        if int.is_none() && std::mem::take(&mut self.tx_pending) && self.tps & IE != 0 {
            int = Some(Interrupt::vectored(INT_TTYOUT, CONSOLE_PRIORITY));
        }
        int
    }

    fn _to_sim_device(self, _: super::internals::ToSimDeviceToken) -> super::internals::SimDevice
        where Self: Sized
    {
        super::internals::SimDevice::Console(self)
    }
}
impl Drop for Console {
    fn drop(&mut self) {
        // Disconnect the output channel, then let the writer drain it.
        let (closed, _) = cbc::bounded(0);
        std::mem::drop(std::mem::replace(&mut self.output, closed));
        if let Some(handler) = self.write_handler.take() {
            let _ = handler.join();
        }
    }
}
impl std::fmt::Debug for Console {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Console")
            .field("tks", &self.tks)
            .field("tkb", &self.tkb)
            .field("tps", &self.tps)
            .field("tpb", &self.tpb)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel as cbc;

    use crate::sim::device::{Device, Interrupt};
    use crate::sim::mem::CoreMemory;
    use crate::sim::trap::{INT_TTYIN, INT_TTYOUT};

    use super::{Console, Stop};

    fn console() -> (Console, cbc::Sender<u8>, cbc::Receiver<u8>) {
        let (in_tx, in_rx) = cbc::bounded(1);
        let (out_tx, out_rx) = cbc::bounded(1);
        (Console::new(in_rx, out_tx), in_tx, out_rx)
    }

    #[test]
    fn test_input_newline_and_interrupt() {
        let (mut con, input, _output) = console();
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(con.write16(0o777560, 0o100));
        input.send(b'\n').unwrap();
        assert_eq!(con.step(&mut core), Some(Interrupt::vectored(INT_TTYIN, 4)));
        assert_eq!(con.read16(0o777560), Some(0o300));
        assert_eq!(con.read16(0o777562), Some(u16::from(b'\r')));
        assert_eq!(con.read16(0o777560), Some(0o100));
    }

    #[test]
    fn test_input_waits_for_buffer() {
        let (mut con, input, _output) = console();
        let mut core = CoreMemory::new(&mut 0u16);

        input.send(b'a').unwrap();
        con.step(&mut core);
        input.send(b'b').unwrap();
        // 'a' has not been read yet, so 'b' stays in the channel
        con.step(&mut core);
        assert_eq!(con.read16(0o777562), Some(u16::from(b'a')));
        con.step(&mut core);
        assert_eq!(con.read16(0o777562), Some(u16::from(b'b')));
    }

    #[test]
    fn test_output_delay() {
        let (mut con, _input, output) = console();
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(con.write16(0o777564, 0o100));
        assert!(con.write16(0o777566, u16::from(b'k')));
        assert_eq!(con.read16(0o777564), Some(0o100));

        for _ in 0..31 {
            assert_eq!(con.step(&mut core), None);
        }
        assert_eq!(con.step(&mut core), Some(Interrupt::vectored(INT_TTYOUT, 4)));
        assert_eq!(con.read16(0o777564), Some(0o300));
        assert_eq!(output.try_recv(), Ok(b'k'));
    }

    #[test]
    fn test_output_interrupt_after_input_interrupt() {
        let (mut con, input, output) = console();
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(con.write16(0o777560, 0o100));
        assert!(con.write16(0o777564, 0o100));
        assert!(con.write16(0o777566, u16::from(b'k')));
        for _ in 0..31 {
            assert_eq!(con.step(&mut core), None);
        }

        // the byte arrives on the step the transmitter finishes
        input.send(b'a').unwrap();
        assert_eq!(con.step(&mut core), Some(Interrupt::vectored(INT_TTYIN, 4)));
        assert_eq!(con.read16(0o777564), Some(0o300));
        assert_eq!(output.try_recv(), Ok(b'k'));

        assert_eq!(con.step(&mut core), Some(Interrupt::vectored(INT_TTYOUT, 4)));
        assert_eq!(con.step(&mut core), None);
    }

    #[test]
    fn test_drop_flushes_output() {
        let (tx, rx) = cbc::unbounded();
        let mut con = Console::with_io(
            || Err(Stop),
            move |byte| {
                std::thread::sleep(Duration::from_millis(50));
                tx.send(byte).map_err(|_| Stop)
            }
        );
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(con.write16(0o777566, u16::from(b'!')));
        for _ in 0..32 {
            con.step(&mut core);
        }
        assert_eq!(con.read16(0o777564), Some(0o200));

        std::mem::drop(con);
        assert_eq!(rx.try_recv(), Ok(b'!'));
    }

    #[test]
    fn test_carriage_return_dropped() {
        let (mut con, _input, output) = console();
        let mut core = CoreMemory::new(&mut 0u16);

        assert!(con.write16(0o777566, u16::from(b'\r')));
        for _ in 0..32 {
            con.step(&mut core);
        }
        assert_eq!(con.read16(0o777564), Some(0o200));
        assert!(output.try_recv().is_err());
    }

    #[test]
    fn test_reset() {
        let (mut con, _input, _output) = console();
        assert!(con.write16(0o777560, 0o177777));
        assert!(con.write16(0o777566, 0o101));
        con.reset();
        assert_eq!(con.read16(0o777560), Some(0));
        assert_eq!(con.read16(0o777564), Some(0o200));
        assert_eq!(con.read16(0o777566), Some(0));
        assert_eq!(con.read16(0o777570), None);
    }
}
