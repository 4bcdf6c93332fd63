use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::{Range, RangeInclusive};
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::sim::mem::{CoreMemory, PhysAddr};
use crate::sim::trap::INT_RK;

use super::{Device, Interrupt};

/// Addresses decoded by the RK11 controller.
pub const RK11_RANGE: RangeInclusive<PhysAddr> = 0o777400..=0o777417;

const RKDS: PhysAddr = 0o777400;
const RKER: PhysAddr = 0o777402;
const RKCS: PhysAddr = 0o777404;
const RKWC: PhysAddr = 0o777406;
const RKBA: PhysAddr = 0o777410;
const RKDA: PhysAddr = 0o777412;

// RKCS
const GO: u16 = 1 << 0;
const IE: u16 = 1 << 6;
const RDY: u16 = 1 << 7;
const SCP: u16 = 1 << 13;
const HE: u16 = 1 << 14;
const ERR: u16 = 1 << 15;
const RKCS_READ_ONLY: u16 = 0xf080;

// RKER
const WCE: u16 = 1 << 0;
const NXS: u16 = 1 << 5;
const NXC: u16 = 1 << 6;
const NXD: u16 = 1 << 7;
const NXM: u16 = 1 << 10;
const OVR: u16 = 1 << 14;
const DRE: u16 = 1 << 15;

// RKDS
const DRIVE_READY: u16 = 1 << 6;

const RK_PRIORITY: u8 = 5;

const SECTOR_BYTES: usize = 512;
const SECTOR_WORDS: usize = SECTOR_BYTES / 2;
const SECTORS: u16 = 0o14;
const SURFACES: u16 = 2;
const CYLINDERS: u16 = 0o313;

/// The contents of an RK05 disk pack.
///
/// The image is a flat sequence of 512-byte sectors.
/// If the image was opened from a file, every transfer that writes to the image
/// is also written back to the file.
pub struct DiskImage {
    data: Vec<u8>,
    file: Option<File>
}
impl DiskImage {
    /// Creates an in-memory image.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, file: None }
    }

    /// Opens an image file.
    ///
    /// If the file cannot be opened for writing, it is opened read-only
    /// and writes only change the in-memory copy.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let (mut file, writable) = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(f) => (f, true),
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                warn!(path = %path.display(), "disk image is read-only, writes will not be saved");
                (File::open(path)?, false)
            },
            Err(e) => return Err(e)
        };

        let mut data = vec![];
        file.read_to_end(&mut data)?;
        Ok(Self { data, file: writable.then_some(file) })
    }

    /// The bytes of the image.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reads the little-endian word at the given byte offset.
    /// Past the end of the image, this is zero.
    fn read16(&self, pos: usize) -> u16 {
        match self.data.get(pos..pos + 2) {
            Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
            _ => 0
        }
    }

    /// Writes the little-endian word at the given byte offset, growing the image if needed.
    fn write16(&mut self, pos: usize, data: u16) {
        if self.data.len() < pos + 2 {
            self.data.resize(pos + 2, 0);
        }
        self.data[pos..pos + 2].copy_from_slice(&data.to_le_bytes());
    }

    /// Writes a byte range of the image back to its file.
    fn sync(&mut self, range: Range<usize>) {
        let Some(file) = &mut self.file else { return };
        let Some(bytes) = self.data.get(range.clone()) else { return };

        let result = file.seek(SeekFrom::Start(range.start as u64))
            .and_then(|_| file.write_all(bytes));
        if let Err(e) = result {
            warn!(error = %e, offset = range.start, "failed to write back disk image");
        }
    }
}
impl std::fmt::Debug for DiskImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskImage")
            .field("len", &self.data.len())
            .field("file", &self.file.is_some())
            .finish()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
enum Function {
    ControlReset,
    Write,
    Read,
    WriteCheck,
    Seek,
    ReadCheck,
    DriveReset,
    WriteLock
}
impl Function {
    fn from_rkcs(rkcs: u16) -> Self {
        match (rkcs >> 1) & 0b111 {
            0 => Function::ControlReset,
            1 => Function::Write,
            2 => Function::Read,
            3 => Function::WriteCheck,
            4 => Function::Seek,
            5 => Function::ReadCheck,
            6 => Function::DriveReset,
            _ => Function::WriteLock,
        }
    }
}

/// The RK11 disk controller, with up to eight RK05 drives.
///
/// A command is started by writing RKCS with the GO bit set.
/// Data transfers move one sector per [`Device::step`] by DMA into core memory.
///
/// ```
/// use pdp11::sim::device::{Device, DiskImage, Rk11};
/// use pdp11::sim::mem::CoreMemory;
///
/// let mut image = vec![0; 1024];
/// image[0] = 0o123;
/// let mut rk = Rk11::new();
/// rk.mount(0, DiskImage::from_bytes(image)).unwrap();
///
/// let mut core = CoreMemory::new(&mut 0u16);
/// rk.write16(0o777406, 0o177400); // one sector
/// rk.write16(0o777410, 0o1000);   // into 001000
/// rk.write16(0o777404, 0o5);      // read, go
/// rk.step(&mut core);
///
/// assert_eq!(core.read16(0o1000), Some(0o123));
/// assert_eq!(rk.read16(0o777404), Some(0o204)); // ready, read function
/// ```
#[derive(Debug)]
pub struct Rk11 {
    rkds: u16,
    rker: u16,
    rkcs: u16,
    rkwc: u16,
    rkba: u16,

    drive: u16,
    cylinder: u16,
    surface: u16,
    sector: u16,

    units: [Option<DiskImage>; 8]
}

impl Rk11 {
    /// Creates a controller with no drives mounted.
    pub fn new() -> Self {
        let mut rk = Self {
            rkds: 0, rker: 0, rkcs: 0, rkwc: 0, rkba: 0,
            drive: 0, cylinder: 0, surface: 0, sector: 0,
            units: Default::default()
        };
        rk.reset();
        rk
    }

    /// Mounts a disk image on the given drive.
    ///
    /// # Errors
    /// If the drive number is not 0-7, the image is returned back.
    pub fn mount(&mut self, unit: usize, image: DiskImage) -> Result<(), DiskImage> {
        match self.units.get_mut(unit) {
            Some(slot) => {
                *slot = Some(image);
                Ok(())
            },
            None => Err(image)
        }
    }

    /// Gets the image mounted on the given drive.
    pub fn unit(&self, unit: usize) -> Option<&DiskImage> {
        self.units.get(unit)?.as_ref()
    }

    fn rkda(&self) -> u16 {
        self.drive << 13 | self.cylinder << 5 | self.surface << 4 | self.sector
    }

    /// The physical address the next DMA word goes to (RKBA with the RKCS extension bits).
    fn bus_addr(&self) -> PhysAddr {
        PhysAddr::from(self.rkcs & 0o60) << 12 | PhysAddr::from(self.rkba)
    }
    fn advance_bus_addr(&mut self) {
        self.rkba = self.rkba.wrapping_add(2);
        if self.rkba == 0 {
            let ext = (self.rkcs & 0o60).wrapping_add(0o20) & 0o60;
            self.rkcs = (self.rkcs & !0o60) | ext;
        }
    }

    fn not_ready(&mut self) {
        self.rkds &= !DRIVE_READY;
        self.rkcs &= !RDY;
    }

    /// Finishes the current command.
    fn complete(&mut self) -> Option<Interrupt> {
        self.rkds |= DRIVE_READY;
        self.rkcs |= RDY;
        self.rkcs &= !GO;
        (self.rkcs & IE != 0).then(|| Interrupt::vectored(INT_RK, RK_PRIORITY))
    }

    /// Records an error and finishes the current command.
    fn fail(&mut self, error: u16, hard: bool) -> Option<Interrupt> {
        debug!(rker = format_args!("{:06o}", self.rker | error), rkda = format_args!("{:06o}", self.rkda()), "rk11 error");
        self.rker |= error;
        self.rkcs |= ERR;
        if hard { self.rkcs |= HE };
        self.complete()
    }

    /// Moves the disk address to the next sector.
    ///
    /// This returns false if the address runs off the last cylinder.
    fn next_sector(&mut self) -> bool {
        self.sector += 1;
        if self.sector < SECTORS { return true };
        self.sector = 0;
        self.surface += 1;
        if self.surface < SURFACES { return true };
        self.surface = 0;
        self.cylinder += 1;
        self.cylinder < CYLINDERS
    }

    /// Transfers at most one sector between the drive and core memory.
    fn transfer(&mut self, func: Function, core: &mut CoreMemory) -> Option<Interrupt> {
        let drive = usize::from(self.drive);
        if self.units[drive].is_none() { return self.fail(NXD | DRE, true) };
        if self.cylinder >= CYLINDERS { return self.fail(NXC | DRE, true) };
        if self.sector >= SECTORS { return self.fail(NXS | DRE, true) };
        if self.rkwc == 0 { return self.complete() };
        let Some(mut image) = self.units[drive].take() else { return self.fail(NXD | DRE, true) };

        let start = (usize::from(self.cylinder) * 24 + usize::from(self.surface) * 12 + usize::from(self.sector)) * SECTOR_BYTES;
        trace!(?func, rkwc = self.rkwc, rkba = format_args!("{:06o}", self.rkba), start, "rk11 transfer");

        let mut pos = start;
        let mut error = 0;
        for _ in 0..SECTOR_WORDS {
            if self.rkwc == 0 { break };

            let addr = self.bus_addr();
            match func {
                Function::Write | Function::WriteCheck => {
                    let Some(word) = core.read16(addr) else {
                        error |= NXM;
                        break;
                    };
                    if func == Function::Write {
                        image.write16(pos, word);
                    } else if image.read16(pos) != word {
                        error |= WCE;
                    }
                },
                _ => if !core.write16(addr, image.read16(pos)) {
                    error |= NXM;
                    break;
                }
            }
            pos += 2;
            self.advance_bus_addr();
            self.rkwc = self.rkwc.wrapping_add(1);
        }
        if func == Function::Write && pos > start {
            image.sync(start..pos);
        }
        self.units[drive] = Some(image);

        if error & NXM != 0 { return self.fail(error, true) };
        if error & WCE != 0 { return self.fail(error, false) };
        if !self.next_sector() && self.rkwc != 0 {
            return self.fail(OVR, true);
        }
        match self.rkwc {
            0 => self.complete(),
            _ => None
        }
    }
}
impl Default for Rk11 {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for Rk11 {
    fn read16(&mut self, addr: PhysAddr) -> Option<u16> {
        match addr {
            RKDS => Some(self.rkds),
            RKER => Some(self.rker),
            RKCS => Some(self.rkcs & !GO),
            RKWC => Some(self.rkwc),
            RKBA => Some(self.rkba),
            RKDA => Some(self.rkda()),
            a if RK11_RANGE.contains(&a) => Some(0),
            _ => None
        }
    }

    fn write16(&mut self, addr: PhysAddr, data: u16) -> bool {
        match addr {
            RKDS | RKER => {},
            RKCS => {
                self.rkcs = (data & !RKCS_READ_ONLY) | (self.rkcs & RKCS_READ_ONLY);
                if data & GO != 0 {
                    // a new command clears the previous one's errors
                    self.rker = 0;
                    self.rkcs &= !(ERR | HE | SCP);
                    debug!(function = ?Function::from_rkcs(self.rkcs), rkda = format_args!("{:06o}", self.rkda()), rkwc = self.rkwc, "rk11 command");
                }
            },
            RKWC => self.rkwc = data,
            RKBA => self.rkba = data,
            RKDA => {
                self.drive = data >> 13;
                self.cylinder = (data >> 5) & 0o377;
                self.surface = (data >> 4) & 1;
                self.sector = data & 0o17;
            },
            a if RK11_RANGE.contains(&a) => {},
            _ => return false
        }
        true
    }

    fn reset(&mut self) {
        self.rkds = 0o4700;
        self.rker = 0;
        self.rkcs = 0o200;
        self.rkwc = 0;
        self.rkba = 0;
        self.drive = 0;
        self.cylinder = 0;
        self.surface = 0;
        self.sector = 0;
    }

    fn step(&mut self, core: &mut CoreMemory) -> Option<Interrupt> {
        if self.rkcs & GO == 0 { return None };

        match Function::from_rkcs(self.rkcs) {
            Function::ControlReset => {
                self.reset();
                None
            },
            f @ (Function::Write | Function::Read | Function::WriteCheck) => {
                self.not_ready();
                self.transfer(f, core)
            },
            Function::DriveReset => {
                self.rker = 0;
                self.rkcs |= SCP;
                self.complete()
            },
            Function::Seek => {
                self.rkcs |= SCP;
                self.complete()
            },
            Function::ReadCheck | Function::WriteLock => self.complete(),
        }
    }

    fn _to_sim_device(self, _: super::internals::ToSimDeviceToken) -> super::internals::SimDevice
        where Self: Sized
    {
        super::internals::SimDevice::Disk(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::device::{Device, Interrupt};
    use crate::sim::mem::CoreMemory;
    use crate::sim::trap::INT_RK;

    use super::{DiskImage, Rk11};

    fn image(sectors: usize) -> DiskImage {
        // each word holds its own word index
        let bytes = (0..sectors * 256)
            .flat_map(|i| (i as u16).to_le_bytes())
            .collect();
        DiskImage::from_bytes(bytes)
    }

    #[test]
    fn test_read_multiple_sectors() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, image(4)).unwrap();

        // cylinder 0, surface 0, sector 1, 300 words
        rk.write16(0o777412, 1);
        rk.write16(0o777406, 300u16.wrapping_neg());
        rk.write16(0o777410, 0o10000);
        rk.write16(0o777404, 0o105); // IE, read, GO

        assert_eq!(rk.step(&mut core), None);
        assert_eq!(rk.read16(0o777404), Some(0o104));
        assert_eq!(rk.read16(0o777406), Some(44u16.wrapping_neg()));

        assert_eq!(rk.step(&mut core), Some(Interrupt::vectored(INT_RK, 5)));
        assert_eq!(rk.read16(0o777404), Some(0o304));
        assert_eq!(rk.read16(0o777406), Some(0));
        assert_eq!(rk.read16(0o777410), Some(0o10000 + 600));
        assert_eq!(rk.read16(0o777412), Some(3));

        assert_eq!(core.read16(0o10000), Some(256));
        assert_eq!(core.read16(0o10000 + 598), Some(256 + 299));

        // nothing more happens once the command is done
        assert_eq!(rk.step(&mut core), None);
    }

    #[test]
    fn test_write_extends_image() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, DiskImage::from_bytes(vec![])).unwrap();
        core.write16(0o2000, 0o1234);
        core.write16(0o2002, 0o4321);

        rk.write16(0o777412, 2);
        rk.write16(0o777406, 2u16.wrapping_neg());
        rk.write16(0o777410, 0o2000);
        rk.write16(0o777404, 0o3); // write, GO
        assert_eq!(rk.step(&mut core), None);

        let bytes = rk.unit(0).unwrap().as_bytes();
        assert_eq!(bytes.len(), 2 * 512 + 4);
        assert_eq!(&bytes[1024..], &[0o234, 0o2, 0o321, 0o10]);
        assert_eq!(rk.read16(0o777404), Some(0o202));
    }

    #[test]
    fn test_write_check_mismatch() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, image(1)).unwrap();
        core.write16(0o1000, 0);
        core.write16(0o1002, 5);

        rk.write16(0o777406, 2u16.wrapping_neg());
        rk.write16(0o777410, 0o1000);
        rk.write16(0o777404, 0o7);
        rk.step(&mut core);

        assert_eq!(rk.read16(0o777402), Some(0o1));
        assert_eq!(rk.read16(0o777404).map(|cs| cs & 0o140200), Some(0o100200));
    }

    #[test]
    fn test_missing_drive() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, image(1)).unwrap();

        rk.write16(0o777412, 1 << 13);
        rk.write16(0o777406, 1u16.wrapping_neg());
        rk.write16(0o777404, 0o105);
        assert_eq!(rk.step(&mut core), Some(Interrupt::vectored(INT_RK, 5)));
        assert_eq!(rk.read16(0o777402), Some(0o100200));
        assert_eq!(rk.read16(0o777404), Some(0o140304));

        // a new command clears the errors
        rk.write16(0o777412, 0);
        rk.write16(0o777404, 0o105);
        assert_eq!(rk.read16(0o777402), Some(0));
        rk.step(&mut core);
        assert_eq!(rk.read16(0o777404), Some(0o304));
    }

    #[test]
    fn test_bad_sector() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, image(1)).unwrap();

        rk.write16(0o777412, 0o14);
        rk.write16(0o777406, 1u16.wrapping_neg());
        rk.write16(0o777404, 0o5);
        assert_eq!(rk.step(&mut core), None);
        assert_eq!(rk.read16(0o777402), Some(0o100040));
    }

    #[test]
    fn test_nonexistent_memory() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);
        rk.mount(0, image(1)).unwrap();

        rk.write16(0o777406, 4u16.wrapping_neg());
        rk.write16(0o777410, 0o177774);
        rk.write16(0o777404, 0o65); // extension bits 11, read, GO
        rk.step(&mut core);
        assert_eq!(rk.read16(0o777402), Some(0o2000));
    }

    #[test]
    fn test_seek_and_control_reset() {
        let mut rk = Rk11::new();
        let mut core = CoreMemory::new(&mut 0u16);

        rk.write16(0o777412, 0o1234);
        rk.write16(0o777404, 0o111); // IE, seek, GO
        assert_eq!(rk.step(&mut core), Some(Interrupt::vectored(INT_RK, 5)));
        assert_eq!(rk.read16(0o777404), Some(0o20310));

        rk.write16(0o777404, 0o1);
        assert_eq!(rk.step(&mut core), None);
        assert_eq!(rk.read16(0o777404), Some(0o200));
        assert_eq!(rk.read16(0o777400), Some(0o4700));
        assert_eq!(rk.read16(0o777412), Some(0));
    }

    #[test]
    fn test_read_only_bits() {
        let mut rk = Rk11::new();
        rk.write16(0o777404, 0o170000);
        assert_eq!(rk.read16(0o777404), Some(0o200));
        assert!(!rk.write16(0o777420, 0));
        assert_eq!(rk.read16(0o777420), None);
    }
}
