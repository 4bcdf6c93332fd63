use std::num::ParseIntError;
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Parser, ValueHint};
use pdp11::sim::boot::{BOOT_ADDR, BOOT_ROM, BOOT_START};
use pdp11::sim::device::{Console, DiskImage, LineClock, Rk11};
use pdp11::sim::device::{CLOCK_RANGE, CONSOLE_RANGE, RK11_RANGE};
use pdp11::sim::{SimFlags, Simulator};
use tracing::{debug, info, warn};

/// Parses an octal address, with or without a leading `0o`.
fn parse_octal(src: &str) -> Result<u16, ParseIntError> {
    u16::from_str_radix(src.trim_start_matches("0o"), 8)
}

#[derive(Parser, Debug)]
pub struct RunOpt {
    /// Address to start executing at, in octal
    #[clap(long, value_parser = parse_octal, default_value = "2002")]
    startaddr: u16,

    /// Disk image to mount as RK05 unit 0
    #[clap(long, value_hint = ValueHint::FilePath)]
    rk0: Option<PathBuf>,

    /// Stop after this many cycles
    #[clap(long)]
    limit: Option<u64>,
}

impl RunOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        let mut rk = Rk11::new();
        if let Some(path) = &self.rk0 {
            let image = DiskImage::open(path)
                .with_context(|| format!("could not open disk image {}", path.display()))?;
            info!(path = %path.display(), bytes = image.as_bytes().len(), "Mounting RK0");
            rk.mount(0, image).map_err(|_| anyhow!("could not mount RK0"))?;
        }

        debug!("Building machine");
        let mut sim = Simulator::new(SimFlags::default());
        let devices = &mut sim.bus.devices;
        devices.add_device(rk, RK11_RANGE)
            .map_err(|_| anyhow!("RK11 registers are already taken"))?;
        devices.add_device(Console::stdio(), CONSOLE_RANGE)
            .map_err(|_| anyhow!("console registers are already taken"))?;
        devices.add_device(LineClock::new(), CLOCK_RANGE)
            .map_err(|_| anyhow!("line clock registers are already taken"))?;

        sim.load(BOOT_ADDR.into(), &BOOT_ROM);
        sim.reg_file.set_pc(self.startaddr);
        if self.startaddr != BOOT_START {
            debug!(start = format_args!("{:06o}", self.startaddr), "Not starting at the bootstrap");
        }

        info!(start = format_args!("{:06o}", self.startaddr), "Running");
        match self.limit {
            Some(limit) => sim.run_with_limit(limit)?,
            None => sim.run()?,
        }

        if !sim.hit_halt() {
            warn!(cycles = sim.cycles, "Cycle limit reached");
        }
        info!(
            pc = format_args!("{:06o}", sim.prefetch_pc()),
            psw = ?sim.psw(),
            instructions = sim.instructions_run,
            cycles = sim.cycles,
            "Stopped"
        );

        // the console finishes writing its output when it is dropped
        std::mem::drop(sim);
        Ok(())
    }
}
