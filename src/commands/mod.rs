mod run;

#[derive(clap::Subcommand, Debug)]
pub enum Subcommand {
    /// Boot the machine and run it until it halts
    Run(self::run::RunOpt),
}

impl Subcommand {
    /// Run a subcommand
    pub fn exec(self) -> anyhow::Result<()> {
        match self {
            Subcommand::Run(opt) => opt.exec(),
        }
    }
}
