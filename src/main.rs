use std::process::ExitCode;

use clap::Parser;
use log::LevelFilter;

use pixelsel::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    let level = if args.verbose { LevelFilter::Debug } else { LevelFilter::Info };
    logger::init(args.log.as_deref(), level);

    cli::run(args)
}
