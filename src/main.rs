use std::process::ExitCode;

use clap::Parser;

use chromafe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.verbose);
    log::info!("ChromaFE {} starting", env!("CARGO_PKG_VERSION"));
    if let Some(path) = logger::log_path() {
        log::info!("session log: {}", path.display());
    }

    let code = cli::run(args);
    log::logger().flush();
    code
}
