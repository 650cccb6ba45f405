mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, Cache, Delete, Download, Init, Keys, Upload, Version};
use tessera::process::{init_logging, parse_level};
use tessera::state::{AppState, LogSettings};

command_enum! {
    (Init, Init),
    (Upload, Upload),
    (Download, Download),
    (Delete, Delete),
    (Keys, Keys),
    (Cache, Cache),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // before init there is no config file; defaults apply
    let log = AppState::load(args.config_path.clone())
        .map(|state| state.config.log)
        .unwrap_or_else(|_| LogSettings::default());
    let level = parse_level(args.log_level.as_deref().unwrap_or(&log.level));
    let guards = init_logging(level, log.dir.as_deref());

    let ctx = cli::op::OpContext::new(args.config_path);

    match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            tracing::error!("{}", e);
            // flush the non-blocking writers before exiting
            drop(guards);
            std::process::exit(1);
        }
    }
}
