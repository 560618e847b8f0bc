//! ovl CLI - Thumb-2 RAM overlay placement

mod cli;
mod commands;
mod terminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use cli::Cli;

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "ovl=debug"
    } else if cli.silent {
        "ovl=warn"
    } else {
        "ovl=info"
    };
    let filter = match default_level.parse() {
        Ok(directive) => EnvFilter::from_default_env().add_directive(directive),
        Err(_) => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = commands::run_command(&cli);
    std::process::exit(exit_code);
}
