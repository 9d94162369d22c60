// Entrypoint for the CLI application.
// - Keeps `main` small: load the configuration, parse the arguments and
//   hand them to `cli::run`.
// - Returns `anyhow::Result` so errors print with their context chain.

use amo_cli::cli::{self, config_path_arg, splice_defaults, Cli};
use amo_cli::config::Config;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    // -d wins over RUST_LOG; without either only warnings show.
    let filter = if debug {
        EnvFilter::new("amo_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = Config::load(config_path_arg(&args).as_deref())?;
    let cli = Cli::parse_from(splice_defaults(&args, &config));

    init_logging(cli.debug);
    cli::run(cli, config)
}
