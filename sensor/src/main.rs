use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::{
    app::App,
    args::RunArgs,
    process::ProcessArgs,
};

mod app;
mod args;
mod control;
mod process;
mod sink;

/// Captures CSI and FTM measurements from Intel iwlwifi adapters and
/// injects frames to measure on.
#[derive(Debug, Parser)]
#[command(version, about, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interpolate, calibrate or convert a saved capture
    Process(ProcessArgs),
}

/// `RUST_LOG` wins, otherwise verbose runs log at debug level and quiet
/// runs only report errors.
fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "error" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Process(args)) => {
            init_tracing(args.verbose);
            process::run(&args)
        }
        None => {
            init_tracing(cli.run.verbose);
            cli.run.validate()?;
            App::new(cli.run).run()
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn process_subcommand() {
        let cli = Cli::try_parse_from([
            "sensor",
            "process",
            "in.dat",
            "-o",
            "out.csv",
            "--interpolation",
            "cubic",
            "--csv",
        ])
        .unwrap();
        let Some(Command::Process(args)) = cli.command else {
            panic!("not the process subcommand");
        };
        assert_eq!(
            args.pipeline().interpolation,
            Some(csi::proc::Interpolation::Cubic)
        );
        assert!(args.csv && !args.calibrate);
    }

    #[test]
    fn run_options_without_subcommand() {
        let cli = Cli::try_parse_from(["sensor", "-m", "inject", "-f", "5200"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.frequency, 5200);
        assert_eq!(cli.run.mode, args::Mode::Inject);
    }
}
