#![forbid(unsafe_code)]

mod cmd;
mod output;

use clap::{CommandFactory, Parser, Subcommand};
use output::{OutputMode, resolve_output_mode};
use std::env;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tl: optimistic mutations for an expense ledger",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output (same as `--format json`).
    #[arg(long, global = true, hide = true)]
    json: bool,

    /// Output format. Defaults to pretty on a terminal and text when piped.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn output_mode(&self) -> OutputMode {
        resolve_output_mode(self.format, self.json)
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        next_help_heading = "Engine",
        about = "Play a scenario file through the engine",
        long_about = "Seed an in-memory cache from a scenario file, run its operations,\n\
                      settle commands as the scenario says, and print the outcomes,\n\
                      pending retries and resulting cache.",
        after_help = "EXAMPLES:\n    # Run a scenario\n    tl run demos/split.json\n\n\
                      # Accept anything left in flight and show only reports\n    tl run demos/split.json --drain --keys report:\n\n\
                      # Stop at the first refused operation\n    tl run demos/split.json --strict --format json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        next_help_heading = "Engine",
        about = "Deterministic simulation campaigns",
        long_about = "Run seeded simulation campaigns that check rollback closure and\n\
                      aggregate conservation, or replay a single seed.",
        after_help = "EXAMPLES:\n    # Run a campaign\n    tl sim run --seeds 100\n\n    # Replay one seed\n    tl sim replay 42"
    )]
    Sim(cmd::sim::SimArgs),

    #[command(
        next_help_heading = "Configuration",
        about = "Show or change configuration",
        long_about = "Show the effective configuration, or set and unset keys in the\n\
                      project (.tally/config.toml) or user config file.",
        after_help = "EXAMPLES:\n    # Show effective config\n    tl config show\n\n\
                      # Turn off violation checks for this project\n    tl config set violations.enabled false\n\n\
                      # Prefer JSON output everywhere\n    tl config set --scope user output json"
    )]
    Config(cmd::config::ConfigArgs),

    #[command(
        next_help_heading = "Configuration",
        about = "Generate shell completions",
        after_help = "EXAMPLES:\n    # Bash\n    tl completions bash > ~/.local/share/bash-completion/completions/tl\n\n\
                      # Zsh\n    tl completions zsh > ~/.zfunc/_tl"
    )]
    Completions(cmd::completions::CompletionsArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TALLY_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose || env::var("DEBUG").is_ok() {
            "tally=debug,info"
        } else {
            "tally=info,warn"
        })
    });

    let format = env::var("TALLY_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if !cli.quiet {
        init_tracing(cli.verbose);
    }

    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let project_root = env::current_dir()?;
    let output = cli.output_mode();

    match cli.command {
        Commands::Run(ref args) => cmd::run::run_scenario(args, output, &project_root),
        Commands::Sim(ref args) => match &args.command {
            cmd::sim::SimCommand::Run(run) => cmd::sim::run_sim_run(run, output),
            cmd::sim::SimCommand::Replay(replay) => cmd::sim::run_sim_replay(replay, output),
        },
        Commands::Config(ref args) => cmd::config::run_config(args, &project_root, output),
        Commands::Completions(ref args) => {
            cmd::completions::run_completions(args.shell, &mut Cli::command())
        }
    }
}
