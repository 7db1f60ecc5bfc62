mod commands;

use clap::{Args, Parser, Subcommand};
use veneer_core::priority::ProcessPriority;

#[derive(Parser)]
#[command(
    name = "veneer",
    version,
    about = "Run any application as a native title of your gaming platform"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[cfg_attr(not(windows), allow(dead_code))]
enum Commands {
    /// Start a session for a target
    Run(RunArgs),
    /// End the running session
    Stop,
    /// Show whether a session is running
    Status,
    /// Print the running session's effective configuration
    Settings,
    /// Print the process ids the running session supervises
    Pids,
    /// Change the running session's process priority
    Priority {
        /// realtime, high, above-normal, normal, below-normal or low
        level: ProcessPriority,
    },
    /// Save this machine's original prologues of functions the gaming
    /// platform hooks, for sessions to restore
    RecordPrologues,
    /// Clean up after a session that exits abnormally (internal)
    #[command(hide = true)]
    Watchdog {
        /// Process id of the session to watch
        pid: u32,
    },
}

#[derive(Args)]
#[cfg_attr(not(windows), allow(dead_code))]
struct RunArgs {
    /// Target name (looked up in the Targets directory) or config file path
    target: Option<String>,
    /// Log everything at trace level
    #[arg(long)]
    extended_logging: bool,
    /// Leave launcher processes out of the supervised set
    #[arg(long)]
    ignore_launcher: bool,
    /// Use a regular window instead of a fullscreen one
    #[arg(long = "window")]
    window_mode: bool,
    /// Don't start the cleanup watchdog
    #[arg(long)]
    disable_watchdog: bool,
}

#[cfg(windows)]
fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => commands::run::execute(args),
        Commands::Stop => commands::stop::execute(),
        Commands::Status => commands::status::execute(),
        Commands::Settings => commands::query::settings(),
        Commands::Pids => commands::query::pids(),
        Commands::Priority { level } => commands::query::set_priority(level),
        Commands::RecordPrologues => commands::record::execute(),
        Commands::Watchdog { pid } => {
            commands::watchdog::execute(pid);
            Ok(())
        }
    }
}

#[cfg(not(windows))]
fn dispatch(_command: Commands) -> anyhow::Result<()> {
    anyhow::bail!("Veneer sessions need Windows")
}

fn main() -> anyhow::Result<()> {
    dispatch(Cli::parse().command)
}
