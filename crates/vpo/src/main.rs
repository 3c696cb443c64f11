//! VPO command-line front end.
//!
//! Exit codes: 0 success, 1 generic error or no valid input, 2 policy
//! error, 3 store error, 130 SIGINT, 143 SIGTERM.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;
mod tools;

use cli::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "vpo", about = "Video Policy Orchestrator", version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Job store path (defaults to ~/.vpo/jobs.db)
    #[arg(long, global = true, env = "VPO_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect and manage the job queue
    Jobs {
        #[command(subcommand)]
        command: cli::jobs::JobsCommand,
    },

    /// Queue media files for transcoding under a policy
    Transcode(cli::transcode::TranscodeArgs),

    /// Validate and dry-run policies
    Policy {
        #[command(subcommand)]
        command: cli::policy::PolicyCommand,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = vpo_logging::init_logging("vpo", cli.verbose) {
        eprintln!("warning: logging setup failed: {}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = runtime.block_on(dispatch(cli));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if !e.is_signal() {
                eprintln!("error: {}", e);
            }
            ExitCode::from(e.exit_code())
        }
    }
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let db_path = cli.db.unwrap_or_else(vpo_logging::default_db_path);
    match cli.command {
        Commands::Jobs { command } => cli::jobs::run(command, &db_path).await,
        Commands::Transcode(args) => cli::transcode::run(args, &db_path).await,
        Commands::Policy { command } => cli::policy::run(command).await,
    }
}
