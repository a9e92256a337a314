//! hlog - tail headless task logs
//!
//! Usage:
//!   hlog urls <instance>           List log endpoints of an instance's tasks
//!   hlog tail <instance> <task>    Follow a task's log until it ends

mod commands;
mod style;

use anyhow::Result;
use clap::{Parser, Subcommand};
use style::print_error;

#[derive(Parser)]
#[command(name = "hlog")]
#[command(about = "Tail headless task logs")]
#[command(version)]
struct Cli {
    /// Log server URL
    #[arg(
        short,
        long,
        env = "HEADLESS_LOG_SERVER",
        default_value = "http://localhost:8080",
        global = true
    )]
    server: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the log endpoint of every task of an instance
    Urls {
        /// Instance ID
        instance: String,
    },

    /// Follow one task's log until it ends
    #[command(visible_alias = "t")]
    Tail {
        /// Instance ID
        instance: String,

        /// Task ID
        task: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "headless_logs=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result: Result<()> = match cli.command {
        Commands::Urls { instance } => commands::urls::run(&cli.server, &instance).await,
        Commands::Tail { instance, task } => {
            commands::tail::run(&cli.server, &instance, &task).await
        }
    };

    if let Err(e) = result {
        print_error(&format!("{}", e));
        std::process::exit(1);
    }
}
