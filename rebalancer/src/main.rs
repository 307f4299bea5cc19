//! CLI entry point for the rebal portfolio rebalancer.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::debug;

use rebal::config::Config;
use rebal::consent::StdinPrompt;
use rebal::error::Error;
use rebal::execution::{self, RunOptions};
use rebal::target::TargetBook;
use rebal_broker::calendar::WeeklyCalendar;
use rebal_broker::keepalive::Keepalive;
use rebal_broker::paper::PaperGateway;

#[derive(Parser)]
#[command(name = "rebal")]
#[command(about = "Portfolio rebalancer: target allocations -> broker orders")]
#[command(version)]
struct Cli {
    /// Path to config.toml
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile against the broker and interactively place orders
    Run {
        /// Path to target.json
        target: PathBuf,

        /// Compute and report only; cancel and place nothing
        #[arg(long)]
        dry_run: bool,

        /// Start with confirm-all consent (large orders still get a
        /// manual review pass)
        #[arg(long)]
        force: bool,

        /// Operate on all exchanges regardless of trading hours
        #[arg(long)]
        all_exchanges: bool,

        /// Skip reconciliation and order the full target quantities
        #[arg(long)]
        buy_all: bool,
    },

    /// Show current broker positions
    Positions,

    /// Check gateway connectivity
    Status,

    /// Cancel every open order on the account
    CancelAll {
        /// Operate on all exchanges regardless of trading hours
        #[arg(long)]
        all_exchanges: bool,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config: {e}");
            process::exit(1);
        }
    };

    let gateway = match PaperGateway::load(std::path::Path::new(&config.gateway.state_file)) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Error loading gateway state: {e}");
            process::exit(1);
        }
    };

    let calendar = WeeklyCalendar::new().assume_open(config.calendar.assume_open.iter());

    // Heartbeat so a long interactive session does not idle out. Runs
    // on its own thread and never touches reconciliation state.
    let _keepalive = Keepalive::spawn(
        Duration::from_secs(config.gateway.keepalive_interval_secs),
        || debug!("keepalive tick"),
    );

    let result = match cli.command {
        Command::Run {
            target,
            dry_run,
            force,
            all_exchanges,
            buy_all,
        } => {
            let book = match TargetBook::load(&target) {
                Ok(b) => b,
                Err(e) => {
                    eprintln!("Error loading target book: {e}");
                    process::exit(1);
                }
            };
            let opts = RunOptions {
                dry_run,
                force,
                all_exchanges,
                buy_all,
                target_file: target.display().to_string(),
            };
            execution::run(
                &gateway,
                &gateway,
                &calendar,
                &config,
                &book,
                &opts,
                &mut StdinPrompt,
            )
            .map(|_| ())
        }
        Command::Positions => execution::show_positions(&gateway),
        Command::Status => execution::check_status(&gateway),
        Command::CancelAll { all_exchanges } => {
            execution::cancel_all_orders(&gateway, &calendar, all_exchanges, &mut StdinPrompt)
                .map(|_| ())
        }
    };

    if let Err(e) = result {
        match &e {
            Error::Aborted(msg) => {
                eprintln!("{msg}");
                process::exit(0);
            }
            _ => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        }
    }
}
