mod cli;
mod commands;
mod config;
mod progress;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use converge::CancelToken;
use std::io;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    /// Tripped by Ctrl-C; runs stop dispatching and wait for in-flight tasks
    pub cancel: CancelToken,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        if handler_token.is_cancelled() {
            // Second interrupt: stop waiting for in-flight tasks
            std::process::exit(130);
        }
        eprintln!("Interrupted, waiting for running tasks to finish (Ctrl-C again to abort)");
        handler_token.cancel();
    })?;

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        cancel,
    };

    match cli.command {
        Command::Apply(args) => commands::apply::run(&ctx, &args),
        Command::Plan(args) => commands::plan::run(&ctx, &args),
        Command::Graph(args) => commands::graph::run(&ctx, &args),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "cloudup", &mut io::stdout());
            Ok(())
        }
    }
}
