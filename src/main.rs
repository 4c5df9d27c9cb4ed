//! Modbuster - Modbus TCP diagnostic tool
//!
//! Read and write registers/coils, enumerate supported function codes and
//! run diagnostics against ICS/SCADA devices.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use modbuster::commands;
use modbuster::config;
use modbuster::output::Console;

mod cli;

use cli::{Cli, Command};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the operator lines
    let default_filter = if cli.verbose { "modbuster=debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    print_banner();

    let mut console = Console::stdout(cli.verbose);
    match run(cli, &mut console).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            console.failure(format_args!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, console: &mut Console) -> Result<()> {
    let settings = cli.apply(config::load_settings()?)?;

    match cli.command {
        Command::Read {
            host,
            address,
            count,
        } => commands::read(console, &settings.target(host), address, count).await,
        Command::Write {
            host,
            address,
            values,
        } => commands::write(console, &settings.target(host), address, &values).await,
        Command::Getfunctions { host } => {
            commands::getfunctions(console, &settings.target(host)).await?;
            Ok(())
        }
        Command::Diag { host, flags } => {
            commands::diag(console, &settings.target(host), &flags.selected()).await?;
            Ok(())
        }
    }
}

fn print_banner() {
    println!(
        r#"
    ╔═══════════════════════════════════════════╗
    ║   MODBUSTER                               ║
    ║   Busting ICS/SCADA over modbus           ║
    ╚═══════════════════════════════════════════╝
    "#
    );
}
