//! Build-and-boot verdict runner for an external bisection driver.
//!
//! Builds the kernel, starts the boot launcher (retrying once through the
//! kill ladder if it hangs), watches the console for the boot milestone
//! chain and resolves the run to exactly one of GOOD (exit 0), BAD (exit 1)
//! or SKIP (exit 125).

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;

use kdbtest::boot;
use kdbtest::debugger;
use kdbtest::recovery::{LauncherAttempt, RetryController};
use kdbtest::{finalize, Session, TargetConfig};

#[derive(Parser)]
#[command(name = "verdict")]
#[command(about = "Build-and-boot verdict runner (exit 0=GOOD, 1=BAD, 125=SKIP)")]
struct Cli {
    /// Target description file
    #[arg(long, default_value = "target.toml")]
    config: PathBuf,

    /// Skip the kernel build (boot an existing image)
    #[arg(long)]
    skip_build: bool,

    /// After boot, exercise the NMI debugger entry path too
    #[arg(long)]
    check_nmi: bool,

    /// Mirror all console output to stdout
    #[arg(long)]
    transcript: bool,
}

fn main() {
    let cli = Cli::parse();
    let mut sessions: Vec<Session> = Vec::new();
    let outcome = run(&cli, &mut sessions);
    finalize(outcome, sessions)
}

fn run(cli: &Cli, sessions: &mut Vec<Session>) -> Result<()> {
    let cfg = TargetConfig::load(&cli.config)?;

    if !cli.skip_build {
        println!("{}", "Building kernel...".cyan());
        cfg.build.run()?;
    }

    // No session exists yet; a build break resolves to SKIP before any
    // transport opens.

    if let Some(launcher) = &cfg.launcher {
        println!("{}", "Starting boot launcher...".cyan());
        let mut attempt = LauncherAttempt::new(
            &launcher.command,
            &launcher.ready,
            Duration::from_secs(launcher.timeout_secs),
        );
        let result = RetryController::new().run(&mut attempt);
        if let Some(session) = attempt.take_session() {
            sessions.push(session);
        }
        result?;
    }

    println!("{}", format!("Connecting to {}...", cfg.uart.describe()).cyan());
    let mut uart = Session::connect(&cfg.uart)?;
    uart.set_timeout(cfg.timeout());
    if cli.transcript {
        uart.set_transcript(Box::new(std::io::stdout()));
    }

    println!("{}", "Waiting for boot milestones...".cyan());
    let stages = boot::stages_for(cfg.boot.flavor, &cfg.boot.bootloader);
    let booted = boot::expect_boot(&mut uart, &stages);

    let nmi = if booted.is_ok() && cli.check_nmi {
        println!("{}", "Checking NMI debugger entry...".cyan());
        debugger::interact_nmi(&mut uart)
            .context("cannot interact with NMI debugger")
            .map(|_| ())
    } else {
        Ok(())
    };

    sessions.push(uart);
    booted?;
    nmi?;

    println!("{}", "Observed all boot milestones".green());
    Ok(())
}
