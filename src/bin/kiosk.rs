//! Kiosk-mode conformance suite runner.
//!
//! Opens the two shared channels once, runs each registered test between
//! its setup (policy push + debugger entry) and unconditional teardown
//! (pager escape + resume), and reports per-test PASS/FAIL.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::time::Instant;

use kdbtest::kiosk::{all_tests, KioskSuite};
use kdbtest::{warn, TargetConfig};

#[derive(Parser)]
#[command(name = "kiosk")]
#[command(about = "kdb kiosk-mode conformance suite")]
struct Cli {
    /// Target description file
    #[arg(long, default_value = "target.toml")]
    config: PathBuf,

    /// Run only tests whose name contains this substring
    #[arg(long)]
    filter: Option<String>,

    /// List tests without running anything
    #[arg(long)]
    list: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.list {
        println!("{}", "kdb kiosk conformance tests".bold());
        for test in all_tests() {
            println!("  {}", test.name);
        }
        return;
    }

    std::process::exit(match run_suite(&cli) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(err) => {
            eprintln!("{:?}", err);
            eprintln!("{}", "suite aborted".red().bold());
            1
        }
    });
}

fn run_suite(cli: &Cli) -> Result<bool> {
    let cfg = TargetConfig::load(&cli.config)?;

    let tests: Vec<_> = all_tests()
        .into_iter()
        .filter(|t| {
            cli.filter
                .as_ref()
                .map(|f| t.name.contains(f.as_str()))
                .unwrap_or(true)
        })
        .collect();
    if tests.is_empty() {
        anyhow::bail!("no tests match the filter");
    }

    println!("{}", "Opening target channels...".cyan());
    let mut suite = KioskSuite::open(&cfg)?;

    let mut passed = 0;
    let mut failed = 0;

    for test in &tests {
        print!("{} {}... ", "▶".cyan(), test.name);
        let start = Instant::now();

        let result = suite
            .setup(test.name)
            .map_err(anyhow::Error::from)
            .and_then(|_| (test.run)(&mut suite));

        // Teardown runs whatever happened: the target must be running
        // again before the next setup talks to it over SSH.
        suite.teardown();

        let secs = start.elapsed().as_secs_f64();
        match result {
            Ok(()) => {
                println!("{} ({:.1}s)", "PASS".green().bold(), secs);
                passed += 1;
            }
            Err(err) => {
                println!("{} ({:.1}s)", "FAIL".red().bold(), secs);
                println!("    {:#}", err);
                failed += 1;
            }
        }
    }

    for mut session in suite.into_sessions() {
        if let Err(err) = session.close() {
            warn(&format!("session close failed: {:#}", err));
        }
    }

    println!();
    if failed == 0 {
        println!("{} All {} tests passed", "✓".green().bold(), passed);
    } else {
        println!("{} {}/{} tests passed", "✗".red().bold(), passed, passed + failed);
    }
    Ok(failed == 0)
}
