//! Tri-state verdict classification for an external bisection driver.
//!
//! Exactly one verdict is produced per run. The exit codes are a
//! compatibility surface: `git bisect run` treats 0 as good, 1..=124 as bad
//! and 125 as "cannot test this revision, skip it". A compile break must
//! therefore resolve to SKIP, never BAD, or bisection converges on an
//! innocent revision.

use colored::Colorize;

use crate::error::TargetError;
use crate::session::Session;

/// Classification of one build-and-boot run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Bad(String),
    Skip(String),
}

impl Verdict {
    /// Process exit code consumed by the bisection driver.
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Good => 0,
            Verdict::Bad(_) => 1,
            Verdict::Skip(_) => 125,
        }
    }

    /// The one-line human-readable banner.
    pub fn banner(&self) -> String {
        match self {
            Verdict::Good => "### GOOD ###".to_string(),
            Verdict::Bad(reason) => format!("### BAD: {} ###", reason),
            Verdict::Skip(reason) => format!("### SKIP: {} ###", reason),
        }
    }

    /// Map a failure to its terminal classification.
    ///
    /// Typed errors carry their own verdict; anything that reaches this
    /// boundary unclassified is treated as an infrastructure problem and
    /// skipped, so the process never exits with an ambiguous code.
    pub fn classify(err: &anyhow::Error) -> Verdict {
        match err.downcast_ref::<TargetError>() {
            Some(TargetError::Build { .. }) => Verdict::Skip("cannot compile".to_string()),
            Some(TargetError::Connect { target, .. }) => {
                Verdict::Bad(format!("cannot access {}", target))
            }
            Some(TargetError::BootActivity { stage, .. }) => {
                Verdict::Bad(format!("incorrect boot activity messages ({})", stage))
            }
            Some(TargetError::BootFailed) => Verdict::Bad("cannot boot".to_string()),
            Some(
                TargetError::ExpectTimeout { .. }
                | TargetError::Eof { .. }
                | TargetError::Io { .. }
                | TargetError::SessionClosed
                | TargetError::Pattern(_),
            ) => Verdict::Bad(format!("{:#}", err)),
            None => Verdict::Skip(format!("unexpected failure: {:#}", err)),
        }
    }
}

/// Report a warning and continue.
pub fn warn(msg: &str) {
    eprintln!("{}", format!("### WARNING: {} ###", msg).yellow());
}

/// Produce the run's single verdict and terminate the process.
///
/// Every session handed in is closed, in order, on every path; a close
/// failure on one session does not prevent closing the rest. The failure
/// chain is printed before the banner so transcripts keep the detail the
/// one-liner drops.
pub fn finalize(outcome: anyhow::Result<()>, sessions: Vec<Session>) -> ! {
    let verdict = match outcome {
        Ok(()) => Verdict::Good,
        Err(err) => {
            eprintln!("{:?}", err);
            Verdict::classify(&err)
        }
    };

    for mut session in sessions {
        if let Err(err) = session.close() {
            warn(&format!("session close failed: {:#}", err));
        }
    }

    let banner = verdict.banner();
    match verdict {
        Verdict::Good => println!("\n{}", banner.green().bold()),
        Verdict::Bad(_) => println!("\n{}", banner.red().bold()),
        Verdict::Skip(_) => println!("\n{}", banner.yellow().bold()),
    }
    std::process::exit(verdict.exit_code());
}
