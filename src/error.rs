//! Typed failure taxonomy for the verdict boundary.
//!
//! Everything below the verdict classifier propagates `TargetError` (directly
//! or wrapped in `anyhow` context). The classifier downcasts to decide whether
//! a failure blames the revision under test (BAD) or the environment (SKIP),
//! so the mapping lives in the type, not in string inspection.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TargetError {
    /// Transport could not be opened or its banner never arrived.
    #[error("cannot access {target}: {reason}")]
    Connect { target: String, reason: String },

    /// A build-plan command exited non-zero. Always classified SKIP:
    /// a broken toolchain must not blame the revision under bisection.
    #[error("build command failed (exit {code}): {command}")]
    Build { command: String, code: i32 },

    /// No candidate pattern matched within the session timeout.
    #[error("no match for {patterns:?} within {timeout:?}\nLast output:\n{tail}")]
    ExpectTimeout {
        patterns: Vec<String>,
        timeout: Duration,
        tail: String,
    },

    /// The transport's output stream closed before a pattern matched.
    #[error("output stream closed before match\nLast output:\n{tail}")]
    Eof { tail: String },

    /// A boot milestone was missed; `stage` names the part of the chain
    /// that broke (kernel, buildroot, systemd). The underlying timeout is
    /// kept as the source so the console tail survives into the report.
    #[error("incorrect boot activity messages ({stage})")]
    BootActivity {
        stage: &'static str,
        source: Box<TargetError>,
    },

    /// The boot launcher hung on the original attempt and on the retry.
    #[error("cannot boot")]
    BootFailed,

    /// I/O on a live transport failed mid-session.
    #[error("i/o error on {target}: {reason}")]
    Io { target: String, reason: String },

    /// An expect pattern failed to compile. Programming error at the
    /// call site, not a target failure.
    #[error("invalid expect pattern: {0}")]
    Pattern(String),

    /// Operation on a session after `close()`. Contract violation.
    #[error("session used after close")]
    SessionClosed,
}
