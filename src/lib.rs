//! Hardware-in-the-loop conformance and regression tests for an embedded
//! Linux target: kernel build, boot milestone verdicts for bisection, and
//! the in-kernel debugger's kiosk access-control mode.
//!
//! This library provides the shared infrastructure:
//! - Transport sessions (serial, telnet, ssh shell, launcher console) with
//!   pattern-based expect/send interaction
//! - Boot milestone sequencing and tri-state verdict classification
//! - Hung-boot recovery (graduated kill ladder, one retry)
//! - The kdb interaction protocol and the dual-channel kiosk suite

pub mod boot;
pub mod buildplan;
pub mod config;
pub mod debugger;
pub mod error;
pub mod kiosk;
pub mod recovery;
pub mod session;
pub mod verdict;

// Re-export commonly used items
pub use config::TargetConfig;
pub use error::TargetError;
pub use session::{Alt, Session, TransportSpec};
pub use verdict::{finalize, warn, Verdict};
