//! Hung-boot recovery: graduated kill ladder plus exactly one retry.
//!
//! Some launcher tooling ignores the first termination signal, and killing
//! too hard before the soft path has had a chance can leave the probe in a
//! state the retry cannot recover from. The ladder is therefore graduated:
//! soft signal, fixed wait, hard signal (tolerated to fail if the soft one
//! already worked), fixed wait, retry.
//!
//! The controller is an explicit state machine with a structurally bounded
//! attempt count: there is no path through the states that attempts more
//! than twice or runs the ladder more than once per failed attempt.

use std::time::Duration;

use crate::error::TargetError;
use crate::session::{Session, TransportSpec};
use crate::verdict::warn;

/// Seam between the controller and the thing being (re)started, so the
/// ladder can be exercised without a real launcher process.
pub trait BootAttempt {
    /// Start (or restart) the boot and wait for its readiness milestones.
    fn attempt(&mut self) -> Result<(), TargetError>;
    /// Ask the launcher to terminate gracefully.
    fn kill_soft(&mut self) -> Result<(), TargetError>;
    /// Force-terminate the launcher. May fail if the soft kill already
    /// worked; the controller tolerates that.
    fn kill_hard(&mut self) -> Result<(), TargetError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Attempting,
    KillingSoft,
    KillingHard,
    RetryAttempting,
    Done,
}

pub struct RetryController {
    kill_wait: Duration,
    state: RecoveryState,
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryController {
    pub fn new() -> Self {
        Self::with_kill_wait(Duration::from_secs(5))
    }

    /// Controller with a custom wait between kill rungs.
    pub fn with_kill_wait(kill_wait: Duration) -> Self {
        Self {
            kill_wait,
            state: RecoveryState::Attempting,
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Drive the attempt to completion: original try, then on failure one
    /// trip down the kill ladder and exactly one retry. A controller that
    /// has reached `Done` refuses to run again.
    pub fn run<A: BootAttempt>(&mut self, attempt: &mut A) -> Result<(), TargetError> {
        loop {
            match self.state {
                RecoveryState::Attempting => match attempt.attempt() {
                    Ok(()) => {
                        self.state = RecoveryState::Done;
                        return Ok(());
                    }
                    Err(err) => {
                        warn(&format!("cannot boot ({}), retrying", err));
                        self.state = RecoveryState::KillingSoft;
                    }
                },
                RecoveryState::KillingSoft => {
                    if attempt.kill_soft().is_err() {
                        self.state = RecoveryState::Done;
                        return Err(TargetError::BootFailed);
                    }
                    std::thread::sleep(self.kill_wait);
                    self.state = RecoveryState::KillingHard;
                }
                RecoveryState::KillingHard => {
                    // Fails when the soft kill already reaped the launcher.
                    let _ = attempt.kill_hard();
                    std::thread::sleep(self.kill_wait);
                    self.state = RecoveryState::RetryAttempting;
                }
                RecoveryState::RetryAttempting => {
                    let result = attempt.attempt();
                    self.state = RecoveryState::Done;
                    return result.map_err(|_| TargetError::BootFailed);
                }
                RecoveryState::Done => return Err(TargetError::BootFailed),
            }
        }
    }
}

/// Real boot attempt: spawn the external launcher and wait for its
/// readiness milestones on the spawned console.
pub struct LauncherAttempt {
    spec: TransportSpec,
    ready: Vec<String>,
    timeout: Duration,
    session: Option<Session>,
}

impl LauncherAttempt {
    pub fn new(command: &str, ready: &[String], timeout: Duration) -> Self {
        Self {
            spec: TransportSpec::Launcher {
                command: command.to_string(),
            },
            ready: ready.to_vec(),
            timeout,
            session: None,
        }
    }

    /// Hand the launcher console to the caller after a successful run.
    pub fn take_session(&mut self) -> Option<Session> {
        self.session.take()
    }

    fn signal(&self, sig: i32) -> Result<(), TargetError> {
        // Nothing to kill is fine; the ladder may run after a spawn failure.
        let Some(pid) = self.session.as_ref().and_then(|s| s.pid()) else {
            return Ok(());
        };
        let rc = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if rc == 0 {
            Ok(())
        } else {
            Err(TargetError::Io {
                target: "boot launcher".to_string(),
                reason: std::io::Error::last_os_error().to_string(),
            })
        }
    }
}

impl BootAttempt for LauncherAttempt {
    fn attempt(&mut self) -> Result<(), TargetError> {
        if let Some(mut old) = self.session.take() {
            let _ = old.close();
        }
        let mut session = Session::connect(&self.spec)?;
        session.set_timeout(self.timeout);
        // Store before expecting so a hung launcher is still reachable by
        // the kill ladder.
        let session = self.session.insert(session);
        for pattern in &self.ready {
            session.expect(pattern)?;
        }
        Ok(())
    }

    fn kill_soft(&mut self) -> Result<(), TargetError> {
        self.signal(libc::SIGTERM)
    }

    fn kill_hard(&mut self) -> Result<(), TargetError> {
        let result = self.signal(libc::SIGKILL);
        if let Some(mut session) = self.session.take() {
            let _ = session.close();
        }
        result
    }
}
