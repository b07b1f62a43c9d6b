//! Kiosk-mode conformance suite for the in-kernel debugger.
//!
//! The suite is built on two sessions opened once per run and reused by
//! every test: the uart, pointed at the debugger console, and the manager,
//! an SSH shell on the target used to change sysfs settings and trigger
//! debugger entry. Reusing the connections saves a couple of seconds per
//! test, which is what makes small focused test cases affordable.
//!
//! Per-test setup derives the debugger policy from the test's name (names
//! containing "kiosk" run restricted), pushes it over the manager channel
//! and stops the target in the debugger. Teardown unconditionally escapes
//! the pager and resumes execution, so the target is guaranteed running
//! before the next test's setup touches it over SSH, whatever state the
//! test body left behind.

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::config::TargetConfig;
use crate::debugger;
use crate::error::TargetError;
use crate::session::{Alt, Session, TransportSpec};

/// Prompt the manager shell is reset to after login, so prompt waits are
/// unambiguous.
const ADMIN_PROMPT: &str = "KDBTEST# ";

/// Debugger access-control policy, written to the target's cmd_enable
/// parameter. The parameter is a bitmask ordinal, not a boolean: passive
/// inspection is a distinct mode from full restriction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KdbPolicy {
    /// All commands denied.
    Locked,
    /// Read-only inspection commands only.
    PassiveInspection,
    /// Everything allowed.
    FullControl,
}

impl KdbPolicy {
    /// The ordinal written to the access-control parameter.
    pub fn param_value(self) -> u32 {
        match self {
            KdbPolicy::Locked => 0,
            KdbPolicy::PassiveInspection => 0x20,
            KdbPolicy::FullControl => 1,
        }
    }
}

/// Shell line that pushes a policy to the target.
pub fn policy_command(policy: KdbPolicy) -> String {
    format!(
        "echo {} > /sys/module/kdb/parameters/cmd_enable",
        policy.param_value()
    )
}

/// Tests whose name carries the kiosk marker run restricted; everything
/// else runs with full power.
pub fn policy_for_test(name: &str, restricted: KdbPolicy, full: KdbPolicy) -> KdbPolicy {
    if name.to_lowercase().contains("kiosk") {
        restricted
    } else {
        full
    }
}

/// Suite-scoped context: the two shared sessions plus the configured
/// policy values. Passed to every test so the shared lifetime is visible
/// at the call site.
pub struct KioskSuite {
    pub uart: Session,
    pub mgr: Session,
    restricted: KdbPolicy,
    full: KdbPolicy,
}

impl KioskSuite {
    /// Open both channels. The uart is forced back to a running target
    /// first (pager escape plus resume); SSH login hangs otherwise.
    pub fn open(cfg: &TargetConfig) -> Result<Self> {
        let mut uart = Session::connect(&cfg.uart)?;
        uart.set_timeout(cfg.timeout());
        uart.send("q\r")?;
        uart.send("go\r")?;

        let admin = cfg
            .admin
            .as_ref()
            .context("kiosk suite needs an [admin] section in the target config")?;
        let mut mgr = Session::connect(&TransportSpec::Ssh {
            host: admin.host.clone(),
            user: admin.user.clone(),
        })?;
        mgr.set_timeout(cfg.timeout());
        // Reset the remote prompt to something unambiguous. The string is
        // split so the command's own echo cannot satisfy the wait.
        mgr.send_line("export PS1='KDB''TEST# '")?;
        mgr.expect(ADMIN_PROMPT)?;

        Ok(Self {
            uart,
            mgr,
            restricted: cfg.kiosk.restricted,
            full: cfg.kiosk.full,
        })
    }

    /// Hand the sessions back for the final close.
    pub fn into_sessions(self) -> Vec<Session> {
        vec![self.uart, self.mgr]
    }

    /// Suite over pre-opened sessions, for exercising the channel
    /// choreography against scripted consoles.
    #[cfg(test)]
    fn with_sessions(uart: Session, mgr: Session) -> Self {
        Self {
            uart,
            mgr,
            restricted: KdbPolicy::PassiveInspection,
            full: KdbPolicy::FullControl,
        }
    }

    /// Run one administrative shell line to completion.
    pub fn admin_cmd(&mut self, cmd: &str) -> Result<(), TargetError> {
        self.mgr.send_line(cmd)?;
        self.mgr.expect(ADMIN_PROMPT)
    }

    /// Consume one pending prompt on the manager channel.
    ///
    /// The sysrq trigger halts the target inside the write, so its prompt
    /// only arrives after a later `go`. Tests that resume the target must
    /// absorb that deferred prompt here, or every following prompt wait is
    /// satisfied by a stale prompt and stops confirming anything.
    pub fn admin_prompt(&mut self) -> Result<(), TargetError> {
        self.mgr.expect(ADMIN_PROMPT)
    }

    pub fn set_policy(&mut self, policy: KdbPolicy) -> Result<(), TargetError> {
        self.admin_cmd(&policy_command(policy))
    }

    /// Stop the target in the debugger via the administrative trigger.
    pub fn trigger_interrupt(&mut self) -> Result<(), TargetError> {
        debugger::enter_via_admin(&mut self.mgr, &mut self.uart)
    }

    /// Per-test setup: push the name-derived policy, then stop the target.
    pub fn setup(&mut self, test_name: &str) -> Result<(), TargetError> {
        self.set_policy(policy_for_test(test_name, self.restricted, self.full))?;
        self.trigger_interrupt()
    }

    /// Per-test teardown: escape the pager and set the target running.
    /// Send-only and error-tolerant, because it must work from whatever
    /// state the test body (or its failure) left the debugger in.
    pub fn teardown(&mut self) {
        let _ = self.uart.send("q\r");
        let _ = self.uart.send("go\r");
    }

    pub fn command(&mut self, cmd: &str) -> Result<(), TargetError> {
        debugger::command(&mut self.uart, cmd)
    }

    pub fn command_expect(&mut self, cmd: &str, reply: &str) -> Result<(), TargetError> {
        debugger::command_expect(&mut self.uart, cmd, reply)
    }

    pub fn prompt(&mut self) -> Result<(), TargetError> {
        debugger::wait_prompt(&mut self.uart)
    }
}

/// One conformance test. The name drives the policy derivation in setup.
pub struct KioskTest {
    pub name: &'static str,
    pub run: fn(&mut KioskSuite) -> Result<()>,
}

/// The suite, in execution order.
pub fn all_tests() -> Vec<KioskTest> {
    vec![
        KioskTest {
            name: "send_interrupt",
            run: test_send_interrupt,
        },
        KioskTest {
            name: "help",
            run: test_help,
        },
        KioskTest {
            name: "kiosk_help",
            run: test_kiosk_help,
        },
        KioskTest {
            name: "kiosk_display_exception_frame",
            run: test_kiosk_display_exception_frame,
        },
        KioskTest {
            name: "sysrq",
            run: test_sysrq,
        },
        KioskTest {
            name: "kiosk_sysrq",
            run: test_kiosk_sysrq,
        },
    ]
}

/// Which entry the help text leads with; kiosk mode hides the unsafe
/// commands, so the first visible entry shifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HelpFirst {
    DisplayMemory,
    ContinueExecution,
}

fn first_help_entry(s: &mut KioskSuite) -> Result<HelpFirst> {
    s.command("help")?;
    Ok(s.uart.expect_any(&[
        Alt::new(HelpFirst::DisplayMemory, "Display Memory Contents"),
        Alt::new(HelpFirst::ContinueExecution, "Continue Execution"),
    ])?)
}

/// Check the target can be halted with the in-band console break.
fn test_send_interrupt(s: &mut KioskSuite) -> Result<()> {
    s.command("go")?;
    s.admin_cmd("echo 1 > /proc/sys/kernel/sysrq")?;
    debugger::enter_via_break(&mut s.uart)?;
    s.command("go")?;
    debugger::enter_via_break(&mut s.uart)?;
    Ok(())
}

fn test_help(s: &mut KioskSuite) -> Result<()> {
    let first = first_help_entry(s)?;
    if first != HelpFirst::DisplayMemory {
        bail!("full-power help should lead with the memory display entry");
    }
    s.uart.expect("Modify Memory Contents")?;
    s.uart.expect("Continue Execution")?;
    s.uart.expect("Display exception frame")?;
    s.uart.expect(debugger::PAGER_PROMPT)?;
    debugger::pager_quit(&mut s.uart)?;
    s.prompt()?;
    Ok(())
}

fn test_kiosk_help(s: &mut KioskSuite) -> Result<()> {
    let first = first_help_entry(s)?;
    if first != HelpFirst::ContinueExecution {
        bail!("kiosk help leaked an unsafe entry before the safe ones");
    }
    s.uart.expect("Switch to new cpu")?;
    s.uart.expect(debugger::PAGER_PROMPT)?;
    debugger::pager_advance(&mut s.uart)?;
    s.uart.expect("Common kdb debugging")?;
    Ok(())
}

fn test_kiosk_display_exception_frame(s: &mut KioskSuite) -> Result<()> {
    s.command_expect("ef 0xDEDE", "denied")?;
    s.prompt()?;
    Ok(())
}

fn test_sysrq(s: &mut KioskSuite) -> Result<()> {
    s.command_expect("sr h", "SysRq : HELP :")?;
    s.prompt()?;
    s.command_expect("sr 4", "SysRq : Changing Loglevel")?;
    s.prompt()?;

    // The debugger must overcome the sysrq mask. Slightly involved: with
    // sysrq masked we cannot use sysrq itself to enter the debugger, so
    // the mask is flipped from the manager side while the target runs.
    s.command("go")?;
    s.admin_cmd("echo 0 > /proc/sys/kernel/sysrq")?;
    s.trigger_interrupt()?;
    s.command_expect("sr 4", "SysRq : Changing Loglevel")?;
    s.prompt()?;
    s.command("go")?;
    // The trigger's own prompt was deferred until that go.
    s.admin_prompt()?;
    s.admin_cmd("echo 1 > /proc/sys/kernel/sysrq")?;
    Ok(())
}

fn test_kiosk_sysrq(s: &mut KioskSuite) -> Result<()> {
    s.command_expect("sr h", "SysRq : HELP :")?;
    s.prompt()?;
    s.command_expect("sr 4", "SysRq : Changing Loglevel")?;
    s.prompt()?;

    // In kiosk mode the debugger must NOT overcome the sysrq mask.
    s.command("go")?;
    s.admin_cmd("echo 0 > /proc/sys/kernel/sysrq")?;
    s.trigger_interrupt()?;
    s.command_expect("sr 4", "This sysrq operation is disabled")?;
    s.prompt()?;
    s.command("go")?;
    // The trigger's own prompt was deferred until that go.
    s.admin_prompt()?;
    s.admin_cmd("echo 1 > /proc/sys/kernel/sysrq")?;
    Ok(())
}
