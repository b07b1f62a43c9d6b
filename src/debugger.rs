//! Command/response automation against the in-kernel debugger (kdb).
//!
//! The protocol the target speaks: the system runs normally until debugger
//! entry is requested, either in-band on the console (a sysrq break
//! sequence) or out-of-band from the administrative shell (sysrq trigger)
//! or via a non-maskable interrupt break. The target acknowledges with
//! "Entering kdb" and presents the top-level `kdb> ` prompt. Long output
//! drops into a pager ("more> "), advanced a page at a time with space or
//! abandoned with `q`. A `go` command resumes normal execution.
//!
//! Entry triggered from the administrative channel is only synchronized by
//! the explicit wait for the acknowledgement on the debugger channel; the
//! two channels share no clock.

use crate::error::TargetError;
use crate::session::Session;

/// Top-level debugger prompt.
pub const PROMPT: &str = "kdb> ";
/// Pager continuation prompt.
pub const PAGER_PROMPT: &str = "more> ";
/// Acknowledgement that the target is transitioning into the debugger.
pub const ENTERING: &str = "Entering kdb";

/// Pattern for the "type this to enter the debugger" guide line around the
/// NMI break sequence. Boot messages interleave with it character-wise, so
/// the pattern only pins the distinctive characters of `$3#33` in order
/// rather than the literal text.
const NMI_GUIDE: &str = "[$][^3]*3[^#]*#[^3]*3[^3]*3";

/// Wait for the top-level prompt.
pub fn wait_prompt(uart: &mut Session) -> Result<(), TargetError> {
    uart.expect(PROMPT)
}

/// Send one debugger command. kdb wants a carriage return, not a newline.
pub fn command(uart: &mut Session, cmd: &str) -> Result<(), TargetError> {
    uart.send(&format!("{}\r", cmd))
}

/// Send a command and wait for an expected reply in its output.
pub fn command_expect(uart: &mut Session, cmd: &str, reply: &str) -> Result<(), TargetError> {
    command(uart, cmd)?;
    uart.expect(reply)
}

/// Advance the pager by one page.
pub fn pager_advance(uart: &mut Session) -> Result<(), TargetError> {
    uart.send(" ")
}

/// Abandon the pager.
pub fn pager_quit(uart: &mut Session) -> Result<(), TargetError> {
    uart.send("q")
}

/// Resume normal execution.
pub fn resume(uart: &mut Session) -> Result<(), TargetError> {
    command(uart, "go")
}

fn ctrl(c: char) -> char {
    ((c as u8 - b'A') + 1) as char
}

/// The in-band console break sequence (ctrl-B ctrl-R ctrl-K, then the
/// sysrq letter for debugger entry). Relies on the serial-console sysrq
/// handling on the target side.
pub fn break_sequence() -> String {
    format!("{}{}{}g", ctrl('B'), ctrl('R'), ctrl('K'))
}

/// Enter the debugger in-band from the console itself.
pub fn enter_via_break(uart: &mut Session) -> Result<(), TargetError> {
    uart.send(&break_sequence())?;
    uart.expect(ENTERING)?;
    uart.expect(PROMPT)
}

/// Enter the debugger out-of-band: write the sysrq trigger on the
/// administrative shell, then wait for the acknowledgement and prompt on
/// the debugger channel. This cross-channel wait is the only ordering
/// guarantee between the two sessions.
pub fn enter_via_admin(mgr: &mut Session, uart: &mut Session) -> Result<(), TargetError> {
    mgr.send_line("echo g > /proc/sysrq-trigger")?;
    uart.expect(ENTERING)?;
    uart.expect(PROMPT)
}

/// One full round trip through the NMI-triggered entry path: provoke the
/// guide line, send the magic break, land at the prompt, drain the pager
/// and set the target running again.
pub fn interact_nmi(uart: &mut Session) -> Result<(), TargetError> {
    uart.send("\r")?;
    uart.expect(NMI_GUIDE)?;
    uart.send("$3#33\r")?;
    uart.expect("Entering kdb .* due to NonMaskable Interrupt")?;
    uart.expect(PAGER_PROMPT)?;
    uart.send("q\r")?;
    uart.expect(PROMPT)?;
    uart.send("go\r")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    #[test]
    fn test_break_sequence_bytes() {
        let seq: Vec<u8> = break_sequence().bytes().collect();
        assert_eq!(seq, vec![0x02, 0x12, 0x0b, b'g']);
    }

    #[test]
    fn test_nmi_guide_matches_clean_line() {
        let re = Regex::new(NMI_GUIDE).unwrap();
        assert!(re.is_match("Type $3#33 to enter the debugger"));
    }

    #[test]
    fn test_nmi_guide_tolerates_interleaving() {
        // Boot output interleaved character-wise with the guide line.
        let re = Regex::new(NMI_GUIDE).unwrap();
        assert!(re.is_match("$ net up 3 eth0 # ready 3 ... 3"));
    }
}
