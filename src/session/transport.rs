//! Interactive transport sessions.
//!
//! Wraps one text-oriented channel (serial line via socat, telnet socket,
//! SSH shell, or a spawned boot-launcher console) behind a uniform
//! send/expect/close contract. A reader thread feeds raw output chunks into
//! an `mpsc` channel; the expect engine accumulates and matches them.
//!
//! A session is exclusively owned by whoever opened it and cannot be reused
//! after `close()`. Closing is safe to call during error unwinding and a
//! second close is a no-op.

use std::io::{Read, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use super::expect::{wait_for_match, Alt};
use crate::error::TargetError;

/// Default per-expect timeout; matches the interactive timeout the kiosk
/// suite runs with.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Description of one interactive channel to the target.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSpec {
    /// Serial device, accessed through socat in raw mode.
    Serial { device: String, baud: u32 },
    /// Telnet socket, typically a terminal server in front of a UART.
    Telnet { host: String, port: u16 },
    /// SSH shell on the target. Credentials are resolved by the ambient
    /// ssh configuration (agent / key files), not by this crate.
    Ssh { host: String, user: String },
    /// An external boot launcher (simulator, emulator, flasher) whose
    /// console is the spawned process's stdio.
    Launcher { command: String },
}

impl TransportSpec {
    /// Human-readable target name, used in connect failure reports.
    pub fn describe(&self) -> String {
        match self {
            TransportSpec::Serial { device, baud } => format!("serial {} @{}", device, baud),
            TransportSpec::Telnet { host, port } => format!("telnet {}:{}", host, port),
            TransportSpec::Ssh { host, user } => format!("ssh {}@{}", user, host),
            TransportSpec::Launcher { command } => format!("launcher `{}`", command),
        }
    }

    fn command(&self) -> Command {
        match self {
            TransportSpec::Serial { device, baud } => {
                let mut cmd = Command::new("socat");
                cmd.arg("-").arg(format!(
                    "{},raw,echo=0,ispeed={},ospeed={}",
                    device, baud, baud
                ));
                cmd
            }
            TransportSpec::Telnet { host, port } => {
                let mut cmd = Command::new("telnet");
                cmd.arg(host).arg(port.to_string());
                cmd
            }
            TransportSpec::Ssh { host, user } => {
                let mut cmd = Command::new("ssh");
                cmd.args(["-tt", "-o", "StrictHostKeyChecking=no"])
                    .arg(format!("{}@{}", user, host));
                cmd
            }
            TransportSpec::Launcher { command } => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
        }
    }
}

/// One live interactive connection.
pub struct Session {
    target: String,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    rx: Receiver<String>,
    buffer: String,
    timeout: Duration,
    transcript: Option<Box<dyn Write + Send>>,
    closed: bool,
}

impl Session {
    /// Open the transport. Failures name the target so the verdict
    /// classifier can report which channel was unreachable; they never
    /// crash the process directly.
    pub fn connect(spec: &TransportSpec) -> Result<Session, TargetError> {
        let target = spec.describe();
        let connect_err = |reason: String| TargetError::Connect {
            target: target.clone(),
            reason,
        };

        let mut child = spec
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| connect_err(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| connect_err("no stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| connect_err("no stdout pipe".to_string()))?;

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || reader_thread(stdout, tx));

        let mut session = Session {
            target: target.clone(),
            child: Some(child),
            stdin: Some(stdin),
            rx,
            buffer: String::new(),
            timeout: DEFAULT_TIMEOUT,
            transcript: None,
            closed: false,
        };

        // Telnet prints a connection banner before the remote side speaks;
        // not seeing it means the terminal server rejected us.
        if matches!(spec, TransportSpec::Telnet { .. }) {
            session
                .expect("Connected to")
                .and_then(|_| session.expect("Escape character is"))
                .map_err(|e| connect_err(format!("no telnet banner: {}", e)))?;
        }

        Ok(session)
    }

    /// Write raw text to the transport.
    pub fn send(&mut self, text: &str) -> Result<(), TargetError> {
        if self.closed {
            return Err(TargetError::SessionClosed);
        }
        let stdin = self.stdin.as_mut().ok_or(TargetError::SessionClosed)?;
        stdin
            .write_all(text.as_bytes())
            .and_then(|_| stdin.flush())
            .map_err(|e| TargetError::Io {
                target: self.target.clone(),
                reason: e.to_string(),
            })
    }

    /// Write one shell line (newline-terminated).
    pub fn send_line(&mut self, line: &str) -> Result<(), TargetError> {
        self.send(&format!("{}\n", line))
    }

    /// Mandatory single-pattern wait.
    pub fn expect(&mut self, pattern: &str) -> Result<(), TargetError> {
        if self.closed {
            return Err(TargetError::SessionClosed);
        }
        wait_for_match(
            &self.rx,
            &mut self.buffer,
            &mut self.transcript,
            &[pattern],
            self.timeout,
        )
        .map(|_| ())
    }

    /// Resolve an ordered list of named alternatives to the first match.
    pub fn expect_any<T: Copy>(&mut self, alts: &[Alt<'_, T>]) -> Result<T, TargetError> {
        if self.closed {
            return Err(TargetError::SessionClosed);
        }
        let patterns: Vec<&str> = alts.iter().map(|a| a.pattern).collect();
        let idx = wait_for_match(
            &self.rx,
            &mut self.buffer,
            &mut self.transcript,
            &patterns,
            self.timeout,
        )?;
        Ok(alts[idx].tag)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Run `body` with the timeout multiplied by `factor`, restoring the
    /// previous value afterwards, including on early error return. Used
    /// around operations known to cross a slow network link, so the longer
    /// timeout cannot leak into later fast operations.
    pub fn with_timeout_scale<R>(
        &mut self,
        factor: u32,
        body: impl FnOnce(&mut Session) -> Result<R, TargetError>,
    ) -> Result<R, TargetError> {
        let saved = self.timeout;
        self.timeout = saved * factor;
        let result = body(self);
        self.timeout = saved;
        result
    }

    /// Attach a transcript sink receiving every byte read from the
    /// transport, for post-mortem review.
    pub fn set_transcript(&mut self, sink: Box<dyn Write + Send>) {
        self.transcript = Some(sink);
    }

    /// OS pid of the transport child, while the session is open. The
    /// recovery controller signals this during the kill ladder.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Tear down the transport child. Idempotent; all subsequent sends and
    /// expects fail with a session-closed error.
    pub fn close(&mut self) -> anyhow::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            child
                .wait()
                .with_context(|| format!("reaping transport child for {}", self.target))?;
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn reader_thread(mut stdout: ChildStdout, tx: Sender<String>) {
    let mut buf = [0u8; 4096];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                if tx.send(chunk).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scripted(output: &str) -> Session {
        let spec = TransportSpec::Launcher {
            command: format!("printf '{}'", output),
        };
        let mut s = Session::connect(&spec).unwrap();
        s.set_timeout(Duration::from_secs(5));
        s
    }

    #[test]
    fn test_describe_names_the_target() {
        let spec = TransportSpec::Telnet {
            host: "agnes.lan".into(),
            port: 5331,
        };
        assert_eq!(spec.describe(), "telnet agnes.lan:5331");

        let spec = TransportSpec::Serial {
            device: "/dev/ttyUSB0".into(),
            baud: 115200,
        };
        assert_eq!(spec.describe(), "serial /dev/ttyUSB0 @115200");
    }

    #[test]
    fn test_expect_on_spawned_console() {
        let mut s = scripted("hello from the target\\n");
        s.expect("hello from the target").unwrap();
        s.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut s = scripted("x\\n");
        s.close().unwrap();
        s.close().unwrap();
    }

    #[test]
    fn test_send_after_close_fails() {
        let mut s = scripted("x\\n");
        s.close().unwrap();
        assert!(matches!(s.send("q\r"), Err(TargetError::SessionClosed)));
        assert!(matches!(s.expect("x"), Err(TargetError::SessionClosed)));
    }

    #[test]
    fn test_timeout_scale_restores() {
        let mut s = scripted("scaled\\n");
        s.set_timeout(Duration::from_secs(2));
        s.with_timeout_scale(4, |s| {
            assert_eq!(s.timeout(), Duration::from_secs(8));
            s.expect("scaled")
        })
        .unwrap();
        assert_eq!(s.timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_timeout_scale_restores_on_error() {
        let mut s = scripted("nothing useful\\n");
        s.set_timeout(Duration::from_millis(200));
        let result = s.with_timeout_scale(2, |s| s.expect("never appears"));
        assert!(result.is_err());
        assert_eq!(s.timeout(), Duration::from_millis(200));
    }

    #[test]
    fn test_connect_failure_names_target() {
        let spec = TransportSpec::Serial {
            device: "/dev/does-not-exist".into(),
            baud: 115200,
        };
        // socat itself spawns, but the device open fails and the stream
        // closes without output.
        let result = Session::connect(&spec).and_then(|mut s| {
            s.set_timeout(Duration::from_millis(300));
            s.expect("anything")
        });
        assert!(result.is_err());
    }
}
