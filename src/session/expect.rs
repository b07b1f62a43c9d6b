//! Pattern matching over a live output stream.
//!
//! This module handles the tricky problem of resolving an ordered list of
//! candidate patterns against output that arrives whenever the transport
//! feels like sending it. The core is factored over an `mpsc` receiver plus
//! a string buffer so it can be exercised in tests by pushing scripted
//! output through a channel, with no target hardware attached.
//!
//! # Matching semantics
//!
//! - Candidates are an ordered expectation, not a race: the list is scanned
//!   in order and the first candidate that matches the accumulated buffer
//!   wins, even if a later candidate's text appeared earlier in the stream.
//! - A match consumes the buffer through the end of the matched text;
//!   whatever follows stays queued for the next call.
//! - The timeout is copied from the session per call. On expiry the caller
//!   gets the candidate list and a tail of recent output for diagnostics.

use regex::Regex;
use std::io::Write;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::error::TargetError;

/// How many trailing lines of output to attach to a timeout report.
const TAIL_LINES: usize = 12;

/// One named alternative in an `expect_any` call.
///
/// Call sites define a small enum for the tags so the branch on "which
/// alternative matched" is exhaustive-checkable instead of an index compare.
#[derive(Debug, Clone, Copy)]
pub struct Alt<'p, T> {
    pub tag: T,
    pub pattern: &'p str,
}

impl<'p, T: Copy> Alt<'p, T> {
    pub fn new(tag: T, pattern: &'p str) -> Self {
        Self { tag, pattern }
    }
}

/// Accumulate stream output until one candidate matches or the timeout
/// elapses. Returns the index of the matched candidate.
pub(crate) fn wait_for_match(
    rx: &Receiver<String>,
    buffer: &mut String,
    transcript: &mut Option<Box<dyn Write + Send>>,
    patterns: &[&str],
    timeout: Duration,
) -> Result<usize, TargetError> {
    let regexes: Vec<Regex> = patterns
        .iter()
        .map(|p| Regex::new(p))
        .collect::<Result<_, _>>()
        .map_err(|e| TargetError::Pattern(e.to_string()))?;

    let deadline = Instant::now() + timeout;

    loop {
        // Scan in list order; list priority beats position in the text.
        for (i, re) in regexes.iter().enumerate() {
            if let Some(m) = re.find(buffer) {
                let end = m.end();
                buffer.drain(..end);
                return Ok(i);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(TargetError::ExpectTimeout {
                patterns: patterns.iter().map(|p| p.to_string()).collect(),
                timeout,
                tail: tail_lines(buffer, TAIL_LINES),
            });
        }

        let wait = (deadline - now).min(Duration::from_millis(100));
        match rx.recv_timeout(wait) {
            Ok(chunk) => {
                if let Some(sink) = transcript.as_mut() {
                    let _ = sink.write_all(chunk.as_bytes());
                    let _ = sink.flush();
                }
                buffer.push_str(&chunk);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                // The buffer was already scanned at the top of the loop and
                // nothing more can arrive.
                return Err(TargetError::Eof {
                    tail: tail_lines(buffer, TAIL_LINES),
                });
            }
        }
    }
}

/// Last `n` lines of accumulated output, for failure reports.
pub(crate) fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().rev().take(n).collect();
    lines.into_iter().rev().collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn wait(
        rx: &Receiver<String>,
        buffer: &mut String,
        patterns: &[&str],
        timeout_ms: u64,
    ) -> Result<usize, TargetError> {
        let mut transcript = None;
        wait_for_match(
            rx,
            buffer,
            &mut transcript,
            patterns,
            Duration::from_millis(timeout_ms),
        )
    }

    #[test]
    fn test_single_pattern_match() {
        let (tx, rx) = mpsc::channel();
        tx.send("Booting Linux on physical CPU 0x0\n".to_string()).unwrap();
        let mut buffer = String::new();
        assert_eq!(wait(&rx, &mut buffer, &["Booting Linux"], 500).unwrap(), 0);
    }

    #[test]
    fn test_list_order_beats_text_order() {
        // "Continue Execution" arrives before "Display Memory Contents" in
        // the stream, but the first listed candidate wins once both are in
        // the buffer.
        let (tx, rx) = mpsc::channel();
        tx.send("Continue Execution\nDisplay Memory Contents\n".to_string())
            .unwrap();
        let mut buffer = String::new();
        let idx = wait(
            &rx,
            &mut buffer,
            &["Display Memory Contents", "Continue Execution"],
            500,
        )
        .unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_later_alternative_matches_when_first_is_absent() {
        let (tx, rx) = mpsc::channel();
        tx.send("Continue Execution\n".to_string()).unwrap();
        drop(tx);
        let mut buffer = String::new();
        let idx = wait(
            &rx,
            &mut buffer,
            &["Display Memory Contents", "Continue Execution"],
            500,
        )
        .unwrap();
        assert_eq!(idx, 1);
    }

    #[test]
    fn test_match_consumes_through_end() {
        let (tx, rx) = mpsc::channel();
        tx.send("first marker then second marker\n".to_string()).unwrap();
        let mut buffer = String::new();
        assert_eq!(wait(&rx, &mut buffer, &["first marker"], 500).unwrap(), 0);
        assert!(buffer.starts_with(" then second marker"));
        assert_eq!(wait(&rx, &mut buffer, &["second marker"], 500).unwrap(), 0);
    }

    #[test]
    fn test_already_consumed_text_cannot_rematch() {
        let (tx, rx) = mpsc::channel();
        tx.send("kdb> help output\n".to_string()).unwrap();
        drop(tx);
        let mut buffer = String::new();
        assert_eq!(wait(&rx, &mut buffer, &["kdb> "], 500).unwrap(), 0);
        assert!(wait(&rx, &mut buffer, &["kdb> "], 100).is_err());
    }

    #[test]
    fn test_regex_semantics() {
        let (tx, rx) = mpsc::channel();
        tx.send("io scheduler mq-deadline registered (default)\n".to_string())
            .unwrap();
        let mut buffer = String::new();
        let idx = wait(
            &rx,
            &mut buffer,
            &[r"io scheduler [^ ]* registered .default."],
            500,
        )
        .unwrap();
        assert_eq!(idx, 0);
    }

    #[test]
    fn test_timeout_reports_patterns_and_tail() {
        let (tx, rx) = mpsc::channel();
        tx.send("some unrelated output\n".to_string()).unwrap();
        let mut buffer = String::new();
        let err = wait(&rx, &mut buffer, &["never appears"], 100).unwrap_err();
        match err {
            TargetError::ExpectTimeout { patterns, tail, .. } => {
                assert_eq!(patterns, vec!["never appears".to_string()]);
                assert!(tail.contains("some unrelated output"));
            }
            other => panic!("expected ExpectTimeout, got {:?}", other),
        }
    }

    #[test]
    fn test_disconnect_reports_eof() {
        let (tx, rx) = mpsc::channel::<String>();
        drop(tx);
        let mut buffer = String::new();
        let err = wait(&rx, &mut buffer, &["anything"], 500).unwrap_err();
        assert!(matches!(err, TargetError::Eof { .. }));
    }

    #[test]
    fn test_match_across_chunk_boundary() {
        let (tx, rx) = mpsc::channel();
        tx.send("Freeing unused ".to_string()).unwrap();
        tx.send("kernel memory\n".to_string()).unwrap();
        let mut buffer = String::new();
        assert_eq!(
            wait(&rx, &mut buffer, &["Freeing unused kernel memory"], 500).unwrap(),
            0
        );
    }

    #[test]
    fn test_tail_lines() {
        let text = "a\nb\nc\nd\n";
        assert_eq!(tail_lines(text, 2), "c\nd");
        assert_eq!(tail_lines(text, 10), "a\nb\nc\nd");
    }
}
