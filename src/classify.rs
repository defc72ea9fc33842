//! Exit classification and failure-pattern detection.

use std::fmt;
use std::process::ExitStatus;

/// Exit codes shells report for children killed by SIGINT, SIGKILL and SIGTERM.
const SIGNAL_EXIT_CODES: [i32; 3] = [130, 137, 143];

/// How a supervised process ended.
#[derive(Debug)]
pub enum ExitOutcome {
    Exited(ExitStatus),
    WaitFailed(std::io::Error),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Exited(status) if status.success())
    }

    /// Whether the process ended because someone asked it to stop.
    pub fn is_expected_termination(&self) -> bool {
        match self {
            ExitOutcome::Exited(status) => {
                if let Some(code) = status.code() {
                    return SIGNAL_EXIT_CODES.contains(&code);
                }
                termination_signal(status).is_some_and(is_stop_signal)
            }
            ExitOutcome::WaitFailed(err) => is_no_child_error(err),
        }
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Exited(status) => match status.code() {
                Some(code) => write!(f, "exit status {}", code),
                None => match termination_signal(status) {
                    Some(signal) => write!(f, "signal: {}", signal_name(signal)),
                    None => write!(f, "{}", status),
                },
            },
            ExitOutcome::WaitFailed(err) => write!(f, "wait: {}", err),
        }
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn is_stop_signal(signal: i32) -> bool {
    matches!(signal, libc::SIGTERM | libc::SIGINT | libc::SIGKILL)
}

#[cfg(not(unix))]
fn is_stop_signal(_signal: i32) -> bool {
    false
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    match signal {
        libc::SIGTERM => "terminated".to_string(),
        libc::SIGINT => "interrupt".to_string(),
        libc::SIGKILL => "killed".to_string(),
        other => other.to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(signal: i32) -> String {
    signal.to_string()
}

// Reaping raced with someone else; the child is gone either way.
#[cfg(unix)]
fn is_no_child_error(err: &std::io::Error) -> bool {
    err.raw_os_error() == Some(libc::ECHILD)
}

#[cfg(not(unix))]
fn is_no_child_error(_err: &std::io::Error) -> bool {
    false
}

/// Per-command substrings that flag an output line as a failure.
#[derive(Debug, Clone, Default)]
pub struct FailurePatterns {
    patterns: Vec<String>,
}

impl FailurePatterns {
    /// Empty patterns are dropped; they would match every line.
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().filter(|p| !p.is_empty()).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Returns the first pattern contained in `line`.
    pub fn first_match(&self, line: &str) -> Option<&str> {
        self.patterns
            .iter()
            .find(|pattern| line.contains(pattern.as_str()))
            .map(String::as_str)
    }
}
