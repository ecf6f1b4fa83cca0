//! Decodes raw wait statuses into the reason a target went away.
//!
//! [`classify`] is total: every possible status maps to exactly one [`TerminationReason`],
//! with [`TerminationReason::Unknown`] as the fallback.

use core::fmt::{self, Display, Formatter};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// The format of the timestamp in front of every synopsis line
pub const SYNOPSIS_TIME_FORMAT: &str = "%I:%M.%S";

/// Why the target stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Killed by the contained signal, and the kernel wrote a core dump.
    CoreDumped(i32),
    /// Stopped (but not terminated) by the contained signal.
    Stopped(i32),
    /// Terminated by the contained signal.
    Signaled(i32),
    /// Exited on its own with the contained exit code.
    Exited(i32),
    /// The status didn't match any known encoding.
    Unknown,
}

impl TerminationReason {
    /// Returns `true` if the target most likely crashed, i.e. it was taken down by a signal.
    #[must_use]
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::CoreDumped(_) | Self::Signaled(_))
    }
}

impl Display for TerminationReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::CoreDumped(_) => write!(f, "Segmentation fault"),
            Self::Stopped(sig) => write!(f, "Stopped with signal {sig}"),
            Self::Signaled(sig) => write!(f, "Terminated with signal {sig}"),
            Self::Exited(code) => write!(f, "Exit with code - {code}"),
            Self::Unknown => write!(f, "Process died for unknown reason"),
        }
    }
}

/// Classifies a raw `waitpid` status.
///
/// Checks run in this order, first match wins:
/// core dump, stopped, signaled, exited, unknown.
#[cfg(unix)]
#[must_use]
pub fn classify(status: i32) -> TerminationReason {
    // `WCOREDUMP` only looks at the flag bit, which is also set for the `WIFCONTINUED` encoding.
    if libc::WIFSIGNALED(status) && libc::WCOREDUMP(status) {
        TerminationReason::CoreDumped(libc::WTERMSIG(status))
    } else if libc::WIFSTOPPED(status) {
        TerminationReason::Stopped(libc::WSTOPSIG(status))
    } else if libc::WIFSIGNALED(status) {
        TerminationReason::Signaled(libc::WTERMSIG(status))
    } else if libc::WIFEXITED(status) {
        TerminationReason::Exited(libc::WEXITSTATUS(status))
    } else {
        TerminationReason::Unknown
    }
}

/// Classifies a raw exit status.
///
/// There are no signals here, the status is the exit code.
#[cfg(not(unix))]
#[must_use]
pub fn classify(status: i32) -> TerminationReason {
    TerminationReason::Exited(status)
}

/// Everything we know about one finished supervised run.
/// Created once, when the blocking wait returns, and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationReport {
    raw_status: i32,
    reason: TerminationReason,
    synopsis: String,
    timestamp: DateTime<Local>,
}

impl TerminationReport {
    /// Classifies `raw_status` and stamps the report with the current local time.
    #[must_use]
    pub fn new(raw_status: i32) -> Self {
        Self::with_timestamp(raw_status, Local::now())
    }

    /// Classifies `raw_status`, using the given `timestamp`.
    #[must_use]
    pub fn with_timestamp(raw_status: i32, timestamp: DateTime<Local>) -> Self {
        let reason = classify(raw_status);
        let synopsis = format!(
            "[{}] Crash : Reason - {reason}\n",
            timestamp.format(SYNOPSIS_TIME_FORMAT)
        );
        Self {
            raw_status,
            reason,
            synopsis,
            timestamp,
        }
    }

    /// The status as returned by `waitpid`
    #[must_use]
    pub fn raw_status(&self) -> i32 {
        self.raw_status
    }

    /// The decoded reason
    #[must_use]
    pub fn reason(&self) -> TerminationReason {
        self.reason
    }

    /// The line that ends up in the crash log, including the trailing newline
    #[must_use]
    pub fn synopsis(&self) -> &str {
        &self.synopsis
    }

    /// When the wait returned
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, TimeZone};

    use crate::exit_status::{classify, TerminationReason, TerminationReport};

    /// Builds statuses the way the linux kernel encodes them
    fn exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    fn signaled(sig: i32, core: bool) -> i32 {
        sig | if core { 0x80 } else { 0 }
    }

    fn stopped(sig: i32) -> i32 {
        (sig << 8) | 0x7f
    }

    #[cfg(unix)]
    #[test]
    fn test_exit_codes() {
        for code in 0..=255 {
            let reason = classify(exited(code));
            assert_eq!(reason, TerminationReason::Exited(code));
            assert_eq!(reason.to_string(), format!("Exit with code - {code}"));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_signals_and_core_dumps() {
        for sig in 1..32 {
            let reason = classify(signaled(sig, false));
            assert_eq!(reason, TerminationReason::Signaled(sig));
            assert_eq!(reason.to_string(), format!("Terminated with signal {sig}"));

            // the core flag wins, no matter the signal
            let reason = classify(signaled(sig, true));
            assert_eq!(reason, TerminationReason::CoreDumped(sig));
            assert_eq!(reason.to_string(), "Segmentation fault");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_stopped() {
        for sig in [libc::SIGSTOP, libc::SIGTSTP, libc::SIGTTIN, libc::SIGTTOU] {
            let reason = classify(stopped(sig));
            assert_eq!(reason, TerminationReason::Stopped(sig));
            assert!(!matches!(
                reason,
                TerminationReason::Exited(_) | TerminationReason::Signaled(_)
            ));
            assert_eq!(reason.to_string(), format!("Stopped with signal {sig}"));
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_unknown() {
        // `WIFCONTINUED`
        let reason = classify(0xffff);
        assert_eq!(reason, TerminationReason::Unknown);
        assert_eq!(reason.to_string(), "Process died for unknown reason");
    }

    #[cfg(unix)]
    #[test]
    fn test_report_synopsis() {
        let timestamp = Local.with_ymd_and_hms(2024, 3, 1, 14, 7, 9).unwrap();
        let report = TerminationReport::with_timestamp(signaled(libc::SIGSEGV, true), timestamp);

        assert!(report.reason().is_crash());
        assert_eq!(report.raw_status(), libc::SIGSEGV | 0x80);
        assert_eq!(
            report.synopsis(),
            "[02:07.09] Crash : Reason - Segmentation fault\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_report_serializes_reason() {
        let report = TerminationReport::new(exited(3));
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"Exited\":3"));
        assert!(json.contains("Exit with code - 3"));
    }
}
