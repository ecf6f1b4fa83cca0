/*!
* `LibAFL_procmon` supervises a single external fuzzing target.
*
* It launches the target, blocks until the target terminates, classifies the raw wait status
* (normal exit, signal, stop, core dump) and hands a one-line synopsis plus the core-dump
* artifact over to the rest of the fuzzing pipeline.
*
* ```no_run
* use std::sync::Arc;
*
* use libafl_procmon::{
*     LaunchSpec, ReadinessSignal, SendHooks, StdProcessMonitor, SupervisorConfig,
*     TargetSupervisor,
* };
*
* let monitor = Arc::new(StdProcessMonitor::new("crashes.txt"));
* let ready = ReadinessSignal::new();
* let config = SupervisorConfig::builder()
*     .launch(LaunchSpec::new().command(["./target", "--listen", "1337"]))
*     .build();
*
* let supervisor = TargetSupervisor::new(config, monitor.clone(), ready.clone());
* let run = supervisor.start().unwrap();
* ready.wait();
* // ... send test cases ...
* supervisor.stop_target().ok();
* run.join().unwrap().unwrap();
* supervisor.post_send().unwrap();
* ```
*/
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions
)]
#![cfg_attr(not(test), warn(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
))]
#![cfg_attr(test, deny(
    missing_debug_implementations,
    missing_docs,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
    unused_must_use,
))]

pub mod coredump;
pub mod crash_log;
pub mod exit_status;
pub mod launch;
pub mod logger;
pub mod monitor;
pub mod os;
pub mod readiness;
pub mod supervisor;

use core::fmt::{self, Display};
use std::io;

pub use exit_status::{classify, TerminationReason, TerminationReport};
pub use launch::{LaunchError, LaunchSpec};
pub use monitor::{ProcessMonitor, StdProcessMonitor};
pub use readiness::ReadinessSignal;
pub use supervisor::{SendHooks, SupervisorConfig, SupervisorState, TargetSupervisor};

/// Main error struct for `LibAFL_procmon`
#[derive(Debug)]
pub enum Error {
    /// File related error
    File(io::Error),
    /// An OS call failed, with some context on what we tried to do
    OsError(io::Error, String),
    /// One of the launch commands could not be started
    Launch(LaunchError),
    /// You're holding it wrong
    IllegalState(String),
    /// The argument passed to this method or function is not valid
    IllegalArgument(String),
    /// The performed action is not supported on the current platform
    Unsupported(String),
    /// Something else happened
    Unknown(String),
}

impl Error {
    /// File related error
    #[must_use]
    pub fn file(arg: io::Error) -> Self {
        Error::File(arg)
    }
    /// An OS call failed
    #[must_use]
    pub fn os_error<S>(err: io::Error, msg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(err, msg.into())
    }
    /// Wraps the last OS error (errno) together with `msg`
    #[must_use]
    pub fn last_os_error<S>(msg: S) -> Self
    where
        S: Into<String>,
    {
        Error::OsError(io::Error::last_os_error(), msg.into())
    }
    /// A launch command failed to start
    #[must_use]
    pub fn launch(err: LaunchError) -> Self {
        Error::Launch(err)
    }
    /// You're holding it wrong
    #[must_use]
    pub fn illegal_state<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalState(arg.into())
    }
    /// The argument passed to this method or function is not valid
    #[must_use]
    pub fn illegal_argument<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::IllegalArgument(arg.into())
    }
    /// This operation is not supported on the current architecture or platform
    #[must_use]
    pub fn unsupported<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unsupported(arg.into())
    }
    /// Something else happened
    #[must_use]
    pub fn unknown<S>(arg: S) -> Self
    where
        S: Into<String>,
    {
        Error::Unknown(arg.into())
    }

    /// The raw OS error code behind this error, if there is one.
    ///
    /// Meant for diagnostics, e.g. `ESRCH` when killing a target that already exited.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::File(err) | Self::OsError(err, _) => err.raw_os_error(),
            Self::Launch(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::File(err) => write!(f, "File IO failed: {err:?}"),
            Self::OsError(err, s) => write!(f, "OS error: {err}: {s}"),
            Self::Launch(err) => write!(f, "Failed to launch target: {err}"),
            Self::IllegalState(s) => write!(f, "Illegal state: {s}"),
            Self::IllegalArgument(s) => write!(f, "Illegal argument: {s}"),
            Self::Unsupported(s) => write!(
                f,
                "The operation is not supported on the current platform: {s}"
            ),
            Self::Unknown(s) => write!(f, "Unknown error: {s}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::File(err) | Self::OsError(err, _) => Some(err),
            Self::Launch(err) => Some(err),
            _ => None,
        }
    }
}

/// Create a procmon Error from io Error
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::file(err)
    }
}

#[cfg(unix)]
impl From<nix::Error> for Error {
    fn from(err: nix::Error) -> Self {
        Self::os_error(
            io::Error::from_raw_os_error(err as i32),
            format!("Unix error: {err:?}"),
        )
    }
}

impl From<LaunchError> for Error {
    fn from(err: LaunchError) -> Self {
        Self::launch(err)
    }
}
