//! The monitor context shared between the supervisor and the fuzzing loop.
//!
//! The supervisor is the only writer of the synopsis slot. The caller should only read it after
//! the supervised run finished, e.g. after joining the thread returned by
//! [`crate::TargetSupervisor::start`].

use core::sync::atomic::{AtomicU64, Ordering};
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

/// What the supervisor needs from the surrounding process monitor.
pub trait ProcessMonitor: Send + Sync {
    /// The crash log, synopses get appended to it
    fn crash_filename(&self) -> &Path;

    /// If set, core dumps get moved into this directory
    fn coredump_dir(&self) -> Option<&Path>;

    /// The number of the current test case, used to name relocated core dumps
    fn test_number(&self) -> u64;

    /// The synopsis of the last supervised run, if there was one
    fn last_synopsis(&self) -> Option<String>;

    /// Overwrites the synopsis slot
    fn set_last_synopsis(&self, synopsis: String);

    /// Logs a notification from the supervisor, like the pid we attached to
    fn log(&self, msg: &str) {
        log::info!("{msg}");
    }
}

/// The default [`ProcessMonitor`], holding everything in memory.
#[derive(Debug)]
pub struct StdProcessMonitor {
    crash_filename: PathBuf,
    coredump_dir: Option<PathBuf>,
    test_number: AtomicU64,
    last_synopsis: Mutex<Option<String>>,
}

impl StdProcessMonitor {
    /// Creates a new [`StdProcessMonitor`] appending to `crash_filename`
    #[must_use]
    pub fn new<P: AsRef<Path>>(crash_filename: P) -> Self {
        Self {
            crash_filename: crash_filename.as_ref().to_owned(),
            coredump_dir: None,
            test_number: AtomicU64::new(0),
            last_synopsis: Mutex::new(None),
        }
    }

    /// Move core dumps into `dir`
    #[must_use]
    pub fn with_coredump_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.coredump_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Sets the current test case number
    pub fn set_test_number(&self, test_number: u64) {
        self.test_number.store(test_number, Ordering::Release);
    }

    /// Moves on to the next test case, returning its number
    pub fn next_test_number(&self) -> u64 {
        self.test_number.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl ProcessMonitor for StdProcessMonitor {
    fn crash_filename(&self) -> &Path {
        &self.crash_filename
    }

    fn coredump_dir(&self) -> Option<&Path> {
        self.coredump_dir.as_deref()
    }

    fn test_number(&self) -> u64 {
        self.test_number.load(Ordering::Acquire)
    }

    fn last_synopsis(&self) -> Option<String> {
        self.last_synopsis.lock().unwrap().clone()
    }

    fn set_last_synopsis(&self, synopsis: String) {
        *self.last_synopsis.lock().unwrap() = Some(synopsis);
    }
}
