//! A tiny stderr logger, prefixing every line with the local wall-clock time.
use chrono::Local;
use log::{LevelFilter, Metadata, Record};

use crate::{exit_status::SYNOPSIS_TIME_FORMAT, Error};

/// The logger instance registered by [`StderrLogger::set_logger`]
pub static PROCMON_STDERR_LOGGER: StderrLogger = StderrLogger::new();

/// A simple logger struct that logs to stderr when used with [`log::set_logger`].
#[derive(Debug, Default)]
pub struct StderrLogger {}

impl StderrLogger {
    /// Create a new [`log::Log`] logger that will write logs to stderr
    #[must_use]
    pub const fn new() -> Self {
        Self {}
    }

    /// Register the stderr logger and let messages up to `level` through.
    pub fn set_logger(level: LevelFilter) -> Result<(), Error> {
        log::set_logger(&PROCMON_STDERR_LOGGER)
            .map_err(|_| Error::unknown("Failed to register logger"))?;
        log::set_max_level(level);
        Ok(())
    }

    fn format(record: &Record) -> String {
        format!(
            "[{}] {}: {}",
            Local::now().format(SYNOPSIS_TIME_FORMAT),
            record.level(),
            record.args()
        )
    }
}

impl log::Log for StderrLogger {
    #[inline]
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!("{}", Self::format(record));
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Record};
    use serial_test::serial;

    use crate::logger::StderrLogger;

    #[test]
    fn test_format() {
        let line = StderrLogger::format(
            &Record::builder()
                .args(format_args!("attached to pid: 1234"))
                .level(Level::Info)
                .build(),
        );
        // "[hh:mm.ss] INFO: ..."
        assert_eq!(line.find(']'), Some(9));
        assert!(line.ends_with("] INFO: attached to pid: 1234"));
    }

    #[test]
    #[serial]
    fn test_set_logger_once() {
        // Another test binary may have registered a logger already; only one can win.
        if StderrLogger::set_logger(LevelFilter::Debug).is_ok() {
            assert_eq!(log::max_level(), LevelFilter::Debug);
            assert!(StderrLogger::set_logger(LevelFilter::Info).is_err());
        }
        log::debug!("logger test");
    }
}
