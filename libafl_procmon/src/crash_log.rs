//! The append-only crash log.
use std::{
    fs::OpenOptions,
    io::Write,
    path::Path,
};

use crate::Error;

/// Appends `synopsis` to the crash log at `path`, creating the file if needed.
///
/// The file is opened, written, flushed and closed again on every call, so nothing is held open
/// between test cases. Lines are never deduplicated.
pub fn append_synopsis<P>(path: P, synopsis: &str) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    fn inner(path: &Path, synopsis: &str) -> Result<(), Error> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(synopsis.as_bytes())?;
        file.flush()?;
        Ok(())
    }
    inner(path.as_ref(), synopsis)
}

#[cfg(test)]
mod tests {
    use std::{env, fs};

    use crate::crash_log::append_synopsis;

    #[test]
    fn test_append_synopsis() {
        let path = env::temp_dir().join(format!("procmon_crash_log_{}", std::process::id()));
        drop(fs::remove_file(&path));

        let line = "[10:11.12] Crash : Reason - Exit with code - 0\n";
        append_synopsis(&path, line).unwrap();
        append_synopsis(&path, line).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), line.repeat(2));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_synopsis_fails_on_missing_dir() {
        let path = env::temp_dir()
            .join(format!("procmon_missing_{}", std::process::id()))
            .join("crashes.txt");
        assert!(append_synopsis(path, "line\n").is_err());
    }
}
