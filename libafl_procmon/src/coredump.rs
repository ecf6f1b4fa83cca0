//! Finding and relocating core dumps of the target.
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::Error;

/// Where the kernel drops core files with the default `core_pattern`, relative to the target's
/// working directory (see [`resolve_coredump_path`])
pub const DEFAULT_COREDUMP_PATH: &str = "./core";

/// Resolves a relative core file `path` against the working directory of the target.
///
/// Absolute paths, and targets without an explicit working directory, keep `path` as is.
#[must_use]
pub fn resolve_coredump_path(path: &Path, target_cwd: Option<&Path>) -> PathBuf {
    match target_cwd {
        Some(cwd) if path.is_relative() => cwd.join(path),
        _ => path.to_owned(),
    }
}

/// Returns `path` if a core file exists there.
///
/// Only Linux is supported, other platforms never report a core dump.
#[must_use]
pub fn find_coredump<P: AsRef<Path>>(path: P) -> Option<PathBuf> {
    let path = path.as_ref();
    if cfg!(target_os = "linux") && path.is_file() {
        Some(path.to_owned())
    } else {
        None
    }
}

/// Moves the core file `src` to `<coredump_dir>/<test_number>`, returning the new path.
pub fn relocate_coredump<P, Q>(src: P, coredump_dir: Q, test_number: u64) -> Result<PathBuf, Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let src = src.as_ref();
    let dest = coredump_dir.as_ref().join(test_number.to_string());
    fs::rename(src, &dest).map_err(|err| {
        Error::os_error(
            err,
            format!(
                "Failed to move core dump {} -> {}",
                src.display(),
                dest.display()
            ),
        )
    })?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use std::{env, path::Path};

    use crate::coredump::{find_coredump, resolve_coredump_path, DEFAULT_COREDUMP_PATH};

    #[test]
    fn test_resolve_coredump_path() {
        let default = Path::new(DEFAULT_COREDUMP_PATH);
        assert_eq!(resolve_coredump_path(default, None), default);
        assert_eq!(
            resolve_coredump_path(default, Some(Path::new("/srv/target"))),
            Path::new("/srv/target/./core")
        );
        assert_eq!(
            resolve_coredump_path(Path::new("/var/cores/core"), Some(Path::new("/srv/target"))),
            Path::new("/var/cores/core")
        );
    }

    #[test]
    fn test_no_coredump() {
        let path = env::temp_dir().join(format!("procmon_no_core_{}", std::process::id()));
        assert_eq!(find_coredump(path), None);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_relocate_coredump() {
        use std::fs;

        use crate::coredump::relocate_coredump;

        let dir = env::temp_dir().join(format!("procmon_relocate_{}", std::process::id()));
        let cores = dir.join("cores");
        fs::create_dir_all(&cores).unwrap();
        let core = dir.join("core");
        fs::write(&core, b"\x7fELF").unwrap();

        let found = find_coredump(&core).unwrap();
        let dest = relocate_coredump(found, &cores, 17).unwrap();

        assert_eq!(dest, cores.join("17"));
        assert_eq!(fs::read(&dest).unwrap(), b"\x7fELF");
        assert!(!core.exists());

        // vanished in the meantime
        let err = relocate_coredump(&core, &cores, 18).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));

        fs::remove_dir_all(&dir).unwrap();
    }
}
