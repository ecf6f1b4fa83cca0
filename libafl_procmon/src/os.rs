//! Operating System specific process control
//!
//! Blocking waits and kills work on raw pids, so the pid can be signalled from one thread
//! while another thread is blocked waiting on it.

#[cfg(unix)]
use std::{io, os::unix::process::CommandExt};
use std::process::{Command, Stdio};

#[cfg(unix)]
use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use crate::Error;

/// Blocks until the child `pid` exits or is stopped, and returns the raw wait status.
///
/// There is no timeout: a hung target blocks the caller until somebody kills it.
#[cfg(unix)]
pub fn waitpid_blocking(pid: i32) -> Result<i32, Error> {
    let mut status = 0;
    loop {
        let res = unsafe { libc::waitpid(pid, &raw mut status, libc::WUNTRACED) };
        if res < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::os_error(err, format!("Error calling waitpid({pid})")));
        }
        return Ok(status);
    }
}

/// Waiting on raw pids is not supported here.
#[cfg(not(unix))]
pub fn waitpid_blocking(pid: i32) -> Result<i32, Error> {
    Err(Error::unsupported(format!("waitpid({pid})")))
}

/// Sends `SIGKILL` to `pid`.
#[cfg(unix)]
pub fn kill_pid(pid: i32) -> Result<(), Error> {
    kill(Pid::from_raw(pid), Signal::SIGKILL).map_err(|errno| {
        Error::os_error(
            io::Error::from_raw_os_error(errno as i32),
            format!("Error calling kill({pid}, SIGKILL)"),
        )
    })
}

/// Killing raw pids is not supported here.
#[cfg(not(unix))]
pub fn kill_pid(pid: i32) -> Result<(), Error> {
    Err(Error::unsupported(format!("kill({pid})")))
}

/// Configure a target [`Command`] before it gets spawned.
pub trait ConfigTarget {
    /// If `debug_child` is false, the child's stdout and stderr go to `/dev/null`.
    fn set_child_output(&mut self, debug_child: bool) -> &mut Self;
    /// If `enable` is set, raise the soft core-file limit of the child up to its hard limit.
    fn set_coredump_limit(&mut self, enable: bool) -> &mut Self;
}

impl ConfigTarget for Command {
    fn set_child_output(&mut self, debug_child: bool) -> &mut Self {
        if !debug_child {
            self.stdout(Stdio::null());
            self.stderr(Stdio::null());
        }
        self
    }

    #[cfg(unix)]
    fn set_coredump_limit(&mut self, enable: bool) -> &mut Self {
        if !enable {
            return self;
        }
        let func = move || {
            let mut limit = libc::rlimit {
                rlim_cur: 0,
                rlim_max: 0,
            };
            // Best effort: a target without core dumps is still worth running.
            unsafe {
                if libc::getrlimit(libc::RLIMIT_CORE, &raw mut limit) == 0 {
                    limit.rlim_cur = limit.rlim_max;
                    libc::setrlimit(libc::RLIMIT_CORE, &raw const limit);
                }
            }
            Ok(())
        };
        // # Safety
        // Only async-signal-safe libc calls run between fork and exec.
        unsafe { self.pre_exec(func) }
    }

    #[cfg(not(unix))]
    fn set_coredump_limit(&mut self, _enable: bool) -> &mut Self {
        self
    }
}

/// Parses `/proc/<pid>/stat` into (command name, parent pid).
#[cfg(any(target_os = "linux", test))]
fn parse_proc_stat(stat: &str) -> Option<(&str, i32)> {
    // The command name is in parens and may contain parens itself.
    let open = stat.find('(')?;
    let close = stat.rfind(')')?;
    let comm = stat.get(open + 1..close)?;
    let mut rest = stat.get(close + 1..)?.split_whitespace();
    let _state = rest.next()?;
    let ppid = rest.next()?.parse().ok()?;
    Some((comm, ppid))
}

/// Finds the newest child of this process named `name`, skipping `ignore_pid`.
///
/// The kernel truncates command names to 15 bytes, so `name` is compared the same way.
#[cfg(target_os = "linux")]
#[must_use]
pub fn find_child_by_name(name: &str, ignore_pid: Option<u32>) -> Option<i32> {
    use std::fs;

    const TASK_COMM_LEN: usize = 15;

    let wanted = name.get(..TASK_COMM_LEN).unwrap_or(name);
    let me = std::process::id() as i32;

    fs::read_dir("/proc")
        .ok()?
        .filter_map(Result::ok)
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|pid| ignore_pid != Some(*pid as u32))
        .filter(|pid| {
            fs::read_to_string(format!("/proc/{pid}/stat"))
                .ok()
                .and_then(|stat| {
                    parse_proc_stat(&stat).map(|(comm, ppid)| comm == wanted && ppid == me)
                })
                .unwrap_or(false)
        })
        .max()
}

/// Looking up processes by name needs `/proc`.
#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn find_child_by_name(_name: &str, _ignore_pid: Option<u32>) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    use serial_test::serial;

    use crate::os::parse_proc_stat;

    #[test]
    fn test_parse_proc_stat() {
        let stat = "4242 (my (odd) target) S 4200 4242 4200 0 -1 4194560 104";
        assert_eq!(parse_proc_stat(stat), Some(("my (odd) target", 4200)));
        assert_eq!(parse_proc_stat("garbage"), None);
    }

    #[cfg(unix)]
    #[test]
    #[serial]
    fn test_kill_and_wait() {
        use std::process::Command;

        use crate::os::{kill_pid, waitpid_blocking};

        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;

        kill_pid(pid).unwrap();
        let status = waitpid_blocking(pid).unwrap();
        assert!(libc::WIFSIGNALED(status));
        assert_eq!(libc::WTERMSIG(status), libc::SIGKILL);

        // the pid is gone now
        let err = waitpid_blocking(pid).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ECHILD));
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_nonexistent_pid() {
        use crate::os::kill_pid;

        // larger than any `pid_max`
        let err = kill_pid(i32::MAX).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ESRCH));
    }

    #[cfg(target_os = "linux")]
    #[test]
    #[serial]
    fn test_find_child_by_name() {
        use std::process::Command;

        use crate::os::{find_child_by_name, kill_pid, waitpid_blocking};

        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id() as i32;

        assert_eq!(find_child_by_name("sleep", None), Some(pid));
        assert_eq!(find_child_by_name("sleep", Some(pid as u32)), None);
        assert_eq!(find_child_by_name("no-such-procmon-target", None), None);

        kill_pid(pid).unwrap();
        waitpid_blocking(pid).unwrap();
    }
}
