//! The supervisor owns the target process: it spawns it, waits for it, and records why it died.
//!
//! A supervised run goes through `Idle -> Spawning -> Running -> Terminated`, or ends in
//! `SpawnFailed` if the target could not be launched. A target stopped by a signal is still alive:
//! it sits in `Stopped` until [`TargetSupervisor::stop_target`] kills and reaps it. [`TargetSupervisor::run`] blocks until the
//! target is gone, so it usually runs on its own thread (see [`TargetSupervisor::start`]) while
//! the fuzzer waits on the [`ReadinessSignal`].

use core::{
    fmt::{self, Debug, Display, Formatter},
    time::Duration,
};
use std::{
    path::{Path, PathBuf},
    process::Child,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
};

use log::{Level, LevelFilter};
use typed_builder::TypedBuilder;

use crate::{
    coredump::{find_coredump, relocate_coredump, resolve_coredump_path, DEFAULT_COREDUMP_PATH},
    crash_log::append_synopsis,
    exit_status::{TerminationReason, TerminationReport},
    launch::LaunchSpec,
    monitor::ProcessMonitor,
    os::{self, ConfigTarget},
    readiness::ReadinessSignal,
    Error,
};

/// How long we give the target to start up, by default
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Configuration of a [`TargetSupervisor`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct SupervisorConfig {
    /// The commands that bring up the target
    launch: LaunchSpec,
    /// Pause between spawning and signalling readiness, many targets daemonize or bind sockets
    /// asynchronously
    #[builder(default = DEFAULT_SETTLE_DELAY)]
    settle_delay: Duration,
    /// Attach to the child process with this name instead of the last launched one
    #[builder(default = None, setter(strip_option, into))]
    proc_name: Option<String>,
    /// Never attach to this pid when looking up `proc_name`
    #[builder(default = None, setter(strip_option))]
    ignore_pid: Option<u32>,
    /// Supervisor messages above this level are dropped
    #[builder(default = LevelFilter::Info)]
    log_level: LevelFilter,
    /// Keep the target's stdout and stderr, instead of sending them to `/dev/null`
    #[builder(default = true)]
    debug_child: bool,
    /// Allow the target to write core files
    #[builder(default = false)]
    enable_coredumps: bool,
    /// Where core files show up, relative paths are relative to the target's working directory
    #[builder(default = PathBuf::from(DEFAULT_COREDUMP_PATH), setter(into))]
    coredump_path: PathBuf,
}

impl SupervisorConfig {
    /// The commands that bring up the target
    #[must_use]
    pub fn launch(&self) -> &LaunchSpec {
        &self.launch
    }

    /// The pause between spawning and signalling readiness
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// The process name to attach to, if any
    #[must_use]
    pub fn proc_name(&self) -> Option<&str> {
        self.proc_name.as_deref()
    }

    /// The pid never to attach to, if any
    #[must_use]
    pub fn ignore_pid(&self) -> Option<u32> {
        self.ignore_pid
    }

    /// Supervisor verbosity
    #[must_use]
    pub fn log_level(&self) -> LevelFilter {
        self.log_level
    }

    /// Where core files show up, as configured
    #[must_use]
    pub fn coredump_path(&self) -> &Path {
        &self.coredump_path
    }

    /// Where the target's core file shows up, resolved against the launch working directory
    #[must_use]
    pub fn coredump_location(&self) -> PathBuf {
        resolve_coredump_path(&self.coredump_path, self.launch.cwd())
    }
}

/// Where a supervised run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorState {
    /// Nothing launched yet
    Idle,
    /// Launch commands are being started, or the target is settling in
    Spawning,
    /// The target is up, and we are attached to `pid`
    Running {
        /// The tracked process
        pid: i32,
    },
    /// The target was stopped by a signal, `pid` is still alive and has not been reaped
    Stopped {
        /// The stopped process
        pid: i32,
        /// The report of the stop
        report: TerminationReport,
    },
    /// The target is gone
    Terminated(TerminationReport),
    /// The target could not be launched; there is no process to track
    SpawnFailed,
    /// Waiting for the target failed, e.g. because it was reaped behind our back.
    /// Its pid may be recycled already, so it is never signalled again.
    WaitFailed,
}

/// Hooks the fuzzing loop calls around every test case it sends.
pub trait SendHooks {
    /// Called right before a test case gets sent
    #[inline]
    fn pre_send(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Called right after a test case was sent.
    ///
    /// Returns `true` if the target is still active.
    fn post_send(&self) -> Result<bool, Error>;
}

struct SupervisorInner<M> {
    config: SupervisorConfig,
    monitor: Arc<M>,
    ready: ReadinessSignal,
    state: Mutex<SupervisorState>,
    /// Processes of the launch commands we do not track
    helpers: Mutex<Vec<Child>>,
}

/// Reaps the helpers that exited already, without blocking
fn reap_helpers(helpers: &mut Vec<Child>) {
    helpers.retain_mut(|helper| !matches!(helper.try_wait(), Ok(Some(_))));
}

impl<M> Drop for SupervisorInner<M> {
    fn drop(&mut self) {
        // A stopped target would linger forever
        if let Ok(SupervisorState::Stopped { pid, .. }) = self.state.get_mut() {
            let pid = *pid;
            if os::kill_pid(pid).is_ok() {
                drop(os::waitpid_blocking(pid));
            }
        }
        if let Ok(helpers) = self.helpers.get_mut() {
            reap_helpers(helpers);
        }
    }
}

/// Supervises exactly one target process.
///
/// Clones share the same target, so one clone can [`TargetSupervisor::stop_target`] while another
/// one is blocked in [`TargetSupervisor::run`].
pub struct TargetSupervisor<M> {
    inner: Arc<SupervisorInner<M>>,
}

impl<M> Clone for TargetSupervisor<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M> Debug for TargetSupervisor<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSupervisor")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<M> TargetSupervisor<M> {
    /// Creates a new, idle [`TargetSupervisor`].
    ///
    /// `ready` gets set once the target was spawned and had its settle delay.
    #[must_use]
    pub fn new(config: SupervisorConfig, monitor: Arc<M>, ready: ReadinessSignal) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                config,
                monitor,
                ready,
                state: Mutex::new(SupervisorState::Idle),
                helpers: Mutex::new(Vec::new()),
            }),
        }
    }

    fn log<D: Display>(&self, level: Level, msg: D) {
        if level <= self.inner.config.log_level {
            log::log!(level, "{msg}");
        }
    }

    fn set_state(&self, state: SupervisorState) {
        *self.inner.state.lock().unwrap() = state;
    }

    /// The current state
    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.inner.state.lock().unwrap().clone()
    }

    /// The tracked pid, while the target is alive (running or stopped)
    #[must_use]
    pub fn pid(&self) -> Option<i32> {
        match *self.inner.state.lock().unwrap() {
            SupervisorState::Running { pid } | SupervisorState::Stopped { pid, .. } => Some(pid),
            _ => None,
        }
    }

    /// The configuration
    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// The shared monitor context
    #[must_use]
    pub fn monitor(&self) -> &Arc<M> {
        &self.inner.monitor
    }

    /// Returns the report of the finished run, or `None` while the target was not observed to
    /// terminate or stop.
    #[must_use]
    pub fn get_exit_status(&self) -> Option<TerminationReport> {
        match &*self.inner.state.lock().unwrap() {
            SupervisorState::Terminated(report) | SupervisorState::Stopped { report, .. } => {
                Some(report.clone())
            }
            _ => None,
        }
    }

    /// Kills the target with `SIGKILL`.
    ///
    /// Valid while the target is running or stopped. A stopped target is reaped right away, and
    /// the supervisor moves on to [`SupervisorState::Terminated`].
    /// Failures (e.g. the target exited already) are printed and returned for diagnostics; they
    /// are expected and nothing to panic about.
    pub fn stop_target(&self) -> Result<(), Error> {
        let mut state = self.inner.state.lock().unwrap();
        let pid = match *state {
            SupervisorState::Running { pid } => return Self::kill_target(pid),
            SupervisorState::Stopped { pid, .. } => pid,
            _ => {
                return Err(Error::illegal_state(format!(
                    "No running target to stop, supervisor is {:?}",
                    *state
                )))
            }
        };

        Self::kill_target(pid)?;
        match os::waitpid_blocking(pid) {
            Ok(status) => {
                *state = SupervisorState::Terminated(TerminationReport::new(status));
                Ok(())
            }
            Err(err) => {
                *state = SupervisorState::WaitFailed;
                Err(err)
            }
        }
    }

    fn kill_target(pid: i32) -> Result<(), Error> {
        os::kill_pid(pid).inspect_err(|err| {
            eprintln!(
                "Failed to stop target pid {pid} (errno {}): {err}",
                err.raw_os_error().unwrap_or(0)
            );
        })
    }
}

impl<M> TargetSupervisor<M>
where
    M: ProcessMonitor,
{
    /// Launches all commands, lets the target settle in and attaches to it.
    ///
    /// Launch errors are printed to stderr and leave the supervisor in
    /// [`SupervisorState::SpawnFailed`].
    pub fn spawn(&self) -> Result<i32, Error> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SupervisorState::Idle {
                return Err(Error::illegal_state(format!(
                    "Target can only be spawned once, supervisor is {state:?}"
                )));
            }
            *state = SupervisorState::Spawning;
        }
        self.log(Level::Info, "starting target process");

        let config = &self.inner.config;
        let mut children = Vec::new();
        let spawned = config.launch.spawn_all(&mut children, |command| {
            command
                .set_child_output(config.debug_child)
                .set_coredump_limit(config.enable_coredumps);
        });
        if let Err(err) = spawned {
            eprintln!("{err}");
            // whatever got started before the failure still needs reaping
            self.inner.helpers.lock().unwrap().append(&mut children);
            self.set_state(SupervisorState::SpawnFailed);
            return Err(err.into());
        }
        let Some(last) = children.pop() else {
            self.set_state(SupervisorState::SpawnFailed);
            return Err(Error::illegal_argument("No launch commands given"));
        };

        self.log(
            Level::Info,
            format!(
                "done. target up and running, giving it {:?} to settle in.",
                config.settle_delay
            ),
        );
        thread::sleep(config.settle_delay);

        let mut pid = last.id() as i32;
        if let Some(proc_name) = &config.proc_name {
            match os::find_child_by_name(proc_name, config.ignore_pid) {
                Some(found) => pid = found,
                None => self.log(
                    Level::Warn,
                    format!("no child process named {proc_name}, staying with pid {pid}"),
                ),
            }
        }
        // The tracked process gets reaped by `waitpid`, everything else is a helper.
        if pid != last.id() as i32 {
            children.push(last);
        }
        self.inner.helpers.lock().unwrap().extend(children);

        self.set_state(SupervisorState::Running { pid });
        self.inner.monitor.log(&format!("attached to pid: {pid}"));
        Ok(pid)
    }

    /// The supervised lifecycle: spawn, signal readiness, block until the target is gone.
    ///
    /// The resulting synopsis is stored in the monitor. Returns `Ok(None)` if the target could not
    /// be launched. There is no timeout; use [`TargetSupervisor::stop_target`] from another thread
    /// to end a hung target.
    pub fn run(&self) -> Result<Option<TerminationReport>, Error> {
        let pid = match self.spawn() {
            Ok(pid) => pid,
            Err(err) if self.state() == SupervisorState::SpawnFailed => {
                self.inner.ready.set();
                self.log(Level::Error, format!("Could not start target: {err}"));
                return Ok(None);
            }
            Err(err) => return Err(err),
        };
        self.inner.ready.set();

        let status = match os::waitpid_blocking(pid) {
            Ok(status) => status,
            Err(err) => {
                self.set_state(SupervisorState::WaitFailed);
                self.log(Level::Error, format!("Lost track of target pid {pid}: {err}"));
                return Err(err);
            }
        };
        let report = TerminationReport::new(status);
        self.log(Level::Info, report.synopsis().trim_end());
        reap_helpers(&mut self.inner.helpers.lock().unwrap());

        self.inner
            .monitor
            .set_last_synopsis(report.synopsis().to_owned());
        self.set_state(match report.reason() {
            TerminationReason::Stopped(_) => SupervisorState::Stopped {
                pid,
                report: report.clone(),
            },
            _ => SupervisorState::Terminated(report.clone()),
        });
        Ok(Some(report))
    }
}

impl<M> TargetSupervisor<M>
where
    M: ProcessMonitor + 'static,
{
    /// Runs [`TargetSupervisor::run`] on a new thread.
    ///
    /// Join the handle to get the [`TerminationReport`].
    pub fn start(&self) -> Result<JoinHandle<Result<Option<TerminationReport>, Error>>, Error> {
        let supervisor = self.clone();
        Ok(thread::Builder::new()
            .name("procmon-supervisor".into())
            .spawn(move || supervisor.run())?)
    }
}

impl<M> SendHooks for TargetSupervisor<M>
where
    M: ProcessMonitor,
{
    /// Appends the last synopsis to the crash log and moves the core dump, if any.
    ///
    /// Always reports the target as gone: this runs after a termination was observed.
    fn post_send(&self) -> Result<bool, Error> {
        let monitor = &self.inner.monitor;

        match monitor.last_synopsis() {
            Some(synopsis) => append_synopsis(monitor.crash_filename(), &synopsis)?,
            None => self.log(Level::Debug, "no synopsis to record yet"),
        }

        if let Some(coredump_dir) = monitor.coredump_dir() {
            if let Some(src) = find_coredump(self.inner.config.coredump_location()) {
                let dest = relocate_coredump(&src, coredump_dir, monitor.test_number())?;
                self.log(
                    Level::Info,
                    format!("moved core dump {} -> {}", src.display(), dest.display()),
                );
            }
        }
        Ok(false)
    }
}
