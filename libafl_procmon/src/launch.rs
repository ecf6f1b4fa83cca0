//! The ordered list of commands that bring up the target, and how launching them can fail.
use core::fmt::{self, Display, Formatter};
use std::{
    io,
    path::{Path, PathBuf},
    process::{Child, Command},
};

#[cfg(unix)]
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

/// Why one of the launch commands could not be started.
///
/// The OS specific variants only exist on their platform.
#[derive(Debug)]
pub enum LaunchError {
    /// The command at `index` has no program to execute
    EmptyCommand {
        /// Position of the command in the [`LaunchSpec`]
        index: usize,
    },
    /// `fork`/`exec` failed
    #[cfg(unix)]
    Unix {
        /// The command line we tried to start
        command: String,
        /// The errno reported by the OS
        errno: Errno,
        /// The OS error text
        message: String,
    },
    /// `CreateProcess` failed
    #[cfg(windows)]
    Windows {
        /// The command line we tried to start
        command: String,
        /// The `GetLastError` code
        code: i32,
        /// The OS error text
        message: String,
    },
    /// Launching failed on a platform without a dedicated variant
    #[cfg(not(any(unix, windows)))]
    Other {
        /// The command line we tried to start
        command: String,
        /// The OS error text
        message: String,
    },
}

impl LaunchError {
    fn from_io(command: String, err: &io::Error) -> Self {
        let message = err.to_string();
        #[cfg(unix)]
        {
            Self::Unix {
                command,
                errno: Errno::from_raw(err.raw_os_error().unwrap_or(0)),
                message,
            }
        }
        #[cfg(windows)]
        {
            Self::Windows {
                command,
                code: err.raw_os_error().unwrap_or(0),
                message,
            }
        }
        #[cfg(not(any(unix, windows)))]
        {
            Self::Other { command, message }
        }
    }

    /// The OS error code, if the OS reported one
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::EmptyCommand { .. } => None,
            #[cfg(unix)]
            Self::Unix { errno, .. } => match errno {
                Errno::UnknownErrno => None,
                errno => Some(*errno as i32),
            },
            #[cfg(windows)]
            Self::Windows { code, .. } => Some(*code),
            #[cfg(not(any(unix, windows)))]
            Self::Other { .. } => None,
        }
    }
}

impl Display for LaunchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand { index } => write!(f, "launch command #{index} is empty"),
            #[cfg(unix)]
            Self::Unix {
                command, message, ..
            } => write!(f, "OSError \"{message}\" while starting \"{command}\""),
            #[cfg(windows)]
            Self::Windows {
                command, message, ..
            } => write!(f, "WindowsError \"{message}\" while starting \"{command}\""),
            #[cfg(not(any(unix, windows)))]
            Self::Other { command, message } => {
                write!(f, "Error \"{message}\" while starting \"{command}\"")
            }
        }
    }
}

impl std::error::Error for LaunchError {}

/// The commands to run, in order, to bring the target up.
///
/// Every command is started without waiting for it; the process started by the last command is
/// the one that gets supervised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    commands: Vec<Vec<String>>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl LaunchSpec {
    /// An empty [`LaunchSpec`], add commands using [`LaunchSpec::command`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses whitespace separated command lines, one command per line.
    /// Use [`LaunchSpec::command`] if arguments contain whitespace.
    #[must_use]
    pub fn from_cmdlines<IT, S>(cmdlines: IT) -> Self
    where
        IT: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        cmdlines.into_iter().fold(Self::new(), |spec, line| {
            spec.command(line.as_ref().split_whitespace())
        })
    }

    /// Appends a command. The first element of `argv` is the program.
    #[must_use]
    pub fn command<IT, S>(mut self, argv: IT) -> Self
    where
        IT: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.commands
            .push(argv.into_iter().map(|arg| arg.as_ref().to_owned()).collect());
        self
    }

    /// Sets the working directory of all commands.
    #[must_use]
    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cwd = Some(dir.as_ref().to_owned());
        self
    }

    /// Adds an environment variable to all commands.
    #[must_use]
    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.envs
            .push((key.as_ref().to_owned(), val.as_ref().to_owned()));
        self
    }

    /// The working directory of all commands, if set
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// The commands, in launch order
    #[must_use]
    pub fn commands(&self) -> &[Vec<String>] {
        &self.commands
    }

    /// The number of commands
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if there is nothing to launch
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Starts every command in order, without waiting for any of them.
    ///
    /// `configure` gets to adjust each [`Command`] right before it is spawned.
    /// Every started [`Child`] is pushed onto `children`, also when a later command fails, so the
    /// caller can still reap them. The first failure aborts the remaining commands.
    /// On success, the last [`Child`] pushed belongs to the last command.
    pub fn spawn_all<F>(
        &self,
        children: &mut Vec<Child>,
        mut configure: F,
    ) -> Result<(), LaunchError>
    where
        F: FnMut(&mut Command),
    {
        children.reserve(self.commands.len());
        for (index, argv) in self.commands.iter().enumerate() {
            let Some((program, args)) = argv.split_first() else {
                return Err(LaunchError::EmptyCommand { index });
            };

            let mut command = Command::new(program);
            command.args(args);
            command.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            if let Some(cwd) = &self.cwd {
                command.current_dir(cwd);
            }
            configure(&mut command);

            let child = command
                .spawn()
                .map_err(|err| LaunchError::from_io(argv.join(" "), &err))?;
            log::debug!("started {:?} as pid {}", argv, child.id());
            children.push(child);
        }
        Ok(())
    }
}
