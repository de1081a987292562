use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::error::StartError;

/// How a log file is opened for a new run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Open with `O_APPEND`, keeping prior runs' output.
    Append,
    /// Rename any existing file to `<path>.old`, then truncate.
    BackupAndTruncate,
}

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Owns exactly one X server subprocess: spawning with a scrubbed
/// environment and redirected logging, the SIGUSR1 ready-signal handshake,
/// and SIGTERM-then-SIGKILL termination.
#[derive(Default)]
pub struct ChildSupervisor {
    command: RefCell<Vec<String>>,
    env: RefCell<HashMap<String, String>>,
    log_file: RefCell<Option<(PathBuf, bool, LogMode)>>,
    child: RefCell<Option<Child>>,
    kill_deadline: Cell<Option<Instant>>,
}

impl ChildSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_command(&self, argv: Vec<String>) {
        *self.command.borrow_mut() = argv;
    }

    pub fn set_env(&self, env: HashMap<String, String>) {
        *self.env.borrow_mut() = env;
    }

    pub fn set_log_file(&self, path: PathBuf, capture_stdout: bool, mode: LogMode) {
        *self.log_file.borrow_mut() = Some((path, capture_stdout, mode));
    }

    pub fn pid(&self) -> Option<Pid> {
        self.child.borrow().as_ref().map(|child| Pid::from_raw(child.id() as i32))
    }

    /// Spawn the child. The environment is fully scrubbed: only what
    /// [`ChildSupervisor::set_env`] was given crosses into the child.
    /// SIGUSR1's disposition is set to ignore in the child, just before
    /// exec, via `pre_exec` -- the ready-signal convention depends on the
    /// exec'd binary observing that disposition, not on anything this
    /// process's own signal mask does.
    pub fn start(&self) -> Result<Pid, StartError> {
        let argv = self.command.borrow();
        let (program, args) = argv.split_first().ok_or(StartError::ConfigurationMissing)?;

        let mut command = Command::new(program);
        command.args(args);
        command.stdin(Stdio::null());

        command.env_clear();
        for (key, value) in self.env.borrow().iter() {
            command.env(key, value);
        }

        if let Some((path, capture_stdout, mode)) = self.log_file.borrow().as_ref() {
            let stderr_file = open_log_file(path, *mode)?;
            command.stderr(stderr_file);
            if *capture_stdout {
                let stdout_file = open_log_file(path, LogMode::Append)?;
                command.stdout(stdout_file);
            } else {
                command.stdout(Stdio::null());
            }
        }

        unsafe {
            command.pre_exec(|| {
                libc::signal(libc::SIGUSR1, libc::SIG_IGN);
                Ok(())
            });
        }

        info!("spawning '{}'", argv.join(" "));
        let child = command.spawn().map_err(StartError::SpawnFailed)?;
        let pid = Pid::from_raw(child.id() as i32);
        *self.child.borrow_mut() = Some(child);
        Ok(pid)
    }

    /// Request termination: SIGTERM now, SIGKILL once [`ChildSupervisor::tick`]
    /// observes the grace period has elapsed and the child is still alive.
    /// Idempotent -- a second call while a kill is already pending is a
    /// no-op.
    pub fn stop(&self) {
        let Some(pid) = self.pid() else { return };
        if self.kill_deadline.get().is_some() {
            return;
        }
        debug!("sending SIGTERM to pid {pid}");
        if let Err(err) = kill(pid, Signal::SIGTERM) {
            warn!("failed to send SIGTERM to pid {pid}: {err}");
        }
        self.kill_deadline.set(Some(Instant::now() + STOP_GRACE_PERIOD));
    }

    /// Escalate to SIGKILL if a stop was requested and the grace period has
    /// elapsed. Call this periodically from the owning event loop; it is a
    /// no-op outside of a pending stop.
    pub fn tick(&self) {
        let Some(deadline) = self.kill_deadline.get() else { return };
        if Instant::now() < deadline {
            return;
        }
        if let Some(pid) = self.pid() {
            warn!("pid {pid} did not exit within the grace period, sending SIGKILL");
            let _ = kill(pid, Signal::SIGKILL);
        }
        self.kill_deadline.set(None);
    }

    /// Record that the child identified by `pid` has exited, clearing
    /// supervision state. Called by the owner once a `ChildExited` event for
    /// our pid arrives from the reactor.
    pub fn mark_exited(&self, pid: Pid) {
        if self.pid() == Some(pid) {
            self.child.borrow_mut().take();
            self.kill_deadline.set(None);
        }
    }
}

fn open_log_file(path: &std::path::Path, mode: LogMode) -> Result<std::fs::File, StartError> {
    if mode == LogMode::BackupAndTruncate && path.exists() {
        let backup = path.with_extension("old");
        if let Err(err) = std::fs::rename(path, &backup) {
            warn!("could not back up existing log file '{}': {err}", path.display());
        }
    }

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(StartError::SpawnFailed)
}
