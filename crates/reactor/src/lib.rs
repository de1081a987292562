//! Marshals SIGUSR1 (X server ready) and SIGCHLD (X server exit) delivery onto
//! a single logical thread of control.
//!
//! The display-manager core never installs a signal handler directly: handlers
//! run on an arbitrary thread at an arbitrary point and are not allowed to do
//! anything beyond the short list of async-signal-safe calls. Instead the
//! signals of interest are blocked in the process mask and read back out
//! through a `signalfd`, which carries the originating pid in `ssi_pid`. That
//! lets several child-supervisor owners share one `Reactor` without a global
//! "did somebody get signalled" flag.

use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use libc::pid_t;
use log::warn;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

const SIGNAL_TOKEN: Token = Token(0);

/// An event observed on the reactor, tagged with the pid it originated from
/// so that callers can tell which of their children it concerns.
#[derive(Debug, Clone, Copy)]
pub enum ReactorEvent {
    /// SIGUSR1 was received from `pid`. For a supervised X server this is the
    /// ready-signal handshake.
    ReadySignal { pid: Pid },
    /// `pid` exited. `success` mirrors `ExitStatus::success`.
    ChildExited { pid: Pid, success: bool },
}

/// A single-threaded reactor multiplexing SIGUSR1 and SIGCHLD through one
/// `signalfd`, polled via `mio`.
pub struct Reactor {
    signal_fd: SignalFd,
    poll: Poll,
    events: Events,
}

impl Reactor {
    /// Build a new reactor. Blocks SIGUSR1 and SIGCHLD in the calling
    /// process's signal mask for the remainder of the process's life: once a
    /// `Reactor` exists it is the sole receiver of those signals.
    pub fn new() -> io::Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGUSR1);
        mask.add(Signal::SIGCHLD);
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None)
            .map_err(nix_to_io)?;

        let signal_fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK).map_err(nix_to_io)?;
        let fd = signal_fd.as_raw_fd();

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&fd), SIGNAL_TOKEN, Interest::READABLE)?;

        Ok(Self {
            signal_fd,
            poll,
            events: Events::with_capacity(16),
        })
    }

    /// Block for up to `timeout` (or indefinitely if `None`) waiting for
    /// signal activity, then drain every pending signal and, for SIGCHLD,
    /// reap every exited child with a non-blocking `waitpid` loop.
    ///
    /// Returns the empty vector on a plain timeout; that is not an error.
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReactorEvent>> {
        self.poll.poll(&mut self.events, timeout)?;

        let mut out = Vec::new();
        loop {
            match self.signal_fd.read_signal() {
                Ok(Some(siginfo)) => {
                    let pid = Pid::from_raw(siginfo.ssi_pid as pid_t);
                    if siginfo.ssi_signo as i32 == Signal::SIGUSR1 as i32 {
                        out.push(ReactorEvent::ReadySignal { pid });
                    } else if siginfo.ssi_signo as i32 == Signal::SIGCHLD as i32 {
                        reap_all(&mut out);
                    }
                }
                Ok(None) => break,
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(errno) => return Err(nix_to_io(errno)),
            }
        }
        Ok(out)
    }
}

fn reap_all(out: &mut Vec<ReactorEvent>) {
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, code)) => {
                out.push(ReactorEvent::ChildExited { pid, success: code == 0 });
            }
            Ok(WaitStatus::Signaled(pid, _, _)) => {
                out.push(ReactorEvent::ChildExited { pid, success: false });
            }
            Ok(WaitStatus::StillAlive) => break,
            Err(nix::errno::Errno::ECHILD) => break,
            Ok(_) => continue,
            Err(errno) => {
                warn!("waitpid failed while reaping children: {errno}");
                break;
            }
        }
    }
}

fn nix_to_io(errno: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(errno as i32)
}

/// Liveness probe used by `stop()`'s grace-period wait: signal 0 never
/// actually signals the process, it only reports whether it could be
/// signalled (i.e. it still exists and we have permission).
pub fn process_is_alive(pid: pid_t) -> bool {
    matches!(
        nix::sys::signal::kill(Pid::from_raw(pid), None),
        Ok(()) | Err(nix::errno::Errno::EPERM)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_is_alive_reports_self() {
        assert!(process_is_alive(std::process::id() as pid_t));
    }

    #[test]
    fn process_is_alive_reports_dead_pid_as_dead() {
        // A pid this large is extremely unlikely to be assigned on any real
        // system; this isn't airtight but matches the probe's own tolerance
        // documented in `DisplayNumberAllocator::is_foreign_lock_valid`.
        assert!(!process_is_alive(i32::MAX - 1));
    }
}
