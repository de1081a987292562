//! Local X server supervision core.
//!
//! Composes a display-number allocator, a VT reservation registry, an
//! authority-file manager, version-gated command assembly, and a
//! signalfd-driven reactor into the `start`/`stop` lifecycle of one or more
//! local X servers per process, plus the narrower XDMCP seat-binding and
//! read-only user-directory projections a display-manager daemon needs
//! alongside it.

pub mod authority;
pub mod command;
pub mod config;
pub mod display_number;
pub mod error;
pub mod local_x_server;
pub mod supervisor;
pub mod user;
pub mod version_probe;
pub mod xdmcp;

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use log::warn;
use nix::unistd::Pid;
use reactor::{Reactor, ReactorEvent};

pub use local_x_server::{LocalXServer, LocalXServerHooks};

/// Routes `Reactor` events to the `LocalXServer` they belong to, by pid.
/// This is the top-level "one logical thread of control" the concurrency
/// model describes: every `LocalXServer` registers itself here instead of
/// polling a reactor of its own.
#[derive(Default)]
pub struct Dispatcher {
    servers: HashMap<Pid, Rc<LocalXServer>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `server` so events for its pid get routed to it. Must be called
    /// after a successful `start()`, once the server actually has a pid; a
    /// server with none is not registered, since it has nothing to match
    /// against.
    pub fn register(&mut self, server: Rc<LocalXServer>) {
        match server.pid() {
            Some(pid) => {
                self.servers.insert(pid, server);
            }
            None => warn!("refusing to register a display server with no pid yet"),
        }
    }

    /// Poll `reactor` once and dispatch whatever came back. Also ticks every
    /// tracked server so pending SIGTERM-to-SIGKILL escalations fire on
    /// schedule even without fresh signal activity.
    pub fn poll(&mut self, reactor: &mut Reactor, timeout: Option<Duration>) -> std::io::Result<()> {
        let events = reactor.poll(timeout)?;
        for event in events {
            match event {
                ReactorEvent::ReadySignal { pid } => match self.servers.get(&pid) {
                    Some(server) => server.handle_ready_signal(pid),
                    None => warn!("ready signal from untracked pid {pid}"),
                },
                ReactorEvent::ChildExited { pid, success } => {
                    if let Some(server) = self.servers.remove(&pid) {
                        if !success {
                            warn!("display :{} exited unsuccessfully", server.display_number());
                        }
                        server.handle_child_exited(pid);
                    }
                }
            }
        }
        for server in self.servers.values() {
            server.tick();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display_number::DisplayNumberAllocator;

    #[test]
    fn registering_a_server_with_no_pid_is_skipped() {
        let server = Rc::new(LocalXServer::new(
            std::env::temp_dir().join(format!("xserver-core-dispatcher-test-{}", std::process::id())),
            std::env::temp_dir().join(format!("xserver-core-dispatcher-test-log-{}", std::process::id())),
            true,
            Rc::new(DisplayNumberAllocator::new(60)),
            vt_registry::DefaultVtRegistry::new(),
            Rc::new(xauthority::MitMagicCookieEncoder),
            LocalXServerHooks::default(),
        ));

        let mut dispatcher = Dispatcher::new();
        dispatcher.register(server);
        assert!(dispatcher.servers.is_empty());
    }
}
