use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use log::{debug, info};
use nix::unistd::Pid;
use vt_registry::{VtReference, VtRegistry};
use xauthority::AuthorityEncoder;

use crate::authority::AuthorityFileManager;
use crate::command::{CommandOptions, XCommandBuilder};
use crate::display_number::DisplayNumberAllocator;
use crate::error::StartError;
use crate::supervisor::{ChildSupervisor, LogMode};
use crate::version_probe::VersionProbe;

/// Environment variables forwarded verbatim from the parent to the X server,
/// beyond the `DISPLAY`/`XAUTHORITY` pair which get special handling.
const FORWARDED_VARS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "PATH", "LIGHTDM_TEST_ROOT"];

/// Replaces subclassing: a `LocalXServer` is generic over what the owning
/// `DisplayServer`/`Seat` abstraction wants to happen at the two points
/// where this state machine would otherwise call back into a base class.
#[derive(Default)]
pub struct LocalXServerHooks {
    pub on_ready: Option<Box<dyn Fn()>>,
    pub on_stopped: Option<Box<dyn Fn()>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Launching,
    Ready,
}

/// Composes C1-C5 into the `start`/`stop` lifecycle of one local X server.
pub struct LocalXServer {
    options: RefCell<CommandOptions>,
    run_directory: PathBuf,
    log_directory: PathBuf,
    backup_logs: bool,

    display_number_allocator: Rc<DisplayNumberAllocator>,
    vt_registry: Rc<dyn VtRegistry>,
    authority_encoder: Rc<dyn AuthorityEncoder>,

    version_probe: VersionProbe,
    authority: AuthorityFileManager,
    supervisor: ChildSupervisor,
    hooks: LocalXServerHooks,

    state: Cell<State>,
    display_number: u32,
    vt_reference: RefCell<Option<VtReference>>,
    got_signal: Cell<bool>,
}

impl LocalXServer {
    /// Reserves a display number immediately, matching the data model's
    /// "allocated at construction" rule.
    pub fn new(
        run_directory: PathBuf,
        log_directory: PathBuf,
        backup_logs: bool,
        display_number_allocator: Rc<DisplayNumberAllocator>,
        vt_registry: Rc<dyn VtRegistry>,
        authority_encoder: Rc<dyn AuthorityEncoder>,
        hooks: LocalXServerHooks,
    ) -> Self {
        let display_number = display_number_allocator.reserve();
        Self {
            options: RefCell::new(CommandOptions {
                command: "X".to_string(),
                display_number,
                config_file: None,
                layout: None,
                xdg_seat: None,
                allow_tcp: false,
                background: None,
                vt: -1,
                xdmcp_server: None,
                xdmcp_port: 0,
                xdmcp_key: None,
            }),
            run_directory,
            log_directory,
            backup_logs,
            display_number_allocator,
            vt_registry,
            authority_encoder,
            version_probe: VersionProbe::new(),
            authority: AuthorityFileManager::new(),
            supervisor: ChildSupervisor::new(),
            hooks,
            state: Cell::new(State::Idle),
            display_number,
            vt_reference: RefCell::new(None),
            got_signal: Cell::new(false),
        }
    }

    pub fn display_number(&self) -> u32 {
        self.display_number
    }

    pub fn set_command(&self, command: String) {
        self.options.borrow_mut().command = command;
    }

    pub fn set_config_file(&self, config_file: Option<String>) {
        self.options.borrow_mut().config_file = config_file;
    }

    pub fn set_layout(&self, layout: Option<String>) {
        self.options.borrow_mut().layout = layout;
    }

    pub fn set_xdg_seat(&self, xdg_seat: Option<String>) {
        self.options.borrow_mut().xdg_seat = xdg_seat;
    }

    pub fn set_allow_tcp(&self, allow_tcp: bool) {
        self.options.borrow_mut().allow_tcp = allow_tcp;
    }

    pub fn set_background(&self, background: Option<String>) {
        self.options.borrow_mut().background = background;
    }

    pub fn set_vt(&self, vt: i32) {
        self.options.borrow_mut().vt = vt;
    }

    /// Setting an XDMCP key clears any authority the server inherited --
    /// XDMCP sessions carry their own cookie.
    pub fn set_xdmcp(&self, server: Option<String>, port: u16, key: Option<String>) {
        let mut options = self.options.borrow_mut();
        options.xdmcp_server = server;
        options.xdmcp_port = port;
        options.xdmcp_key = key;
        drop(options);
        self.authority.remove();
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state.get(), State::Launching | State::Ready)
    }

    pub fn pid(&self) -> Option<Pid> {
        self.supervisor.pid()
    }

    /// Begin launching. Returns once the child has been spawned (or once a
    /// synchronous failure has been reported); readiness itself arrives
    /// later through [`LocalXServer::handle_ready_signal`].
    pub fn start(&self) -> Result<(), StartError> {
        if self.is_running() {
            return Err(StartError::ConfigurationMissing);
        }
        self.got_signal.set(false);

        let options = self.options.borrow().clone();
        if options.command.trim().is_empty() {
            return Err(StartError::ConfigurationMissing);
        }

        // XDMCP sessions carry their own cookie via `-cookie`/`-query`; a local
        // authority file and `-auth` flag are only for locally-authenticated
        // invocations.
        if options.xdmcp_server.is_none() {
            let address = format!("localhost:{}", options.display_number);
            let record = self.authority_encoder.generate(&address, options.display_number);
            self.authority.write(&self.run_directory, &record);
        }

        let argv = match XCommandBuilder::build(&options, self.authority.path().as_deref(), &self.version_probe, &[]) {
            Ok(argv) => argv,
            Err(err) => {
                self.synthesize_stopped();
                return Err(err);
            }
        };

        let log_mode = if self.backup_logs {
            LogMode::BackupAndTruncate
        } else {
            LogMode::Append
        };
        let log_path = self.log_directory.join(format!("x-{}.log", options.display_number));

        self.supervisor.set_command(argv);
        self.supervisor.set_env(self.build_env());
        self.supervisor.set_log_file(log_path, true, log_mode);

        // vt == 0 is a valid command-line flag but not a reservable VT: the
        // registry only tracks genuinely numbered terminals.
        if options.vt > 0 {
            *self.vt_reference.borrow_mut() =
                Some(VtReference::acquire(self.vt_registry.clone(), options.vt as u32));
        }

        match self.supervisor.start() {
            Ok(_pid) => {
                self.state.set(State::Launching);
                Ok(())
            }
            Err(err) => {
                self.synthesize_stopped();
                Err(err)
            }
        }
    }

    fn build_env(&self) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if let Ok(display) = std::env::var("DISPLAY") {
            let xauthority = std::env::var("XAUTHORITY").unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_default();
                format!("{home}/.Xauthority")
            });
            env.insert("DISPLAY".to_string(), display);
            env.insert("XAUTHORITY".to_string(), xauthority);
        }
        for var in FORWARDED_VARS {
            if let Ok(value) = std::env::var(var) {
                env.insert(var.to_string(), value);
            }
        }
        env
    }

    /// Deliver a `ReadySignal` event for this server's own pid. Callers
    /// drive this from the `Reactor`; it is a no-op if `pid` isn't ours or
    /// we are not waiting for readiness.
    pub fn handle_ready_signal(&self, pid: Pid) {
        if self.state.get() != State::Launching || self.supervisor.pid() != Some(pid) {
            return;
        }
        debug!("display :{} is ready", self.display_number);
        self.got_signal.set(true);
        self.state.set(State::Ready);
        if let Some(on_ready) = &self.hooks.on_ready {
            on_ready();
        }
    }

    /// Deliver a `ChildExited` event for this server's own pid.
    pub fn handle_child_exited(&self, pid: Pid) {
        if self.supervisor.pid() != Some(pid) {
            return;
        }
        self.supervisor.mark_exited(pid);
        self.teardown();
    }

    /// Request termination; `stopped` is delivered asynchronously once the
    /// reactor observes the child's exit. Idempotent.
    pub fn stop(&self) {
        self.supervisor.stop();
    }

    /// Call periodically from the owning event loop so a pending
    /// SIGTERM-then-SIGKILL escalation actually happens.
    pub fn tick(&self) {
        self.supervisor.tick();
    }

    fn synthesize_stopped(&self) {
        self.teardown();
    }

    fn teardown(&self) {
        self.vt_reference.borrow_mut().take();
        self.display_number_allocator.release(self.display_number);
        self.authority.remove();
        self.got_signal.set(false);
        self.state.set(State::Idle);
        if let Some(on_stopped) = &self.hooks.on_stopped {
            on_stopped();
        }
        info!("display :{} stopped", self.display_number);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use xauthority::MitMagicCookieEncoder;

    fn new_server(hooks: LocalXServerHooks) -> LocalXServer {
        new_server_with_allocator(Rc::new(DisplayNumberAllocator::new(50)), hooks)
    }

    fn new_server_with_allocator(
        allocator: Rc<DisplayNumberAllocator>,
        hooks: LocalXServerHooks,
    ) -> LocalXServer {
        LocalXServer::new(
            std::env::temp_dir().join(format!("xserver-core-lxs-run-{}", std::process::id())),
            std::env::temp_dir().join(format!("xserver-core-lxs-log-{}", std::process::id())),
            true,
            allocator,
            vt_registry::DefaultVtRegistry::new(),
            Rc::new(MitMagicCookieEncoder),
            hooks,
        )
    }

    #[test]
    fn start_fails_without_a_command() {
        let server = new_server(LocalXServerHooks::default());
        server.set_command(String::new());
        assert!(matches!(server.start(), Err(StartError::ConfigurationMissing)));
        assert!(!server.is_running());
    }

    #[test]
    fn start_with_unresolvable_binary_never_attaches_a_child() {
        let server = new_server(LocalXServerHooks::default());
        server.set_command("not-a-real-x-binary".to_string());
        assert!(matches!(server.start(), Err(StartError::BinaryNotFound(_))));
        assert!(!server.is_running());
        assert_eq!(server.pid(), None);
    }

    #[test]
    fn ready_signal_for_a_foreign_pid_is_ignored() {
        let ready_fired = Rc::new(AtomicBool::new(false));
        let flag = ready_fired.clone();
        let server = new_server(LocalXServerHooks {
            on_ready: Some(Box::new(move || flag.store(true, Ordering::SeqCst))),
            on_stopped: None,
        });
        server.set_command("/bin/sleep".to_string());
        server.start().unwrap();

        server.handle_ready_signal(Pid::from_raw(1));
        assert!(!ready_fired.load(Ordering::SeqCst));

        let real_pid = server.pid().unwrap();
        server.handle_ready_signal(real_pid);
        assert!(ready_fired.load(Ordering::SeqCst));

        server.handle_child_exited(real_pid);
    }

    #[test]
    fn child_exit_releases_the_display_number() {
        let allocator = Rc::new(DisplayNumberAllocator::new(50));
        let server = new_server_with_allocator(allocator.clone(), LocalXServerHooks::default());
        server.set_command("/bin/sleep".to_string());
        server.start().unwrap();
        let pid = server.pid().unwrap();
        let number = server.display_number();

        server.handle_child_exited(pid);
        assert!(!server.is_running());
        assert_eq!(allocator.reserve(), number, "released number should be reusable");
    }
}
