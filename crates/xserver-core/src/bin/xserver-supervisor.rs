//! Minimal standalone binary wiring the library's ambient stack together:
//! load configuration, set up logging, launch one local X server, and drive
//! it to readiness through the reactor. Intended as a worked example for
//! whatever daemon embeds `xserver-core`, not as a real display manager.

use std::env;
use std::process;
use std::rc::Rc;
use std::time::Duration;

use log::{error, info};

use reactor::Reactor;
use vt_registry::DefaultVtRegistry;
use xauthority::MitMagicCookieEncoder;
use xserver_core::config::Config;
use xserver_core::display_number::DisplayNumberAllocator;
use xserver_core::{Dispatcher, LocalXServer, LocalXServerHooks};

const DEFAULT_CONFIG_PATH: &str = "/etc/lightdm/lightdm.conf";

fn setup_logger() {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();
}

fn main() {
    setup_logger();
    info!("xserver-supervisor starting");

    let config_path = env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_or_default(std::path::Path::new(&config_path));

    let mut reactor = Reactor::new().unwrap_or_else(|err| {
        error!("failed to set up the signal reactor: {err}");
        process::exit(1);
    });

    let allocator = Rc::new(DisplayNumberAllocator::new(config.minimum_display_number));
    let vt_registry = DefaultVtRegistry::new();
    let encoder = Rc::new(MitMagicCookieEncoder);

    let server = Rc::new(LocalXServer::new(
        config.run_directory.clone(),
        config.log_directory.clone(),
        config.backup_logs,
        allocator,
        vt_registry,
        encoder,
        LocalXServerHooks {
            on_ready: Some(Box::new(|| info!("X server reported ready"))),
            on_stopped: Some(Box::new(|| info!("X server stopped"))),
        },
    ));

    if let Err(err) = server.start() {
        error!("failed to start X server: {err}");
        process::exit(1);
    }

    let mut dispatcher = Dispatcher::new();
    dispatcher.register(server.clone());

    loop {
        if let Err(err) = dispatcher.poll(&mut reactor, Some(Duration::from_secs(1))) {
            error!("reactor poll failed: {err}");
            break;
        }
        if !server.is_running() {
            break;
        }
    }
}
