#![allow(dead_code)]

use fleetd::{
    ClientId, FleetRegistry, ServerConfig, ServerHandle, ServerProcess, SupervisorSettings,
    server::SupervisorContext,
};
use std::path::Path;
use std::time::{Duration, Instant};

/// Tick length used by every integration test
pub const TICK: Duration = Duration::from_millis(20);

/// Tick for tests where the child must react within a single tick
pub const SLOW_TICK: Duration = Duration::from_millis(100);

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exits cleanly when it reads "stop".
pub const OBEDIENT: &str =
    r#"while read line; do case "$line" in stop) exit 0;; esac; done"#;

/// Echoes every console line and never exits on its own.
pub const DEAF: &str = r#"trap '' TERM; while read line; do echo "got:$line"; done; sleep 600"#;

/// Dies right away.
pub const CRASHING: &str = "exit 3";

pub fn settings(script: &str) -> SupervisorSettings {
    let mut settings = SupervisorSettings::for_program("/bin/sh", &["-c", script]);
    settings.tick = TICK;
    settings.warning_seconds = 1;
    settings.shutdown_grace_seconds = 25;
    settings.reap_attempts = 25;
    settings
}

pub fn context(settings: SupervisorSettings) -> SupervisorContext {
    SupervisorContext::new(settings)
}

pub fn server_config(name: &str, uid: u32, gid: u32, home: &Path) -> ServerConfig {
    ServerConfig::new(name, uid, gid, home)
}

/// allocate -> begin -> attach; returns the internal id.
pub fn launch(registry: &FleetRegistry, config: ServerConfig) -> u32 {
    let mut handle: ServerHandle = registry.allocate(ClientId::new()).expect("allocate");
    handle.server_mut().begin(config).expect("begin");
    let id = handle.server().id();
    registry.attach(handle);
    id
}

/// Wait until the monitor has recorded an exit condition.
pub fn wait_finished(server: &ServerProcess) -> bool {
    let deadline = Instant::now() + DEFAULT_TIMEOUT;
    while Instant::now() < deadline {
        if server.finished() {
            return true;
        }
        std::thread::sleep(TICK);
    }
    false
}
