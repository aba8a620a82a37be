//! fleetd game server supervisor
//!
//! Starts, supervises and tears down child game-server processes on behalf
//! of authenticated users. The library holds the supervision engine and the
//! fleet registry; the wire protocol and authentication live elsewhere and
//! drive it through [`FleetRegistry`] and [`ServerProcess`].

pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod handle;
pub mod ids;
pub mod policy;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod state;
pub mod timer;

pub use config::{DaemonConfig, PropertyOverride, ServerConfig, SupervisorSettings};
pub use error::{FleetError, Result, StartError};
pub use handle::{ClientId, Owner, ServerHandle};
pub use policy::{AccessPolicy, OwnerPolicy, Requester};
pub use registry::{FleetRegistry, Lookup};
pub use server::{PropertiesWriter, ServerProcess, SupervisorContext};
pub use snapshot::{PrivateDetails, ServerSummary};
pub use state::{ExitCondition, Liveness, ServerState};
pub use timer::TimerService;

/// Application constants
pub mod constants {
    use std::time::Duration;

    /// Length of one tick of the shared timer
    pub const TICK: Duration = Duration::from_secs(1);

    /// Liveness probes after a timeout "stop" before the child is killed
    pub const SHUTDOWN_GRACE_SECONDS: u64 = 30;

    /// Ticks between the shutdown warning and the "stop" command
    pub const WARNING_SECONDS: u64 = 5;

    /// Non-blocking reap attempts in `end()` before SIGKILL
    pub const REAP_ATTEMPTS: u32 = 30;

    /// Console lines retained per server
    pub const CONSOLE_BACKLOG: usize = 100;

    /// Command a server understands as "shut down cleanly"
    pub const STOP_COMMAND: &str = "stop";

    /// Chat line sent before a run-time limit shutdown
    pub const WARNING_MESSAGE: &str = "say Maximum run time reached, server is shutting down";

    /// Directory name under the user config dir
    pub const CONFIG_DIR_NAME: &str = "fleetd";

    /// Config file name inside [`CONFIG_DIR_NAME`]
    pub const CONFIG_FILE_NAME: &str = "fleetd.json";
}
