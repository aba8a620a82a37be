//! Configuration management for fleetd
//!
//! Handles the daemon configuration file, per-server launch configuration
//! and the settings shared by every supervisor.

use crate::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, CONSOLE_BACKLOG, REAP_ATTEMPTS, SHUTDOWN_GRACE_SECONDS,
    STOP_COMMAND, TICK, WARNING_MESSAGE, WARNING_SECONDS,
};
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One `key=value` override forwarded untouched to the properties writer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PropertyOverride {
    pub key: String,
    pub value: String,
}

/// Launch configuration for one server, as built by the command layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub internal_name: String,
    #[serde(default)]
    pub is_new: bool,
    pub owner_uid: u32,
    pub owner_gid: u32,
    pub home_directory: PathBuf,
    /// Run-time limit in ticks; 0 means unlimited
    #[serde(default)]
    pub max_run_seconds: u64,
    #[serde(default)]
    pub properties: Vec<PropertyOverride>,
}

impl ServerConfig {
    pub fn new(
        internal_name: impl Into<String>,
        owner_uid: u32,
        owner_gid: u32,
        home: impl Into<PathBuf>,
    ) -> Self {
        Self {
            internal_name: internal_name.into(),
            is_new: false,
            owner_uid,
            owner_gid,
            home_directory: home.into(),
            max_run_seconds: 0,
            properties: Vec::new(),
        }
    }

    pub fn with_max_run_seconds(mut self, seconds: u64) -> Self {
        self.max_run_seconds = seconds;
        self
    }
}

/// Daemon configuration file contents
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DaemonConfig {
    /// Binary every server is launched with
    pub server_program: PathBuf,
    pub server_args: Vec<String>,
    pub tick_millis: u64,
    pub shutdown_grace_seconds: u64,
    pub warning_seconds: u64,
    pub reap_attempts: u32,
    pub warning_message: String,
    pub stop_command: String,
    pub console_backlog: usize,
    /// Switch children to the owner's uid/gid; defaults to "running as root"
    pub drop_privileges: Option<bool>,
    /// Servers started at daemon boot
    pub servers: Vec<ServerConfig>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            server_program: PathBuf::new(),
            server_args: Vec::new(),
            tick_millis: TICK.as_millis() as u64,
            shutdown_grace_seconds: SHUTDOWN_GRACE_SECONDS,
            warning_seconds: WARNING_SECONDS,
            reap_attempts: REAP_ATTEMPTS,
            warning_message: WARNING_MESSAGE.to_string(),
            stop_command: STOP_COMMAND.to_string(),
            console_backlog: CONSOLE_BACKLOG,
            drop_privileges: None,
            servers: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Default config file path: `<config_dir>/fleetd/fleetd.json`
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir()
            .ok_or_else(|| FleetError::Config("Could not find config directory".to_string()))?;
        Ok(dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load the configuration. An explicit path must exist; a missing file
    /// at the default location yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path()?, false),
        };

        if !path.exists() {
            if explicit {
                return Err(FleetError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)?;
        let config: DaemonConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_millis == 0 {
            return Err(FleetError::Config("tick_millis must be positive".to_string()));
        }
        if self.stop_command.trim().is_empty() {
            return Err(FleetError::Config("stop_command must not be empty".to_string()));
        }
        Ok(())
    }

    /// Settings shared by every supervisor of this daemon
    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            program: self.server_program.clone(),
            args: self.server_args.clone(),
            tick: Duration::from_millis(self.tick_millis),
            shutdown_grace_seconds: self.shutdown_grace_seconds,
            warning_seconds: self.warning_seconds,
            reap_attempts: self.reap_attempts,
            warning_message: self.warning_message.clone(),
            stop_command: self.stop_command.clone(),
            console_backlog: self.console_backlog,
            drop_privileges: self.drop_privileges.unwrap_or_else(running_as_root),
        }
    }
}

/// Immutable per-daemon supervision knobs
#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub tick: Duration,
    pub shutdown_grace_seconds: u64,
    pub warning_seconds: u64,
    pub reap_attempts: u32,
    pub warning_message: String,
    pub stop_command: String,
    pub console_backlog: usize,
    pub drop_privileges: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        DaemonConfig::default().supervisor_settings()
    }
}

impl SupervisorSettings {
    /// Settings launching `program args...` as the daemon's own user
    pub fn for_program(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            drop_privileges: false,
            ..Self::default()
        }
    }
}

fn running_as_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}
