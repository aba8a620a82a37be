//! Supervisor for one child server process.
//!
//! `begin` spawns the child with its console channel and starts a monitor
//! thread that enforces the run-time limit and notices unsolicited exits.
//! `end` stops the monitor, reaps the child (escalating to SIGKILL when the
//! grace window runs out) and reports why the server stopped.

use crate::config::{ServerConfig, SupervisorSettings};
use crate::console::Console;
use crate::error::StartError;
use crate::handle::Owner;
use crate::ids::IdPool;
use crate::state::{ExitCondition, Liveness, ServerState};
use crate::timer::TimerService;
use chrono::{DateTime, Utc};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Writes the server's property overrides before launch.
///
/// The supervisor forwards [`ServerConfig`] as is; interpreting the
/// overrides is entirely up to the implementation.
pub trait PropertiesWriter: Send + Sync {
    fn write(&self, config: &ServerConfig) -> io::Result<()>;
}

/// Everything a supervisor borrows from the daemon
#[derive(Clone)]
pub struct SupervisorContext {
    pub settings: Arc<SupervisorSettings>,
    pub timer: Arc<TimerService>,
    pub ids: Arc<IdPool>,
    pub properties: Option<Arc<dyn PropertiesWriter>>,
}

impl SupervisorContext {
    pub fn new(settings: SupervisorSettings) -> Self {
        let timer = TimerService::new(settings.tick);
        Self {
            settings: Arc::new(settings),
            timer,
            ids: Arc::new(IdPool::new()),
            properties: None,
        }
    }

    pub fn with_properties(mut self, writer: Arc<dyn PropertiesWriter>) -> Self {
        self.properties = Some(writer);
        self
    }
}

/// State shared between a supervisor and its monitor thread
struct Run {
    id: u32,
    name: String,
    pid: u32,
    child: Mutex<Child>,
    console: Console,
    stop: AtomicBool,
    /// Written only by the monitor thread
    elapsed: AtomicU64,
    state: Mutex<ServerState>,
    condition: Mutex<Option<ExitCondition>>,
}

impl Run {
    fn child(&self) -> MutexGuard<'_, Child> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ServerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ServerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn recorded(&self) -> Option<ExitCondition> {
        *self.condition.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, condition: ExitCondition) {
        *self.condition.lock().unwrap_or_else(PoisonError::into_inner) = Some(condition);
    }

    /// Liveness check. A terminated child is reaped here; std keeps its
    /// status so later waits observe the same result.
    fn probe(&self) -> Liveness {
        match self.child().try_wait() {
            Ok(Some(_)) => Liveness::Terminated,
            Ok(None) => Liveness::Running,
            Err(e) => {
                warn!(server_id = self.id, "liveness probe failed: {e}");
                Liveness::Terminated
            }
        }
    }

    /// Zero `times` reports `Running` without probing.
    fn poll(&self, timer: &TimerService, times: u32, interval: u64) -> Liveness {
        for attempt in 0..times {
            if self.probe() == Liveness::Terminated {
                return Liveness::Terminated;
            }
            if attempt + 1 < times {
                timer.sleep_ticks(interval);
            }
        }
        Liveness::Running
    }

    /// Signal the child's process group, falling back to the child alone.
    fn signal(&self, sig: libc::c_int) {
        // hold the child lock so the pid cannot be reaped and reused under us
        let mut child = self.child();
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        let pid = self.pid as libc::pid_t;
        let group_result = unsafe { libc::kill(-pid, sig) };
        if group_result != 0 {
            let process_result = unsafe { libc::kill(pid, sig) };
            if process_result != 0 {
                let errno = io::Error::last_os_error();
                warn!(server_id = self.id, pid, "failed to send signal {sig}: {errno}");
            }
        }
    }

    fn send(&self, line: &str) {
        if let Err(e) = self.console.send_line(line) {
            debug!(server_id = self.id, "console write failed: {e}");
        }
    }
}

pub struct ServerProcess {
    id: u32,
    ctx: SupervisorContext,
    config: Option<ServerConfig>,
    run: Option<Arc<Run>>,
    monitor: Option<JoinHandle<Option<ExitCondition>>>,
    reader: Option<JoinHandle<()>>,
    started_at: Option<DateTime<Utc>>,
    exit: Option<ExitCondition>,
}

impl ServerProcess {
    pub fn new(ctx: SupervisorContext) -> Self {
        let id = ctx.ids.acquire();
        Self {
            id,
            ctx,
            config: None,
            run: None,
            monitor: None,
            reader: None,
            started_at: None,
            exit: None,
        }
    }

    /// Internal id, unique among live supervisors
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn config(&self) -> Option<&ServerConfig> {
        self.config.as_ref()
    }

    pub fn name(&self) -> &str {
        self.config
            .as_ref()
            .map(|c| c.internal_name.as_str())
            .unwrap_or("")
    }

    pub fn owner(&self) -> Option<Owner> {
        self.config.as_ref().map(|c| Owner {
            uid: c.owner_uid,
            gid: c.owner_gid,
        })
    }

    pub fn state(&self) -> ServerState {
        match &self.run {
            Some(run) => run.state(),
            None => ServerState::Created,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.run.as_ref().map(|r| r.pid)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.run
            .as_ref()
            .map(|r| r.elapsed.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn max_run_seconds(&self) -> u64 {
        self.config.as_ref().map(|c| c.max_run_seconds).unwrap_or(0)
    }

    pub fn shutdown_grace_seconds(&self) -> u64 {
        self.ctx.settings.shutdown_grace_seconds
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Condition returned by `end`, or recorded by the monitor before it
    pub fn exit_condition(&self) -> Option<ExitCondition> {
        self.exit.or_else(|| self.run.as_ref().and_then(|r| r.recorded()))
    }

    /// The monitor has already seen the server stop; `end` will not block long.
    pub fn finished(&self) -> bool {
        self.monitor.is_some() && self.run.as_ref().is_some_and(|r| r.recorded().is_some())
    }

    /// Last console lines printed by the server
    pub fn console_tail(&self) -> Vec<String> {
        self.run.as_ref().map(|r| r.console.tail()).unwrap_or_default()
    }

    /// Forward one console command to a running server.
    pub fn send_command(&self, line: &str) -> io::Result<()> {
        match &self.run {
            Some(run) if self.monitor.is_some() => run.console.send_line(line),
            _ => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "server is not running",
            )),
        }
    }

    /// Spawn the server and start supervising it. Never blocks on the child.
    pub fn begin(&mut self, config: ServerConfig) -> Result<(), StartError> {
        if self.run.is_some() {
            return Err(StartError::AlreadyStarted);
        }
        let settings = Arc::clone(&self.ctx.settings);
        if settings.program.as_os_str().is_empty() {
            return Err(StartError::MissingParameter("server program"));
        }
        if config.internal_name.trim().is_empty() {
            return Err(StartError::MissingParameter("internal name"));
        }
        if config.home_directory.as_os_str().is_empty() {
            return Err(StartError::MissingParameter("home directory"));
        }
        if !config.home_directory.is_dir() {
            return Err(StartError::HomeDirectory(config.home_directory.clone()));
        }
        if let Some(writer) = &self.ctx.properties {
            writer.write(&config).map_err(StartError::Properties)?;
        }

        let spawn_error = |source| StartError::Spawn {
            program: settings.program.clone(),
            source,
        };
        let (console, stdio) =
            Console::open(settings.console_backlog, settings.tick).map_err(spawn_error)?;

        let mut cmd = Command::new(&settings.program);
        cmd.args(&settings.args)
            .current_dir(&config.home_directory)
            .env("FLEETD_SERVER_NAME", &config.internal_name)
            .env("FLEETD_SERVER_ID", self.id.to_string())
            .env("FLEETD_SERVER_NEW", if config.is_new { "1" } else { "0" })
            .stdin(stdio.stdin)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .process_group(0);
        if settings.drop_privileges {
            cmd.uid(config.owner_uid).gid(config.owner_gid);
        }

        // exec failures come back through std's close-on-exec error pipe
        let child = cmd.spawn().map_err(spawn_error)?;
        // closes our copies of the child's ends
        drop(cmd);

        let pid = child.id();
        let run = Arc::new(Run {
            id: self.id,
            name: config.internal_name.clone(),
            pid,
            child: Mutex::new(child),
            console,
            stop: AtomicBool::new(false),
            elapsed: AtomicU64::new(0),
            state: Mutex::new(ServerState::Running),
            condition: Mutex::new(None),
        });

        if let Err(e) = self.ctx.timer.enable() {
            abandon(&run);
            return Err(StartError::Timer(e));
        }

        let reader = match run.console.spawn_reader(self.id.to_string()) {
            Ok(reader) => reader,
            Err(e) => {
                abandon(&run);
                self.ctx.timer.disable();
                return Err(StartError::Monitor(e));
            }
        };

        let monitor = {
            let run = Arc::clone(&run);
            let settings = Arc::clone(&settings);
            let timer = Arc::clone(&self.ctx.timer);
            let max_run = config.max_run_seconds;
            thread::Builder::new()
                .name(format!("fleetd-monitor-{}", self.id))
                .spawn(move || supervise(&run, &settings, &timer, max_run))
        };
        let monitor = match monitor {
            Ok(monitor) => monitor,
            Err(e) => {
                abandon(&run);
                let _ = reader.join();
                self.ctx.timer.disable();
                return Err(StartError::Monitor(e));
            }
        };

        info!(
            server_id = self.id,
            server = %config.internal_name,
            pid,
            owner_uid = config.owner_uid,
            max_run = config.max_run_seconds,
            "server started"
        );

        self.run = Some(run);
        self.monitor = Some(monitor);
        self.reader = Some(reader);
        self.started_at = Some(Utc::now());
        self.config = Some(config);
        Ok(())
    }

    /// Probe liveness `times` times, `interval` ticks apart. Zero `times`
    /// answers `Running` for a started server without touching the child.
    pub fn poll(&self, times: u32, interval: u64) -> Liveness {
        match &self.run {
            None => Liveness::NotStarted,
            Some(run) => run.poll(&self.ctx.timer, times, interval),
        }
    }

    /// Stop supervising and reap the child. Idempotent: a supervisor that
    /// is not running answers [`ExitCondition::NotRunning`].
    pub fn end(&mut self) -> ExitCondition {
        let (Some(run), Some(monitor)) = (self.run.clone(), self.monitor.take()) else {
            return ExitCondition::NotRunning;
        };

        run.set_state(ServerState::Stopping);
        run.stop.store(true, Ordering::SeqCst);
        let recorded = match monitor.join() {
            Ok(condition) => condition,
            Err(_) => {
                error!(server_id = self.id, "monitor thread panicked");
                None
            }
        };

        let condition = self.reap(&run, recorded);

        run.console.close();
        if let Some(reader) = self.reader.take()
            && reader.join().is_err()
        {
            warn!(server_id = self.id, "console reader panicked");
        }
        self.ctx.timer.disable();
        run.set_state(ServerState::Exited);
        self.exit = Some(condition);

        info!(
            server_id = self.id,
            server = %run.name,
            elapsed = run.elapsed.load(Ordering::Relaxed),
            "server ended: {condition}"
        );
        condition
    }

    fn reap(&self, run: &Run, recorded: Option<ExitCondition>) -> ExitCondition {
        for _ in 0..self.ctx.settings.reap_attempts {
            let reaped = run.child().try_wait();
            match reaped {
                Ok(Some(status)) => return recorded.unwrap_or_else(|| requested_condition(status)),
                Ok(None) => self.ctx.timer.sleep_ticks(1),
                Err(e) => {
                    warn!(server_id = self.id, "lost track of child: {e}");
                    return recorded.unwrap_or(ExitCondition::AuthorityRequested);
                }
            }
        }

        warn!(
            server_id = self.id,
            pid = run.pid,
            "server still running after {} attempts, sending SIGKILL",
            self.ctx.settings.reap_attempts
        );
        run.signal(libc::SIGKILL);
        if let Err(e) = run.child().wait() {
            warn!(server_id = self.id, "wait after SIGKILL failed: {e}");
        }
        recorded.unwrap_or(ExitCondition::AuthorityKilled)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        if self.monitor.is_some() {
            self.end();
        }
        self.ctx.ids.release(self.id);
    }
}

fn requested_condition(status: ExitStatus) -> ExitCondition {
    if status.signal().is_some() {
        ExitCondition::AuthorityKilled
    } else {
        ExitCondition::AuthorityRequested
    }
}

/// Kill and reap a child whose supervision could not be set up.
fn abandon(run: &Run) {
    run.signal(libc::SIGKILL);
    if let Err(e) = run.child().wait() {
        warn!(server_id = run.id, "failed to reap abandoned child: {e}");
    }
    run.console.close();
    run.set_state(ServerState::Exited);
}

/// Monitor loop. Returns the condition it observed, or `None` when it was
/// told to stop first.
fn supervise(
    run: &Run,
    settings: &SupervisorSettings,
    timer: &TimerService,
    max_run: u64,
) -> Option<ExitCondition> {
    let mut last = timer.ticks();
    let condition = loop {
        if max_run > 0 && run.elapsed.load(Ordering::Relaxed) >= max_run {
            break Some(timeout_shutdown(run, settings, timer));
        }

        if run.probe() == Liveness::Terminated {
            warn!(server_id = run.id, server = %run.name, "server exited on its own");
            run.set_state(ServerState::Stopping);
            break Some(ExitCondition::UnsolicitedExit);
        }

        let now = timer.wait_next(last);
        run.elapsed.fetch_add(now - last, Ordering::Relaxed);
        last = now;

        if run.stop.load(Ordering::SeqCst) {
            debug!(server_id = run.id, "stop requested");
            run.send(&settings.stop_command);
            break None;
        }
    };

    if let Some(condition) = condition {
        run.record(condition);
    }
    condition
}

fn timeout_shutdown(
    run: &Run,
    settings: &SupervisorSettings,
    timer: &TimerService,
) -> ExitCondition {
    run.set_state(ServerState::Stopping);
    warn!(
        server_id = run.id,
        server = %run.name,
        elapsed = run.elapsed.load(Ordering::Relaxed),
        "maximum run time reached"
    );

    run.send(&settings.warning_message);
    timer.sleep_ticks(settings.warning_seconds);
    run.send(&settings.stop_command);

    // a tick passes before every probe, the last one included
    for _ in 0..settings.shutdown_grace_seconds {
        timer.sleep_ticks(1);
        if run.probe() == Liveness::Terminated {
            return ExitCondition::TimeoutRequested;
        }
    }

    warn!(server_id = run.id, "server ignored stop, sending SIGKILL");
    run.signal(libc::SIGKILL);
    ExitCondition::TimeoutKilled
}
