//! Fleet registry for fleetd
//!
//! Holds every published server handle behind a single lock. Callers check
//! handles out to mutate them and must attach every one of them back, so at
//! most one caller drives a given server's lifecycle at a time.

use crate::config::SupervisorSettings;
use crate::error::{FleetError, Result};
use crate::handle::{ClientId, ServerHandle};
use crate::policy::{AccessPolicy, OwnerPolicy, Requester};
use crate::server::{ServerProcess, SupervisorContext};
use crate::snapshot::{PrivateDetails, ServerSummary};
use crate::state::{ExitCondition, ServerState};
use crate::timer::TimerService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{debug, info, warn};

/// Outcome of [`FleetRegistry::lookup_by_owner`]
#[derive(Debug)]
pub enum Lookup {
    /// Checked-out handles; every one must be attached again
    Owned(Vec<ServerHandle>),
    /// Servers exist, none belongs to the requester
    NoneOwned,
    /// No servers at all
    Empty,
}

impl Lookup {
    pub fn into_handles(self) -> Vec<ServerHandle> {
        match self {
            Lookup::Owned(handles) => handles,
            Lookup::NoneOwned | Lookup::Empty => Vec::new(),
        }
    }
}

pub struct FleetRegistry {
    slots: Mutex<Vec<Option<ServerHandle>>>,
    ctx: SupervisorContext,
    policy: Arc<dyn AccessPolicy>,
    closed: AtomicBool,
}

impl FleetRegistry {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self::with_context(SupervisorContext::new(settings))
    }

    pub fn with_context(ctx: SupervisorContext) -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            ctx,
            policy: Arc::new(OwnerPolicy),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn timer(&self) -> &Arc<TimerService> {
        &self.ctx.timer
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<ServerHandle>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the registry for business. Called once at daemon boot.
    pub fn startup(&self) {
        self.closed.store(false, Ordering::SeqCst);
        info!(
            program = %self.ctx.settings.program.display(),
            tick_ms = self.ctx.settings.tick.as_millis() as u64,
            "fleet registry started"
        );
    }

    /// A fresh, detached handle. It stays invisible to listers until it
    /// is configured, started and attached.
    pub fn allocate(&self, client: ClientId) -> Result<ServerHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(FleetError::ShuttingDown);
        }
        let handle = ServerHandle::new(ServerProcess::new(self.ctx.clone()), client);
        debug!(server_id = handle.server().id(), %client, "allocated server");
        Ok(handle)
    }

    /// Publish a handle, reusing the first free slot.
    pub fn attach(&self, handle: ServerHandle) {
        self.attach_all([handle]);
    }

    /// Publish handles. A handle whose server never started is discarded,
    /// since no owner could ever check it out again.
    pub fn attach_all(&self, handles: impl IntoIterator<Item = ServerHandle>) {
        let mut late = Vec::new();
        let mut unstarted = Vec::new();
        {
            let mut slots = self.lock();
            for mut handle in handles {
                if handle.server().state() == ServerState::Created {
                    unstarted.push(handle);
                    continue;
                }
                if self.closed.load(Ordering::SeqCst) {
                    late.push(handle);
                    continue;
                }
                handle.set_issued(false);
                match slots.iter_mut().find(|slot| slot.is_none()) {
                    Some(slot) => *slot = Some(handle),
                    None => slots.push(Some(handle)),
                }
            }
        }

        for handle in unstarted {
            warn!(
                server_id = handle.server().id(),
                client = %handle.client(),
                "discarding handle attached before its server started"
            );
        }

        // the fleet is gone; nobody would ever end these
        for mut handle in late {
            let condition = handle.server_mut().end();
            warn!(
                server_id = handle.server().id(),
                "attached after shutdown, ended: {condition}"
            );
        }
    }

    /// Check out every server the requester may manage.
    pub fn lookup_by_owner(&self, uid: u32, gid: Option<u32>) -> Lookup {
        let requester = Requester { uid: Some(uid), gid };
        let mut slots = self.lock();
        if slots.iter().all(Option::is_none) {
            return Lookup::Empty;
        }

        let mut owned = Vec::new();
        for slot in slots.iter_mut() {
            let taken = slot.take_if(|handle| {
                handle
                    .server()
                    .owner()
                    .is_some_and(|owner| self.policy.permits(owner, requester))
            });
            if let Some(mut handle) = taken {
                handle.set_issued(true);
                owned.push(handle);
            }
        }

        if owned.is_empty() {
            Lookup::NoneOwned
        } else {
            Lookup::Owned(owned)
        }
    }

    /// Summaries of every attached server. Owner-only details are filled in
    /// when the requester identifies itself and the policy allows it.
    pub fn list_snapshot(&self, uid: Option<u32>, gid: Option<u32>) -> Vec<ServerSummary> {
        let requester = Requester { uid, gid };
        let identified = uid.is_some() || gid.is_some();
        let slots = self.lock();
        slots
            .iter()
            .flatten()
            .map(|handle| {
                let server = handle.server();
                let private = server
                    .owner()
                    .filter(|owner| identified && self.policy.permits(*owner, requester))
                    .map(|owner| PrivateDetails {
                        owner,
                        pid: server.pid(),
                        home_directory: server
                            .config()
                            .map(|c| c.home_directory.clone())
                            .unwrap_or_default(),
                        started_at: server.started_at(),
                    });
                ServerSummary {
                    id: server.id(),
                    name: server.name().to_string(),
                    state: server.state(),
                    elapsed_seconds: server.elapsed_seconds(),
                    max_run_seconds: server.max_run_seconds(),
                    private,
                }
            })
            .collect()
    }

    /// Check out servers whose monitor already saw them stop, so they can
    /// be ended and discarded.
    pub fn collect_finished(&self) -> Vec<ServerHandle> {
        let mut slots = self.lock();
        slots
            .iter_mut()
            .filter_map(|slot| slot.take_if(|handle| handle.server().finished()))
            .map(|mut handle| {
                handle.set_issued(true);
                handle
            })
            .collect()
    }

    /// Number of attached servers
    pub fn occupied(&self) -> usize {
        self.lock().iter().flatten().count()
    }

    /// Stop every attached server and wait until all of them are reaped.
    /// Servers are ended in parallel so total latency is one grace window.
    pub fn shutdown(&self) -> Vec<(u32, ExitCondition)> {
        self.closed.store(true, Ordering::SeqCst);
        let handles: Vec<ServerHandle> = self.lock().drain(..).flatten().collect();
        info!(count = handles.len(), "shutting down fleet");

        let results = thread::scope(|scope| {
            let mut workers = Vec::new();
            for mut handle in handles {
                let id = handle.server().id();
                let worker = thread::Builder::new()
                    .name(format!("fleetd-end-{id}"))
                    .spawn_scoped(scope, move || (id, handle.server_mut().end()));
                match worker {
                    Ok(worker) => workers.push((id, worker)),
                    // the rejected closure drops the handle, which ends the server inline
                    Err(e) => warn!(server_id = id, "could not spawn shutdown thread: {e}"),
                }
            }
            workers
                .into_iter()
                .filter_map(|(id, worker)| match worker.join() {
                    Ok(result) => Some(result),
                    Err(_) => {
                        warn!(server_id = id, "shutdown thread panicked");
                        None
                    }
                })
                .collect::<Vec<_>>()
        });

        for (id, condition) in &results {
            info!(server_id = id, "{condition}");
        }
        info!("fleet shut down");
        results
    }
}
