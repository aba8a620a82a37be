//! Shared coarse clock for every supervisor.
//!
//! One ticker thread serves the whole daemon. It exists only while at least
//! one supervisor holds a reference (`enable` / `disable`), and supervisors
//! account run time in ticks read from the shared counter rather than by
//! sampling the wall clock.

use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct TimerState {
    refs: usize,
    ticks: u64,
    /// Bumped on every 0->1 transition so a retired ticker stops promptly
    generation: u64,
    worker: Option<JoinHandle<()>>,
}

pub struct TimerService {
    period: Duration,
    state: Mutex<TimerState>,
    /// Signalled on every tick
    tick: Condvar,
    /// Wakes the ticker on disable
    control: Condvar,
}

impl TimerService {
    pub fn new(period: Duration) -> Arc<Self> {
        Arc::new(Self {
            period,
            state: Mutex::new(TimerState {
                refs: 0,
                ticks: 0,
                generation: 0,
                worker: None,
            }),
            tick: Condvar::new(),
            control: Condvar::new(),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a reference; the first one starts the ticker thread.
    pub fn enable(self: &Arc<Self>) -> io::Result<()> {
        let mut state = self.lock();
        if state.refs == 0 {
            state.generation += 1;
            let generation = state.generation;
            let timer = Arc::clone(self);
            let worker = thread::Builder::new()
                .name("fleetd-timer".to_string())
                .spawn(move || timer.run(generation))?;
            state.worker = Some(worker);
            debug!(period_ms = self.period.as_millis() as u64, "timer service started");
        }
        state.refs += 1;
        Ok(())
    }

    /// Drop a reference; the last one stops and joins the ticker thread.
    pub fn disable(&self) {
        let worker = {
            let mut state = self.lock();
            match state.refs {
                0 => {
                    warn!("timer service disabled more often than enabled");
                    return;
                }
                1 => {
                    state.refs = 0;
                    state.generation += 1;
                    self.control.notify_all();
                    state.worker.take()
                }
                _ => {
                    state.refs -= 1;
                    None
                }
            }
        };

        if let Some(worker) = worker {
            if worker.join().is_err() {
                warn!("timer thread panicked");
            }
            debug!("timer service stopped");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().refs > 0
    }

    /// Current value of the tick counter
    pub fn ticks(&self) -> u64 {
        self.lock().ticks
    }

    /// Block until the counter moves past `seen` and return the new value.
    ///
    /// Gives up after two periods without a tick (ticker not enabled), in
    /// which case the returned value may equal `seen`.
    pub fn wait_next(&self, seen: u64) -> u64 {
        let state = self.lock();
        let (state, _) = self
            .tick
            .wait_timeout_while(state, self.period * 2, |s| s.ticks <= seen)
            .unwrap_or_else(PoisonError::into_inner);
        state.ticks
    }

    /// Sleep for `n` ticks.
    pub fn sleep_ticks(&self, n: u64) {
        let start = self.ticks();
        let mut now = start;
        while now - start < n {
            let next = self.wait_next(now);
            if next == now {
                // ticker not running, fall back to the nominal period
                thread::sleep(self.period);
                now += 1;
            } else {
                now = next;
            }
        }
    }

    fn run(&self, generation: u64) {
        let mut deadline = Instant::now() + self.period;
        let mut state = self.lock();
        loop {
            if state.generation != generation {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                state.ticks += 1;
                self.tick.notify_all();
                deadline += self.period;
                continue;
            }
            let (guard, _) = self
                .control
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}
