//! Worker lifecycle: health state, shutdown signalling, and in-flight tracking.
//!
//! The lifecycle is a single watch channel carrying [`HealthState`]; shutdown
//! has been requested once the state reaches `Draining`. The consumer loop
//! checks that between poll timeouts, the probe server awaits it, and a
//! message being validated or dispatched holds an [`InFlightGuard`] so
//! [`ShutdownController::wait_for_drain`] knows when the last one finished.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Worker health, in lifecycle order: Starting -> Ready -> Draining -> Stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HealthState {
    /// Loading schemas and connecting to the broker.
    Starting,
    /// Consumer loop is polling.
    Ready,
    /// Shutdown requested; the current message, if any, is finishing.
    Draining,
    /// Nothing left in flight.
    Stopped,
}

impl HealthState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Starting => "starting",
            HealthState::Ready => "ready",
            HealthState::Draining => "draining",
            HealthState::Stopped => "stopped",
        }
    }

    #[must_use]
    pub fn is_shutting_down(self) -> bool {
        self >= HealthState::Draining
    }
}

#[derive(Debug, Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

/// Shared between signal handling, the consumer loop, and the health probes.
#[derive(Debug)]
pub struct ShutdownController {
    state: watch::Sender<HealthState>,
    in_flight: Arc<InFlight>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(HealthState::Starting);
        Self {
            state,
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Moves `Starting` to `Ready`. No effect once shutdown has begun.
    pub fn set_ready(&self) {
        self.state.send_if_modified(|state| {
            let starting = *state == HealthState::Starting;
            if starting {
                *state = HealthState::Ready;
            }
            starting
        });
    }

    /// Requests shutdown. Idempotent.
    pub fn trigger_shutdown(&self) {
        self.state.send_if_modified(|state| {
            if state.is_shutting_down() {
                return false;
            }
            *state = HealthState::Draining;
            true
        });
    }

    /// Non-blocking shutdown check.
    #[must_use]
    pub fn is_shutdown_triggered(&self) -> bool {
        self.state.borrow().is_shutting_down()
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        *self.state.borrow()
    }

    /// A handle that can await the shutdown request.
    #[must_use]
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal(self.state.subscribe())
    }

    /// Marks one message as in flight until the guard is dropped.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.count.load(Ordering::Acquire)
    }

    /// Waits up to `timeout` for the in-flight count to reach zero, then
    /// moves to `Stopped`. Returns `false` on timeout, leaving the state as is.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            loop {
                let idle = self.in_flight.idle.notified();
                tokio::pin!(idle);
                idle.as_mut().enable();
                if self.in_flight_count() == 0 {
                    return;
                }
                idle.await;
            }
        };

        if tokio::time::timeout(timeout, drained).await.is_err() {
            return false;
        }
        self.state.send_replace(HealthState::Stopped);
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of the shutdown request.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(watch::Receiver<HealthState>);

impl ShutdownSignal {
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.0.borrow().is_shutting_down()
    }

    /// Resolves once shutdown is requested, or immediately if it already was.
    pub async fn triggered(&mut self) {
        // An Err means the controller is gone, which also ends the worker.
        let _ = self.0.wait_for(|state| state.is_shutting_down()).await;
    }
}

/// Held while a message is processed.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<InFlight>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.in_flight.idle.notify_waiters();
        }
    }
}

/// Spawns a task that requests shutdown on SIGINT or SIGTERM.
///
/// Register before the consumer loop starts so a signal arriving during
/// startup is not lost.
#[must_use]
pub fn listen_for_signals(controller: Arc<ShutdownController>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = wait_for_termination().await;
        info!(signal, "termination signal received, shutting down");
        controller.trigger_shutdown();
    })
}

#[cfg(unix)]
async fn wait_for_termination() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(err) => {
            warn!(error = %err, "failed to register SIGTERM handler; only SIGINT is observed");
            let _ = tokio::signal::ctrl_c().await;
            "SIGINT"
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "SIGINT"
}
