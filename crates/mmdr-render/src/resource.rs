//! Shared render backend lifecycle.
//!
//! At most one backend instance exists at a time. It is launched lazily on
//! first use, shared by every concurrent render, and reclaimed after a
//! period without use. Concurrent callers that arrive while a launch is in
//! progress wait on that same launch instead of starting their own.

use crate::config::RenderConfig;
use crate::metrics::RenderMetrics;
use mmdr_core::{
    BackendInstanceId, DisconnectCallback, Error, RenderBackend, RenderSession, ResourceUsage,
    Result,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

type LaunchOutcome = std::result::Result<Arc<Instance>, String>;

enum Slot {
    Empty,
    Initializing {
        instance: BackendInstanceId,
        ready: watch::Receiver<Option<LaunchOutcome>>,
    },
    Ready(Arc<Instance>),
    /// A launch released before it finished. New acquirers wait for it to
    /// be torn down so two instances never coexist.
    Releasing {
        instance: BackendInstanceId,
        ready: watch::Receiver<Option<LaunchOutcome>>,
    },
}

struct Instance {
    id: BackendInstanceId,
    session: Arc<dyn RenderSession>,
    startup: Duration,
    last_used: Mutex<Instant>,
    in_flight: AtomicUsize,
}

impl Instance {
    fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

/// A claim on the shared backend for the duration of one render.
///
/// The instance is never reclaimed while a lease is outstanding.
pub struct Lease {
    instance: Arc<Instance>,
    freshly_created: bool,
}

impl Lease {
    fn new(instance: Arc<Instance>, freshly_created: bool) -> Self {
        instance.in_flight.fetch_add(1, Ordering::SeqCst);
        Self {
            instance,
            freshly_created,
        }
    }

    pub fn session(&self) -> &Arc<dyn RenderSession> {
        &self.instance.session
    }

    pub fn instance_id(&self) -> BackendInstanceId {
        self.instance.id
    }

    /// Whether this lease's acquisition caused the launch.
    pub fn freshly_created(&self) -> bool {
        self.freshly_created
    }

    /// Refresh the instance's last-used time.
    pub fn mark_used(&self) {
        *self.instance.last_used.lock() = Instant::now();
    }

    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            freshly_created: self.freshly_created,
            startup_ms: self.instance.startup.as_millis() as u64,
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.instance.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of the shared backend, for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStatus {
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_ms: Option<u64>,
}

struct Inner {
    backend: Arc<dyn RenderBackend>,
    config: RenderConfig,
    metrics: Arc<RenderMetrics>,
    slot: Mutex<Slot>,
}

/// Owns the lifecycle of the single shared render backend.
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl ResourceManager {
    pub fn new(
        backend: Arc<dyn RenderBackend>,
        config: RenderConfig,
        metrics: Arc<RenderMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                config,
                metrics,
                slot: Mutex::new(Slot::Empty),
            }),
        }
    }

    /// Get a lease on the shared backend, launching it if none exists.
    ///
    /// A failed launch is reported to every waiter and leaves no instance
    /// behind, so the next call retries.
    pub async fn acquire(&self) -> Result<Lease> {
        loop {
            let (instance, mut ready, initiator, releasing) = {
                let mut slot = self.inner.slot.lock();
                match &*slot {
                    Slot::Ready(instance) if instance.session.is_connected() => {
                        return Ok(Lease::new(instance.clone(), false));
                    }
                    Slot::Initializing { instance, ready } => {
                        (*instance, ready.clone(), false, false)
                    }
                    Slot::Releasing { instance, ready } => (*instance, ready.clone(), false, true),
                    _ => {
                        let instance = BackendInstanceId::new();
                        let (tx, rx) = watch::channel(None);
                        *slot = Slot::Initializing {
                            instance,
                            ready: rx.clone(),
                        };
                        Inner::spawn_launch(&self.inner, instance, tx);
                        (instance, rx, true, false)
                    }
                }
            };

            let outcome = ready
                .wait_for(|outcome| outcome.is_some())
                .await
                .map(|outcome| outcome.clone());

            if releasing {
                // The released launch is gone; start over on a clean slot.
                self.inner.abandon(instance);
                debug!(%instance, "Released launch torn down; retrying acquire");
                continue;
            }

            return match outcome {
                Ok(Some(Ok(instance))) => Ok(Lease::new(instance, initiator)),
                Ok(Some(Err(message))) => Err(Error::BackendLaunch(message)),
                Ok(None) | Err(_) => {
                    self.inner.abandon(instance);
                    Err(Error::BackendLaunch("launch was abandoned".to_string()))
                }
            };
        }
    }

    /// Close and forget the current instance, if any.
    ///
    /// An in-progress launch is abandoned and its instance closed as soon
    /// as it comes up; until then acquirers wait instead of launching
    /// another. Returns whether a ready instance was closed.
    pub async fn release(&self, reason: &str) -> bool {
        let closing = {
            let mut slot = self.inner.slot.lock();
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Ready(instance) => Some(instance),
                Slot::Initializing { instance, ready } | Slot::Releasing { instance, ready } => {
                    info!(%instance, reason, "Abandoning render backend launch");
                    *slot = Slot::Releasing { instance, ready };
                    None
                }
                Slot::Empty => None,
            }
        };

        match closing {
            Some(instance) => {
                self.inner.close_instance(instance, reason).await;
                true
            }
            None => false,
        }
    }

    /// Reclaim the instance if it has been idle for the configured window
    /// and no render holds a lease on it.
    pub async fn reap_idle(&self) -> bool {
        let Some(idle_max) = self.inner.config.idle_max else {
            return false;
        };

        let victim = {
            let mut slot = self.inner.slot.lock();
            let reclaim = match &*slot {
                Slot::Ready(instance) if instance.idle_for() >= idle_max => {
                    let in_flight = instance.in_flight();
                    if in_flight > 0 {
                        debug!(instance = %instance.id, in_flight, "Idle window elapsed but renders are in flight");
                    }
                    in_flight == 0
                }
                _ => false,
            };
            if !reclaim {
                return false;
            }
            match std::mem::replace(&mut *slot, Slot::Empty) {
                Slot::Ready(instance) => instance,
                _ => return false,
            }
        };

        info!(
            instance = %victim.id,
            idle_ms = victim.idle_for().as_millis() as u64,
            "Reclaiming idle render backend"
        );
        self.inner.metrics.record_idle_reclaim();
        self.inner.close_instance(victim, "idle-timeout").await;
        true
    }

    /// Start the periodic idle reaper. Returns `None` when reclamation is
    /// disabled.
    pub fn spawn_idle_reaper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let period = self.inner.config.reap_interval()?;
        let manager = Arc::clone(self);

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        manager.reap_idle().await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Idle reaper shutting down");
                            break;
                        }
                    }
                }
            }
        }))
    }

    pub fn status(&self) -> ResourceStatus {
        match &*self.inner.slot.lock() {
            Slot::Empty => ResourceStatus {
                state: "idle",
                instance: None,
                in_flight: 0,
                idle_ms: None,
                startup_ms: None,
            },
            Slot::Releasing { instance, .. } => ResourceStatus {
                state: "releasing",
                instance: Some(instance.to_string()),
                in_flight: 0,
                idle_ms: None,
                startup_ms: None,
            },
            Slot::Initializing { instance, .. } => ResourceStatus {
                state: "launching",
                instance: Some(instance.to_string()),
                in_flight: 0,
                idle_ms: None,
                startup_ms: None,
            },
            Slot::Ready(instance) => ResourceStatus {
                state: "ready",
                instance: Some(instance.id.to_string()),
                in_flight: instance.in_flight(),
                idle_ms: Some(instance.idle_for().as_millis() as u64),
                startup_ms: Some(instance.startup.as_millis() as u64),
            },
        }
    }

    pub fn metrics(&self) -> &Arc<RenderMetrics> {
        &self.inner.metrics
    }
}

impl Inner {
    fn spawn_launch(
        this: &Arc<Self>,
        instance: BackendInstanceId,
        tx: watch::Sender<Option<LaunchOutcome>>,
    ) {
        let inner = Arc::clone(this);
        let on_disconnect = Self::disconnect_callback(this, instance);

        // Detached so that a cancelled caller cannot strand the waiters.
        tokio::spawn(async move {
            info!(%instance, "Launching render backend");
            let started = Instant::now();
            let launched = tokio::time::timeout(
                inner.config.launch_timeout,
                inner.backend.launch(instance, on_disconnect),
            )
            .await;

            let result = match launched {
                Ok(Ok(session)) => Ok(session),
                Ok(Err(Error::BackendLaunch(message))) => Err(message),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!(
                    "launch timed out after {}ms",
                    inner.config.launch_timeout.as_millis()
                )),
            };

            let outcome = inner.complete_launch(instance, result, started.elapsed()).await;
            let _ = tx.send(Some(outcome));
        });
    }

    async fn complete_launch(
        &self,
        id: BackendInstanceId,
        result: std::result::Result<Arc<dyn RenderSession>, String>,
        startup: Duration,
    ) -> LaunchOutcome {
        let session = match result {
            Ok(session) => session,
            Err(message) => {
                self.abandon(id);
                self.metrics.record_launch_failure();
                error!(instance = %id, error = %message, "Render backend launch failed");
                return Err(message);
            }
        };

        let instance = Arc::new(Instance {
            id,
            session,
            startup,
            last_used: Mutex::new(Instant::now()),
            in_flight: AtomicUsize::new(0),
        });

        let installed = {
            let mut slot = self.slot.lock();
            let current = matches!(&*slot, Slot::Initializing { instance, .. } if *instance == id);
            if current {
                *slot = Slot::Ready(Arc::clone(&instance));
            }
            current
        };

        if !installed {
            self.close_instance(instance, "released-during-launch").await;
            self.abandon(id);
            return Err("released during launch".to_string());
        }

        let startup_ms = startup.as_millis() as u64;
        self.metrics.record_launch(startup_ms);
        info!(instance = %id, startup_ms, "Render backend ready");
        Ok(instance)
    }

    /// Reset the slot if it still holds the given launch.
    fn abandon(&self, id: BackendInstanceId) {
        let mut slot = self.slot.lock();
        let held = match &*slot {
            Slot::Initializing { instance, .. } | Slot::Releasing { instance, .. } => *instance == id,
            _ => false,
        };
        if held {
            *slot = Slot::Empty;
        }
    }

    fn disconnect_callback(this: &Arc<Self>, id: BackendInstanceId) -> DisconnectCallback {
        let weak: Weak<Self> = Arc::downgrade(this);
        Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut slot = inner.slot.lock();
            if matches!(&*slot, Slot::Ready(instance) if instance.id == id) {
                *slot = Slot::Empty;
                warn!(instance = %id, "Render backend disconnected; it will be relaunched on next use");
            }
        })
    }

    async fn close_instance(&self, instance: Arc<Instance>, reason: &str) {
        let id = instance.id;
        match tokio::time::timeout(self.config.close_timeout, instance.session.close()).await {
            Ok(Ok(())) => info!(instance = %id, reason, "Render backend closed"),
            Ok(Err(e)) => warn!(instance = %id, reason, error = %e, "Error closing render backend"),
            Err(_) => warn!(instance = %id, reason, "Timed out closing render backend"),
        }
    }
}
