//! Live session bookkeeping and the heartbeat sweep.

use crate::protocol::ServerMessage;
use mmdr_core::SessionId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Why the server ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    IdleTimeout,
    PongMissing,
    /// The outbound queue filled up because the peer stopped reading.
    SlowConsumer,
    ServerShutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloseReason::IdleTimeout => "idle-timeout",
            CloseReason::PongMissing => "pong-missing",
            CloseReason::SlowConsumer => "slow-consumer",
            CloseReason::ServerShutdown => "server-shutdown",
        })
    }
}

/// Frames queued for a session's socket writer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    Ping,
}

/// One connected live client.
pub struct LiveSession {
    pub id: SessionId,
    alive: AtomicBool,
    last_activity: Mutex<Instant>,
    state: Mutex<SessionState>,
    outbound: mpsc::Sender<Outbound>,
    terminate: watch::Sender<Option<CloseReason>>,
}

impl LiveSession {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        let (terminate, _) = watch::channel(None);
        Self {
            id: SessionId::new(),
            alive: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::Connecting),
            outbound,
            terminate,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// A pong arrived.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::SeqCst);
    }

    /// An inbound application message arrived.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Queue a message. Returns false once the writer has gone away or the
    /// queue is full; a full queue terminates the session.
    pub fn send(&self, message: ServerMessage) -> bool {
        self.enqueue(Outbound::Message(message))
    }

    fn enqueue(&self, frame: Outbound) -> bool {
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if self.close_reason().is_none() {
                    warn!(session_id = %self.id, "Outbound queue full; dropping session");
                    self.terminate(CloseReason::SlowConsumer);
                }
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the connection task to drop the socket.
    pub fn terminate(&self, reason: CloseReason) {
        self.set_state(SessionState::Closing);
        self.terminate.send_replace(Some(reason));
    }

    pub fn termination(&self) -> watch::Receiver<Option<CloseReason>> {
        self.terminate.subscribe()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.terminate.borrow()
    }

    fn ping(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.enqueue(Outbound::Ping);
    }
}

/// Outcome of one heartbeat sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub pinged: usize,
    pub idle_closed: usize,
    pub unresponsive_closed: usize,
}

/// All open live sessions.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<LiveSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: Arc<LiveSession>) {
        self.sessions.write().insert(session.id, session);
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<LiveSession>> {
        self.sessions.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn snapshot(&self) -> Vec<Arc<LiveSession>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Terminate idle and unresponsive sessions, then ping the rest.
    ///
    /// A session that has not answered the previous ping is terminated on
    /// this sweep. With `ping` false only idle detection runs.
    pub fn sweep(&self, idle_close: Option<Duration>, ping: bool) -> SweepReport {
        let mut report = SweepReport::default();

        for session in self.snapshot() {
            if session.state() != SessionState::Open {
                continue;
            }

            let idle = session.idle_for();
            if idle_close.is_some_and(|max| idle > max) {
                info!(session_id = %session.id, idle_ms = idle.as_millis() as u64, "Terminating idle live session");
                session.terminate(CloseReason::IdleTimeout);
                report.idle_closed += 1;
                continue;
            }

            if !ping {
                continue;
            }

            if !session.is_alive() {
                info!(session_id = %session.id, "Terminating live session: pong missing");
                session.terminate(CloseReason::PongMissing);
                report.unresponsive_closed += 1;
                continue;
            }

            session.ping();
            report.pinged += 1;
        }

        if report != SweepReport::default() {
            debug!(?report, sessions = self.len(), "Heartbeat sweep");
        }
        report
    }

    /// Terminate every session, used when the server stops.
    pub fn terminate_all(&self, reason: CloseReason) {
        for session in self.snapshot() {
            session.terminate(reason);
        }
    }

    /// Start the periodic heartbeat sweep.
    pub fn spawn_heartbeat(
        self: &Arc<Self>,
        period: Duration,
        idle_close: Option<Duration>,
        ping: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let registry = Arc::clone(self);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        registry.sweep(idle_close, ping);
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Heartbeat sweep shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
