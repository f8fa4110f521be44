//! Render backend backed by a long-lived worker process.
//!
//! The worker speaks newline-delimited JSON over stdio. It announces
//! itself with `{"ready":true}` and then answers each request line with a
//! reply line carrying the same `id`. Requests are multiplexed, so many
//! renders can be outstanding on one worker at once.

use crate::config::WorkerConfig;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use mmdr_core::{
    BackendInstanceId, DisconnectCallback, Error, Format, RenderBackend, RenderParams,
    RenderSession, Result, Viewport,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// How long a closing worker gets to exit after stdin is closed.
const EXIT_GRACE: Duration = Duration::from_secs(2);

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<WorkerReply>>>>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    id: u64,
    source: &'a str,
    format: Format,
    viewport: Viewport,
    background_color: &'a str,
    mermaid_config: MermaidConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MermaidConfig<'a> {
    theme: &'a str,
    security_level: &'static str,
}

#[derive(Debug, Deserialize)]
struct WorkerHello {
    ready: bool,
}

#[derive(Debug, Deserialize)]
struct WorkerReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Launches render worker processes.
pub struct WorkerBackend {
    config: WorkerConfig,
}

impl WorkerBackend {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .envs(self.config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

async fn await_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<()> {
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| Error::BackendLaunch(format!("failed to read worker output: {}", e)))?;

        let Some(line) = line else {
            return Err(Error::BackendLaunch(
                "worker exited before becoming ready".to_string(),
            ));
        };

        match serde_json::from_str::<WorkerHello>(&line) {
            Ok(hello) if hello.ready => return Ok(()),
            _ => debug!(line = %line, "Ignoring worker output before ready"),
        }
    }
}

#[async_trait]
impl RenderBackend for WorkerBackend {
    async fn launch(
        &self,
        instance: BackendInstanceId,
        on_disconnect: DisconnectCallback,
    ) -> Result<Arc<dyn RenderSession>> {
        let mut child = self.command().spawn().map_err(|e| {
            Error::BackendLaunch(format!("failed to spawn {}: {}", self.config.program, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::BackendLaunch("worker stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::BackendLaunch("worker stdout unavailable".to_string()))?;

        let mut lines = BufReader::new(stdout).lines();
        await_ready(&mut lines).await?;

        info!(%instance, pid = child.id(), "Render worker ready");

        let session = Arc::new(WorkerSession {
            instance,
            stdin: tokio::sync::Mutex::new(Some(stdin)),
            child: tokio::sync::Mutex::new(child),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            connected: Arc::new(AtomicBool::new(true)),
            closing: Arc::new(AtomicBool::new(false)),
        });
        session.spawn_reader(lines, on_disconnect);

        Ok(session)
    }
}

struct WorkerSession {
    instance: BackendInstanceId,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Child>,
    pending: PendingReplies,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
}

/// Removes a pending reply slot when the render call finishes or is cancelled.
struct PendingGuard<'a> {
    pending: &'a PendingReplies,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

impl WorkerSession {
    fn spawn_reader(&self, mut lines: Lines<BufReader<ChildStdout>>, on_disconnect: DisconnectCallback) {
        let instance = self.instance;
        let pending = Arc::clone(&self.pending);
        let connected = Arc::clone(&self.connected);
        let closing = Arc::clone(&self.closing);

        tokio::spawn(async move {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match serde_json::from_str::<WorkerReply>(&line) {
                        Ok(reply) => {
                            let waiter = pending.lock().remove(&reply.id);
                            match waiter {
                                Some(tx) => {
                                    let _ = tx.send(reply);
                                }
                                None => debug!(%instance, id = reply.id, "Reply for abandoned request"),
                            }
                        }
                        Err(_) => debug!(%instance, line = %line, "Ignoring non-protocol worker output"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%instance, error = %e, "Failed to read from render worker");
                        break;
                    }
                }
            }

            connected.store(false, Ordering::SeqCst);
            // Dropping the senders fails every outstanding render.
            pending.lock().clear();

            if !closing.load(Ordering::SeqCst) {
                warn!(%instance, "Render worker exited unexpectedly");
                on_disconnect();
            }
        });
    }

    async fn send(&self, line: &[u8]) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(Error::BackendDisconnected)?;
        stdin
            .write_all(line)
            .await
            .map_err(|_| Error::BackendDisconnected)?;
        stdin.flush().await.map_err(|_| Error::BackendDisconnected)
    }
}

#[async_trait]
impl RenderSession for WorkerSession {
    async fn render(&self, source: &str, format: Format, params: &RenderParams) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::BackendDisconnected);
        }

        let request = WorkerRequest {
            id,
            source,
            format,
            viewport: params.viewport,
            background_color: &params.background_color,
            mermaid_config: MermaidConfig {
                theme: &params.theme,
                security_level: "strict",
            },
        };
        let mut line = serde_json::to_vec(&request)?;
        line.push(b'\n');
        self.send(&line).await?;

        let reply = rx.await.map_err(|_| Error::BackendDisconnected)?;
        if !reply.ok {
            return Err(Error::RenderFailed {
                context: format.describe().to_string(),
                message: reply
                    .error
                    .unwrap_or_else(|| "worker reported an unspecified error".to_string()),
            });
        }

        let data = reply.data.ok_or_else(|| Error::RenderFailed {
            context: format.describe().to_string(),
            message: "worker returned no data".to_string(),
        })?;
        BASE64
            .decode(data.as_bytes())
            .map_err(|e| Error::Internal(format!("invalid worker payload: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        // Closing stdin asks the worker to shut down.
        self.stdin.lock().await.take();

        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(instance = %self.instance, %status, "Render worker exited");
                Ok(())
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => {
                warn!(instance = %self.instance, "Render worker did not exit; killing");
                child.kill().await.map_err(Error::Io)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
