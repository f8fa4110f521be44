//! Live client: pushes renders of a watched file over the live channel.
//!
//! Edits are coalesced with the client cadence: the first edit opens a
//! `min_interval` window, the send happens once the window has elapsed and
//! the file has been quiet for `settle`, and only the newest pending render
//! is ever sent. The socket is
//! opened on the first send and closed again after `idle_close` without
//! sends.

use anyhow::{Context, Result};
use console::style;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use mmdr_api::{CadencePolicy, ClientMessage, Coalescer, RenderCommand, RenderReply, ServerMessage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client-side cadence.
#[derive(Debug, Clone, Copy)]
pub struct LivePolicy {
    pub settle: Duration,
    pub min_interval: Duration,
    pub idle_close: Duration,
    pub poll_interval: Duration,
}

impl Default for LivePolicy {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(600),
            min_interval: Duration::from_millis(1000),
            idle_close: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
        }
    }
}

struct Connection {
    sink: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
    last_send: Instant,
}

/// Lazily connected live channel.
pub struct LiveLink {
    url: String,
    replies: mpsc::UnboundedSender<ServerMessage>,
    connection: Mutex<Option<Connection>>,
}

impl LiveLink {
    pub fn new(url: impl Into<String>, replies: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            url: url.into(),
            replies,
            connection: Mutex::new(None),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.reader.is_finished())
    }

    async fn connect(&self) -> Result<Connection> {
        let (socket, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        info!(url = %self.url, "Live channel connected");

        let (sink, mut stream) = socket.split();
        let replies = self.replies.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => {
                            if replies.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Unrecognised live message"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Live channel read failed");
                        break;
                    }
                }
            }
            debug!("Live channel reader stopped");
        });

        Ok(Connection {
            sink,
            reader,
            last_send: Instant::now(),
        })
    }

    /// Send a command, connecting first when needed.
    pub async fn send(&self, command: RenderCommand) -> Result<()> {
        let text = serde_json::to_string(&ClientMessage::Render(command))?;
        let mut connection = self.connection.lock().await;

        if connection.as_ref().is_none_or(|c| c.reader.is_finished()) {
            connection.replace(self.connect().await?);
        }

        let sent = match connection.as_mut() {
            Some(open) => {
                let sent = open.sink.send(Message::Text(text.into())).await;
                open.last_send = Instant::now();
                sent
            }
            None => Ok(()),
        };
        if sent.is_err() {
            connection.take();
        }
        sent.context("Live channel send failed")
    }

    /// Close the connection if nothing was sent for `idle_close`.
    pub async fn close_if_idle(&self, idle_close: Duration) -> bool {
        let mut connection = self.connection.lock().await;
        let idle = connection
            .as_ref()
            .is_some_and(|c| c.last_send.elapsed() >= idle_close);
        if !idle {
            return false;
        }

        if let Some(mut open) = connection.take() {
            let _ = open.sink.close().await;
            open.reader.abort();
            info!(idle_secs = idle_close.as_secs(), "Closed idle live channel");
        }
        true
    }
}

/// Modification stamp used to detect edits.
async fn stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Watch `file`, pushing a render after every edit, until Ctrl-C.
pub async fn watch(
    url: String,
    file: PathBuf,
    template: RenderCommand,
    out: PathBuf,
    policy: LivePolicy,
) -> Result<()> {
    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    let link = Arc::new(LiveLink::new(url, reply_tx));

    let sender = Arc::clone(&link);
    let (renders, _flush) = Coalescer::spawn(
        CadencePolicy::new(policy.settle, policy.min_interval),
        move |command: RenderCommand| {
            let link = Arc::clone(&sender);
            async move {
                if let Err(e) = link.send(command).await {
                    eprintln!("{} {:#}", style("✗").red(), e);
                }
            }
        },
    );

    let mut poll = tokio::time::interval(policy.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut idle_check = tokio::time::interval(Duration::from_secs(1));
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last_stamp = None;
    println!(
        "{} Watching {} (Ctrl+C to stop)",
        style("▶").cyan(),
        style(file.display()).bold()
    );

    loop {
        tokio::select! {
            _ = poll.tick() => {
                let current = stamp(&file).await;
                if current.is_none() || current == last_stamp {
                    continue;
                }
                last_stamp = current;
                match tokio::fs::read_to_string(&file).await {
                    Ok(source) => renders.submit(RenderCommand {
                        mermaid: Some(source),
                        ..template.clone()
                    }),
                    Err(e) => warn!(error = %e, file = %file.display(), "Failed to read diagram"),
                }
            }
            _ = idle_check.tick() => {
                link.close_if_idle(policy.idle_close).await;
            }
            Some(message) = replies.recv() => handle_message(message, &out).await,
            _ = &mut ctrl_c => break,
        }
    }

    drop(renders);
    link.close_if_idle(Duration::ZERO).await;
    Ok(())
}

async fn handle_message(message: ServerMessage, out: &Path) {
    match message {
        ServerMessage::RenderResult(reply) => {
            if let Err(e) = write_reply(&reply, out).await {
                eprintln!("{} {:#}", style("✗").red(), e);
            }
        }
        ServerMessage::Error { message } => {
            eprintln!("{} Server rejected message: {}", style("✗").red(), message);
        }
        ServerMessage::Pong => {}
    }
}

async fn write_reply(reply: &RenderReply, out: &Path) -> Result<()> {
    if let Some(error) = &reply.error {
        anyhow::bail!("Render failed: {}", error);
    }
    let bytes = reply.artifact().context("Reply carried no artifact")?;
    tokio::fs::write(out, &bytes)
        .await
        .with_context(|| format!("Failed to write {}", out.display()))?;

    let cache = reply.cache.map(|c| c.to_string()).unwrap_or_default();
    let total = reply.timings.map(|t| t.total).unwrap_or_default();
    println!(
        "{} {} ({}, {} ms)",
        style("✓").green(),
        out.display(),
        style(cache).dim(),
        total
    );
    Ok(())
}
