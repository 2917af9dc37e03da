//! One owning task per client.
//!
//! Inbound channel events, user commands and the frame clock all funnel into a single
//! `select!` loop, so registry mutations never interleave. The chat fallback runs on its own
//! task and re-enters the loop as a [`ClientCommand::FallbackResponse`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    client::{ChatDispatch, ClientSnapshot, SimClient},
    error::{Result, SimError},
    fallback::{ChatFallback, FallbackResponse},
    protocol::{ChannelEvent, ChatRequest, EntityId, SessionId, ShapeKind, SimulationKind},
    transport::ChannelTransport,
};

#[derive(Debug)]
pub enum ClientCommand {
    Inbound(ChannelEvent),
    /// An event not yet decoded; decode failures surface as notices.
    InboundRaw {
        name: String,
        data: Value,
    },
    SendChat {
        message: String,
        /// Creation time for the session id; `None` means now.
        at: Option<DateTime<Utc>>,
        reply: oneshot::Sender<Option<SessionId>>,
    },
    CreateShape {
        kind: ShapeKind,
        reply: oneshot::Sender<Result<()>>,
    },
    Simulate {
        kind: SimulationKind,
        reply: oneshot::Sender<Result<()>>,
    },
    SetViewport {
        width: f32,
        height: f32,
        reply: oneshot::Sender<Result<()>>,
    },
    Pick {
        x: f32,
        y: f32,
        reply: oneshot::Sender<Result<Option<EntityId>>>,
    },
    ClearScene,
    SetWireframe(bool),
    ResetView,
    Snapshot {
        reply: oneshot::Sender<ClientSnapshot>,
    },
    FallbackResponse {
        session_id: SessionId,
        response: Result<FallbackResponse>,
    },
    Shutdown,
}

/// Cloneable front door to a running client.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<ClientCommand>,
}

impl ClientHandle {
    fn send(&self, command: ClientCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| SimError::RuntimeClosed)
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> ClientCommand,
    ) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx))?;
        reply_rx.await.map_err(|_| SimError::RuntimeClosed)
    }

    /// Queue an inbound channel event.
    pub fn deliver(&self, event: ChannelEvent) -> Result<()> {
        self.send(ClientCommand::Inbound(event))
    }

    /// Queue an event given as a name and raw JSON payload.
    pub fn deliver_raw(&self, name: impl Into<String>, data: Value) -> Result<()> {
        self.send(ClientCommand::InboundRaw {
            name: name.into(),
            data,
        })
    }

    /// Send a chat message. Returns the new session id, or `None` for a blank message.
    pub async fn send_chat(&self, message: impl Into<String>) -> Result<Option<SessionId>> {
        let message = message.into();
        self.request(|reply| ClientCommand::SendChat {
            message,
            at: None,
            reply,
        })
        .await
    }

    /// [`send_chat`](Self::send_chat) with the session stamped at `at`, for replaying
    /// recorded traffic whose events name `session_<millis>` ids.
    pub async fn send_chat_at(
        &self,
        message: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<Option<SessionId>> {
        let message = message.into();
        self.request(|reply| ClientCommand::SendChat {
            message,
            at: Some(at),
            reply,
        })
        .await
    }

    pub async fn create_shape(&self, kind: ShapeKind) -> Result<()> {
        self.request(|reply| ClientCommand::CreateShape { kind, reply })
            .await?
    }

    pub async fn simulate(&self, kind: SimulationKind) -> Result<()> {
        self.request(|reply| ClientCommand::Simulate { kind, reply })
            .await?
    }

    pub async fn set_viewport(&self, width: f32, height: f32) -> Result<()> {
        self.request(|reply| ClientCommand::SetViewport {
            width,
            height,
            reply,
        })
        .await?
    }

    pub async fn pick(&self, x: f32, y: f32) -> Result<Option<EntityId>> {
        self.request(|reply| ClientCommand::Pick { x, y, reply })
            .await?
    }

    pub fn clear_scene(&self) -> Result<()> {
        self.send(ClientCommand::ClearScene)
    }

    pub fn set_wireframe(&self, wireframe: bool) -> Result<()> {
        self.send(ClientCommand::SetWireframe(wireframe))
    }

    pub fn reset_view(&self) -> Result<()> {
        self.send(ClientCommand::ResetView)
    }

    pub async fn snapshot(&self) -> Result<ClientSnapshot> {
        self.request(|reply| ClientCommand::Snapshot { reply }).await
    }

    /// Stop the runtime. Commands already queued are dropped.
    pub fn shutdown(&self) -> Result<()> {
        self.send(ClientCommand::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub struct ClientRuntime<T: ChannelTransport> {
    client: SimClient<T>,
    fallback: Option<Arc<dyn ChatFallback>>,
    commands: mpsc::WeakUnboundedSender<ClientCommand>,
}

impl<T: ChannelTransport + 'static> ClientRuntime<T> {
    /// Move `client` onto its own task. The task ends on [`ClientHandle::shutdown`] or once
    /// every handle is dropped, and yields the client back.
    pub fn spawn(
        client: SimClient<T>,
        fallback: Option<Arc<dyn ChatFallback>>,
    ) -> (ClientHandle, JoinHandle<SimClient<T>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runtime = Self {
            client,
            fallback,
            commands: tx.downgrade(),
        };
        let task = tokio::spawn(runtime.run(rx));
        (ClientHandle { tx }, task)
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ClientCommand>) -> SimClient<T> {
        let mut frames = tokio::time::interval(self.client.config().frame_interval);
        frames.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_frame = Instant::now();
        info!(
            frame_interval_ms = self.client.config().frame_interval.as_millis() as u64,
            "client runtime started"
        );

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(ClientCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                now = frames.tick() => {
                    let elapsed = now.saturating_duration_since(last_frame);
                    last_frame = now;
                    self.client.frame(elapsed, Utc::now());
                }
            }
        }

        info!("client runtime stopped");
        self.client
    }

    fn apply(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Inbound(event) => self.client.handle_event(event),
            ClientCommand::InboundRaw { name, data } => self.client.handle_raw(&name, data),
            ClientCommand::SendChat { message, at, reply } => {
                let dispatch = self.client.send_chat_at(&message, at.unwrap_or_else(Utc::now));
                let session_id = match dispatch {
                    None => None,
                    Some(ChatDispatch::Streamed(session_id)) => Some(session_id),
                    Some(ChatDispatch::Fallback(request)) => {
                        let session_id = request.session_id.clone();
                        self.spawn_fallback(request);
                        Some(session_id)
                    }
                };
                let _ = reply.send(session_id);
            }
            ClientCommand::CreateShape { kind, reply } => {
                let _ = reply.send(self.client.create_shape(kind));
            }
            ClientCommand::Simulate { kind, reply } => {
                let _ = reply.send(self.client.simulate(kind));
            }
            ClientCommand::SetViewport {
                width,
                height,
                reply,
            } => {
                let _ = reply.send(self.client.set_viewport(width, height));
            }
            ClientCommand::Pick { x, y, reply } => {
                let _ = reply.send(self.client.pick(x, y));
            }
            ClientCommand::ClearScene => self.client.clear_scene(),
            ClientCommand::SetWireframe(wireframe) => self.client.set_wireframe(wireframe),
            ClientCommand::ResetView => self.client.reset_view(),
            ClientCommand::Snapshot { reply } => {
                let _ = reply.send(self.client.snapshot());
            }
            ClientCommand::FallbackResponse {
                session_id,
                response,
            } => self.client.apply_fallback_response(&session_id, response),
            // Handled by the loop.
            ClientCommand::Shutdown => {}
        }
    }

    fn spawn_fallback(&mut self, request: ChatRequest) {
        let Some(fallback) = self.fallback.clone() else {
            warn!(session_id = %request.session_id, "channel down and no fallback configured");
            self.client
                .apply_fallback_response(&request.session_id, Err(SimError::Disconnected));
            return;
        };
        let Some(commands) = self.commands.upgrade() else {
            return;
        };

        debug!(session_id = %request.session_id, "dispatching chat fallback");
        tokio::spawn(async move {
            let response = fallback.send(&request).await;
            let _ = commands.send(ClientCommand::FallbackResponse {
                session_id: request.session_id,
                response,
            });
        });
    }
}
