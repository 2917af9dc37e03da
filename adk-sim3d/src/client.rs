//! Channel event dispatch.
//!
//! [`SimClient`] owns every registry and is the only place inbound events turn into state
//! changes. It never blocks: operations with unknown latency (the chat fallback) are handed
//! back to the caller as a [`ChatDispatch`] and their outcome re-enters through
//! [`SimClient::apply_fallback_response`].

use std::{collections::VecDeque, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    error::{Result, SimError},
    fallback::FallbackResponse,
    formatter::{Segment, answer_text, short_model_name},
    picking::{Camera, PickingService, Viewport},
    playback::{PlaybackScheduler, Trajectory, object_tags},
    protocol::{
        ChannelEvent, ChatMessagePayload, ChatRequest, CreateShapeRequest, EntityId, Notice,
        NoticeLevel, ObjectTag, OutboundEvent, Point3, SessionId, ShapeCreatedPayload, ShapeKind,
        SimulateRequest, SimulationKind, SimulationResultPayload,
    },
    scene::{EntityKind, PALETTE, SceneRegistry, SelectionInfo, ShapeParams},
    session::{SessionRegistry, SessionState},
    tools::{ToolCallTracker, ToolIndicator},
    transport::ChannelTransport,
};

const MAX_NOTICES: usize = 64;
const GRAVITY_COLOR: u32 = 0xff6b6b;
const MAX_COLLISION_BODIES: usize = 256;
/// Model name the backend reports for canned replies; never announced.
const FALLBACK_MODEL: &str = "fallback";

const SHAPE_KEYWORDS: [(ShapeKind, [&str; 2]); 3] = [
    (ShapeKind::Cube, ["立方体", "cube"]),
    (ShapeKind::Sphere, ["球体", "sphere"]),
    (ShapeKind::Cylinder, ["圆柱", "cylinder"]),
];
const SIMULATION_KEYWORDS: [(SimulationKind, [&str; 2]); 2] = [
    (SimulationKind::Gravity, ["重力仿真", "gravity simulation"]),
    (SimulationKind::Collision, ["碰撞仿真", "collision simulation"]),
];

/// The shape a user message asks for, if it names one.
pub fn shape_hint(message: &str) -> Option<ShapeKind> {
    let lower = message.to_lowercase();
    SHAPE_KEYWORDS
        .into_iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(kind, _)| kind)
}

/// The simulation an AI reply announces, if any.
pub fn simulation_hint(reply: &str) -> Option<SimulationKind> {
    let lower = reply.to_lowercase();
    SIMULATION_KEYWORDS
        .into_iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(kind, _)| kind)
}

/// How a user chat message left the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatDispatch {
    /// Sent over the channel; the reply streams back as `chat_message` events.
    Streamed(SessionId),
    /// The channel is unavailable; the caller must run the request through the fallback and
    /// hand the outcome to [`SimClient::apply_fallback_response`].
    Fallback(ChatRequest),
}

/// What the results panel shows for the last simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimulationSummary {
    Gravity {
        time_steps: Option<u64>,
        final_position: Option<Point3>,
        final_velocity: Option<Point3>,
    },
    Collision {
        time_steps: Option<u64>,
        num_objects: usize,
        collision_count: Option<u64>,
        message: Option<String>,
    },
    Other {
        message: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: SessionId,
    pub display_id: String,
    /// The user message that opened the session.
    pub prompt: String,
    pub created_at: DateTime<Utc>,
    pub state: SessionState,
    pub text: String,
    pub segments: Vec<Segment>,
    pub typing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntityView {
    pub id: EntityId,
    pub kind: EntityKind,
    pub position: Point3,
    pub color: u32,
    pub wireframe: bool,
    pub playback_cursor: usize,
    pub samples: usize,
}

/// Serializable view of everything the display surface renders.
#[derive(Debug, Clone, Serialize)]
pub struct ClientSnapshot {
    pub connected: bool,
    pub sessions: Vec<SessionView>,
    pub tool_calls: Vec<ToolIndicator>,
    pub entities: Vec<EntityView>,
    pub selection: Option<SelectionInfo>,
    pub last_result: Option<SimulationSummary>,
    pub notices: Vec<Notice>,
    pub playback_idle: bool,
}

pub struct SimClient<T: ChannelTransport> {
    config: ClientConfig,
    transport: T,
    sessions: SessionRegistry,
    tools: ToolCallTracker,
    scene: SceneRegistry,
    playback: PlaybackScheduler,
    picking: PickingService,
    camera: Camera,
    viewport: Option<Viewport>,
    shape_params: ShapeParams,
    notices: VecDeque<Notice>,
    last_result: Option<SimulationSummary>,
}

impl<T: ChannelTransport> std::fmt::Debug for SimClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimClient")
            .field("connected", &self.transport.is_connected())
            .field("sessions", &self.sessions.len())
            .field("tool_calls", &self.tools.len())
            .field("entities", &self.scene.len())
            .finish_non_exhaustive()
    }
}

impl<T: ChannelTransport> SimClient<T> {
    pub fn new(config: ClientConfig, transport: T) -> Self {
        Self {
            sessions: SessionRegistry::new(config.stream_timeout),
            tools: ToolCallTracker::new(),
            scene: SceneRegistry::new(&config),
            playback: PlaybackScheduler::new(config.playback_pacing),
            picking: PickingService::default(),
            camera: Camera::default(),
            viewport: None,
            shape_params: ShapeParams::default(),
            notices: VecDeque::new(),
            last_result: None,
            config,
            transport,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn tools(&self) -> &ToolCallTracker {
        &self.tools
    }

    pub fn scene(&self) -> &SceneRegistry {
        &self.scene
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn shape_params(&self) -> ShapeParams {
        self.shape_params
    }

    pub fn set_shape_params(&mut self, params: ShapeParams) {
        self.shape_params = params;
    }

    pub fn last_result(&self) -> Option<&SimulationSummary> {
        self.last_result.as_ref()
    }

    pub fn notices(&self) -> impl Iterator<Item = &Notice> {
        self.notices.iter()
    }

    pub fn drain_notices(&mut self) -> Vec<Notice> {
        self.notices.drain(..).collect()
    }

    fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let notice = Notice::new(level, message);
        debug!(level = ?notice.level, message = %notice.message, "notice");
        if self.notices.len() == MAX_NOTICES {
            self.notices.pop_front();
        }
        self.notices.push_back(notice);
    }

    /// Decode and apply an event delivered as a name plus JSON payload. A payload that does
    /// not decode is dropped with a warning notice.
    pub fn handle_raw(&mut self, name: &str, data: Value) {
        match ChannelEvent::from_parts(name, data) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!(event = name, error = %e, "malformed channel event dropped");
                self.notify(NoticeLevel::Warning, format!("Malformed {name} event ignored"));
            }
        }
    }

    /// Apply one inbound channel event.
    pub fn handle_event(&mut self, event: ChannelEvent) {
        debug!(event = event.event_name(), "channel event");
        match event {
            ChannelEvent::Connect => {
                info!("connected to simulation server");
                self.notify(NoticeLevel::Success, "Connected to simulation server");
            }
            ChannelEvent::Disconnect => {
                warn!("disconnected from simulation server");
                self.notify(NoticeLevel::Warning, "Disconnected from server");
            }
            ChannelEvent::Error(payload) => {
                let message = if payload.message.is_empty() {
                    "Server error".to_string()
                } else {
                    payload.message
                };
                self.notify(NoticeLevel::Error, message);
            }
            ChannelEvent::ChatStart(payload) => {
                if self.sessions.contains(&payload.session_id) {
                    debug!(session_id = %payload.session_id, "chat started");
                } else {
                    debug!(session_id = %payload.session_id, "chat_start for unknown session ignored");
                }
            }
            ChannelEvent::ChatMessage(payload) => self.on_chat_message(payload),
            ChannelEvent::ChatError(payload) => {
                if self.sessions.on_error(&payload.session_id, &payload.error).is_none() {
                    warn!(session_id = %payload.session_id, "chat_error for unknown session dropped");
                }
            }
            ChannelEvent::ChatComplete(payload) => {
                if self.sessions.on_complete(&payload.session_id).is_none() {
                    warn!(session_id = %payload.session_id, "chat_complete for unknown session dropped");
                }
            }
            ChannelEvent::ToolCallStart(payload) => {
                let session_id = self.sessions.active().map(|session| session.id().to_string());
                self.tools.start(&payload, session_id);
            }
            ChannelEvent::ToolCallComplete(payload) => {
                self.tools.complete(&payload);
            }
            ChannelEvent::ShapeCreated(payload) => self.on_shape_created(&payload),
            ChannelEvent::SimulationResult(payload) => self.on_simulation_result(&payload),
            ChannelEvent::SimulationStarted(payload) => {
                if let Some(message) = payload.message.filter(|message| !message.is_empty()) {
                    self.notify(NoticeLevel::Info, message);
                }
                if let Some(data) = payload.data {
                    self.on_simulation_result(&data);
                }
            }
        }
    }

    fn on_chat_message(&mut self, payload: ChatMessagePayload) {
        let Some(session) =
            self.sessions
                .on_chunk(&payload.session_id, &payload.content, payload.is_complete)
        else {
            warn!(session_id = %payload.session_id, "chunk for unknown session dropped");
            return;
        };
        if !payload.is_complete {
            return;
        }

        let reply = answer_text(session.segments());
        if let Some(model) = payload.model.as_deref().filter(|model| *model != FALLBACK_MODEL) {
            self.notify(NoticeLevel::Info, format!("Model: {}", short_model_name(model)));
        }
        if let Some(kind) = simulation_hint(&reply) {
            info!(session_id = %payload.session_id, kind = kind.as_str(), "reply requests a simulation");
            // Failure is already surfaced as a notice.
            let _ = self.simulate(kind);
        }
    }

    fn on_shape_created(&mut self, payload: &ShapeCreatedPayload) {
        let Some(shape_type) = payload.resolved_type() else {
            warn!("shape_created without a type dropped");
            self.notify(NoticeLevel::Warning, "Shape event without a type");
            return;
        };
        let kind = match shape_type.parse::<ShapeKind>() {
            Ok(kind) => kind,
            Err(unknown) => {
                warn!(shape_type = %unknown, "unknown shape type");
                self.notify(NoticeLevel::Warning, format!("Unknown shape type: {unknown}"));
                return;
            }
        };

        let params = ShapeParams::from_payload(payload);
        self.scene.create(kind, &params, payload.entity_id());
        self.notify(NoticeLevel::Success, format!("Created {}", kind.as_str()));
    }

    fn on_simulation_result(&mut self, payload: &SimulationResultPayload) {
        let summary = match payload.kind() {
            Some(SimulationKind::Gravity) => {
                if payload.positions.is_empty() {
                    warn!("gravity result without positions");
                    self.notify(NoticeLevel::Warning, "Gravity result carried no positions");
                } else {
                    self.scene.spawn_animated(
                        EntityKind::AnimatedPoint,
                        Trajectory::from_points(&payload.positions),
                        GRAVITY_COLOR,
                        None,
                    );
                }
                SimulationSummary::Gravity {
                    time_steps: payload.time_steps,
                    final_position: payload.positions.last().copied(),
                    final_velocity: payload.velocities.last().copied(),
                }
            }
            Some(SimulationKind::Collision) => {
                let steps = payload
                    .simulation_data
                    .as_ref()
                    .map(|data| data.objects.as_slice())
                    .unwrap_or_default();
                let (tags, requested): (Vec<ObjectTag>, u64) = match payload.num_objects {
                    Some(count) => ((0..count.min(MAX_COLLISION_BODIES as u64)).collect(), count),
                    None => {
                        let seen = object_tags(steps);
                        let count = seen.len() as u64;
                        (seen.into_iter().take(MAX_COLLISION_BODIES).collect(), count)
                    }
                };
                if requested > tags.len() as u64 {
                    warn!(requested, spawned = tags.len(), "collision result capped");
                    self.notify(
                        NoticeLevel::Warning,
                        format!("Collision result capped at {} of {requested} objects", tags.len()),
                    );
                }
                for &tag in &tags {
                    self.scene.spawn_animated(
                        EntityKind::AnimatedCollisionPoint,
                        Trajectory::for_object(steps, tag),
                        PALETTE[(tag % PALETTE.len() as u64) as usize],
                        Some(tag),
                    );
                }
                self.notify(
                    NoticeLevel::Info,
                    format!("Playing collision animation with {} objects", tags.len()),
                );
                SimulationSummary::Collision {
                    time_steps: payload
                        .simulation_data
                        .as_ref()
                        .and_then(|data| data.time_steps)
                        .or(payload.time_steps),
                    num_objects: tags.len(),
                    collision_count: payload.collision_count,
                    message: payload.message.clone(),
                }
            }
            None => SimulationSummary::Other {
                message: payload
                    .message
                    .clone()
                    .unwrap_or_else(|| "Simulation complete".to_string()),
            },
        };
        info!(summary = ?summary, "simulation result applied");
        self.last_result = Some(summary);
    }

    /// Start a chat exchange. Returns `None` for a blank message.
    pub fn send_chat(&mut self, message: &str) -> Option<ChatDispatch> {
        self.send_chat_at(message, Utc::now())
    }

    pub fn send_chat_at(&mut self, message: &str, now: DateTime<Utc>) -> Option<ChatDispatch> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        let session_id = self.sessions.create_session_at(message, now);
        let request = ChatRequest {
            message: message.to_string(),
            session_id: session_id.clone(),
        };

        let dispatch = if self.transport.is_connected() {
            match self.transport.emit(OutboundEvent::ChatMessage(request.clone())) {
                Ok(()) => ChatDispatch::Streamed(session_id),
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "channel send failed; using fallback");
                    ChatDispatch::Fallback(request)
                }
            }
        } else {
            debug!(session_id = %session_id, "channel down; using fallback");
            ChatDispatch::Fallback(request)
        };

        if let Some(kind) = shape_hint(message) {
            let _ = self.create_shape(kind);
        }
        Some(dispatch)
    }

    /// Feed the outcome of a fallback request into the session it was made for, with the same
    /// effects a terminal streamed chunk would have.
    pub fn apply_fallback_response(
        &mut self,
        session_id: &str,
        response: Result<FallbackResponse>,
    ) {
        match response {
            Ok(response) if response.is_streaming() => {
                debug!(session_id, "fallback accepted; reply streams over the channel");
            }
            Ok(response) => match response.text() {
                Some(text) => {
                    let payload = ChatMessagePayload {
                        session_id: session_id.to_string(),
                        content: text.to_string(),
                        is_complete: true,
                        model: response.model.clone(),
                    };
                    self.on_chat_message(payload);
                }
                None => {
                    let error = response
                        .error
                        .unwrap_or_else(|| "failed to send message".to_string());
                    self.sessions.on_error(session_id, &error);
                }
            },
            Err(e) => {
                warn!(session_id, error = %e, "chat fallback failed");
                self.sessions
                    .on_error(session_id, &format!("error sending message: {e}"));
            }
        }
    }

    fn emit(&mut self, event: OutboundEvent) -> Result<()> {
        let name = event.event_name();
        let result = if self.transport.is_connected() {
            self.transport.emit(event)
        } else {
            Err(SimError::Disconnected)
        };
        if let Err(e) = &result {
            warn!(event = name, error = %e, "outbound event not sent");
            self.notify(NoticeLevel::Error, format!("Failed to send {name}: {e}"));
        }
        result
    }

    /// Ask the backend for a new primitive using the current shape parameters.
    pub fn create_shape(&mut self, kind: ShapeKind) -> Result<()> {
        let params = self.shape_params.to_props(kind);
        self.emit(OutboundEvent::CreateShape(CreateShapeRequest {
            shape_type: kind,
            params,
        }))
    }

    /// Ask the backend to run a simulation with the default parameters for `kind`.
    pub fn simulate(&mut self, kind: SimulationKind) -> Result<()> {
        self.emit(OutboundEvent::Simulate(SimulateRequest {
            sim_type: kind,
            params: kind.default_params(),
        }))
    }

    pub fn clear_scene(&mut self) {
        self.scene.clear();
        self.notify(NoticeLevel::Info, "Scene cleared");
    }

    pub fn set_wireframe(&mut self, wireframe: bool) {
        self.scene.set_wireframe(wireframe);
    }

    pub fn reset_view(&mut self) {
        self.camera.reset();
    }

    /// Attach the client to a render surface of the given size.
    pub fn set_viewport(&mut self, width: f32, height: f32) -> Result<()> {
        let viewport = Viewport::new(width, height)?;
        self.camera.set_aspect(&viewport);
        self.viewport = Some(viewport);
        Ok(())
    }

    /// Select the entity under a pointer position given in viewport pixels.
    pub fn pick(&mut self, x: f32, y: f32) -> Result<Option<EntityId>> {
        let viewport = self
            .viewport
            .ok_or_else(|| SimError::RenderTarget("no viewport attached".to_string()))?;
        Ok(self
            .picking
            .pick(x, y, &viewport, &self.camera, &mut self.scene))
    }

    pub fn selection_info(&self) -> Option<SelectionInfo> {
        self.scene.selection_info()
    }

    /// One frame of the render loop: close stalled sessions, then advance playback.
    /// Returns how many entities moved.
    pub fn frame(&mut self, elapsed: Duration, now: DateTime<Utc>) -> usize {
        for session_id in self.sessions.expire_stale(now) {
            warn!(session_id = %session_id, "session timed out");
            self.notify(NoticeLevel::Warning, "Response timed out");
        }
        self.playback.advance(&mut self.scene, elapsed)
    }

    pub fn is_playback_idle(&self) -> bool {
        PlaybackScheduler::is_idle(&self.scene)
    }

    pub fn snapshot(&self) -> ClientSnapshot {
        ClientSnapshot {
            connected: self.transport.is_connected(),
            sessions: self
                .sessions
                .iter()
                .map(|session| SessionView {
                    id: session.id().to_string(),
                    display_id: session.display_id(),
                    prompt: session.prompt().to_string(),
                    created_at: session.created_at(),
                    state: session.state(),
                    text: session.displayed_text(),
                    segments: session.segments().to_vec(),
                    typing: session.is_typing(),
                })
                .collect(),
            tool_calls: self.tools.iter().map(|invocation| invocation.indicator()).collect(),
            entities: self
                .scene
                .iter()
                .map(|entity| EntityView {
                    id: entity.id.clone(),
                    kind: entity.kind,
                    position: entity.transform.position.to_array(),
                    color: entity.material.color,
                    wireframe: entity.material.wireframe,
                    playback_cursor: entity.playback_cursor(),
                    samples: entity.trajectory().map_or(0, Trajectory::len),
                })
                .collect(),
            selection: self.scene.selection_info(),
            last_result: self.last_result.clone(),
            notices: self.notices.iter().cloned().collect(),
            playback_idle: self.is_playback_idle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::{
        protocol::{ChatCompletePayload, ChatErrorPayload},
        transport::{LoopbackPeer, LoopbackTransport},
    };

    fn client() -> (SimClient<LoopbackTransport>, LoopbackPeer) {
        let (transport, peer) = LoopbackTransport::pair();
        let config = ClientConfig::builder().seed(11).build().expect("valid config");
        (SimClient::new(config, transport), peer)
    }

    fn event(name: &str, data: serde_json::Value) -> ChannelEvent {
        ChannelEvent::from_parts(name, data).expect("valid event")
    }

    #[test]
    fn malformed_raw_event_becomes_a_warning() {
        let (mut client, _peer) = client();
        client.handle_raw("chat_message", json!({"session_id": 5, "content": ["Hi"]}));
        client.handle_raw("teleport", json!({}));
        let warnings: Vec<_> = client
            .notices()
            .filter(|notice| notice.level == NoticeLevel::Warning)
            .map(|notice| notice.message.clone())
            .collect();
        assert_eq!(
            warnings,
            vec!["Malformed chat_message event ignored", "Malformed teleport event ignored"]
        );
        assert!(client.sessions().is_empty());
    }

    #[test]
    fn gravity_result_with_float_step_count_still_plays() {
        let (mut client, _peer) = client();
        client.handle_raw(
            "simulation_result",
            json!({
                "type": "gravity",
                "time_steps": 100.0,
                "positions": [[0, 10, 0], [0, 9, 0]],
                "velocities": [[0, 0, 0], [0, -1, 0]],
            }),
        );
        assert_eq!(client.scene().len(), 1);
        assert!(matches!(
            client.last_result(),
            Some(SimulationSummary::Gravity { time_steps: Some(100), .. })
        ));
    }

    #[test]
    fn streamed_chat_round_trip() {
        let (mut client, mut peer) = client();
        let now = Utc.timestamp_millis_opt(1000).single().expect("timestamp");
        let dispatch = client.send_chat_at("hello", now).expect("dispatched");
        assert_eq!(dispatch, ChatDispatch::Streamed("session_1000".to_string()));
        assert!(matches!(peer.try_recv(), Some(OutboundEvent::ChatMessage(_))));

        client.handle_event(event(
            "chat_message",
            json!({"session_id": "session_1000", "content": "Hi", "is_complete": false}),
        ));
        client.handle_event(event(
            "chat_message",
            json!({"session_id": "session_1000", "content": "Hi there!", "is_complete": true}),
        ));
        client.handle_event(ChannelEvent::ChatComplete(ChatCompletePayload {
            session_id: "session_1000".to_string(),
            model: None,
        }));

        let session = client.sessions().get("session_1000").expect("session");
        assert_eq!(session.displayed_text(), "Hi there!");
        assert_eq!(session.state(), SessionState::Complete);

        let view = &client.snapshot().sessions[0];
        assert_eq!(view.prompt, "hello");
        assert_eq!(view.created_at, now);
        assert_eq!(view.display_id, "ai_session_1000");
    }

    #[test]
    fn blank_messages_are_not_sent() {
        let (mut client, mut peer) = client();
        assert!(client.send_chat("   ").is_none());
        assert!(client.sessions().is_empty());
        assert!(peer.try_recv().is_none());
    }

    #[test]
    fn disconnected_chat_goes_to_fallback() {
        let (mut client, peer) = client();
        peer.set_connected(false);
        let dispatch = client.send_chat("hello").expect("dispatched");
        let ChatDispatch::Fallback(request) = dispatch else {
            panic!("expected fallback dispatch");
        };
        client.apply_fallback_response(
            &request.session_id,
            Ok(FallbackResponse {
                content: Some("offline reply".to_string()),
                model: Some("fallback".to_string()),
                ..FallbackResponse::default()
            }),
        );
        let session = client.sessions().get(&request.session_id).expect("session");
        assert_eq!(session.displayed_text(), "offline reply");
        assert_eq!(session.state(), SessionState::Complete);
        assert!(client.notices().all(|notice| !notice.message.starts_with("Model:")));
    }

    #[test]
    fn fallback_failure_marks_session_errored() {
        let (mut client, peer) = client();
        peer.set_connected(false);
        let Some(ChatDispatch::Fallback(request)) = client.send_chat("hello") else {
            panic!("expected fallback dispatch");
        };
        client.apply_fallback_response(&request.session_id, Err(SimError::Disconnected));
        let session = client.sessions().get(&request.session_id).expect("session");
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.displayed_text().starts_with("Error: error sending message"));
    }

    #[test]
    fn shape_keyword_in_message_requests_shape() {
        let (mut client, mut peer) = client();
        client.send_chat("Please make a red CUBE").expect("dispatched");
        assert!(matches!(peer.try_recv(), Some(OutboundEvent::ChatMessage(_))));
        match peer.try_recv() {
            Some(OutboundEvent::CreateShape(request)) => {
                assert_eq!(request.shape_type, ShapeKind::Cube);
                assert_eq!(request.params.get("size"), Some(&json!(1.0)));
            }
            other => panic!("expected create_shape, got {other:?}"),
        }
    }

    #[test]
    fn terminal_reply_announces_model_and_triggers_simulation() {
        let (mut client, mut peer) = client();
        let Some(ChatDispatch::Streamed(id)) = client.send_chat("drop a ball") else {
            panic!("expected streamed dispatch");
        };
        peer.try_recv();
        client.handle_event(event(
            "chat_message",
            json!({
                "session_id": id,
                "content": "Starting a gravity simulation now.",
                "is_complete": true,
                "model": "qwen3:8b",
            }),
        ));
        assert!(client.notices().any(|notice| notice.message == "Model: qwen3"));
        match peer.try_recv() {
            Some(OutboundEvent::Simulate(request)) => {
                assert_eq!(request.sim_type, SimulationKind::Gravity);
                assert_eq!(request.params.get("time_steps"), Some(&json!(100)));
            }
            other => panic!("expected simulate, got {other:?}"),
        }
    }

    #[test]
    fn chat_error_is_displayed() {
        let (mut client, _peer) = client();
        let Some(ChatDispatch::Streamed(id)) = client.send_chat("hello") else {
            panic!("expected streamed dispatch");
        };
        client.handle_event(ChannelEvent::ChatError(ChatErrorPayload {
            session_id: id.clone(),
            error: "model offline".to_string(),
        }));
        let session = client.sessions().get(&id).expect("session");
        assert_eq!(session.displayed_text(), "Error: model offline");
    }

    #[test]
    fn tool_calls_attach_to_active_session() {
        let (mut client, _peer) = client();
        let Some(ChatDispatch::Streamed(id)) = client.send_chat("hello") else {
            panic!("expected streamed dispatch");
        };
        client.handle_event(event(
            "tool_call_start",
            json!({"tool": "create_shape", "params": {"shape_type": "cube"}}),
        ));
        client.handle_event(event(
            "tool_call_complete",
            json!({"tool": "create_shape", "params": {}, "success": true, "result": {"id": 1}}),
        ));
        let invocations: Vec<_> = client.tools().for_session(&id).collect();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].indicator().icon, "✓");
    }

    #[test]
    fn shape_created_spawns_entity() {
        let (mut client, _peer) = client();
        client.handle_event(event(
            "shape_created",
            json!({"type": "cylinder", "id": 4, "data": {"radius": 0.5, "height": 3.0}}),
        ));
        let entity = client.scene().get("4").expect("entity");
        assert_eq!(entity.kind, EntityKind::Cylinder);
        assert!(client.notices().any(|notice| notice.message == "Created cylinder"));
    }

    #[test]
    fn unknown_shape_type_is_a_warning() {
        let (mut client, _peer) = client();
        client.handle_event(event("shape_created", json!({"type": "torus"})));
        assert!(client.scene().is_empty());
        assert!(client.notices().any(|notice| notice.level == NoticeLevel::Warning
            && notice.message == "Unknown shape type: torus"));
    }

    #[test]
    fn gravity_result_seeds_playback() {
        let (mut client, _peer) = client();
        client.handle_event(event(
            "simulation_result",
            json!({
                "type": "gravity",
                "time_steps": 3,
                "positions": [[0, 10, 0], [0, 9, 0], [0, 7, 0]],
                "velocities": [[0, 0, 0], [0, -1, 0], [0, -2, 0]],
            }),
        ));
        assert_eq!(
            client.last_result(),
            Some(&SimulationSummary::Gravity {
                time_steps: Some(3),
                final_position: Some([0.0, 7.0, 0.0]),
                final_velocity: Some([0.0, -2.0, 0.0]),
            })
        );
        assert!(!client.is_playback_idle());
        for _ in 0..3 {
            client.frame(Duration::from_millis(16), Utc::now());
        }
        assert!(client.is_playback_idle());
        let snapshot = client.snapshot();
        assert_eq!(snapshot.entities[0].position, [0.0, 7.0, 0.0]);
        assert_eq!(snapshot.entities[0].color, GRAVITY_COLOR);
    }

    #[test]
    fn collision_result_spawns_one_body_per_object() {
        let (mut client, _peer) = client();
        client.handle_event(event(
            "simulation_started",
            json!({
                "message": "Collision simulation started",
                "data": {
                    "type": "collision",
                    "collision_count": 1,
                    "simulation_data": {
                        "time_steps": 2,
                        "objects": [
                            {"objects": [{"id": 0, "position": [0, 1, 0]}, {"id": 7, "position": [1, 1, 0]}]},
                            {"objects": [{"id": 7, "position": [2, 1, 0]}]},
                        ],
                    },
                },
            }),
        ));
        let tags: Vec<_> = client.scene().iter().filter_map(|entity| entity.object_tag).collect();
        assert_eq!(tags, vec![0, 7]);
        let body = client.scene().iter().find(|entity| entity.object_tag == Some(7)).expect("body");
        assert_eq!(body.material.color, PALETTE[1]);
        assert_eq!(body.trajectory().map(Trajectory::len), Some(2));
        assert!(matches!(
            client.last_result(),
            Some(SimulationSummary::Collision { num_objects: 2, time_steps: Some(2), .. })
        ));
        assert!(client.notices().any(|notice| notice.message == "Collision simulation started"));
    }

    #[test]
    fn oversized_collision_count_is_capped() {
        let (mut client, _peer) = client();
        client.handle_event(event(
            "simulation_result",
            json!({
                "type": "collision",
                "num_objects": 4_000_000_000u64,
                "simulation_data": {"objects": [{"objects": [{"id": 0, "position": [0, 0, 0]}]}]},
            }),
        ));
        assert_eq!(client.scene().len(), MAX_COLLISION_BODIES);
        assert!(matches!(
            client.last_result(),
            Some(SimulationSummary::Collision { num_objects: MAX_COLLISION_BODIES, .. })
        ));
        assert!(client.notices().any(|notice| notice.level == NoticeLevel::Warning
            && notice.message == "Collision result capped at 256 of 4000000000 objects"));
    }

    #[test]
    fn offline_create_shape_is_a_notice() {
        let (mut client, peer) = client();
        peer.set_connected(false);
        assert!(matches!(client.create_shape(ShapeKind::Sphere), Err(SimError::Disconnected)));
        assert!(client.notices().any(|notice| notice.level == NoticeLevel::Error));
    }

    #[test]
    fn pick_requires_a_viewport() {
        let (mut client, _peer) = client();
        assert!(matches!(client.pick(1.0, 1.0), Err(SimError::RenderTarget(_))));
        client.set_viewport(800.0, 600.0).expect("viewport");
        assert_eq!(client.pick(1.0, 1.0).expect("picked"), None);
    }

    #[test]
    fn notices_are_bounded() {
        let (mut client, _peer) = client();
        for _ in 0..(MAX_NOTICES + 10) {
            client.clear_scene();
        }
        assert_eq!(client.notices().count(), MAX_NOTICES);
        assert_eq!(client.drain_notices().len(), MAX_NOTICES);
        assert_eq!(client.notices().count(), 0);
    }

    #[test]
    fn hints_match_keywords() {
        assert_eq!(shape_hint("画一个球体"), Some(ShapeKind::Sphere));
        assert_eq!(shape_hint("hello"), None);
        assert_eq!(simulation_hint("开始碰撞仿真"), Some(SimulationKind::Collision));
        assert_eq!(simulation_hint("Gravity Simulation ready"), Some(SimulationKind::Gravity));
    }
}
