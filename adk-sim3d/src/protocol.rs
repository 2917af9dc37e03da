use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::error::Result;

pub type SessionId = String;
pub type EntityId = String;
pub type InvocationId = String;
pub type ObjectTag = u64;
pub type UiProps = Map<String, Value>;
pub type Point3 = [f32; 3];

/// Events the channel transport delivers to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ChannelEvent {
    Connect,
    Disconnect,
    Error(ServerErrorPayload),
    ChatStart(ChatStartPayload),
    ChatMessage(ChatMessagePayload),
    ChatError(ChatErrorPayload),
    ChatComplete(ChatCompletePayload),
    ToolCallStart(ToolCallStartPayload),
    ToolCallComplete(ToolCallCompletePayload),
    ShapeCreated(ShapeCreatedPayload),
    SimulationResult(SimulationResultPayload),
    SimulationStarted(SimulationStartedPayload),
}

impl ChannelEvent {
    /// Decode an event delivered as a name plus a JSON payload.
    pub fn from_parts(name: &str, data: Value) -> Result<Self> {
        let raw = if data.is_null() {
            json!({ "event": name })
        } else {
            json!({ "event": name, "data": data })
        };
        Ok(serde_json::from_value(raw)?)
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error(_) => "error",
            Self::ChatStart(_) => "chat_start",
            Self::ChatMessage(_) => "chat_message",
            Self::ChatError(_) => "chat_error",
            Self::ChatComplete(_) => "chat_complete",
            Self::ToolCallStart(_) => "tool_call_start",
            Self::ToolCallComplete(_) => "tool_call_complete",
            Self::ShapeCreated(_) => "shape_created",
            Self::SimulationResult(_) => "simulation_result",
            Self::SimulationStarted(_) => "simulation_started",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerErrorPayload {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatStartPayload {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessagePayload {
    pub session_id: SessionId,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatErrorPayload {
    pub session_id: SessionId,
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletePayload {
    pub session_id: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStartPayload {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallCompletePayload {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<InvocationId>,
}

/// `shape_created` arrives in two layouts: `{type, id, data: {..}}` from the direct path and
/// `{shape_data: {type, ..}}` from the tool path. Geometry keys may sit at either level.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShapeCreatedPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub shape_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<UiProps>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape_data: Option<UiProps>,
    #[serde(flatten)]
    pub extra: UiProps,
}

impl ShapeCreatedPayload {
    pub fn resolved_type(&self) -> Option<&str> {
        self.shape_type
            .as_deref()
            .or_else(|| self.shape_data.as_ref()?.get("type")?.as_str())
    }

    pub fn entity_id(&self) -> Option<EntityId> {
        let id = self
            .id
            .as_ref()
            .or_else(|| self.shape_data.as_ref()?.get("id"))?;
        match id {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Look up a numeric geometry parameter across every layout the server uses.
    pub fn param(&self, key: &str) -> Option<f32> {
        let nested = self
            .shape_data
            .as_ref()
            .and_then(|shape| shape.get("data"))
            .and_then(Value::as_object);
        [self.data.as_ref(), nested, self.shape_data.as_ref(), Some(&self.extra)]
            .into_iter()
            .flatten()
            .find_map(|map| map.get(key).and_then(Value::as_f64))
            .map(|value| value as f32)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationResultPayload {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sim_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_steps: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<Point3>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub velocities: Vec<Point3>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub num_objects: Option<u64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub collision_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation_data: Option<CollisionData>,
}

/// Counts arrive as integers, integral floats (`100.0`) or numeric strings depending on the
/// server build. Anything else reads as absent.
fn lenient_count<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|value| match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }))
}

impl SimulationResultPayload {
    pub fn kind(&self) -> Option<SimulationKind> {
        self.sim_type.as_deref()?.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollisionData {
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub time_steps: Option<u64>,
    /// One snapshot per simulation step.
    #[serde(default)]
    pub objects: Vec<StepSnapshot>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSnapshot {
    #[serde(default)]
    pub objects: Vec<TaggedPosition>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TaggedPosition {
    pub id: ObjectTag,
    pub position: Point3,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SimulationStartedPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<SimulationResultPayload>,
}

/// Primitive shapes the user can spawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Cube,
    Sphere,
    Cylinder,
}

impl ShapeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cube => "cube",
            Self::Sphere => "sphere",
            Self::Cylinder => "cylinder",
        }
    }
}

impl FromStr for ShapeKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cube" | "box" => Ok(Self::Cube),
            "sphere" => Ok(Self::Sphere),
            "cylinder" => Ok(Self::Cylinder),
            other => Err(other.to_string()),
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SimulationKind {
    Gravity,
    Collision,
}

impl SimulationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gravity => "gravity",
            Self::Collision => "collision",
        }
    }

    /// Parameters the workbench sends when a simulation is started from the UI.
    pub fn default_params(&self) -> UiProps {
        let params = match self {
            Self::Gravity => json!({
                "time_steps": 100,
                "initial_position": [0, 10, 0],
                "initial_velocity": [0, 0, 0],
            }),
            Self::Collision => json!({
                "time_steps": 200,
                "num_objects": 5,
                "object_size": 0.5,
            }),
        };
        params.as_object().cloned().unwrap_or_default()
    }
}

impl FromStr for SimulationKind {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gravity" => Ok(Self::Gravity),
            "collision" => Ok(Self::Collision),
            other => Err(other.to_string()),
        }
    }
}

/// Events the client sends over the channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    ChatMessage(ChatRequest),
    CreateShape(CreateShapeRequest),
    Simulate(SimulateRequest),
}

impl OutboundEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ChatMessage(_) => "chat_message",
            Self::CreateShape(_) => "create_shape",
            Self::Simulate(_) => "simulate",
        }
    }

    /// The payload alone, for transports that carry the event name out of band.
    pub fn payload(&self) -> Result<Value> {
        let value = match self {
            Self::ChatMessage(request) => serde_json::to_value(request)?,
            Self::CreateShape(request) => serde_json::to_value(request)?,
            Self::Simulate(request) => serde_json::to_value(request)?,
        };
        Ok(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: SessionId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateShapeRequest {
    #[serde(rename = "type")]
    pub shape_type: ShapeKind,
    #[serde(default)]
    pub params: UiProps,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimulateRequest {
    #[serde(rename = "type")]
    pub sim_type: SimulationKind,
    #[serde(default)]
    pub params: UiProps,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A short-lived, user-facing system message (the workbench's toast).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}
