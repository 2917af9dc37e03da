//! Tool-call lifecycle tracking.
//!
//! The backend reports a tool call as a `tool_call_start` followed later by a
//! `tool_call_complete`. Neither event is required to carry an invocation id, so completion is
//! matched to the most recently started invocation that is still open. When both events do
//! carry an `invocation_id`, that id wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::protocol::{InvocationId, SessionId, ToolCallCompletePayload, ToolCallStartPayload};

/// Tools the backend is known to expose.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum KnownTool {
    CreateShape,
    RunSimulation,
    ResetView,
    ClearScene,
    GetStatus,
    ProcessAiCommand,
}

impl KnownTool {
    pub const ALL: [KnownTool; 6] = [
        Self::CreateShape,
        Self::RunSimulation,
        Self::ResetView,
        Self::ClearScene,
        Self::GetStatus,
        Self::ProcessAiCommand,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateShape => "create_shape",
            Self::RunSimulation => "run_simulation",
            Self::ResetView => "reset_view",
            Self::ClearScene => "clear_scene",
            Self::GetStatus => "get_status",
            Self::ProcessAiCommand => "process_ai_command",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CreateShape => "Create shape",
            Self::RunSimulation => "Run simulation",
            Self::ResetView => "Reset view",
            Self::ClearScene => "Clear scene",
            Self::GetStatus => "Get status",
            Self::ProcessAiCommand => "Process command",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolName {
    Known(KnownTool),
    Unknown(String),
}

impl ToolName {
    pub fn parse(name: &str) -> Self {
        let name = name.trim();
        KnownTool::ALL
            .into_iter()
            .find(|tool| tool.as_str() == name)
            .map_or_else(|| Self::Unknown(name.to_string()), Self::Known)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(tool) => tool.as_str(),
            Self::Unknown(name) => name,
        }
    }

    /// Display label; unknown tools show their name verbatim.
    pub fn label(&self) -> String {
        match self {
            Self::Known(tool) => tool.label().to_string(),
            Self::Unknown(name) => name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Started,
    Succeeded,
    Failed,
}

impl InvocationStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            Self::Started => "⏳",
            Self::Succeeded => "✓",
            Self::Failed => "✗",
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Self::Started => "#feca57",
            Self::Succeeded => "#96ceb4",
            Self::Failed => "#ff6b6b",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, Self::Started)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Client-generated id keying the in-progress indicator.
    pub id: InvocationId,
    /// Id supplied by the backend, when it sends one.
    pub remote_id: Option<InvocationId>,
    /// Session whose display surface shows the indicator.
    pub session_id: Option<SessionId>,
    pub tool: ToolName,
    pub parameters: Value,
    pub status: InvocationStatus,
    pub result: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ToolInvocation {
    pub fn indicator(&self) -> ToolIndicator {
        ToolIndicator {
            invocation_id: self.id.clone(),
            label: self.tool.label(),
            status: self.status,
            icon: self.status.icon(),
            color: self.status.color(),
            parameters: self.parameters.clone(),
            detail: self.result.clone(),
        }
    }
}

/// What the display surface renders for one invocation.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolIndicator {
    pub invocation_id: InvocationId,
    pub label: String,
    pub status: InvocationStatus,
    pub icon: &'static str,
    pub color: &'static str,
    pub parameters: Value,
    /// Expanded body: the structured result, or the error text on failure.
    pub detail: Option<Value>,
}

#[derive(Debug, Default)]
pub struct ToolCallTracker {
    invocations: Vec<ToolInvocation>,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new invocation and return it in its `Started` state.
    pub fn start(
        &mut self,
        payload: &ToolCallStartPayload,
        session_id: Option<SessionId>,
    ) -> &ToolInvocation {
        let invocation = ToolInvocation {
            id: format!("tool_{}", Uuid::new_v4()),
            remote_id: payload.invocation_id.clone(),
            session_id,
            tool: ToolName::parse(&payload.tool),
            parameters: payload.params.clone(),
            status: InvocationStatus::Started,
            result: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        info!(
            tool = invocation.tool.as_str(),
            invocation_id = %invocation.id,
            "tool call started"
        );
        let idx = self.invocations.len();
        self.invocations.push(invocation);
        &self.invocations[idx]
    }

    /// Finish the matching open invocation. Returns `None` (and drops the event) when nothing
    /// is open.
    pub fn complete(&mut self, payload: &ToolCallCompletePayload) -> Option<&ToolInvocation> {
        let Some(idx) = self.find_open(payload.invocation_id.as_deref()) else {
            warn!(tool = %payload.tool, "tool call completion without a started call; dropped");
            return None;
        };

        let invocation = &mut self.invocations[idx];
        if invocation.tool.as_str() != payload.tool.trim() {
            debug!(
                started = invocation.tool.as_str(),
                completed = %payload.tool,
                "tool call completion names a different tool"
            );
        }

        if payload.success {
            invocation.status = InvocationStatus::Succeeded;
            invocation.result = Some(payload.result.clone().unwrap_or(Value::Null));
        } else {
            invocation.status = InvocationStatus::Failed;
            invocation.result = Some(match (&payload.error, &payload.result) {
                (Some(error), _) => Value::String(error.clone()),
                (None, Some(result)) => result.clone(),
                (None, None) => Value::String("tool call failed".to_string()),
            });
        }
        invocation.finished_at = Some(Utc::now());

        info!(
            tool = invocation.tool.as_str(),
            invocation_id = %invocation.id,
            success = payload.success,
            "tool call finished"
        );
        Some(&self.invocations[idx])
    }

    fn find_open(&self, remote_id: Option<&str>) -> Option<usize> {
        let open = || {
            self.invocations
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, invocation)| invocation.status.is_open())
        };

        if let Some(remote_id) = remote_id {
            if let Some((idx, _)) =
                open().find(|(_, invocation)| invocation.remote_id.as_deref() == Some(remote_id))
            {
                return Some(idx);
            }
        }
        open().next().map(|(idx, _)| idx)
    }

    /// The invocation currently shown as in progress, if any.
    pub fn active(&self) -> Option<&ToolInvocation> {
        self.invocations
            .iter()
            .rev()
            .find(|invocation| invocation.status.is_open())
    }

    pub fn get(&self, id: &str) -> Option<&ToolInvocation> {
        self.invocations.iter().find(|invocation| invocation.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.invocations.iter()
    }

    pub fn for_session<'a>(
        &'a self,
        session_id: &'a str,
    ) -> impl Iterator<Item = &'a ToolInvocation> + 'a {
        self.invocations
            .iter()
            .filter(move |invocation| invocation.session_id.as_deref() == Some(session_id))
    }

    pub fn len(&self) -> usize {
        self.invocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invocations.is_empty()
    }

    pub fn clear(&mut self) {
        self.invocations.clear();
    }
}
