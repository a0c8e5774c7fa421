//! Execution contexts, consent, and routing types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::GatewayError;
use crate::ids::AuditEventId;

/// An isolation boundary. Contexts never share mutable state or memory scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContextId {
    Web,
    Proxy,
    Local,
    Emulator,
}

impl ExecutionContextId {
    /// Every context, in registry order.
    pub const ALL: [ExecutionContextId; 4] = [Self::Web, Self::Proxy, Self::Local, Self::Emulator];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Proxy => "proxy",
            Self::Local => "local",
            Self::Emulator => "emulator",
        }
    }
}

impl FromStr for ExecutionContextId {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| GatewayError::InvalidInput(format!("unknown execution context: {s}")))
    }
}

impl fmt::Display for ExecutionContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared capabilities, restrictions, and audit boundaries of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDescriptor {
    pub id: ExecutionContextId,
    pub capabilities: Vec<String>,
    pub restrictions: Vec<String>,
    pub audit_boundaries: Vec<String>,
}

/// Proof that a human approved routing into `context_id`.
///
/// Valid only for the context it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentToken {
    pub context_id: ExecutionContextId,
    pub token: String,
}

impl ConsentToken {
    pub fn new(context_id: ExecutionContextId, token: impl Into<String>) -> Self {
        Self {
            context_id,
            token: token.into(),
        }
    }
}

/// Where the remembered state feeding a request came from.
///
/// Labels that name a context parse to [`MemoryOrigin::Context`]; any other
/// label is kept verbatim so the router can still reject it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryOrigin {
    Context(ExecutionContextId),
    Foreign(String),
}

impl MemoryOrigin {
    pub fn is_context(&self, id: ExecutionContextId) -> bool {
        matches!(self, Self::Context(origin) if *origin == id)
    }
}

impl From<ExecutionContextId> for MemoryOrigin {
    fn from(id: ExecutionContextId) -> Self {
        Self::Context(id)
    }
}

impl From<String> for MemoryOrigin {
    fn from(label: String) -> Self {
        match label.parse() {
            Ok(id) => Self::Context(id),
            Err(_) => Self::Foreign(label),
        }
    }
}

impl fmt::Display for MemoryOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Context(id) => f.write_str(id.as_str()),
            Self::Foreign(label) => f.write_str(label),
        }
    }
}

// Only string origins are meaningful; any other JSON value is ignored.
fn string_origin<'de, D>(deserializer: D) -> Result<Option<MemoryOrigin>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(label)) => Some(MemoryOrigin::from(label)),
        _ => None,
    })
}

/// Structured request payload.
///
/// `memory_origin` names the context whose remembered state feeds this
/// request. Remaining fields are free-form attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    #[serde(
        default,
        deserialize_with = "string_origin",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_origin: Option<MemoryOrigin>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

/// The normalized ask handed to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub context_id: ExecutionContextId,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<RequestPayload>,
}

impl ExecutionRequest {
    pub fn new(context_id: ExecutionContextId, action: impl Into<String>) -> Self {
        Self {
            context_id,
            action: action.into(),
            payload: None,
        }
    }

    pub fn with_memory_origin(mut self, origin: impl Into<MemoryOrigin>) -> Self {
        self.payload.get_or_insert_with(RequestPayload::default).memory_origin =
            Some(origin.into());
        self
    }

    pub fn memory_origin(&self) -> Option<&MemoryOrigin> {
        self.payload.as_ref().and_then(|p| p.memory_origin.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextEventKind {
    RouteAccepted,
    RouteRejected,
    SwitchAccepted,
    SwitchRejected,
}

/// Audit record emitted by the router for every routing or switch decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub event: ContextEventKind,
    pub context_id: ExecutionContextId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRejection {
    ConsentRequired,
    CrossContextMemory,
}

impl RouteRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConsentRequired => "consent_required",
            Self::CrossContextMemory => "cross_context_memory",
        }
    }
}

/// Routing never performs a side effect; an accepted route only authorizes
/// symbolic intent to proceed toward the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    #[default]
    Symbolic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteResult {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RouteRejection>,
    pub context_id: ExecutionContextId,
    pub mode: RouteMode,
    pub audit: AuditEvent,
}

/// Outcome of an explicit context switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSwitch {
    pub from: ExecutionContextId,
    pub to: ExecutionContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent_token: Option<String>,
    pub audit: AuditEvent,
}

impl ContextSwitch {
    pub fn accepted(&self) -> bool {
        self.audit.event == ContextEventKind::SwitchAccepted
    }
}
