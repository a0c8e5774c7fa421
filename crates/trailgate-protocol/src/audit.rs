//! Decision traces, memory audit logs, and the normalized timeline types.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AuditEvent;
use crate::error::GatewayError;
use crate::execution::OsExecutionAuditEvent;
use crate::ids::DecisionId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub policy_name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approved,
    Blocked,
    Revoked,
}

/// A recorded policy or controller decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTrace {
    pub decision_id: DecisionId,
    pub timestamp: DateTime<Utc>,
    pub intent: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    pub outcome: DecisionOutcome,
    pub confidence: f64,
    #[serde(default)]
    pub policy_checks: Vec<PolicyCheck>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOperation {
    Read,
    Write,
    Delete,
    Revoke,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryAuditLog {
    pub operation: MemoryOperation,
    /// Memory id or `scope:<name>` / `agent:<id>`.
    pub target: String,
    pub initiator: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Any record the audit journal accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum AuditRecord {
    Context(AuditEvent),
    Execution(OsExecutionAuditEvent),
    Decision(DecisionTrace),
    Memory(MemoryAuditLog),
}

impl AuditRecord {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Context(event) => event.timestamp,
            Self::Execution(event) => event.timestamp,
            Self::Decision(trace) => trace.timestamp,
            Self::Memory(log) => log.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    Decision,
    Execution,
    Block,
    Revocation,
}

impl FromStr for AuditEventType {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(Self::Decision),
            "execution" => Ok(Self::Execution),
            "block" => Ok(Self::Block),
            "revocation" => Ok(Self::Revocation),
            other => Err(GatewayError::InvalidInput(format!(
                "unknown audit event type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventSource {
    Kernel,
    Os,
    Memory,
}

/// One entry of the merged, time-ordered audit timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditTimelineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: AuditEventType,
    pub source: AuditEventSource,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    pub details: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineStats {
    pub decisions: usize,
    pub executions: usize,
    pub blocks: usize,
    pub revocations: usize,
}
