//! Memory revocation over agent memory bindings.
//!
//! These functions only decide and describe. The gateway appends the
//! produced [`MemoryAuditLog`] to the journal.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use trailgate_protocol::{AgentId, Clock, MemoryAuditLog, MemoryOperation};

pub const DEFAULT_INITIATOR: &str = "user";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    Session,
    Workspace,
    None,
}

impl MemoryScope {
    pub const ALL: [MemoryScope; 3] = [Self::Session, Self::Workspace, Self::None];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Session => "session",
            Self::Workspace => "workspace",
            Self::None => "none",
        }
    }
}

impl fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMemoryBinding {
    pub agent_id: AgentId,
    pub memory_scope: MemoryScope,
}

impl AgentMemoryBinding {
    pub fn new(agent_id: impl Into<AgentId>, memory_scope: MemoryScope) -> Self {
        Self {
            agent_id: agent_id.into(),
            memory_scope,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryScopeListing {
    /// Revocable scopes that currently hold at least one agent.
    pub scopes: Vec<MemoryScope>,
    pub by_scope: BTreeMap<MemoryScope, Vec<AgentId>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initiator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub now: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeByScopeResult {
    pub scope: MemoryScope,
    pub affected_agent_ids: Vec<AgentId>,
    pub log: MemoryAuditLog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevokeFailure {
    AgentNotFound,
    NoMemoryScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeByAgentResult {
    pub agent_id: AgentId,
    pub scope: MemoryScope,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<RevokeFailure>,
    pub log: MemoryAuditLog,
}

pub fn list_memory_scopes(bindings: &[AgentMemoryBinding]) -> MemoryScopeListing {
    let mut by_scope: BTreeMap<MemoryScope, Vec<AgentId>> = MemoryScope::ALL
        .into_iter()
        .map(|scope| (scope, Vec::new()))
        .collect();
    for binding in bindings {
        by_scope
            .entry(binding.memory_scope)
            .or_default()
            .push(binding.agent_id.clone());
    }

    let scopes = [MemoryScope::Session, MemoryScope::Workspace]
        .into_iter()
        .filter(|scope| by_scope.get(scope).is_some_and(|agents| !agents.is_empty()))
        .collect();

    MemoryScopeListing { scopes, by_scope }
}

pub fn revoke_memory_by_scope(
    scope: MemoryScope,
    bindings: &[AgentMemoryBinding],
    options: RevokeOptions,
    clock: &dyn Clock,
) -> RevokeByScopeResult {
    let affected_agent_ids = bindings
        .iter()
        .filter(|binding| binding.memory_scope == scope)
        .map(|binding| binding.agent_id.clone())
        .collect();

    RevokeByScopeResult {
        scope,
        affected_agent_ids,
        log: revocation_log(format!("scope:{scope}"), options, clock, true),
    }
}

pub fn revoke_memory_by_agent(
    agent_id: &AgentId,
    bindings: &[AgentMemoryBinding],
    options: RevokeOptions,
    clock: &dyn Clock,
) -> RevokeByAgentResult {
    let target = format!("agent:{agent_id}");
    let binding = bindings.iter().find(|binding| &binding.agent_id == agent_id);

    let (scope, reason) = match binding {
        None => (MemoryScope::None, Some(RevokeFailure::AgentNotFound)),
        Some(binding) if binding.memory_scope == MemoryScope::None => {
            (MemoryScope::None, Some(RevokeFailure::NoMemoryScope))
        }
        Some(binding) => (binding.memory_scope, None),
    };
    let ok = reason.is_none();

    RevokeByAgentResult {
        agent_id: agent_id.clone(),
        scope,
        ok,
        reason,
        log: revocation_log(target, options, clock, ok),
    }
}

fn revocation_log(
    target: String,
    options: RevokeOptions,
    clock: &dyn Clock,
    success: bool,
) -> MemoryAuditLog {
    MemoryAuditLog {
        operation: MemoryOperation::Revoke,
        target,
        initiator: options
            .initiator
            .unwrap_or_else(|| DEFAULT_INITIATOR.to_owned()),
        timestamp: options.now.unwrap_or_else(|| clock.now()),
        success,
    }
}
