//! Execution contracts: time-boxed, scope-limited, action-whitelisted grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContextId;
use crate::error::{GatewayError, GatewayResult};
use crate::ids::{AgentId, ContractId, IdGenerator};

/// Advisory resource ceilings. Nothing enforces them yet; they are carried so
/// an enforcement layer has somewhere to read them from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<u64>,
    #[serde(
        default,
        rename = "memoryMB",
        skip_serializing_if = "Option::is_none"
    )]
    pub memory_mb: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBounds {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    /// `start <= now <= end`, inclusive on both ends.
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now <= self.end
    }
}

/// Sub-grant for one agent acting on behalf of another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationSpec {
    pub delegator_agent_id: AgentId,
    pub delegate_agent_id: AgentId,
    pub allowed_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    pub time_bounds: TimeBounds,
}

impl DelegationSpec {
    pub fn is_complete(&self) -> bool {
        !self.delegator_agent_id.is_empty() && !self.delegate_agent_id.is_empty()
    }

    /// Unlike the outer contract, an empty delegation list admits nothing.
    pub fn permits(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }
}

/// Input to [`build_contract_template`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractTemplate {
    pub context_id: ExecutionContextId,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_limits: Option<ResourceLimits>,
    pub time_bounds: TimeBounds,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegation: Option<DelegationSpec>,
}

/// A bounded grant for one task inside one context.
///
/// Only [`build_contract_template`] creates contracts. They are never
/// deleted; [`ExecutionContract::revoke`] marks them so audit references to
/// the id stay resolvable.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionContract {
    id: ContractId,
    context_id: ExecutionContextId,
    scopes: Vec<String>,
    allowed_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_limits: Option<ResourceLimits>,
    time_bounds: TimeBounds,
    revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    delegation: Option<DelegationSpec>,
}

impl ExecutionContract {
    pub fn id(&self) -> &ContractId {
        &self.id
    }

    pub fn context_id(&self) -> ExecutionContextId {
        self.context_id
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn allowed_actions(&self) -> &[String] {
        &self.allowed_actions
    }

    pub fn resource_limits(&self) -> Option<&ResourceLimits> {
        self.resource_limits.as_ref()
    }

    pub fn time_bounds(&self) -> &TimeBounds {
        &self.time_bounds
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    pub fn delegation(&self) -> Option<&DelegationSpec> {
        self.delegation.as_ref()
    }

    /// An empty whitelist admits every action.
    pub fn permits(&self, action: &str) -> bool {
        self.allowed_actions.is_empty() || self.allowed_actions.iter().any(|a| a == action)
    }

    /// One-way: a revoked contract stays revoked.
    pub fn revoke(&mut self) {
        self.revoked = true;
    }
}

/// The only constructor for [`ExecutionContract`].
pub fn build_contract_template(
    ids: &dyn IdGenerator,
    template: ContractTemplate,
) -> GatewayResult<ExecutionContract> {
    if !template.time_bounds.is_well_formed() {
        return Err(GatewayError::InvalidTimeBounds {
            start: template.time_bounds.start,
            end: template.time_bounds.end,
        });
    }
    if let Some(delegation) = &template.delegation
        && !delegation.time_bounds.is_well_formed()
    {
        return Err(GatewayError::InvalidTimeBounds {
            start: delegation.time_bounds.start,
            end: delegation.time_bounds.end,
        });
    }

    Ok(ExecutionContract {
        id: ContractId::from_string(ids.next_id("ctr")),
        context_id: template.context_id,
        scopes: template.scopes,
        allowed_actions: template.allowed_actions,
        resource_limits: template.resource_limits,
        time_bounds: template.time_bounds,
        revoked: false,
        delegation: template.delegation,
    })
}
