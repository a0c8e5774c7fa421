//! Bridge results and the execution audit record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::OsActionType;
use crate::context::ExecutionContextId;
use crate::ids::{AuditEventId, ContractId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Coarse, display-oriented reason: the effect ran, was refused, or was
/// cancelled by the kill switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultReason {
    Executed,
    Blocked,
    Cancelled,
}

impl From<ExecutionStatus> for ResultReason {
    fn from(status: ExecutionStatus) -> Self {
        match status {
            ExecutionStatus::Success => Self::Executed,
            ExecutionStatus::Failure => Self::Blocked,
            ExecutionStatus::Cancelled => Self::Cancelled,
        }
    }
}

/// The specific gate that refused an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    KillSwitchEngaged,
    RouteNotAccepted,
    RouteNotSymbolic,
    ContextMismatch,
    ContractMissingOrRevoked,
    ContractContextMismatch,
    TimeBoundsInvalidOrExpired,
    ActionNotPermitted,
    DelegationMissing,
    DelegationIncomplete,
    DelegationExpired,
    DelegationActionNotPermitted,
    TokenMissing,
    TokenExpired,
    UnknownAction,
    RuntimeError,
}

impl DenialCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KillSwitchEngaged => "kill_switch_engaged",
            Self::RouteNotAccepted => "route_not_accepted",
            Self::RouteNotSymbolic => "route_not_symbolic",
            Self::ContextMismatch => "context_mismatch",
            Self::ContractMissingOrRevoked => "contract_missing_or_revoked",
            Self::ContractContextMismatch => "contract_context_mismatch",
            Self::TimeBoundsInvalidOrExpired => "time_bounds_invalid_or_expired",
            Self::ActionNotPermitted => "action_not_permitted",
            Self::DelegationMissing => "delegation_missing",
            Self::DelegationIncomplete => "delegation_incomplete",
            Self::DelegationExpired => "delegation_expired",
            Self::DelegationActionNotPermitted => "delegation_action_not_permitted",
            Self::TokenMissing => "token_missing",
            Self::TokenExpired => "token_expired",
            Self::UnknownAction => "unknown_action",
            Self::RuntimeError => "runtime_error",
        }
    }
}

/// What the bridge hands back. `audit_trail_id` points at the one audit
/// record written for this call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialCode>,
    pub reversible_hint: String,
    pub audit_trail_id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<ContractId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ExecutionContextId>,
    pub reason: ResultReason,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }
}

/// Audit record for every bridge call and kill-switch transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsExecutionAuditEvent {
    pub id: AuditEventId,
    pub timestamp: DateTime<Utc>,
    pub action: OsActionType,
    pub target: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub context_id: ExecutionContextId,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_follows_status() {
        assert_eq!(
            ResultReason::from(ExecutionStatus::Failure),
            ResultReason::Blocked
        );
        assert_eq!(
            ResultReason::from(ExecutionStatus::Cancelled),
            ResultReason::Cancelled
        );
    }

    #[test]
    fn denial_codes_match_wire_names() {
        for code in [
            DenialCode::TimeBoundsInvalidOrExpired,
            DenialCode::DelegationActionNotPermitted,
            DenialCode::TokenMissing,
        ] {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }
}
