//! # trailgate-protocol: shared gateway types
//!
//! Pure contract crate for the policy-gated execution gateway. No runtime
//! dependencies, so every other crate (and any out-of-process client) can
//! share the same wire shapes.
//!
//! ## Module Overview
//!
//! - [`ids`]: typed id wrappers and the injectable [`IdGenerator`]
//! - [`clock`]: injectable [`Clock`] (system or manual)
//! - [`context`]: execution contexts, consent tokens, route results
//! - [`contract`]: time-boxed, action-whitelisted execution contracts
//! - [`action`]: OS intents, action descriptors, the gated action union
//! - [`execution`]: bridge results and execution audit records
//! - [`audit`]: decision traces, memory audit logs, timeline types
//! - [`error`]: GatewayError, GatewayResult

pub mod action;
pub mod audit;
pub mod clock;
pub mod context;
pub mod contract;
pub mod error;
pub mod execution;
pub mod ids;

pub use action::{ContentKind, GatedAction, OsActionDescriptor, OsActionType, OsIntent, RiskLevel};
pub use audit::{
    AuditEventSource, AuditEventType, AuditRecord, AuditTimelineEvent, DecisionOutcome,
    DecisionTrace, MemoryAuditLog, MemoryOperation, PolicyCheck, TimelineStats,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{
    AuditEvent, ConsentToken, ContextDescriptor, ContextEventKind, ContextSwitch,
    ExecutionContextId, ExecutionRequest, MemoryOrigin, RequestPayload, RouteMode, RouteRejection,
    RouteResult,
};
pub use contract::{
    ContractTemplate, DelegationSpec, ExecutionContract, ResourceLimits, TimeBounds,
    build_contract_template,
};
pub use error::{GatewayError, GatewayResult};
pub use execution::{
    DenialCode, ExecutionResult, ExecutionStatus, OsExecutionAuditEvent, ResultReason,
};
pub use ids::{
    AgentId, AuditEventId, ContractId, DecisionId, IdGenerator, SequentialIds, SessionId, UuidIds,
};
