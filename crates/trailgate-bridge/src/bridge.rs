use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};
use trailgate_audit::AuditJournal;
use trailgate_protocol::{
    AuditEventId, AuditRecord, Clock, DenialCode, ExecutionContextId, ExecutionContract,
    ExecutionResult, ExecutionStatus, IdGenerator, OsActionDescriptor, OsExecutionAuditEvent,
    OsIntent, ResultReason, RouteMode, RouteResult,
};

use crate::catalog::ActionCatalog;
use crate::effects::EffectRunner;
use crate::kill_switch::KillSwitch;
use crate::verifier::ConfirmationVerifier;

/// Caller-supplied evidence for one execution attempt.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionOptions<'a> {
    pub confirmation_token: &'a str,
    pub expected_context: ExecutionContextId,
    pub workspace_id: &'a str,
    pub user_id: Option<&'a str>,
    pub contract: Option<&'a ExecutionContract>,
}

#[derive(Debug)]
struct Denial {
    code: DenialCode,
    message: String,
}

impl Denial {
    fn new(code: DenialCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// The only component allowed to perform a side effect.
///
/// Every precondition is re-derived on each call; nothing the caller did
/// earlier (routing, policy evaluation) is trusted. Each call writes exactly
/// one execution audit record, whose id is returned as `audit_trail_id`.
#[derive(Clone)]
pub struct ExecutionBridge {
    kill_switch: KillSwitch,
    catalog: Arc<ActionCatalog>,
    verifier: Arc<dyn ConfirmationVerifier>,
    effects: Arc<dyn EffectRunner>,
    journal: AuditJournal,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ExecutionBridge {
    pub fn new(
        kill_switch: KillSwitch,
        catalog: Arc<ActionCatalog>,
        verifier: Arc<dyn ConfirmationVerifier>,
        effects: Arc<dyn EffectRunner>,
        journal: AuditJournal,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            kill_switch,
            catalog,
            verifier,
            effects,
            journal,
            ids,
            clock,
        }
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    #[instrument(
        skip(self, route, intent, options),
        fields(
            context = %route.context_id,
            action = %intent.action,
            target = %intent.target
        )
    )]
    pub async fn execute(
        &self,
        route: &RouteResult,
        intent: &OsIntent,
        options: ExecutionOptions<'_>,
    ) -> ExecutionResult {
        if self.kill_switch.is_engaged() {
            warn!("execution cancelled: kill switch engaged");
            let denial = Denial::new(DenialCode::KillSwitchEngaged, "Kill switch engaged");
            return self
                .finish(route, intent, &options, ExecutionStatus::Cancelled, None, Some(denial))
                .await;
        }

        let descriptor = match self.validate(route, intent, &options) {
            Ok(descriptor) => descriptor,
            Err(denial) => {
                warn!(denial = denial.code.as_str(), message = %denial.message, "execution refused");
                return self
                    .finish(route, intent, &options, ExecutionStatus::Failure, None, Some(denial))
                    .await;
            }
        };

        match self.effects.perform(intent, descriptor).await {
            Ok(output) => {
                debug!(risk = descriptor.risk_level.as_str(), "execution succeeded");
                self.finish(
                    route,
                    intent,
                    &options,
                    ExecutionStatus::Success,
                    Some(output),
                    None,
                )
                .await
            }
            Err(error) => {
                warn!(%error, "effect runner failed");
                let denial = Denial::new(DenialCode::RuntimeError, format!("Runtime error: {error}"));
                self.finish(route, intent, &options, ExecutionStatus::Failure, None, Some(denial))
                    .await
            }
        }
    }

    fn validate(
        &self,
        route: &RouteResult,
        intent: &OsIntent,
        options: &ExecutionOptions<'_>,
    ) -> Result<&OsActionDescriptor, Denial> {
        if !route.accepted {
            return Err(Denial::new(DenialCode::RouteNotAccepted, "Route not accepted"));
        }
        if route.mode != RouteMode::Symbolic {
            return Err(Denial::new(
                DenialCode::RouteNotSymbolic,
                "Route must be symbolic before execution",
            ));
        }
        if route.context_id != options.expected_context {
            return Err(Denial::new(
                DenialCode::ContextMismatch,
                format!(
                    "Context mismatch: route={}, expected={}",
                    route.context_id, options.expected_context
                ),
            ));
        }

        let action = intent.action.as_str();
        let contract = match options.contract {
            Some(contract) if !contract.is_revoked() => contract,
            _ => {
                return Err(Denial::new(
                    DenialCode::ContractMissingOrRevoked,
                    "Contract missing or revoked",
                ));
            }
        };
        if contract.context_id() != options.expected_context {
            return Err(Denial::new(
                DenialCode::ContractContextMismatch,
                "Contract context mismatch",
            ));
        }
        let now = self.clock.now();
        let bounds = contract.time_bounds();
        if !bounds.is_well_formed() || !bounds.contains(now) {
            return Err(Denial::new(
                DenialCode::TimeBoundsInvalidOrExpired,
                "Contract time bounds invalid or expired",
            ));
        }
        if !contract.permits(action) {
            return Err(Denial::new(
                DenialCode::ActionNotPermitted,
                "Action not permitted by contract",
            ));
        }

        if intent.target_agent().is_some() {
            match contract.delegation() {
                None => {
                    return Err(Denial::new(
                        DenialCode::DelegationMissing,
                        "Agent delegation missing contract",
                    ));
                }
                Some(delegation) if !delegation.is_complete() => {
                    return Err(Denial::new(
                        DenialCode::DelegationIncomplete,
                        "Delegation contract incomplete",
                    ));
                }
                Some(_) => {}
            }
        }
        if let Some(delegation) = contract.delegation() {
            if !delegation.permits(action) {
                return Err(Denial::new(
                    DenialCode::DelegationActionNotPermitted,
                    "Delegation action not permitted",
                ));
            }
            if !delegation.time_bounds.contains(now) {
                return Err(Denial::new(
                    DenialCode::DelegationExpired,
                    "Delegation time bounds invalid or expired",
                ));
            }
        }

        if let Err(rejection) = self.verifier.verify(options.confirmation_token) {
            return Err(Denial::new(
                rejection.denial(),
                "Invalid or expired confirmation token",
            ));
        }

        self.catalog.get(intent.action).ok_or_else(|| {
            Denial::new(
                DenialCode::UnknownAction,
                format!("Unknown OS action: {}", intent.action),
            )
        })
    }

    async fn finish(
        &self,
        route: &RouteResult,
        intent: &OsIntent,
        options: &ExecutionOptions<'_>,
        status: ExecutionStatus,
        output: Option<Value>,
        denial: Option<Denial>,
    ) -> ExecutionResult {
        let descriptor = self.catalog.get(intent.action);
        let contract_id = options.contract.map(|c| c.id().clone());
        let (denial, error) = match denial {
            Some(Denial { code, message }) => (Some(code), Some(message)),
            None => (None, None),
        };

        let mut metadata = BTreeMap::new();
        metadata.insert("workspaceId".to_owned(), json!(options.workspace_id));
        metadata.insert(
            "riskLevel".to_owned(),
            json!(descriptor.map(|d| d.risk_level)),
        );
        metadata.insert("error".to_owned(), json!(error));
        metadata.insert("contractId".to_owned(), json!(contract_id));
        metadata.insert("denial".to_owned(), json!(denial));

        let timestamp = self.clock.now();
        let audit = OsExecutionAuditEvent {
            id: AuditEventId::from_string(self.ids.next_id("exec")),
            timestamp,
            action: intent.action,
            target: intent.target.clone(),
            status,
            user_id: options.user_id.map(ToOwned::to_owned),
            context_id: route.context_id,
            metadata,
        };
        let audit_trail_id = audit.id.clone();
        self.journal.record(AuditRecord::Execution(audit)).await;

        let reversible_hint = if descriptor.is_some_and(|d| d.reversible) {
            "Action supports reversal"
        } else {
            "Action is irreversible"
        };

        ExecutionResult {
            status,
            output,
            error,
            denial,
            reversible_hint: reversible_hint.to_owned(),
            audit_trail_id,
            timestamp,
            contract_id,
            context_id: Some(route.context_id),
            reason: ResultReason::from(status),
        }
    }
}
