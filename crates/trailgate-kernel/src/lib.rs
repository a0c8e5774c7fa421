//! Explicit construction of the gateway.
//!
//! [`GatewayBuilder`] creates every component once and injects shared
//! handles (journal, kill switch, ids, clock). [`Gateway`] is the facade
//! callers use; independent builds share no state.

mod ledger;
mod memory;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, instrument, warn};
use trailgate_audit::{AuditJournal, AuditStreamHub, JsonlAuditSink};
use trailgate_bridge::{
    ActionCatalog, ConfirmationVerifier, DEFAULT_SIMULATED_LATENCY, EffectRunner,
    ExecutionBridge, ExecutionOptions, KillSwitch, KillSwitchController, KillSwitchOptions,
    KillSwitchResult, OpaqueTokenVerifier, SimulatedEffectRunner,
};
use trailgate_context::{ContextRegistry, ContextRouter};
use trailgate_policy::{PolicyOutcome, SafetyPolicyLayer};
use trailgate_protocol::{
    AgentId, AuditRecord, AuditTimelineEvent, Clock, ConsentToken, ContextDescriptor,
    ContextSwitch, ContractId, ContractTemplate, DecisionId, DecisionOutcome, DecisionTrace,
    ExecutionContextId, ExecutionContract, ExecutionRequest, ExecutionResult, GatedAction,
    GatewayResult, IdGenerator, OsIntent, RouteResult, SystemClock, TimelineStats, UuidIds,
};

pub use ledger::ContractLedger;
pub use memory::{
    AgentMemoryBinding, DEFAULT_INITIATOR, MemoryScope, MemoryScopeListing, RevokeByAgentResult,
    RevokeByScopeResult, RevokeFailure, RevokeOptions, list_memory_scopes,
    revoke_memory_by_agent, revoke_memory_by_scope,
};

const DEFAULT_STREAM_BUFFER: usize = 1024;

#[derive(Clone)]
pub struct GatewayBuilder {
    audit_root: Option<PathBuf>,
    simulated_latency: Duration,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    catalog: ActionCatalog,
    safety: SafetyPolicyLayer,
    verifier: Arc<dyn ConfirmationVerifier>,
    effects: Option<Arc<dyn EffectRunner>>,
    stream_buffer: usize,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            audit_root: None,
            simulated_latency: DEFAULT_SIMULATED_LATENCY,
            ids: Arc::new(UuidIds),
            clock: Arc::new(SystemClock),
            catalog: ActionCatalog::with_core_actions(),
            safety: SafetyPolicyLayer::with_default_rules(),
            verifier: Arc::new(OpaqueTokenVerifier),
            effects: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    /// Mirrors every audit record to `<root>/audit/audit.jsonl`.
    pub fn audit_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.audit_root = Some(root.into());
        self
    }

    pub fn simulated_latency(mut self, latency: Duration) -> Self {
        self.simulated_latency = latency;
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn action_catalog(mut self, catalog: ActionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn safety_layer(mut self, safety: SafetyPolicyLayer) -> Self {
        self.safety = safety;
        self
    }

    pub fn confirmation_verifier(mut self, verifier: Arc<dyn ConfirmationVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Replaces the simulated runner. `simulated_latency` is ignored then.
    pub fn effect_runner(mut self, effects: Arc<dyn EffectRunner>) -> Self {
        self.effects = Some(effects);
        self
    }

    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }

    pub fn build(self) -> Gateway {
        let stream = AuditStreamHub::new(self.stream_buffer);
        let journal = match self.audit_root {
            Some(root) => AuditJournal::with_sink(stream, Arc::new(JsonlAuditSink::new(root))),
            None => AuditJournal::in_memory(stream),
        };

        let registry = Arc::new(ContextRegistry::standard());
        let router = ContextRouter::new(registry.clone(), self.ids.clone(), self.clock.clone());

        let kill_switch = KillSwitch::new();
        let effects: Arc<dyn EffectRunner> = match self.effects {
            Some(effects) => effects,
            None => Arc::new(SimulatedEffectRunner::new(self.simulated_latency)),
        };
        let bridge = ExecutionBridge::new(
            kill_switch.clone(),
            Arc::new(self.catalog),
            self.verifier,
            effects,
            journal.clone(),
            self.ids.clone(),
            self.clock.clone(),
        );
        let controller = KillSwitchController::new(
            kill_switch,
            journal.clone(),
            self.ids.clone(),
            self.clock.clone(),
        );
        let ledger = ContractLedger::new(journal.clone(), self.ids.clone(), self.clock.clone());

        Gateway {
            registry,
            router,
            safety: Arc::new(self.safety),
            bridge,
            kill_switch: controller,
            ledger,
            journal,
            ids: self.ids,
            clock: self.clock,
        }
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the caller supplies alongside a route and an intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub confirmation_token: String,
    pub expected_context: ExecutionContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "result", rename_all = "snake_case")]
pub enum GatedExecution {
    /// Vetoed by the safety layer; the bridge was never called.
    Blocked(PolicyOutcome),
    Executed(ExecutionResult),
}

#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ContextRegistry>,
    router: ContextRouter,
    safety: Arc<SafetyPolicyLayer>,
    bridge: ExecutionBridge,
    kill_switch: KillSwitchController,
    ledger: ContractLedger,
    journal: AuditJournal,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn describe_context(&self, id: ExecutionContextId) -> &ContextDescriptor {
        self.registry.describe(id)
    }

    pub fn list_contexts(&self) -> &[ContextDescriptor] {
        self.registry.list_all()
    }

    pub fn issue_contract(&self, template: ContractTemplate) -> GatewayResult<ExecutionContract> {
        self.ledger.issue(template)
    }

    pub async fn revoke_contract(
        &self,
        id: &ContractId,
        reason: Option<String>,
    ) -> GatewayResult<ExecutionContract> {
        self.ledger.revoke(id, reason).await
    }

    pub fn contract(&self, id: &ContractId) -> Option<ExecutionContract> {
        self.ledger.get(id)
    }

    pub fn contracts(&self) -> Vec<ExecutionContract> {
        self.ledger.list()
    }

    pub async fn route(
        &self,
        request: &ExecutionRequest,
        consent: Option<&ConsentToken>,
    ) -> RouteResult {
        let result = self.router.route(request, consent);
        self.journal
            .record(AuditRecord::Context(result.audit.clone()))
            .await;
        result
    }

    pub async fn switch_context(
        &self,
        from: ExecutionContextId,
        to: ExecutionContextId,
        consent_token: Option<String>,
    ) -> ContextSwitch {
        let switch = self.router.switch_context(from, to, consent_token);
        self.journal
            .record(AuditRecord::Context(switch.audit.clone()))
            .await;
        switch
    }

    /// Runs the safety layer and records the decision.
    #[instrument(skip(self, action), fields(action = action.kind()))]
    pub async fn evaluate(&self, action: &GatedAction) -> PolicyOutcome {
        let verdict = self.safety.evaluate_traced(action);

        let mut inputs = BTreeMap::new();
        inputs.insert("action".to_owned(), json!(action));
        let trace = DecisionTrace {
            decision_id: DecisionId::from_string(self.ids.next_id("dec")),
            timestamp: self.clock.now(),
            intent: action.kind().to_owned(),
            inputs,
            outcome: if verdict.outcome.is_blocked() {
                DecisionOutcome::Blocked
            } else {
                DecisionOutcome::Approved
            },
            confidence: 1.0,
            policy_checks: verdict.checks,
        };
        self.journal.record(AuditRecord::Decision(trace)).await;

        verdict.outcome
    }

    /// Bridge call with the contract resolved from the ledger.
    pub async fn execute(
        &self,
        route: &RouteResult,
        intent: &OsIntent,
        request: &ExecuteRequest,
    ) -> ExecutionResult {
        let contract = request
            .contract_id
            .as_ref()
            .and_then(|id| self.ledger.get(id));
        if contract.is_none()
            && let Some(id) = &request.contract_id
        {
            warn!(contract_id = %id, "execution names an unknown contract");
        }

        self.bridge
            .execute(
                route,
                intent,
                ExecutionOptions {
                    confirmation_token: &request.confirmation_token,
                    expected_context: request.expected_context,
                    workspace_id: &request.workspace_id,
                    user_id: request.user_id.as_deref(),
                    contract: contract.as_ref(),
                },
            )
            .await
    }

    /// Safety layer first; only an approved intent reaches the bridge.
    pub async fn execute_gated(
        &self,
        route: &RouteResult,
        intent: &OsIntent,
        request: &ExecuteRequest,
    ) -> GatedExecution {
        let outcome = self
            .evaluate(&GatedAction::Os {
                intent: intent.clone(),
            })
            .await;
        if outcome.is_blocked() {
            debug!("intent vetoed before reaching the bridge");
            return GatedExecution::Blocked(outcome);
        }
        GatedExecution::Executed(self.execute(route, intent, request).await)
    }

    pub async fn engage_kill_switch(&self, options: KillSwitchOptions) -> KillSwitchResult {
        self.kill_switch.engage(options).await
    }

    pub async fn reset_kill_switch(&self, options: KillSwitchOptions) -> KillSwitchResult {
        self.kill_switch.reset(options).await
    }

    pub fn is_kill_switch_engaged(&self) -> bool {
        self.kill_switch.switch().is_engaged()
    }

    pub fn list_memory_scopes(&self, bindings: &[AgentMemoryBinding]) -> MemoryScopeListing {
        list_memory_scopes(bindings)
    }

    pub async fn revoke_memory_by_scope(
        &self,
        scope: MemoryScope,
        bindings: &[AgentMemoryBinding],
        options: RevokeOptions,
    ) -> RevokeByScopeResult {
        let result = revoke_memory_by_scope(scope, bindings, options, self.clock.as_ref());
        self.journal
            .record(AuditRecord::Memory(result.log.clone()))
            .await;
        result
    }

    pub async fn revoke_memory_by_agent(
        &self,
        agent_id: &AgentId,
        bindings: &[AgentMemoryBinding],
        options: RevokeOptions,
    ) -> RevokeByAgentResult {
        let result = revoke_memory_by_agent(agent_id, bindings, options, self.clock.as_ref());
        self.journal
            .record(AuditRecord::Memory(result.log.clone()))
            .await;
        result
    }

    pub fn timeline(&self) -> Vec<AuditTimelineEvent> {
        self.journal.timeline()
    }

    pub fn summary(&self) -> TimelineStats {
        trailgate_audit::summarize(&self.timeline())
    }

    pub fn journal(&self) -> &AuditJournal {
        &self.journal
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditRecord> {
        self.journal.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use tokio::fs;
    use trailgate_audit::{AuditSink, JsonlAuditSink};
    use trailgate_policy::PolicyCategory;
    use trailgate_protocol::{
        AgentId, AuditEventType, DelegationSpec, DenialCode, ExecutionStatus, ManualClock,
        OsActionType, ResultReason, RouteRejection, SequentialIds, SessionId, TimeBounds,
    };

    use super::*;

    fn unique_test_root(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}"))
    }

    fn start() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000).unwrap()
    }

    fn gateway() -> (Gateway, ManualClock) {
        let clock = ManualClock::new(start());
        let gateway = GatewayBuilder::new()
            .simulated_latency(Duration::ZERO)
            .id_generator(Arc::new(SequentialIds::new()))
            .clock(Arc::new(clock.clone()))
            .build();
        (gateway, clock)
    }

    fn template(allowed: &[&str], delegation: Option<DelegationSpec>) -> ContractTemplate {
        ContractTemplate {
            context_id: ExecutionContextId::Local,
            scopes: vec!["fs".into()],
            allowed_actions: allowed.iter().map(|a| (*a).to_owned()).collect(),
            resource_limits: None,
            time_bounds: TimeBounds::new(start(), start() + ChronoDuration::minutes(30)),
            delegation,
        }
    }

    fn request(contract: &ExecutionContract) -> ExecuteRequest {
        ExecuteRequest {
            confirmation_token: "confirm-1".into(),
            expected_context: ExecutionContextId::Local,
            contract_id: Some(contract.id().clone()),
            workspace_id: "ws-main".into(),
            user_id: Some("owner".into()),
        }
    }

    async fn accepted_route(gateway: &Gateway, action: &str) -> RouteResult {
        let consent = ConsentToken::new(ExecutionContextId::Local, "user-approved");
        gateway
            .route(
                &ExecutionRequest::new(ExecutionContextId::Local, action),
                Some(&consent),
            )
            .await
    }

    fn kill_options() -> KillSwitchOptions {
        KillSwitchOptions {
            session_id: SessionId::from("session-1"),
            context_id: ExecutionContextId::Local,
            user_id: Some("owner".into()),
            reason: Some("manual stop".into()),
        }
    }

    #[tokio::test]
    async fn unconsented_requests_never_route() {
        let (gateway, _) = gateway();
        for context in ExecutionContextId::ALL {
            let result = gateway
                .route(&ExecutionRequest::new(context, "file_open"), None)
                .await;
            assert!(!result.accepted);
            assert_eq!(result.reason, Some(RouteRejection::ConsentRequired));
        }
        assert_eq!(gateway.journal().len(), 4);
    }

    #[tokio::test]
    async fn foreign_memory_origin_never_routes() {
        let (gateway, _) = gateway();
        let consent = ConsentToken::new(ExecutionContextId::Local, "ok");
        let request = ExecutionRequest::new(ExecutionContextId::Local, "file_open")
            .with_memory_origin(ExecutionContextId::Web);
        let result = gateway.route(&request, Some(&consent)).await;
        assert_eq!(result.reason, Some(RouteRejection::CrossContextMemory));
    }

    #[tokio::test]
    async fn authorized_execution_succeeds_end_to_end() {
        let (gateway, _) = gateway();
        let contract = gateway.issue_contract(template(&["file_open"], None)).unwrap();
        let route = accepted_route(&gateway, "file_open").await;
        let intent = OsIntent::new(OsActionType::FileOpen, "/home/user/notes.txt", start());

        let result = gateway.execute(&route, &intent, &request(&contract)).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.reversible_hint, "Action supports reversal");
        assert_eq!(result.contract_id.as_ref(), Some(contract.id()));
    }

    #[tokio::test]
    async fn action_outside_contract_is_blocked() {
        let (gateway, _) = gateway();
        let contract = gateway.issue_contract(template(&["file_open"], None)).unwrap();
        let route = accepted_route(&gateway, "file_write").await;
        let intent = OsIntent::new(OsActionType::FileWrite, "/tmp/out.txt", start());

        let result = gateway.execute(&route, &intent, &request(&contract)).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
        assert_eq!(result.reason, ResultReason::Blocked);
    }

    #[tokio::test]
    async fn revoked_contract_always_fails() {
        let (gateway, _) = gateway();
        let contract = gateway.issue_contract(template(&[], None)).unwrap();
        gateway
            .revoke_contract(contract.id(), Some("done".into()))
            .await
            .unwrap();

        let route = accepted_route(&gateway, "system_query").await;
        let intent = OsIntent::new(OsActionType::SystemQuery, "uptime", start());
        let result = gateway.execute(&route, &intent, &request(&contract)).await;
        assert_eq!(result.denial, Some(DenialCode::ContractMissingOrRevoked));
        assert!(gateway.contract(contract.id()).unwrap().is_revoked());
    }

    #[tokio::test]
    async fn expired_contract_fails_on_next_call() {
        let (gateway, clock) = gateway();
        let contract = gateway.issue_contract(template(&[], None)).unwrap();
        let route = accepted_route(&gateway, "system_query").await;
        let intent = OsIntent::new(OsActionType::SystemQuery, "uptime", start());

        assert!(
            gateway
                .execute(&route, &intent, &request(&contract))
                .await
                .is_success()
        );
        clock.advance(ChronoDuration::minutes(31));
        let result = gateway.execute(&route, &intent, &request(&contract)).await;
        assert_eq!(result.denial, Some(DenialCode::TimeBoundsInvalidOrExpired));
    }

    #[tokio::test]
    async fn kill_switch_cancels_until_reset() {
        let (gateway, _) = gateway();
        let contract = gateway.issue_contract(template(&[], None)).unwrap();
        let route = accepted_route(&gateway, "system_query").await;
        let intent = OsIntent::new(OsActionType::SystemQuery, "uptime", start());

        let engaged = gateway.engage_kill_switch(kill_options()).await;
        assert!(engaged.engaged);
        gateway.engage_kill_switch(kill_options()).await;

        for _ in 0..3 {
            let result = gateway.execute(&route, &intent, &request(&contract)).await;
            assert_eq!(result.status, ExecutionStatus::Cancelled);
        }

        let reset = gateway.reset_kill_switch(kill_options()).await;
        assert!(!reset.engaged);
        assert!(
            gateway
                .execute(&route, &intent, &request(&contract))
                .await
                .is_success()
        );
    }

    #[tokio::test]
    async fn separate_gateways_do_not_share_kill_switch() {
        let (first, _) = gateway();
        let (second, _) = gateway();
        first.engage_kill_switch(kill_options()).await;
        assert!(first.is_kill_switch_engaged());
        assert!(!second.is_kill_switch_engaged());
    }

    #[tokio::test]
    async fn every_execute_leaves_one_matching_audit_record() {
        let (gateway, _) = gateway();
        let contract = gateway.issue_contract(template(&["file_open"], None)).unwrap();
        let route = accepted_route(&gateway, "file_open").await;
        let intents = [
            OsIntent::new(OsActionType::FileOpen, "/tmp/a", start()),
            OsIntent::new(OsActionType::FileWrite, "/tmp/b", start()),
            OsIntent::new(OsActionType::FileOpen, "agent:helper", start()),
        ];

        for intent in &intents {
            let before = gateway.journal().executions().len();
            let result = gateway.execute(&route, intent, &request(&contract)).await;
            let after = gateway.journal().executions();
            assert_eq!(after.len(), before + 1);
            assert_eq!(after[before].id, result.audit_trail_id);
        }
    }

    #[tokio::test]
    async fn unsafe_content_is_vetoed_before_the_bridge() {
        let (gateway, _) = gateway();
        let route = accepted_route(&gateway, "file_write").await;
        let intent = OsIntent::new(OsActionType::FileWrite, "/tmp/page.html", start())
            .with_payload("content", "best online casino bonuses");
        let no_contract = ExecuteRequest {
            confirmation_token: String::new(),
            expected_context: ExecutionContextId::Local,
            contract_id: None,
            workspace_id: "ws-main".into(),
            user_id: None,
        };

        match gateway.execute_gated(&route, &intent, &no_contract).await {
            GatedExecution::Blocked(PolicyOutcome::Blocked { category, .. }) => {
                assert_eq!(category, PolicyCategory::Safety);
            }
            other => panic!("expected a policy veto, got {other:?}"),
        }
        assert!(gateway.journal().executions().is_empty());
        assert_eq!(gateway.summary().blocks, 1);
    }

    #[tokio::test]
    async fn delegation_whitelists_intersect() {
        let (gateway, _) = gateway();
        let delegation = DelegationSpec {
            delegator_agent_id: AgentId::from("planner"),
            delegate_agent_id: AgentId::from("x"),
            allowed_actions: vec!["file_open".into()],
            resource_limits: None,
            time_bounds: TimeBounds::new(start(), start() + ChronoDuration::minutes(30)),
        };
        let contract = gateway
            .issue_contract(template(&["system_query"], Some(delegation)))
            .unwrap();
        let route = accepted_route(&gateway, "file_open").await;
        let intent = OsIntent::new(OsActionType::FileOpen, "agent:x", start());

        let result = gateway.execute(&route, &intent, &request(&contract)).await;
        assert_eq!(result.status, ExecutionStatus::Failure);
    }

    #[tokio::test]
    async fn timeline_merges_decisions_executions_and_revocations() {
        let (gateway, clock) = gateway();
        let contract = gateway.issue_contract(template(&[], None)).unwrap();
        let route = accepted_route(&gateway, "system_query").await;
        let intent = OsIntent::new(OsActionType::SystemQuery, "uptime", start());

        clock.advance(ChronoDuration::seconds(1));
        gateway.execute_gated(&route, &intent, &request(&contract)).await;
        clock.advance(ChronoDuration::seconds(1));
        gateway
            .revoke_memory_by_scope(
                MemoryScope::Session,
                &[AgentMemoryBinding::new("researcher", MemoryScope::Session)],
                RevokeOptions::default(),
            )
            .await;
        clock.advance(ChronoDuration::seconds(1));
        gateway.revoke_contract(contract.id(), None).await.unwrap();

        let timeline = gateway.timeline();
        assert!(timeline.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let types: Vec<_> = timeline.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                AuditEventType::Decision,
                AuditEventType::Execution,
                AuditEventType::Revocation,
                AuditEventType::Decision,
            ]
        );
        let summary = gateway.summary();
        assert_eq!(summary.decisions, 2);
        assert_eq!(summary.executions, 1);
        assert_eq!(summary.revocations, 1);
    }

    #[tokio::test]
    async fn audit_root_persists_records() -> Result<()> {
        let root = unique_test_root("trailgate-kernel");
        let gateway = GatewayBuilder::new()
            .audit_root(&root)
            .simulated_latency(Duration::ZERO)
            .build();
        gateway
            .route(&ExecutionRequest::new(ExecutionContextId::Web, "navigate"), None)
            .await;
        gateway.engage_kill_switch(kill_options()).await;

        let persisted = JsonlAuditSink::new(&root).read_all().await?;
        assert_eq!(persisted.len(), 2);
        assert_eq!(persisted, gateway.journal().snapshot());

        let _ = fs::remove_dir_all(root).await;
        Ok(())
    }

    #[tokio::test]
    async fn subscribers_see_gateway_records() -> Result<()> {
        let (gateway, _) = gateway();
        let mut rx = gateway.subscribe();
        gateway
            .switch_context(
                ExecutionContextId::Web,
                ExecutionContextId::Local,
                Some("approved".into()),
            )
            .await;
        assert!(matches!(rx.recv().await?, AuditRecord::Context(_)));
        Ok(())
    }
}
