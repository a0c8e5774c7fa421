use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tracing::{info, instrument};
use trailgate_audit::AuditJournal;
use trailgate_protocol::{
    AuditRecord, Clock, ContractId, ContractTemplate, DecisionId, DecisionOutcome, DecisionTrace,
    ExecutionContract, GatewayError, GatewayResult, IdGenerator, PolicyCheck,
    build_contract_template,
};

/// Contracts issued in this gateway, in issue order.
///
/// Revocation flips the flag in place; entries are never removed so audit
/// records that name a contract id stay resolvable.
#[derive(Clone)]
pub struct ContractLedger {
    contracts: Arc<RwLock<IndexMap<ContractId, ExecutionContract>>>,
    journal: AuditJournal,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ContractLedger {
    pub fn new(journal: AuditJournal, ids: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            contracts: Arc::new(RwLock::new(IndexMap::new())),
            journal,
            ids,
            clock,
        }
    }

    pub fn issue(&self, template: ContractTemplate) -> GatewayResult<ExecutionContract> {
        let contract = build_contract_template(self.ids.as_ref(), template)?;
        self.contracts
            .write()
            .insert(contract.id().clone(), contract.clone());
        info!(
            contract_id = %contract.id(),
            context = %contract.context_id(),
            "contract issued"
        );
        Ok(contract)
    }

    pub fn get(&self, id: &ContractId) -> Option<ExecutionContract> {
        self.contracts.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ExecutionContract> {
        self.contracts.read().values().cloned().collect()
    }

    #[instrument(skip(self, reason), fields(contract_id = %id))]
    pub async fn revoke(
        &self,
        id: &ContractId,
        reason: Option<String>,
    ) -> GatewayResult<ExecutionContract> {
        let revoked = {
            let mut contracts = self.contracts.write();
            let contract = contracts
                .get_mut(id)
                .ok_or_else(|| GatewayError::ContractNotFound(id.clone()))?;
            contract.revoke();
            contract.clone()
        };
        info!(reason = ?reason, "contract revoked");

        let mut inputs = BTreeMap::new();
        inputs.insert("contractId".to_owned(), json!(id));
        inputs.insert(
            "reason".to_owned(),
            reason.clone().map(Value::String).unwrap_or(Value::Null),
        );
        let trace = DecisionTrace {
            decision_id: DecisionId::from_string(self.ids.next_id("dec")),
            timestamp: self.clock.now(),
            intent: "contract_revoke".to_owned(),
            inputs,
            outcome: DecisionOutcome::Revoked,
            confidence: 1.0,
            policy_checks: vec![PolicyCheck {
                policy_name: "contract_revocation".to_owned(),
                passed: true,
                reason,
            }],
        };
        self.journal.record(AuditRecord::Decision(trace)).await;

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use trailgate_audit::AuditStreamHub;
    use trailgate_protocol::{ExecutionContextId, SequentialIds, SystemClock, TimeBounds};

    fn ledger() -> (ContractLedger, AuditJournal) {
        let journal = AuditJournal::in_memory(AuditStreamHub::default());
        let ledger = ContractLedger::new(
            journal.clone(),
            Arc::new(SequentialIds::new()),
            Arc::new(SystemClock),
        );
        (ledger, journal)
    }

    fn template() -> ContractTemplate {
        let now = Utc::now();
        ContractTemplate {
            context_id: ExecutionContextId::Local,
            scopes: vec!["fs".into()],
            allowed_actions: vec!["file_open".into()],
            resource_limits: None,
            time_bounds: TimeBounds::new(now, now + Duration::minutes(5)),
            delegation: None,
        }
    }

    #[tokio::test]
    async fn revoke_flips_flag_and_records_decision() {
        let (ledger, journal) = ledger();
        let issued = ledger.issue(template()).unwrap();
        assert!(!issued.is_revoked());

        let revoked = ledger
            .revoke(issued.id(), Some("task finished".into()))
            .await
            .unwrap();
        assert!(revoked.is_revoked());
        assert!(ledger.get(issued.id()).unwrap().is_revoked());
        assert_eq!(ledger.list().len(), 1);

        let decisions = journal.decisions();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].intent, "contract_revoke");
        assert_eq!(decisions[0].outcome, DecisionOutcome::Revoked);
        assert_eq!(decisions[0].inputs["reason"], "task finished");
    }

    #[tokio::test]
    async fn unknown_contract_cannot_be_revoked() {
        let (ledger, journal) = ledger();
        let err = ledger
            .revoke(&ContractId::from("ctr-missing"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ContractNotFound(_)));
        assert!(journal.is_empty());
    }

    #[test]
    fn inverted_bounds_are_rejected_at_issue() {
        let (ledger, _) = ledger();
        let mut bad = template();
        bad.time_bounds = TimeBounds::new(bad.time_bounds.end, bad.time_bounds.start);
        assert!(matches!(
            ledger.issue(bad),
            Err(GatewayError::InvalidTimeBounds { .. })
        ));
        assert!(ledger.list().is_empty());
    }
}
