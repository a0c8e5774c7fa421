use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use trailgate_audit::AuditJournal;
use trailgate_protocol::{
    AuditEventId, AuditRecord, Clock, ExecutionContextId, ExecutionStatus, IdGenerator,
    OsActionType, OsExecutionAuditEvent, SessionId,
};

pub const KILL_SWITCH_TARGET: &str = "kill_switch";

/// Process-wide halt bit.
///
/// Clones share the same cell, so one handle can be given to the bridge and
/// another to the controller. Separate `new()` calls are fully independent.
#[derive(Debug, Clone, Default)]
pub struct KillSwitch {
    engaged: Arc<AtomicBool>,
}

impl KillSwitch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn engage(&self) {
        self.engaged.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.engaged.store(false, Ordering::SeqCst);
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchOptions {
    pub session_id: SessionId,
    pub context_id: ExecutionContextId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchResult {
    pub engaged: bool,
    pub audit: OsExecutionAuditEvent,
}

/// Flips the switch and writes the audit record the switch itself cannot.
#[derive(Clone)]
pub struct KillSwitchController {
    switch: KillSwitch,
    journal: AuditJournal,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl KillSwitchController {
    pub fn new(
        switch: KillSwitch,
        journal: AuditJournal,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            switch,
            journal,
            ids,
            clock,
        }
    }

    pub fn switch(&self) -> &KillSwitch {
        &self.switch
    }

    pub async fn engage(&self, options: KillSwitchOptions) -> KillSwitchResult {
        self.switch.engage();
        info!(
            session_id = %options.session_id,
            context = %options.context_id,
            reason = ?options.reason,
            "kill switch engaged; all execution halted"
        );
        self.transition("engage", options).await
    }

    pub async fn reset(&self, options: KillSwitchOptions) -> KillSwitchResult {
        self.switch.reset();
        info!(
            session_id = %options.session_id,
            context = %options.context_id,
            "kill switch reset; execution enabled"
        );
        self.transition("reset", options).await
    }

    async fn transition(&self, action: &str, options: KillSwitchOptions) -> KillSwitchResult {
        let mut metadata = BTreeMap::new();
        metadata.insert("sessionId".to_owned(), json!(options.session_id));
        metadata.insert("action".to_owned(), json!(action));
        metadata.insert(
            "reason".to_owned(),
            options.reason.map(Value::String).unwrap_or(Value::Null),
        );

        let audit = OsExecutionAuditEvent {
            id: AuditEventId::from_string(self.ids.next_id("exec")),
            timestamp: self.clock.now(),
            action: OsActionType::SystemQuery,
            target: KILL_SWITCH_TARGET.to_owned(),
            status: ExecutionStatus::Success,
            user_id: options.user_id,
            context_id: options.context_id,
            metadata,
        };
        self.journal
            .record(AuditRecord::Execution(audit.clone()))
            .await;

        KillSwitchResult {
            engaged: self.switch.is_engaged(),
            audit,
        }
    }
}
