use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};
use trailgate_protocol::{
    AuditEvent, AuditEventId, Clock, ConsentToken, ContextEventKind, ContextSwitch,
    ExecutionContextId, ExecutionRequest, IdGenerator, RouteMode, RouteRejection, RouteResult,
};

use crate::registry::ContextRegistry;

/// Validates a request against consent and cross-context memory rules.
///
/// Routing only authorizes symbolic intent; it never performs the action.
/// Every call produces exactly one [`AuditEvent`], carried on the result.
#[derive(Clone)]
pub struct ContextRouter {
    registry: Arc<ContextRegistry>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl ContextRouter {
    pub fn new(
        registry: Arc<ContextRegistry>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            ids,
            clock,
        }
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    pub fn route(&self, request: &ExecutionRequest, consent: Option<&ConsentToken>) -> RouteResult {
        let context_id = request.context_id;
        let descriptor = self.registry.describe(context_id);

        let has_consent = consent
            .is_some_and(|c| c.context_id == context_id && !c.token.is_empty());
        if !has_consent {
            warn!(context = %context_id, action = %request.action, "route rejected: consent required");
            return self.reject(request, RouteRejection::ConsentRequired);
        }

        if let Some(origin) = request.memory_origin()
            && !origin.is_context(context_id)
        {
            warn!(
                context = %context_id,
                memory_origin = %origin,
                action = %request.action,
                "route rejected: cross-context memory"
            );
            return self.reject(request, RouteRejection::CrossContextMemory);
        }

        let mut details = BTreeMap::new();
        details.insert("capabilities".to_owned(), json!(descriptor.capabilities));
        details.insert("restrictions".to_owned(), json!(descriptor.restrictions));
        details.insert(
            "auditBoundaries".to_owned(),
            json!(descriptor.audit_boundaries),
        );
        details.insert("action".to_owned(), json!(request.action));

        debug!(context = %context_id, action = %request.action, "route accepted");
        RouteResult {
            accepted: true,
            reason: None,
            context_id,
            mode: RouteMode::Symbolic,
            audit: self.audit(ContextEventKind::RouteAccepted, context_id, details),
        }
    }

    /// Records an explicit move between contexts. A non-empty token is
    /// required for the switch to count as accepted.
    pub fn switch_context(
        &self,
        from: ExecutionContextId,
        to: ExecutionContextId,
        consent_token: Option<String>,
    ) -> ContextSwitch {
        let consent_provided = consent_token.as_deref().is_some_and(|t| !t.is_empty());
        let kind = if consent_provided {
            ContextEventKind::SwitchAccepted
        } else {
            warn!(%from, %to, "context switch rejected: no consent token");
            ContextEventKind::SwitchRejected
        };

        let mut details = BTreeMap::new();
        details.insert("from".to_owned(), json!(from));
        details.insert("to".to_owned(), json!(to));
        details.insert("consentProvided".to_owned(), Value::Bool(consent_provided));

        ContextSwitch {
            from,
            to,
            consent_token,
            audit: self.audit(kind, to, details),
        }
    }

    fn reject(&self, request: &ExecutionRequest, reason: RouteRejection) -> RouteResult {
        let mut details = BTreeMap::new();
        details.insert("reason".to_owned(), json!(reason.as_str()));
        RouteResult {
            accepted: false,
            reason: Some(reason),
            context_id: request.context_id,
            mode: RouteMode::Symbolic,
            audit: self.audit(ContextEventKind::RouteRejected, request.context_id, details),
        }
    }

    fn audit(
        &self,
        event: ContextEventKind,
        context_id: ExecutionContextId,
        details: BTreeMap<String, Value>,
    ) -> AuditEvent {
        AuditEvent {
            id: AuditEventId::from_string(self.ids.next_id("ctx")),
            timestamp: self.clock.now(),
            event,
            context_id,
            details,
        }
    }
}
