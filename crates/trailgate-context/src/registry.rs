use trailgate_protocol::{ContextDescriptor, ExecutionContextId};

const ROUTE_ONLY: &str = "route_only";
const AUDIT_LOG: &str = "audit_log";

const RESTRICTIONS: [&str; 4] = [
    "no_network",
    "no_device",
    "no_shared_state",
    "no_cross_context_memory",
];

const AUDIT_BOUNDARIES: [&str; 3] = [
    "user_consent_required",
    "explicit_switch",
    "symbolic_logging",
];

/// Static table of the four execution contexts.
///
/// Built once at startup. Lookups are total over [`ExecutionContextId`], so
/// there is no unknown-context path.
#[derive(Debug, Clone)]
pub struct ContextRegistry {
    descriptors: [ContextDescriptor; 4],
}

impl ContextRegistry {
    pub fn standard() -> Self {
        Self {
            descriptors: ExecutionContextId::ALL.map(standard_descriptor),
        }
    }

    pub fn describe(&self, id: ExecutionContextId) -> &ContextDescriptor {
        &self.descriptors[slot(id)]
    }

    /// All descriptors in fixed order: web, proxy, local, emulator.
    pub fn list_all(&self) -> &[ContextDescriptor] {
        &self.descriptors
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

fn slot(id: ExecutionContextId) -> usize {
    match id {
        ExecutionContextId::Web => 0,
        ExecutionContextId::Proxy => 1,
        ExecutionContextId::Local => 2,
        ExecutionContextId::Emulator => 3,
    }
}

fn standard_descriptor(id: ExecutionContextId) -> ContextDescriptor {
    let symbolic = match id {
        ExecutionContextId::Web => "symbolic_ui",
        ExecutionContextId::Proxy => "symbolic_proxy",
        ExecutionContextId::Local => "symbolic_local",
        ExecutionContextId::Emulator => "symbolic_emulator",
    };

    ContextDescriptor {
        id,
        capabilities: [symbolic, ROUTE_ONLY, AUDIT_LOG]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
        restrictions: RESTRICTIONS.into_iter().map(ToOwned::to_owned).collect(),
        audit_boundaries: AUDIT_BOUNDARIES
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
    }
}
