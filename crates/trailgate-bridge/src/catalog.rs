use indexmap::IndexMap;
use trailgate_protocol::{OsActionDescriptor, OsActionType, RiskLevel};

/// Capability table consulted by the bridge before any effect runs.
///
/// An action with no descriptor here is unknown and fails closed.
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    descriptors: IndexMap<OsActionType, OsActionDescriptor>,
}

impl ActionCatalog {
    pub fn register(&mut self, descriptor: OsActionDescriptor) {
        self.descriptors.insert(descriptor.action, descriptor);
    }

    pub fn get(&self, action: OsActionType) -> Option<&OsActionDescriptor> {
        self.descriptors.get(&action)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &OsActionDescriptor> {
        self.descriptors.values()
    }

    pub fn with_core_actions() -> Self {
        let mut catalog = Self::default();

        catalog.register(descriptor(
            OsActionType::FileOpen,
            "fs:read",
            true,
            RiskLevel::Low,
            "Read file content from the local file system.",
        ));
        catalog.register(descriptor(
            OsActionType::FileWrite,
            "fs:write",
            false,
            RiskLevel::High,
            "Write content to a file on the local file system.",
        ));
        catalog.register(descriptor(
            OsActionType::AppLaunch,
            "app:launch",
            false,
            RiskLevel::Medium,
            "Launch an external application.",
        ));
        catalog.register(descriptor(
            OsActionType::ClipboardWrite,
            "clipboard:write",
            true,
            RiskLevel::Low,
            "Write text to the system clipboard.",
        ));
        catalog.register(descriptor(
            OsActionType::SystemQuery,
            "system:read",
            true,
            RiskLevel::Low,
            "Query system information (OS version, uptime, etc.).",
        ));

        catalog
    }
}

fn descriptor(
    action: OsActionType,
    required_permission: &str,
    reversible: bool,
    risk_level: RiskLevel,
    description: &str,
) -> OsActionDescriptor {
    OsActionDescriptor {
        action,
        required_permission: required_permission.to_owned(),
        reversible,
        risk_level,
        description: description.to_owned(),
    }
}
