//! Action kinds: OS intents for the bridge and the tagged action union the
//! safety layer inspects.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Side-effecting operations the bridge knows how to gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsActionType {
    FileOpen,
    FileWrite,
    AppLaunch,
    ClipboardWrite,
    SystemQuery,
}

impl OsActionType {
    pub const ALL: [OsActionType; 5] = [
        Self::FileOpen,
        Self::FileWrite,
        Self::AppLaunch,
        Self::ClipboardWrite,
        Self::SystemQuery,
    ];

    /// Wire name, also the string compared against contract whitelists.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileOpen => "file_open",
            Self::FileWrite => "file_write",
            Self::AppLaunch => "app_launch",
            Self::ClipboardWrite => "clipboard_write",
            Self::SystemQuery => "system_query",
        }
    }
}

impl fmt::Display for OsActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Permission, reversibility, and risk of one action type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsActionDescriptor {
    #[serde(rename = "type")]
    pub action: OsActionType,
    pub required_permission: String,
    pub reversible: bool,
    pub risk_level: RiskLevel,
    pub description: String,
}

/// The concrete operation the bridge will attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsIntent {
    pub action: OsActionType,
    pub target: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub payload: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

impl OsIntent {
    pub const AGENT_TARGET_PREFIX: &'static str = "agent:";

    pub fn new(action: OsActionType, target: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            action,
            target: target.into(),
            payload: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    /// The agent named by an `agent:<id>` target, if any.
    pub fn target_agent(&self) -> Option<&str> {
        self.target.strip_prefix(Self::AGENT_TARGET_PREFIX)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Article,
    Media,
    Advertisement,
    Suggestion,
}

/// Every action the safety layer can be asked about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatedAction {
    Navigate {
        url: String,
    },
    NetworkCall {
        url: String,
        method: String,
    },
    ScriptInjection {
        url: String,
    },
    AdInsertion {
        placement: String,
    },
    RenderContent {
        kind: ContentKind,
        body: String,
    },
    ProviderCall {
        provider: String,
        query: String,
    },
    Os {
        intent: OsIntent,
    },
    #[serde(rename_all = "camelCase")]
    AgentDelegation {
        delegate_agent_id: String,
        instruction: String,
    },
}

impl GatedAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::NetworkCall { .. } => "network_call",
            Self::ScriptInjection { .. } => "script_injection",
            Self::AdInsertion { .. } => "ad_insertion",
            Self::RenderContent { .. } => "render_content",
            Self::ProviderCall { .. } => "provider_call",
            Self::Os { .. } => "os",
            Self::AgentDelegation { .. } => "agent_delegation",
        }
    }

    /// Every free-form string of this action, the only fields keyword
    /// rules are allowed to look at. Agent ids and HTTP methods count;
    /// enum-typed fields such as [`ContentKind`] do not.
    pub fn text_fields(&self) -> Vec<&str> {
        match self {
            Self::Navigate { url } | Self::ScriptInjection { url } => vec![url.as_str()],
            Self::NetworkCall { url, method } => vec![url.as_str(), method.as_str()],
            Self::AdInsertion { placement } => vec![placement.as_str()],
            Self::RenderContent { body, .. } => vec![body.as_str()],
            Self::ProviderCall { provider, query } => vec![provider.as_str(), query.as_str()],
            Self::Os { intent } => std::iter::once(intent.target.as_str())
                .chain(intent.payload.values().map(String::as_str))
                .collect(),
            Self::AgentDelegation {
                delegate_agent_id,
                instruction,
            } => vec![delegate_agent_id.as_str(), instruction.as_str()],
        }
    }

    /// Outbound url for actions that load remote code or data.
    pub fn outbound_url(&self) -> Option<&str> {
        match self {
            Self::NetworkCall { url, .. } | Self::ScriptInjection { url } => Some(url.as_str()),
            _ => None,
        }
    }

    pub fn is_advertisement(&self) -> bool {
        matches!(
            self,
            Self::AdInsertion { .. }
                | Self::RenderContent {
                    kind: ContentKind::Advertisement,
                    ..
                }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_agent_strips_prefix() {
        let intent = OsIntent::new(OsActionType::FileOpen, "agent:planner", Utc::now());
        assert_eq!(intent.target_agent(), Some("planner"));
        let plain = OsIntent::new(OsActionType::FileOpen, "/tmp/notes.txt", Utc::now());
        assert_eq!(plain.target_agent(), None);
    }

    #[test]
    fn gated_action_is_tagged_by_type() {
        let action: GatedAction =
            serde_json::from_str(r#"{"type":"network_call","url":"https://x.io","method":"GET"}"#)
                .unwrap();
        assert_eq!(action.kind(), "network_call");
        assert_eq!(action.outbound_url(), Some("https://x.io"));
    }

    #[test]
    fn os_action_text_fields_cover_target_and_payload() {
        let intent = OsIntent::new(OsActionType::ClipboardWrite, "clipboard", Utc::now())
            .with_payload("text", "hello");
        let action = GatedAction::Os { intent };
        assert_eq!(action.text_fields(), vec!["clipboard", "hello"]);
    }

    #[test]
    fn delegation_and_network_text_fields_include_every_string() {
        let delegation = GatedAction::AgentDelegation {
            delegate_agent_id: "casino-bot".into(),
            instruction: "summarize".into(),
        };
        assert_eq!(delegation.text_fields(), vec!["casino-bot", "summarize"]);

        let call = GatedAction::NetworkCall {
            url: "https://x.io".into(),
            method: "PURGE".into(),
        };
        assert_eq!(call.text_fields(), vec!["https://x.io", "PURGE"]);
    }

    #[test]
    fn advertisement_detection_covers_both_shapes() {
        assert!(
            GatedAction::AdInsertion {
                placement: "sidebar".into()
            }
            .is_advertisement()
        );
        assert!(
            GatedAction::RenderContent {
                kind: ContentKind::Advertisement,
                body: "buy".into()
            }
            .is_advertisement()
        );
        assert!(
            !GatedAction::RenderContent {
                kind: ContentKind::Article,
                body: "news".into()
            }
            .is_advertisement()
        );
    }
}
