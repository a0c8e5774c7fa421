use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use trailgate_protocol::{GatedAction, PolicyCheck};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Safety,
    Privacy,
    Monetization,
    Sovereignty,
}

impl PolicyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safety => "safety",
            Self::Privacy => "privacy",
            Self::Monetization => "monetization",
            Self::Sovereignty => "sovereignty",
        }
    }
}

impl fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type CustomMatcher = Arc<dyn Fn(&GatedAction) -> bool + Send + Sync>;

/// What a rule looks for. Returns true when the action must be BLOCKED.
#[derive(Clone)]
pub enum RuleMatcher {
    /// Case-insensitive substring match over the action's text fields.
    KeywordDenylist(Vec<String>),
    /// Case-insensitive substring match over outbound urls of network calls
    /// and script injections.
    TrackerUrls(Vec<String>),
    /// Ad insertions and advertisement content.
    Advertisement,
    Custom(CustomMatcher),
}

impl RuleMatcher {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::KeywordDenylist(
            keywords
                .into_iter()
                .map(|k| k.as_ref().to_lowercase())
                .collect(),
        )
    }

    pub fn trackers<I, S>(trackers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::TrackerUrls(
            trackers
                .into_iter()
                .map(|t| t.as_ref().to_lowercase())
                .collect(),
        )
    }

    pub fn matches(&self, action: &GatedAction) -> bool {
        match self {
            Self::KeywordDenylist(keywords) => action.text_fields().into_iter().any(|field| {
                let field = field.to_lowercase();
                keywords.iter().any(|kw| field.contains(kw.as_str()))
            }),
            Self::TrackerUrls(trackers) => action.outbound_url().is_some_and(|url| {
                let url = url.to_lowercase();
                trackers.iter().any(|t| url.contains(t.as_str()))
            }),
            Self::Advertisement => action.is_advertisement(),
            Self::Custom(matcher) => matcher(action),
        }
    }
}

impl fmt::Debug for RuleMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeywordDenylist(keywords) => {
                f.debug_tuple("KeywordDenylist").field(keywords).finish()
            }
            Self::TrackerUrls(trackers) => f.debug_tuple("TrackerUrls").field(trackers).finish(),
            Self::Advertisement => f.write_str("Advertisement"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub id: String,
    pub category: PolicyCategory,
    /// Lower runs first. Equal priorities keep insertion order.
    pub priority: u32,
    pub matcher: RuleMatcher,
    pub reason: String,
    pub alternative: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyOutcome {
    Approved,
    #[serde(rename_all = "camelCase")]
    Blocked {
        rule_id: String,
        category: PolicyCategory,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alternative: Option<String>,
    },
}

impl PolicyOutcome {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Outcome plus one check per rule that was consulted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyVerdict {
    pub outcome: PolicyOutcome,
    pub checks: Vec<PolicyCheck>,
}

/// Ordered rule list, first match wins.
///
/// Runs before the execution bridge and independently of contracts: a
/// blocked action never reaches contract validation.
#[derive(Debug, Clone, Default)]
pub struct SafetyPolicyLayer {
    rules: IndexMap<String, PolicyRule>,
}

impl SafetyPolicyLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_rules() -> Self {
        let mut layer = Self::new();
        for rule in default_rules() {
            layer.add_rule(rule);
        }
        layer
    }

    /// Adds a rule, or replaces the rule with the same id.
    pub fn add_rule(&mut self, rule: PolicyRule) {
        self.rules.insert(rule.id.clone(), rule);
        self.rules
            .sort_by(|_, left, _, right| left.priority.cmp(&right.priority));
    }

    pub fn remove_rule(&mut self, id: &str) -> Option<PolicyRule> {
        self.rules.shift_remove(id)
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &PolicyRule> {
        self.rules.values()
    }

    pub fn evaluate(&self, action: &GatedAction) -> PolicyOutcome {
        self.evaluate_traced(action).outcome
    }

    pub fn evaluate_traced(&self, action: &GatedAction) -> PolicyVerdict {
        let mut checks = Vec::new();

        for rule in self.rules.values() {
            if rule.matcher.matches(action) {
                let reason = format!("[Policy: {}] {}", rule.category, rule.reason);
                warn!(
                    rule_id = %rule.id,
                    category = %rule.category,
                    action = action.kind(),
                    "action blocked by safety policy"
                );
                checks.push(PolicyCheck {
                    policy_name: rule.id.clone(),
                    passed: false,
                    reason: Some(reason.clone()),
                });
                return PolicyVerdict {
                    outcome: PolicyOutcome::Blocked {
                        rule_id: rule.id.clone(),
                        category: rule.category,
                        reason,
                        alternative: rule.alternative.clone(),
                    },
                    checks,
                };
            }
            checks.push(PolicyCheck {
                policy_name: rule.id.clone(),
                passed: true,
                reason: None,
            });
        }

        debug!(action = action.kind(), rules = checks.len(), "action approved");
        PolicyVerdict {
            outcome: PolicyOutcome::Approved,
            checks,
        }
    }
}

pub fn default_rules() -> Vec<PolicyRule> {
    vec![
        PolicyRule {
            id: "block_unsafe_content".to_owned(),
            category: PolicyCategory::Safety,
            priority: 100,
            matcher: RuleMatcher::keywords([
                "porn", "gambling", "casino", "scam", "phishing", "xxx", "betting",
            ]),
            reason: "Content detected as potentially unsafe (Pornography/Gambling/Scam)."
                .to_owned(),
            alternative: Some("Navigate to safe, verified domains.".to_owned()),
        },
        PolicyRule {
            id: "block_tracking".to_owned(),
            category: PolicyCategory::Privacy,
            priority: 200,
            matcher: RuleMatcher::trackers([
                "google-analytics",
                "facebook.com/tr",
                "hotjar",
                "segment.io",
            ]),
            reason: "Third-party tracking or profiling script detected.".to_owned(),
            alternative: Some(
                "Use privacy-preserving alternatives or local processing.".to_owned(),
            ),
        },
        PolicyRule {
            id: "block_ads".to_owned(),
            category: PolicyCategory::Monetization,
            priority: 300,
            matcher: RuleMatcher::Advertisement,
            reason: "Behavioral advertising is prohibited.".to_owned(),
            alternative: Some("Contextual, non-tracking suggestions only.".to_owned()),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trailgate_protocol::{ContentKind, OsActionType, OsIntent};

    fn navigate(url: &str) -> GatedAction {
        GatedAction::Navigate {
            url: url.to_owned(),
        }
    }

    #[test]
    fn clean_navigation_is_approved() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let verdict = layer.evaluate_traced(&navigate("https://docs.rs"));
        assert_eq!(verdict.outcome, PolicyOutcome::Approved);
        assert_eq!(verdict.checks.len(), 3);
        assert!(verdict.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn casino_in_os_payload_is_blocked_as_safety() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let intent = OsIntent::new(OsActionType::FileWrite, "/tmp/notes.txt", Utc::now())
            .with_payload("content", "visit the CASINO tonight");
        let outcome = layer.evaluate(&GatedAction::Os { intent });
        match outcome {
            PolicyOutcome::Blocked {
                rule_id,
                category,
                reason,
                alternative,
            } => {
                assert_eq!(rule_id, "block_unsafe_content");
                assert_eq!(category, PolicyCategory::Safety);
                assert!(reason.starts_with("[Policy: safety]"));
                assert!(alternative.is_some());
            }
            PolicyOutcome::Approved => panic!("casino content must be blocked"),
        }
    }

    #[test]
    fn delegate_agent_id_is_keyword_checked() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let outcome = layer.evaluate(&GatedAction::AgentDelegation {
            delegate_agent_id: "casino-bot".into(),
            instruction: "summarize the news".into(),
        });
        assert!(
            matches!(outcome, PolicyOutcome::Blocked { ref rule_id, .. } if rule_id == "block_unsafe_content")
        );

        let clean = layer.evaluate(&GatedAction::AgentDelegation {
            delegate_agent_id: "researcher".into(),
            instruction: "summarize the news".into(),
        });
        assert_eq!(clean, PolicyOutcome::Approved);
    }

    #[test]
    fn tracker_urls_only_count_for_outbound_actions() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let call = GatedAction::NetworkCall {
            url: "https://www.google-analytics.com/collect".to_owned(),
            method: "POST".to_owned(),
        };
        assert!(matches!(
            layer.evaluate(&call),
            PolicyOutcome::Blocked {
                category: PolicyCategory::Privacy,
                ..
            }
        ));

        let link = navigate("https://www.google-analytics.com/about");
        assert_eq!(layer.evaluate(&link), PolicyOutcome::Approved);
    }

    #[test]
    fn advertisements_are_blocked() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let ad = GatedAction::RenderContent {
            kind: ContentKind::Advertisement,
            body: "new shoes".to_owned(),
        };
        assert!(matches!(
            layer.evaluate(&ad),
            PolicyOutcome::Blocked {
                category: PolicyCategory::Monetization,
                ..
            }
        ));
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let ad = GatedAction::AdInsertion {
            placement: "betting banner".to_owned(),
        };
        let verdict = layer.evaluate_traced(&ad);
        assert!(matches!(
            verdict.outcome,
            PolicyOutcome::Blocked {
                category: PolicyCategory::Safety,
                ..
            }
        ));
        assert_eq!(verdict.checks.len(), 1);
    }

    #[test]
    fn priority_orders_rules_regardless_of_insertion() {
        let mut layer = SafetyPolicyLayer::with_default_rules();
        layer.add_rule(PolicyRule {
            id: "sovereign_ads_first".to_owned(),
            category: PolicyCategory::Sovereignty,
            priority: 10,
            matcher: RuleMatcher::Advertisement,
            reason: "Ads are never rendered.".to_owned(),
            alternative: None,
        });
        let ids: Vec<_> = layer.rules().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "sovereign_ads_first",
                "block_unsafe_content",
                "block_tracking",
                "block_ads"
            ]
        );

        let ad = GatedAction::AdInsertion {
            placement: "betting banner".to_owned(),
        };
        assert!(matches!(
            layer.evaluate(&ad),
            PolicyOutcome::Blocked {
                category: PolicyCategory::Sovereignty,
                ..
            }
        ));
    }

    #[test]
    fn equal_priorities_keep_insertion_order() {
        let mut layer = SafetyPolicyLayer::new();
        for id in ["a", "b", "c"] {
            layer.add_rule(PolicyRule {
                id: id.to_owned(),
                category: PolicyCategory::Safety,
                priority: 0,
                matcher: RuleMatcher::keywords(["x"]),
                reason: id.to_owned(),
                alternative: None,
            });
        }
        let ids: Vec<_> = layer.rules().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn custom_matcher_and_replacement_by_id() {
        let mut layer = SafetyPolicyLayer::new();
        layer.add_rule(PolicyRule {
            id: "no_delegation".to_owned(),
            category: PolicyCategory::Sovereignty,
            priority: 1,
            matcher: RuleMatcher::Custom(Arc::new(|action: &GatedAction| {
                matches!(action, GatedAction::AgentDelegation { .. })
            })),
            reason: "Delegation disabled.".to_owned(),
            alternative: None,
        });
        let delegation = GatedAction::AgentDelegation {
            delegate_agent_id: "helper".to_owned(),
            instruction: "summarize".to_owned(),
        };
        assert!(layer.evaluate(&delegation).is_blocked());

        layer.add_rule(PolicyRule {
            id: "no_delegation".to_owned(),
            category: PolicyCategory::Sovereignty,
            priority: 1,
            matcher: RuleMatcher::Custom(Arc::new(|_: &GatedAction| false)),
            reason: "Delegation enabled.".to_owned(),
            alternative: None,
        });
        assert_eq!(layer.rules().count(), 1);
        assert!(!layer.evaluate(&delegation).is_blocked());
    }

    #[test]
    fn blocked_outcome_serializes_with_camel_case_fields() {
        let layer = SafetyPolicyLayer::with_default_rules();
        let outcome = layer.evaluate(&navigate("https://scam.example"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["type"], "blocked");
        assert_eq!(json["ruleId"], "block_unsafe_content");
        assert_eq!(json["category"], "safety");
    }
}
