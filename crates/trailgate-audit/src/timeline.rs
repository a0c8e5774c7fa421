//! Pure aggregation of decisions, executions, and memory audits into one
//! time-ordered timeline.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Value, json};
use trailgate_protocol::{
    AuditEventSource, AuditEventType, AuditRecord, AuditTimelineEvent, DecisionOutcome,
    DecisionTrace, ExecutionStatus, MemoryAuditLog, MemoryOperation, OsExecutionAuditEvent,
    TimelineStats,
};

/// Merges the three streams and sorts ascending by timestamp.
///
/// The sort is stable, so events sharing a millisecond keep the input order
/// executions, then decisions, then memory revocations.
pub fn build_timeline(
    decisions: &[DecisionTrace],
    executions: &[OsExecutionAuditEvent],
    memory_audits: &[MemoryAuditLog],
) -> Vec<AuditTimelineEvent> {
    let mut events: Vec<AuditTimelineEvent> = executions
        .iter()
        .map(map_execution)
        .chain(decisions.iter().map(map_decision))
        .chain(
            memory_audits
                .iter()
                .enumerate()
                .filter_map(|(idx, log)| map_revocation(log, idx)),
        )
        .collect();
    events.sort_by_key(|event| event.timestamp);
    events
}

/// Timeline over an interleaved record log.
///
/// Events sharing a millisecond keep the order they were recorded in.
/// Revocation ids count memory audits in log order, as [`build_timeline`]
/// does over its memory slice. Context records carry no timeline entry.
pub fn timeline_from_records(records: &[AuditRecord]) -> Vec<AuditTimelineEvent> {
    let mut memory_idx = 0;
    let mut events: Vec<AuditTimelineEvent> = records
        .iter()
        .filter_map(|record| match record {
            AuditRecord::Execution(event) => Some(map_execution(event)),
            AuditRecord::Decision(trace) => Some(map_decision(trace)),
            AuditRecord::Memory(log) => {
                let idx = memory_idx;
                memory_idx += 1;
                map_revocation(log, idx)
            }
            AuditRecord::Context(_) => None,
        })
        .collect();
    events.sort_by_key(|event| event.timestamp);
    events
}

/// Keeps events whose type is listed. An empty list keeps nothing.
pub fn filter_by_type(
    events: &[AuditTimelineEvent],
    types: &[AuditEventType],
) -> Vec<AuditTimelineEvent> {
    let wanted: HashSet<AuditEventType> = types.iter().copied().collect();
    events
        .iter()
        .filter(|event| wanted.contains(&event.event_type))
        .cloned()
        .collect()
}

/// Inclusive on both ends, epoch milliseconds.
pub fn slice_by_range(events: &[AuditTimelineEvent], from: i64, to: i64) -> Vec<AuditTimelineEvent> {
    events
        .iter()
        .filter(|event| event.timestamp >= from && event.timestamp <= to)
        .cloned()
        .collect()
}

pub fn summarize(events: &[AuditTimelineEvent]) -> TimelineStats {
    events
        .iter()
        .fold(TimelineStats::default(), |mut stats, event| {
            match event.event_type {
                AuditEventType::Decision => stats.decisions += 1,
                AuditEventType::Execution => stats.executions += 1,
                AuditEventType::Block => stats.blocks += 1,
                AuditEventType::Revocation => stats.revocations += 1,
            }
            stats
        })
}

fn map_execution(event: &OsExecutionAuditEvent) -> AuditTimelineEvent {
    let event_type = if event.status == ExecutionStatus::Success {
        AuditEventType::Execution
    } else {
        AuditEventType::Block
    };

    let mut details = BTreeMap::new();
    details.insert("action".to_owned(), json!(event.action));
    details.insert("target".to_owned(), json!(event.target));
    details.insert("status".to_owned(), json!(event.status));
    details.insert("contextId".to_owned(), json!(event.context_id));
    details.insert("metadata".to_owned(), json!(event.metadata));

    AuditTimelineEvent {
        id: event.id.as_str().to_owned(),
        event_type,
        source: AuditEventSource::Os,
        timestamp: event.timestamp.timestamp_millis(),
        details,
    }
}

fn map_decision(trace: &DecisionTrace) -> AuditTimelineEvent {
    let event_type = if trace.outcome == DecisionOutcome::Blocked {
        AuditEventType::Block
    } else {
        AuditEventType::Decision
    };

    let mut details = BTreeMap::new();
    details.insert("intent".to_owned(), json!(trace.intent));
    details.insert("outcome".to_owned(), json!(trace.outcome));
    details.insert("confidence".to_owned(), json!(trace.confidence));
    details.insert("policyChecks".to_owned(), json!(trace.policy_checks));

    AuditTimelineEvent {
        id: trace.decision_id.as_str().to_owned(),
        event_type,
        source: AuditEventSource::Kernel,
        timestamp: trace.timestamp.timestamp_millis(),
        details,
    }
}

// Non-revoke memory operations are not security relevant and are dropped.
fn map_revocation(log: &MemoryAuditLog, idx: usize) -> Option<AuditTimelineEvent> {
    if log.operation != MemoryOperation::Revoke {
        return None;
    }
    let timestamp = log.timestamp.timestamp_millis();

    let mut details = BTreeMap::new();
    details.insert("target".to_owned(), json!(log.target));
    details.insert("initiator".to_owned(), json!(log.initiator));
    details.insert("success".to_owned(), Value::Bool(log.success));

    Some(AuditTimelineEvent {
        id: format!("revoke-{idx}-{timestamp}"),
        event_type: AuditEventType::Revocation,
        source: AuditEventSource::Memory,
        timestamp,
        details,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use trailgate_protocol::{
        AuditEventId, DecisionId, ExecutionContextId, OsActionType, PolicyCheck,
    };

    fn at(millis: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(millis).single().unwrap()
    }

    fn execution(id: &str, millis: i64, status: ExecutionStatus) -> OsExecutionAuditEvent {
        OsExecutionAuditEvent {
            id: AuditEventId::from_string(id),
            timestamp: at(millis),
            action: OsActionType::FileOpen,
            target: "/tmp/report.txt".into(),
            status,
            user_id: None,
            context_id: ExecutionContextId::Local,
            metadata: BTreeMap::new(),
        }
    }

    fn decision(id: &str, millis: i64, outcome: DecisionOutcome) -> DecisionTrace {
        DecisionTrace {
            decision_id: DecisionId::from_string(id),
            timestamp: at(millis),
            intent: "navigate".into(),
            inputs: BTreeMap::new(),
            outcome,
            confidence: 1.0,
            policy_checks: vec![PolicyCheck {
                policy_name: "block_ads".into(),
                passed: true,
                reason: None,
            }],
        }
    }

    fn memory(millis: i64, operation: MemoryOperation) -> MemoryAuditLog {
        MemoryAuditLog {
            operation,
            target: "scope:session".into(),
            initiator: "user".into(),
            timestamp: at(millis),
            success: true,
        }
    }

    #[test]
    fn maps_statuses_and_outcomes_to_types() {
        let events = build_timeline(
            &[
                decision("dec-1", 10, DecisionOutcome::Approved),
                decision("dec-2", 20, DecisionOutcome::Blocked),
            ],
            &[
                execution("exec-1", 30, ExecutionStatus::Success),
                execution("exec-2", 40, ExecutionStatus::Failure),
                execution("exec-3", 50, ExecutionStatus::Cancelled),
            ],
            &[memory(60, MemoryOperation::Revoke)],
        );

        let types: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            types,
            vec![
                AuditEventType::Decision,
                AuditEventType::Block,
                AuditEventType::Execution,
                AuditEventType::Block,
                AuditEventType::Block,
                AuditEventType::Revocation,
            ]
        );
        assert_eq!(events[5].id, "revoke-0-60");
        assert_eq!(events[5].source, AuditEventSource::Memory);
        assert_eq!(events[2].details["contextId"], "local");
        assert_eq!(events[1].details["policyChecks"][0]["policyName"], "block_ads");
    }

    #[test]
    fn output_is_sorted_for_any_input_order() {
        let decisions = [
            decision("dec-a", 500, DecisionOutcome::Approved),
            decision("dec-b", 5, DecisionOutcome::Revoked),
        ];
        let executions = [
            execution("exec-a", 300, ExecutionStatus::Success),
            execution("exec-b", 1, ExecutionStatus::Failure),
        ];
        let audits = [
            memory(900, MemoryOperation::Revoke),
            memory(2, MemoryOperation::Revoke),
        ];

        let forward = build_timeline(&decisions, &executions, &audits);
        let mut reversed_decisions = decisions.clone();
        reversed_decisions.reverse();
        let mut reversed_executions = executions.clone();
        reversed_executions.reverse();
        let backward = build_timeline(&reversed_decisions, &reversed_executions, &audits);

        for events in [forward, backward] {
            assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
            assert_eq!(events.len(), 6);
        }
    }

    #[test]
    fn non_revoke_memory_operations_are_dropped() {
        let events = build_timeline(
            &[],
            &[],
            &[
                memory(1, MemoryOperation::Read),
                memory(2, MemoryOperation::Write),
                memory(3, MemoryOperation::Revoke),
                memory(4, MemoryOperation::Delete),
            ],
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "revoke-2-3");
    }

    #[test]
    fn record_log_ties_keep_recording_order() {
        let records = [
            AuditRecord::Memory(memory(5, MemoryOperation::Read)),
            AuditRecord::Decision(decision("dec-1", 10, DecisionOutcome::Approved)),
            AuditRecord::Execution(execution("exec-1", 10, ExecutionStatus::Success)),
            AuditRecord::Memory(memory(10, MemoryOperation::Revoke)),
            AuditRecord::Decision(decision("dec-0", 3, DecisionOutcome::Approved)),
        ];
        let events = timeline_from_records(&records);
        let ids: Vec<_> = events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["dec-0", "dec-1", "exec-1", "revoke-1-10"]);
    }

    #[test]
    fn filter_slice_and_summarize() {
        let events = build_timeline(
            &[decision("dec-1", 10, DecisionOutcome::Blocked)],
            &[
                execution("exec-1", 20, ExecutionStatus::Success),
                execution("exec-2", 30, ExecutionStatus::Success),
            ],
            &[memory(40, MemoryOperation::Revoke)],
        );

        let executions = filter_by_type(&events, &[AuditEventType::Execution]);
        assert_eq!(executions.len(), 2);
        assert!(filter_by_type(&events, &[]).is_empty());

        let window = slice_by_range(&events, 10, 30);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].timestamp, 10);
        assert_eq!(window[2].timestamp, 30);

        assert_eq!(
            summarize(&events),
            TimelineStats {
                decisions: 0,
                executions: 2,
                blocks: 1,
                revocations: 1,
            }
        );
    }
}
