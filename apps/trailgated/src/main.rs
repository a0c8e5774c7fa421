use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use tracing::{info, warn};
use trailgate_bridge::KillSwitchOptions;
use trailgate_kernel::{
    AgentMemoryBinding, ExecuteRequest, GatedExecution, GatewayBuilder, MemoryScope, RevokeOptions,
};
use trailgate_policy::PolicyOutcome;
use trailgate_protocol::{
    ConsentToken, ContractTemplate, ExecutionContextId, ExecutionRequest, GatedAction,
    OsActionType, OsIntent, SessionId, TimeBounds,
};

#[derive(Debug, Parser)]
#[command(name = "trailgated")]
#[command(about = "trailgate gateway demo daemon")]
struct Cli {
    #[arg(long, default_value = ".trailgate")]
    root: PathBuf,
    #[arg(long, default_value = "developer")]
    owner: String,
    #[arg(long, default_value = "demo-session")]
    session: String,
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .compact()
            .init();
    }

    let gateway = GatewayBuilder::new()
        .audit_root(&cli.root)
        .simulated_latency(Duration::from_millis(cli.latency_ms))
        .build();
    info!(root = %cli.root.display(), owner = %cli.owner, "gateway ready");

    let mut records = gateway.subscribe();
    let record_task = tokio::spawn(async move {
        while let Ok(record) = records.recv().await {
            let rendered = serde_json::to_string(&record).unwrap_or_else(|_| "{}".to_owned());
            info!(record = %rendered, "audit.recorded");
        }
    });

    let now = Utc::now();
    let contract = gateway.issue_contract(ContractTemplate {
        context_id: ExecutionContextId::Local,
        scopes: vec!["fs".to_owned()],
        allowed_actions: vec!["file_open".to_owned(), "system_query".to_owned()],
        resource_limits: None,
        time_bounds: TimeBounds::new(now, now + ChronoDuration::minutes(15)),
        delegation: None,
    })?;

    let consent = ConsentToken::new(ExecutionContextId::Local, format!("consent:{}", cli.owner));
    let route = gateway
        .route(
            &ExecutionRequest::new(ExecutionContextId::Local, "file_open"),
            Some(&consent),
        )
        .await;
    info!(accepted = route.accepted, context = %route.context_id, "route evaluated");

    let request = ExecuteRequest {
        confirmation_token: "confirm-demo".to_owned(),
        expected_context: ExecutionContextId::Local,
        contract_id: Some(contract.id().clone()),
        workspace_id: "demo-workspace".to_owned(),
        user_id: Some(cli.owner.clone()),
    };

    let read = OsIntent::new(OsActionType::FileOpen, "/home/demo/notes.txt", Utc::now());
    report(gateway.execute_gated(&route, &read, &request).await);

    let write = OsIntent::new(OsActionType::FileWrite, "/home/demo/notes.txt", Utc::now());
    report(gateway.execute_gated(&route, &write, &request).await);

    let tracker = GatedAction::ScriptInjection {
        url: "https://www.google-analytics.com/analytics.js".to_owned(),
    };
    if let PolicyOutcome::Blocked {
        reason,
        alternative,
        ..
    } = gateway.evaluate(&tracker).await
    {
        warn!(%reason, alternative = ?alternative, "script injection vetoed");
    }

    let kill_options = KillSwitchOptions {
        session_id: SessionId::from_string(cli.session.clone()),
        context_id: ExecutionContextId::Local,
        user_id: Some(cli.owner.clone()),
        reason: Some("demo halt".to_owned()),
    };
    gateway.engage_kill_switch(kill_options.clone()).await;
    report(gateway.execute_gated(&route, &read, &request).await);
    gateway.reset_kill_switch(kill_options).await;

    let bindings = [
        AgentMemoryBinding::new("researcher", MemoryScope::Session),
        AgentMemoryBinding::new("coder", MemoryScope::Workspace),
    ];
    let revoked = gateway
        .revoke_memory_by_scope(MemoryScope::Session, &bindings, RevokeOptions::default())
        .await;
    info!(affected = revoked.affected_agent_ids.len(), "session memory revoked");
    gateway
        .revoke_contract(contract.id(), Some("demo finished".to_owned()))
        .await?;

    for event in gateway.timeline() {
        info!(
            id = %event.id,
            kind = ?event.event_type,
            source = ?event.source,
            timestamp = event.timestamp,
            "timeline"
        );
    }
    let summary = gateway.summary();
    info!(
        decisions = summary.decisions,
        executions = summary.executions,
        blocks = summary.blocks,
        revocations = summary.revocations,
        "timeline summary"
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    record_task.abort();
    if let Err(error) = record_task.await
        && !error.is_cancelled()
    {
        warn!(%error, "record task stopped");
    }

    Ok(())
}

fn report(execution: GatedExecution) {
    match execution {
        GatedExecution::Blocked(outcome) => warn!(?outcome, "vetoed by safety policy"),
        GatedExecution::Executed(result) => info!(
            status = result.status.as_str(),
            error = ?result.error,
            audit_trail_id = %result.audit_trail_id,
            hint = %result.reversible_hint,
            "execution finished"
        ),
    }
}
