use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, instrument};
use trailgate_protocol::{OsActionDescriptor, OsIntent};

pub const DEFAULT_SIMULATED_LATENCY: Duration = Duration::from_millis(50);

/// Performs the side effect once every gate has passed.
#[async_trait]
pub trait EffectRunner: Send + Sync {
    async fn perform(&self, intent: &OsIntent, descriptor: &OsActionDescriptor) -> Result<Value>;
}

/// Touches nothing; waits `latency` and reports what would have run.
#[derive(Debug, Clone)]
pub struct SimulatedEffectRunner {
    latency: Duration,
}

impl SimulatedEffectRunner {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

impl Default for SimulatedEffectRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SIMULATED_LATENCY)
    }
}

#[async_trait]
impl EffectRunner for SimulatedEffectRunner {
    #[instrument(skip(self, intent, descriptor), fields(action = %intent.action, target = %intent.target))]
    async fn perform(&self, intent: &OsIntent, descriptor: &OsActionDescriptor) -> Result<Value> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        debug!(risk = descriptor.risk_level.as_str(), "simulated effect performed");
        Ok(json!({
            "executed": true,
            "risk": descriptor.risk_level,
            "target": intent.target,
        }))
    }
}
