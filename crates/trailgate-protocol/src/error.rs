//! Error types for gateway infrastructure.
//!
//! Gate decisions (rejected routes, policy blocks, refused executions) are
//! values, not errors. These variants cover the plumbing around them.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ids::ContractId;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("contract not found: {0}")]
    ContractNotFound(ContractId),
    #[error("invalid time bounds: start {start} is after end {end}")]
    InvalidTimeBounds {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
