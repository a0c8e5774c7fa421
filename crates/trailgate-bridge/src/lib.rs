//! The execution choke point and the pieces it is assembled from.
//!
//! - [`ExecutionBridge`] re-checks every precondition and audits each call
//! - [`KillSwitch`] / [`KillSwitchController`] halt all execution at once
//! - [`ActionCatalog`] maps action types to permission and risk
//! - [`ConfirmationVerifier`] and [`EffectRunner`] are the replaceable seams

mod bridge;
mod catalog;
mod effects;
mod kill_switch;
mod verifier;

pub use bridge::{ExecutionBridge, ExecutionOptions};
pub use catalog::ActionCatalog;
pub use effects::{DEFAULT_SIMULATED_LATENCY, EffectRunner, SimulatedEffectRunner};
pub use kill_switch::{
    KILL_SWITCH_TARGET, KillSwitch, KillSwitchController, KillSwitchOptions, KillSwitchResult,
};
pub use verifier::{ConfirmationVerifier, OpaqueTokenVerifier, TokenRejection};
