//! Execution context registry and the consent-checking router.

mod registry;
mod router;

pub use registry::ContextRegistry;
pub use router::ContextRouter;
