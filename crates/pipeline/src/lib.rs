//! Generation job pipeline.
//!
//! Ties the template store, parameter binder, endpoint resolver and the
//! configured backend adapter together behind [`orchestrator::JobOrchestrator`].

pub mod asset;
pub mod backoff;
pub mod orchestrator;
