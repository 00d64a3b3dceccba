//! Request handlers.
//!
//! Handlers delegate to the [`JobOrchestrator`](photoforge_pipeline::orchestrator::JobOrchestrator)
//! or the endpoint resolver and map failures via [`AppError`](crate::error::AppError).

pub mod endpoint;
pub mod generation;
