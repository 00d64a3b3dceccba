//! Domain types and pure logic for the photoforge generation pipeline.
//!
//! Template loading, graph normalization and parameter binding, the job
//! lifecycle, the shared error taxonomy, and the [`backend::BackendAdapter`]
//! contract that provider crates implement.

pub mod asset_cache;
pub mod backend;
pub mod binder;
pub mod error;
pub mod feature;
pub mod graph;
pub mod hashing;
pub mod job;
pub mod node_catalog;
pub mod template;
pub mod throttle;
pub mod types;
