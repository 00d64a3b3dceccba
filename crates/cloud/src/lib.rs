//! Hosted-provider backend adapters.
//!
//! Each module implements [`photoforge_core::backend::BackendAdapter`] for one
//! provider's wire protocol. Provider status strings and failures are mapped
//! onto the shared job lifecycle and error taxonomy inside the adapter.

pub mod dryrun;
pub mod fal;
pub mod replicate;
pub mod runpod;
pub mod stability;
pub mod transport;
