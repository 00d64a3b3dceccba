//! ComfyUI REST client, endpoint discovery, and backend adapter.
//!
//! Provides typed wrappers around the ComfyUI HTTP API, the resolver that
//! tracks which tunnel address the server is reachable at, and the
//! [`adapter::ComfyUIAdapter`] the orchestrator drives.

pub mod adapter;
pub mod api;
pub mod history;
pub mod probe;
pub mod registry;
pub mod resolver;
pub mod tunnel;
