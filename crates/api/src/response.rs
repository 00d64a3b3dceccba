//! Shared response envelope types for API handlers.
//!
//! JSON responses use a `{ "data": ... }` envelope. `/health` and raw image
//! downloads are the exceptions.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
