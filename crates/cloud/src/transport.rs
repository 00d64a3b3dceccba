//! HTTP plumbing shared by the hosted-provider adapters.
//!
//! Every adapter maps transport and status failures through the helpers
//! here so the error taxonomy stays identical across providers.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use photoforge_core::error::GenerationError;
use serde_json::Value;

/// Longest slice of an error body carried into an error message.
const MAX_BODY_IN_ERROR: usize = 512;

/// Upper bound for a single provider request.
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-request timeout for an adapter whose whole job may take `budget`.
pub fn request_timeout(budget: Duration) -> Duration {
    budget.min(MAX_REQUEST_TIMEOUT)
}

/// Classify a failed request.
pub(crate) fn request_error(provider: &str, err: reqwest::Error) -> GenerationError {
    if err.is_decode() {
        GenerationError::ProviderRejected(format!("Malformed response from {provider}"))
    } else {
        GenerationError::ConnectionUnavailable(format!("{provider}: {err}"))
    }
}

/// Pass 2xx responses through; map everything else onto the taxonomy.
pub(crate) async fn ensure_success(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let code = status.as_u16();
    let body = response.text().await.unwrap_or_default();
    let body = truncate(&body, MAX_BODY_IN_ERROR);

    Err(match code {
        401 | 403 => GenerationError::ProviderRejected(format!("{provider} rejected the credentials")),
        429 | 502..=504 | 530 => {
            GenerationError::ConnectionUnavailable(format!("{provider} returned {code}"))
        }
        _ => GenerationError::ProviderRejected(format!("{provider} returned {code}: {body}")),
    })
}

/// Check the status, then decode the body as JSON.
pub(crate) async fn read_json(
    provider: &str,
    response: reqwest::Response,
) -> Result<Value, GenerationError> {
    ensure_success(provider, response)
        .await?
        .json::<Value>()
        .await
        .map_err(|e| request_error(provider, e))
}

/// Resolve an image reference into bytes: an http(s) URL is downloaded, a
/// data URI or bare base64 string is decoded.
pub(crate) async fn load_image(
    client: &reqwest::Client,
    provider: &str,
    reference: &str,
    timeout: Duration,
) -> Result<Vec<u8>, GenerationError> {
    let reference = reference.trim();
    if reference.starts_with("http://") || reference.starts_with("https://") {
        let response = client
            .get(reference)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(provider, e))?;
        let response = ensure_success(provider, response).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| request_error(provider, e))?;
        return Ok(bytes.to_vec());
    }
    decode_inline(provider, reference)
}

/// `data:{mime};base64,{payload}` for inline uploads.
pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", BASE64.encode(bytes))
}

pub(crate) fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

fn decode_inline(provider: &str, reference: &str) -> Result<Vec<u8>, GenerationError> {
    let payload = match reference.strip_prefix("data:") {
        Some(rest) => rest
            .split_once(',')
            .map(|(_, payload)| payload)
            .unwrap_or_default(),
        None => reference,
    };
    if payload.is_empty() {
        return Err(GenerationError::OutputMissing);
    }
    BASE64.decode(payload).map_err(|_| {
        GenerationError::ProviderRejected(format!("{provider} returned an undecodable image"))
    })
}

/// Collect image URLs (or inline images) from a loosely-shaped output
/// value, in document order, without duplicates.
pub(crate) fn extract_image_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if !trimmed.is_empty() && !out.iter().any(|existing| existing == trimmed) {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_image_refs(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "data", "image", "images", "message", "output"] {
                if let Some(nested) = obj.get(key) {
                    extract_image_refs(nested, out);
                }
            }
        }
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
pub(crate) async fn serve(app: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}
