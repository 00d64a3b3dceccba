//! Liveness probing of candidate backend addresses.

use std::time::Duration;

use async_trait::async_trait;

/// Default per-probe timeout.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Answers "is something alive at this address right now".
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_alive(&self, address: &str) -> bool;
}

/// Probes `GET {address}/system_stats`, which every ComfyUI server answers
/// without side effects.
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new(reqwest::Client::new(), DEFAULT_PROBE_TIMEOUT)
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn is_alive(&self, address: &str) -> bool {
        let url = format!("{}/system_stats", address.trim_end_matches('/'));
        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!(address, status = %resp.status(), "Probe got non-success status");
                false
            }
            Err(e) => {
                tracing::debug!(address, error = %e, "Probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::get;
    use axum::Router;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn live_server_is_alive() {
        let app = Router::new().route("/system_stats", get(|| async { "{}" }));
        let addr = serve(app).await;
        assert!(HttpProbe::default().is_alive(&addr).await);
        assert!(HttpProbe::default().is_alive(&format!("{addr}/")).await);
    }

    #[tokio::test]
    async fn error_status_is_dead() {
        let app = Router::new().route(
            "/system_stats",
            get(|| async { (axum::http::StatusCode::BAD_GATEWAY, "tunnel down") }),
        );
        let addr = serve(app).await;
        assert!(!HttpProbe::default().is_alive(&addr).await);
    }

    #[tokio::test]
    async fn closed_port_is_dead() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let probe = HttpProbe::new(reqwest::Client::new(), Duration::from_secs(1));
        assert!(!probe.is_alive(&format!("http://{addr}")).await);
    }
}
