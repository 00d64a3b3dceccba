//! Startup wiring: turns [`ServerConfig`] into a ready [`JobOrchestrator`].

use std::sync::Arc;
use std::time::Duration;

use photoforge_cloud::dryrun::DryRunAdapter;
use photoforge_cloud::fal::FalAdapter;
use photoforge_cloud::replicate::ReplicateAdapter;
use photoforge_cloud::runpod::RunPodAdapter;
use photoforge_cloud::stability::StabilityAdapter;
use photoforge_comfyui::adapter::ComfyUIAdapter;
use photoforge_comfyui::probe::HttpProbe;
use photoforge_comfyui::registry::FileRegistry;
use photoforge_comfyui::resolver::{EndpointResolver, ResolverConfig};
use photoforge_comfyui::tunnel::TunnelLogScanner;
use photoforge_core::backend::BackendAdapter;
use photoforge_core::error::CoreError;
use photoforge_core::feature::FeatureCatalog;
use photoforge_core::template::TemplateStore;
use photoforge_pipeline::orchestrator::JobOrchestrator;

use crate::config::{BackendConfig, EndpointConfig, ServerConfig};

/// Ceiling for TCP and TLS setup against any backend.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Load templates and construct the orchestrator for the selected backend.
///
/// A resolver is attached only when the adapter needs a self-hosted
/// endpoint.
pub fn build_orchestrator(config: &ServerConfig) -> Result<JobOrchestrator, CoreError> {
    let templates = TemplateStore::load_dir(&config.template_dir)?;
    tracing::info!(
        dir = %config.template_dir.display(),
        count = templates.len(),
        "Templates loaded",
    );

    let client = http_client()?;
    let adapter = build_adapter(&config.backend, client.clone());
    let mut orchestrator =
        JobOrchestrator::new(templates, FeatureCatalog::default(), Arc::clone(&adapter));

    if adapter.requires_endpoint() {
        let resolver = build_resolver(&config.endpoint, client)?;
        orchestrator = orchestrator.with_resolver(Arc::new(resolver));
    }

    tracing::info!(backend = adapter.name(), "Generation backend ready");
    Ok(orchestrator)
}

/// Shared HTTP client. Adapters bound each request themselves; the client
/// only caps connection setup.
pub fn http_client() -> Result<reqwest::Client, CoreError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| CoreError::Internal(format!("Failed to build HTTP client: {e}")))
}

pub fn build_adapter(backend: &BackendConfig, client: reqwest::Client) -> Arc<dyn BackendAdapter> {
    match backend {
        BackendConfig::ComfyUI { timeout } => Arc::new(ComfyUIAdapter::new(client, *timeout)),
        BackendConfig::RunPod(cfg) => Arc::new(RunPodAdapter::new(client, cfg.clone())),
        BackendConfig::Replicate(cfg) => Arc::new(ReplicateAdapter::new(client, cfg.clone())),
        BackendConfig::Fal(cfg) => Arc::new(FalAdapter::new(client, cfg.clone())),
        BackendConfig::Stability(cfg) => Arc::new(StabilityAdapter::new(client, cfg.clone())),
        BackendConfig::DryRun => Arc::new(DryRunAdapter::new()),
    }
}

/// Resolver backed by the on-disk registry and HTTP liveness probes, with
/// tunnel-log introspection when a log path is configured.
pub fn build_resolver(
    endpoint: &EndpointConfig,
    client: reqwest::Client,
) -> Result<EndpointResolver, CoreError> {
    let config = ResolverConfig {
        recheck_interval: endpoint.recheck_interval,
        candidates: endpoint.candidates.clone(),
        candidate_template: endpoint.candidate_template.clone(),
    };
    let registry = Arc::new(FileRegistry::new(endpoint.registry_path.clone()));
    let probe = Arc::new(HttpProbe::new(client, endpoint.probe_timeout));
    let mut resolver = EndpointResolver::new(config, registry, probe);

    if let Some(path) = &endpoint.tunnel_log_path {
        let scanner = TunnelLogScanner::new(path.clone(), &endpoint.tunnel_url_pattern)
            .map_err(|e| CoreError::Validation(format!("Invalid TUNNEL_URL_PATTERN: {e}")))?;
        resolver = resolver.with_tunnel_scanner(scanner);
    }
    Ok(resolver)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    fn endpoint_config(dir: &std::path::Path) -> EndpointConfig {
        EndpointConfig {
            registry_path: dir.join("endpoint.json"),
            tunnel_log_path: None,
            tunnel_url_pattern: photoforge_comfyui::tunnel::DEFAULT_TUNNEL_PATTERN.to_string(),
            candidates: Vec::new(),
            candidate_template: "https://{name}.example.net".to_string(),
            recheck_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn adapter_matches_selected_backend() {
        let client = http_client().unwrap();
        let comfy = build_adapter(
            &BackendConfig::ComfyUI {
                timeout: Duration::from_secs(5),
            },
            client.clone(),
        );
        assert_eq!(comfy.name(), "comfyui");
        assert!(comfy.requires_endpoint());

        let dry = build_adapter(&BackendConfig::DryRun, client);
        assert_eq!(dry.name(), "dryrun");
        assert!(!dry.requires_endpoint());
    }

    #[test]
    fn bad_tunnel_pattern_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut endpoint = endpoint_config(dir.path());
        endpoint.tunnel_log_path = Some(dir.path().join("tunnel.log"));
        endpoint.tunnel_url_pattern = "([unclosed".to_string();

        assert_matches!(
            build_resolver(&endpoint, reqwest::Client::new()).err(),
            Some(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn resolver_without_sources_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = build_resolver(&endpoint_config(dir.path()), reqwest::Client::new()).unwrap();
        assert_eq!(resolver.resolve().await, None);
    }
}
