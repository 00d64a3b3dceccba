use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use photoforge_cloud::fal::FalConfig;
use photoforge_cloud::replicate::ReplicateConfig;
use photoforge_cloud::runpod::RunPodConfig;
use photoforge_cloud::stability::StabilityConfig;
use photoforge_comfyui::resolver::{DEFAULT_CANDIDATE_TEMPLATE, DEFAULT_RECHECK_INTERVAL};
use photoforge_comfyui::tunnel::DEFAULT_TUNNEL_PATTERN;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be set when GENERATION_BACKEND={backend}")]
    Missing {
        var: &'static str,
        backend: &'static str,
    },

    #[error("{var} has an invalid value '{value}'")]
    Invalid { var: &'static str, value: String },

    #[error("Unknown GENERATION_BACKEND '{0}'")]
    UnknownBackend(String),
}

/// Which adapter this deployment drives, with its provider settings.
#[derive(Debug, Clone)]
pub enum BackendConfig {
    ComfyUI { timeout: Duration },
    RunPod(RunPodConfig),
    Replicate(ReplicateConfig),
    Fal(FalConfig),
    Stability(StabilityConfig),
    DryRun,
}

impl BackendConfig {
    pub fn name(&self) -> &'static str {
        match self {
            BackendConfig::ComfyUI { .. } => "comfyui",
            BackendConfig::RunPod(_) => "runpod",
            BackendConfig::Replicate(_) => "replicate",
            BackendConfig::Fal(_) => "fal",
            BackendConfig::Stability(_) => "stability",
            BackendConfig::DryRun => "dryrun",
        }
    }
}

/// Endpoint discovery settings for the self-hosted ComfyUI backend.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub registry_path: PathBuf,
    pub tunnel_log_path: Option<PathBuf>,
    pub tunnel_url_pattern: String,
    pub candidates: Vec<String>,
    pub candidate_template: String,
    pub recheck_interval: Duration,
    pub probe_timeout: Duration,
}

/// Server configuration loaded from environment variables.
///
/// All fields except the provider credentials have defaults suitable for
/// local development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `120`).
    pub request_timeout_secs: u64,
    /// Largest accepted multipart body (default: 20 MiB).
    pub max_upload_bytes: usize,
    /// Directory of `<name>.json` workflow templates.
    pub template_dir: PathBuf,
    pub backend: BackendConfig,
    /// Shared secret for the registration webhook. Registration is refused
    /// while unset.
    pub registration_secret: Option<String>,
    pub endpoint: EndpointConfig,
    /// Minimum gap between two submissions from one user.
    pub submission_min_interval: Duration,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                              |
    /// |--------------------------------|--------------------------------------|
    /// | `HOST`                         | `0.0.0.0`                            |
    /// | `PORT`                         | `3000`                               |
    /// | `CORS_ORIGINS`                 | `http://localhost:5173`              |
    /// | `REQUEST_TIMEOUT_SECS`         | `120`                                |
    /// | `MAX_UPLOAD_BYTES`             | `20971520`                           |
    /// | `TEMPLATE_DIR`                 | `./templates`                        |
    /// | `GENERATION_BACKEND`           | `comfyui`                            |
    /// | `REGISTRATION_SECRET`          | unset (webhook disabled)             |
    /// | `ENDPOINT_REGISTRY_PATH`       | `./data/endpoint.json`               |
    /// | `TUNNEL_LOG_PATH`              | unset                                |
    /// | `TUNNEL_URL_PATTERN`           | trycloudflare URL regex              |
    /// | `ENDPOINT_CANDIDATES`          | empty                                |
    /// | `ENDPOINT_CANDIDATE_TEMPLATE`  | `https://{name}.trycloudflare.com`   |
    /// | `ENDPOINT_RECHECK_SECS`        | `30`                                 |
    /// | `ENDPOINT_PROBE_TIMEOUT_SECS`  | `5`                                  |
    /// | `SUBMISSION_MIN_INTERVAL_SECS` | `10`                                 |
    /// | `COMFYUI_TIMEOUT_SECS`         | `600`                                |
    ///
    /// Provider credentials are required only for the selected backend:
    /// `RUNPOD_API_KEY` + `RUNPOD_ENDPOINT_ID`, `REPLICATE_API_TOKEN` +
    /// `REPLICATE_VERSION`, `FAL_KEY` + `FAL_APP`, `STABILITY_API_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`ServerConfig::from_env`] but reads variables through
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let endpoint = EndpointConfig {
            registry_path: env.or("ENDPOINT_REGISTRY_PATH", "./data/endpoint.json").into(),
            tunnel_log_path: env.get("TUNNEL_LOG_PATH").map(PathBuf::from),
            tunnel_url_pattern: env.or("TUNNEL_URL_PATTERN", DEFAULT_TUNNEL_PATTERN),
            candidates: env.list("ENDPOINT_CANDIDATES"),
            candidate_template: env.or("ENDPOINT_CANDIDATE_TEMPLATE", DEFAULT_CANDIDATE_TEMPLATE),
            recheck_interval: Duration::from_secs(
                env.parse("ENDPOINT_RECHECK_SECS", DEFAULT_RECHECK_INTERVAL.as_secs())?,
            ),
            probe_timeout: Duration::from_secs(env.parse("ENDPOINT_PROBE_TIMEOUT_SECS", 5)?),
        };

        let cors_origins = match env.get("CORS_ORIGINS") {
            Some(_) => env.list("CORS_ORIGINS"),
            None => vec!["http://localhost:5173".to_string()],
        };

        Ok(Self {
            host: env.or("HOST", "0.0.0.0"),
            port: env.parse("PORT", 3000)?,
            cors_origins,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 120)?,
            max_upload_bytes: env.parse("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?,
            template_dir: env.or("TEMPLATE_DIR", "./templates").into(),
            backend: backend_from_env(&env)?,
            registration_secret: env.get("REGISTRATION_SECRET"),
            endpoint,
            submission_min_interval: Duration::from_secs(
                env.parse("SUBMISSION_MIN_INTERVAL_SECS", 10)?,
            ),
        })
    }
}

fn backend_from_env<F>(env: &Env<F>) -> Result<BackendConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let selected = env.or("GENERATION_BACKEND", "comfyui").to_ascii_lowercase();
    let backend = match selected.as_str() {
        "comfyui" => BackendConfig::ComfyUI {
            timeout: Duration::from_secs(env.parse("COMFYUI_TIMEOUT_SECS", 600)?),
        },
        "runpod" => BackendConfig::RunPod(RunPodConfig::new(
            env.required("RUNPOD_ENDPOINT_ID", "runpod")?,
            env.required("RUNPOD_API_KEY", "runpod")?,
        )),
        "replicate" => BackendConfig::Replicate(ReplicateConfig::new(
            env.required("REPLICATE_API_TOKEN", "replicate")?,
            env.required("REPLICATE_VERSION", "replicate")?,
        )),
        "fal" => BackendConfig::Fal(FalConfig::new(
            env.required("FAL_APP", "fal")?,
            env.required("FAL_KEY", "fal")?,
        )),
        "stability" => {
            BackendConfig::Stability(StabilityConfig::new(env.required("STABILITY_API_KEY", "stability")?))
        }
        "dryrun" => BackendConfig::DryRun,
        _ => return Err(ConfigError::UnknownBackend(selected)),
    };
    Ok(backend)
}

/// Variable reader; blank values count as unset.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, var: &str) -> Option<String> {
        (self.0)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, var: &str, default: &str) -> String {
        self.get(var).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, var: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(var) {
            Some(value) => value
                .parse()
                .map_err(|_| ConfigError::Invalid { var, value }),
            None => Ok(default),
        }
    }

    fn required(&self, var: &'static str, backend: &'static str) -> Result<String, ConfigError> {
        self.get(var).ok_or(ConfigError::Missing { var, backend })
    }

    fn list(&self, var: &str) -> Vec<String> {
        self.get(var)
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}
