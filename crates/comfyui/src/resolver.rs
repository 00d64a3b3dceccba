//! Discovers which address the self-hosted backend is reachable at.
//!
//! The backend sits behind an ephemeral tunnel whose public URL changes on
//! every restart. [`EndpointResolver::resolve`] walks a fallback chain and
//! caches the first live address for a re-check interval:
//!
//! 1. the persisted registry entry (set through the registration webhook),
//! 2. URLs recovered from the tunnel client's log, newest first,
//! 3. the last address that was confirmed live,
//! 4. a bounded scan of configured candidate names.
//!
//! Every step is liveness-probed. An address is probed at most once per
//! resolve call.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use photoforge_core::error::CoreError;

use crate::probe::LivenessProbe;
use crate::registry::{EndpointRegistry, RegisteredEndpoint};
use crate::tunnel::TunnelLogScanner;

/// Candidate scans stop after this many names.
pub const MAX_CANDIDATES: usize = 16;

pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

pub const DEFAULT_CANDIDATE_TEMPLATE: &str = "https://{name}.trycloudflare.com";

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// How long a confirmed address is trusted without re-probing.
    pub recheck_interval: Duration,
    /// Names (or full URLs) tried last, in order.
    pub candidates: Vec<String>,
    /// Expansion for bare candidate names; `{name}` is substituted.
    pub candidate_template: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
            candidates: Vec::new(),
            candidate_template: DEFAULT_CANDIDATE_TEMPLATE.to_string(),
        }
    }
}

/// A confirmed-live address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointRecord {
    pub address: String,
    pub confirmed_at: Instant,
    pub recheck_interval: Duration,
}

impl EndpointRecord {
    pub fn is_fresh(&self) -> bool {
        self.confirmed_at.elapsed() < self.recheck_interval
    }
}

#[derive(Default)]
struct ResolverState {
    current: Option<EndpointRecord>,
    last_known_good: Option<String>,
}

pub struct EndpointResolver {
    config: ResolverConfig,
    registry: Arc<dyn EndpointRegistry>,
    probe: Arc<dyn LivenessProbe>,
    tunnel: Option<TunnelLogScanner>,
    state: RwLock<ResolverState>,
}

impl EndpointResolver {
    pub fn new(
        config: ResolverConfig,
        registry: Arc<dyn EndpointRegistry>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        Self {
            config,
            registry,
            probe,
            tunnel: None,
            state: RwLock::new(ResolverState::default()),
        }
    }

    /// Enable tunnel-log introspection.
    pub fn with_tunnel_scanner(mut self, scanner: TunnelLogScanner) -> Self {
        self.tunnel = Some(scanner);
        self
    }

    /// Current reachable address, or `None` when nothing answers.
    pub async fn resolve(&self) -> Option<String> {
        if let Some(address) = self.fresh_address() {
            return Some(address);
        }

        let mut tried = HashSet::new();

        match self.registry.load().await {
            Ok(Some(record)) => {
                if let Some(address) = normalize_address(&record.address) {
                    if self.try_address(&address, &mut tried).await {
                        return Some(address);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read endpoint registry"),
        }

        if let Some(scanner) = &self.tunnel {
            for url in scanner.candidates().await {
                if self.try_address(&url, &mut tried).await {
                    return Some(url);
                }
            }
        }

        if let Some(address) = self.last_known_good() {
            if self.try_address(&address, &mut tried).await {
                return Some(address);
            }
        }

        for name in self.config.candidates.iter().take(MAX_CANDIDATES) {
            let address = self.expand_candidate(name);
            if self.try_address(&address, &mut tried).await {
                return Some(address);
            }
        }

        self.write_state().current = None;
        tracing::warn!(probed = tried.len(), "No backend endpoint reachable");
        None
    }

    /// Whether any endpoint is reachable right now.
    pub async fn is_reachable(&self) -> bool {
        self.resolve().await.is_some()
    }

    /// Persist an externally announced address and probe it.
    ///
    /// The address is stored even when the probe fails (the tunnel may come
    /// up a moment later); it is only cached once confirmed live. Returns
    /// whether the probe succeeded.
    pub async fn register(&self, address: &str) -> Result<bool, CoreError> {
        let address = normalize_address(address).ok_or_else(|| {
            CoreError::Validation(format!("Invalid endpoint address '{address}'"))
        })?;

        self.registry
            .store(&RegisteredEndpoint::now(address.clone()))
            .await
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let alive = self.probe.is_alive(&address).await;
        if alive {
            self.confirm(&address);
        }
        tracing::info!(address = %address, alive, "Endpoint registered");
        Ok(alive)
    }

    /// Forget the cached confirmation so the next resolve probes again.
    /// The address stays available as last-known-good.
    pub fn invalidate(&self) {
        let mut state = self.write_state();
        if let Some(record) = state.current.take() {
            tracing::info!(address = %record.address, "Endpoint invalidated");
            state.last_known_good = Some(record.address);
        }
    }

    pub fn snapshot(&self) -> Option<EndpointRecord> {
        self.read_state().current.clone()
    }

    // ---- private helpers ----

    async fn try_address(&self, address: &str, tried: &mut HashSet<String>) -> bool {
        if !tried.insert(address.to_string()) {
            return false;
        }
        if self.probe.is_alive(address).await {
            self.confirm(address);
            true
        } else {
            false
        }
    }

    fn confirm(&self, address: &str) {
        let mut state = self.write_state();
        let changed = state
            .current
            .as_ref()
            .is_none_or(|record| record.address != address);
        state.current = Some(EndpointRecord {
            address: address.to_string(),
            confirmed_at: Instant::now(),
            recheck_interval: self.config.recheck_interval,
        });
        state.last_known_good = Some(address.to_string());
        if changed {
            tracing::info!(address, "Endpoint confirmed");
        }
    }

    fn fresh_address(&self) -> Option<String> {
        self.read_state()
            .current
            .as_ref()
            .filter(|record| record.is_fresh())
            .map(|record| record.address.clone())
    }

    fn last_known_good(&self) -> Option<String> {
        self.read_state().last_known_good.clone()
    }

    fn expand_candidate(&self, name: &str) -> String {
        let name = name.trim();
        if name.contains("://") {
            name.trim_end_matches('/').to_string()
        } else {
            self.config.candidate_template.replace("{name}", name)
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, ResolverState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, ResolverState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Trim and strip trailing slashes; only http(s) URLs are accepted.
pub fn normalize_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let host = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))?;
    if host.is_empty() || host.contains(char::is_whitespace) {
        return None;
    }
    Some(trimmed.to_string())
}
