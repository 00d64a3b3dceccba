//! Recovers public tunnel URLs from a tunnel client's log file.

use std::io::SeekFrom;
use std::path::PathBuf;

use regex::Regex;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Only the end of the log is read; older URLs are stale anyway.
const TAIL_BYTES: u64 = 256 * 1024;

/// Default pattern for quick-tunnel URLs.
pub const DEFAULT_TUNNEL_PATTERN: &str = r"https://[a-z0-9-]+\.trycloudflare\.com";

pub struct TunnelLogScanner {
    path: PathBuf,
    pattern: Regex,
}

impl TunnelLogScanner {
    pub fn new(path: impl Into<PathBuf>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            path: path.into(),
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn with_default_pattern(path: impl Into<PathBuf>) -> Result<Self, regex::Error> {
        Self::new(path, DEFAULT_TUNNEL_PATTERN)
    }

    /// URLs found in the log tail, most recent first, without duplicates.
    ///
    /// A missing or unreadable log yields an empty list.
    pub async fn candidates(&self) -> Vec<String> {
        match self.read_tail().await {
            Ok(text) => self.extract(&text),
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "Tunnel log unreadable");
                Vec::new()
            }
        }
    }

    fn extract(&self, text: &str) -> Vec<String> {
        let mut seen = Vec::new();
        let matches: Vec<&str> = self.pattern.find_iter(text).map(|m| m.as_str()).collect();
        for url in matches.into_iter().rev() {
            let url = url.trim_end_matches('/').to_string();
            if !seen.contains(&url) {
                seen.push(url);
            }
        }
        seen
    }

    async fn read_tail(&self) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let len = file.metadata().await?.len();
        if len > TAIL_BYTES {
            file.seek(SeekFrom::Start(len - TAIL_BYTES)).await?;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
