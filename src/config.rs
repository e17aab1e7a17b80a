//! Minimal key=value configuration reader (§6).
//!
//! Config parsing is explicitly out of scope for the core's algorithms, so
//! this stays a one-assignment-per-line reader rather than a schema-driven
//! config crate — matching the teacher's own `std::env::var` use in
//! `web_server.rs` for the handful of settings it exposes.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server_host: String,
    pub server_port: u16,
    pub db_path: String,
    pub cache_enabled: bool,
    pub cache_ttl: Duration,
    pub retry_max_retries: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            server_host: "0.0.0.0".to_string(),
            server_port: 9100,
            db_path: "candle-gateway.db".to_string(),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(600),
            retry_max_retries: 3,
        }
    }
}

impl AppConfig {
    /// Loads defaults, overlays a `key = value` file (if it exists), then
    /// overlays environment variables — in that precedence order.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let mut config = AppConfig::default();
        if let Ok(contents) = std::fs::read_to_string(path) {
            let kv = parse_kv(&contents);
            config.apply_kv(&kv);
        }
        config.apply_env();
        config
    }

    fn apply_kv(&mut self, kv: &HashMap<String, String>) {
        if let Some(v) = kv.get("server.host") {
            self.server_host = v.clone();
        }
        if let Some(v) = kv.get("server.port").and_then(|v| v.parse().ok()) {
            self.server_port = v;
        }
        if let Some(v) = kv.get("db.path") {
            self.db_path = v.clone();
        }
        if let Some(v) = kv.get("cache.enabled").and_then(|v| v.parse().ok()) {
            self.cache_enabled = v;
        }
        if let Some(v) = kv.get("cache.ttl_default").and_then(|v| v.parse().ok()) {
            self.cache_ttl = Duration::from_secs(v);
        }
        if let Some(v) = kv.get("retry.max_retries").and_then(|v| v.parse().ok()) {
            self.retry_max_retries = v;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SERVER_HOST") {
            self.server_host = v;
        }
        if let Ok(v) = std::env::var("SERVER_PORT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.server_port = v;
        }
        if let Ok(v) = std::env::var("DB_PATH") {
            self.db_path = v;
        }
    }
}

/// Parses `key = value` lines; `#` starts a comment, blank lines are skipped.
fn parse_kv(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}
