//! Configuration module for linkwatch.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::time::Duration;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the JSON API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "linkwatch.db")
    pub db_path: String,
    /// Time between scheduler ticks (default: 15s)
    pub check_interval: Duration,
    /// Upper bound on concurrently in-flight probes (default: 8)
    pub max_concurrency: usize,
    /// Per-attempt transport timeout for probes (default: 5s)
    pub http_timeout: Duration,
    /// How long shutdown waits for in-flight probes (default: 10s)
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "linkwatch.db".to_string(),
            check_interval: Duration::from_secs(15),
            max_concurrency: 8,
            http_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables: `HTTP_PORT`, `DB_PATH`, `CHECK_INTERVAL`,
    /// `MAX_CONCURRENCY`, `HTTP_TIMEOUT`, `SHUTDOWN_GRACE`. Durations accept
    /// fractional seconds or an `ms`/`s`/`m` suffix (e.g. `500ms`, `15s`).
    /// Unparseable values fall back to the default.
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = env::var("HTTP_PORT") {
            if let Ok(port) = v.parse() {
                cfg.http_port = port;
            }
        }
        if let Ok(v) = env::var("DB_PATH") {
            cfg.db_path = v;
        }
        if let Ok(v) = env::var("CHECK_INTERVAL") {
            if let Some(d) = parse_duration(&v) {
                if !d.is_zero() {
                    cfg.check_interval = d;
                }
            }
        }
        if let Ok(v) = env::var("MAX_CONCURRENCY") {
            if let Ok(n) = v.parse::<usize>() {
                if n > 0 {
                    cfg.max_concurrency = n;
                }
            }
        }
        if let Ok(v) = env::var("HTTP_TIMEOUT") {
            if let Some(d) = parse_duration(&v) {
                if !d.is_zero() {
                    cfg.http_timeout = d;
                }
            }
        }
        if let Ok(v) = env::var("SHUTDOWN_GRACE") {
            if let Some(d) = parse_duration(&v) {
                cfg.shutdown_grace = d;
            }
        }

        cfg
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(mins) = s.strip_suffix('m') {
        return parse_secs(mins).map(|v| Duration::from_secs_f64(v * 60.0));
    }
    let secs = s.strip_suffix('s').unwrap_or(s);
    parse_secs(secs).map(Duration::from_secs_f64)
}

fn parse_secs(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
}
