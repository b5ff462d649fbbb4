use std::env;

use crate::datastore::DB_TYPE_MEMORYDB;

/// Process-wide, read-mostly configuration. Built once at startup and
/// shared read-only with every connection.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub output_base_url: String,
    pub port_range_min: u16,
    pub port_range_max: u16,
    pub stun_uri: String,
    pub tcp_candidates_enabled: bool,
    pub db_type: String,
    pub redis_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("FLOODGATE_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            output_base_url: env::var("FLOODGATE_OUTPUT_BASE_URL")
                .unwrap_or_else(|_| "rtmp://127.0.0.1/live".to_string()),
            port_range_min: env::var("FLOODGATE_PORT_RANGE_MIN")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(50_000),
            port_range_max: env::var("FLOODGATE_PORT_RANGE_MAX")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(60_000),
            stun_uri: env::var("FLOODGATE_STUN_URI")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".to_string()),
            tcp_candidates_enabled: env::var("FLOODGATE_TCP_CANDIDATES")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(true),
            db_type: env::var("FLOODGATE_DB_TYPE").unwrap_or_else(|_| DB_TYPE_MEMORYDB.to_string()),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }

    /// Ingest target for a stream: `{base}/{streamId}`.
    pub fn output_url_for(&self, stream_id: &str) -> String {
        format!("{}/{}", self.output_base_url.trim_end_matches('/'), stream_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            output_base_url: "rtmp://127.0.0.1/live".to_string(),
            port_range_min: 50_000,
            port_range_max: 60_000,
            stun_uri: "stun:stun.l.google.com:19302".to_string(),
            tcp_candidates_enabled: true,
            db_type: DB_TYPE_MEMORYDB.to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }
}
