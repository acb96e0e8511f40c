// Forum server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. The database pool reads its own sizing variables in
// `db::pool`.

use std::net::SocketAddr;

use chrono::Duration;

pub const DEV_JWT_SECRET: &str = "forum_local_development_jwt_secret_must_be_32_chars";
pub const DEFAULT_GUEST_USERNAME: &str = "guest-marker";
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
/// Longest accepted retention window (ten years).
pub const MAX_RETENTION_HOURS: i64 = 10 * 365 * 24;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// HS256 secret shared with the service that issues access tokens.
    pub jwt_secret: String,
    /// PostgreSQL connection string. `None` keeps chat history in memory.
    pub database_url: Option<String>,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    /// Log filter directive (e.g. `info`, `forum_server=debug`).
    pub log_filter: String,
    /// Emit logs as JSON lines instead of the human-readable format.
    pub log_json: bool,
    /// Display name given to connections that present no token.
    pub guest_username: String,
    /// Persisted messages older than this are pruned after each save.
    pub retention: Duration,
    /// Largest inbound WebSocket frame accepted.
    pub max_frame_bytes: usize,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `FORUM_HOST` | `0.0.0.0` |
    /// | `FORUM_PORT` | `8080` |
    /// | `FORUM_JWT_SECRET` | dev-only placeholder |
    /// | `FORUM_DATABASE_URL` | *(none, in-memory history)* |
    /// | `FORUM_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `FORUM_LOG_FILTER` | `info` |
    /// | `FORUM_LOG_JSON` | `false` |
    /// | `FORUM_GUEST_USERNAME` | `guest-marker` |
    /// | `FORUM_RETENTION_HOURS` | `24` (1 to 87600, otherwise the default) |
    /// | `FORUM_MAX_FRAME_BYTES` | `65536` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    pub(crate) fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("FORUM_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("FORUM_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("FORUM_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());

        let database_url = env("FORUM_DATABASE_URL").ok().filter(|url| !url.trim().is_empty());
        let cors_origins = env("FORUM_CORS_ORIGINS").ok();

        let log_filter = env("FORUM_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_json = env("FORUM_LOG_JSON")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let guest_username = env("FORUM_GUEST_USERNAME")
            .ok()
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_GUEST_USERNAME.into());

        let retention = env("FORUM_RETENTION_HOURS")
            .ok()
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|hours| (1..=MAX_RETENTION_HOURS).contains(hours))
            .and_then(Duration::try_hours)
            .unwrap_or_else(default_retention);

        let max_frame_bytes = env("FORUM_MAX_FRAME_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|bytes| *bytes > 0)
            .unwrap_or(DEFAULT_MAX_FRAME_BYTES);

        Self {
            listen_addr,
            jwt_secret,
            database_url,
            cors_origins,
            log_filter,
            log_json,
            guest_username,
            retention,
            max_frame_bytes,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

fn default_retention() -> Duration {
    Duration::hours(DEFAULT_RETENTION_HOURS)
}
