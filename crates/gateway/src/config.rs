// Gateway server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Individual modules (JWT service, DB pool, etc.) may still
// read their own env vars; this module covers the core server settings.

use std::net::SocketAddr;
use std::time::Duration;

/// Default cap on concurrent sockets a single user may hold.
pub const DEFAULT_MAX_CONNECTIONS_PER_USER: usize = 5;
/// Default cap on concurrent sockets across the whole process.
pub const DEFAULT_MAX_TOTAL_CONNECTIONS: usize = 1000;

/// Core gateway server configuration.
///
/// Constructed via [`GatewayConfig::from_env`] which reads environment
/// variables and falls back to sensible development defaults.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// JWT signing secret for access tokens.
    pub jwt_secret: String,
    /// Shared bearer token for the internal control API.
    pub internal_token: String,
    /// PostgreSQL connection string.
    pub database_url: Option<String>,
    /// Maximum concurrent sockets a single user may hold.
    pub max_connections_per_user: usize,
    /// Maximum concurrent sockets across the whole process.
    pub max_total_connections: usize,
    /// Idle time after which an online user is marked away.
    pub away_timeout: Duration,
    /// How often each connection checks its user for away transition.
    pub away_check_interval: Duration,
    /// Log filter directive (e.g. `info`, `banter_gateway=debug`).
    pub log_filter: String,
}

impl GatewayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `BANTER_GATEWAY_HOST` | `0.0.0.0` |
    /// | `BANTER_GATEWAY_PORT` | `8080` |
    /// | `BANTER_GATEWAY_JWT_SECRET` | dev-only placeholder |
    /// | `BANTER_GATEWAY_INTERNAL_TOKEN` | dev-only placeholder |
    /// | `BANTER_GATEWAY_DATABASE_URL` | *(none; in-memory stores)* |
    /// | `BANTER_GATEWAY_MAX_CONNECTIONS_PER_USER` | `5` |
    /// | `BANTER_GATEWAY_MAX_TOTAL_CONNECTIONS` | `1000` |
    /// | `BANTER_GATEWAY_AWAY_TIMEOUT_SECS` | `300` |
    /// | `BANTER_GATEWAY_AWAY_CHECK_INTERVAL_SECS` | `30` |
    /// | `BANTER_GATEWAY_LOG_FILTER` | `info` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("BANTER_GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("BANTER_GATEWAY_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("BANTER_GATEWAY_JWT_SECRET").unwrap_or_else(|_| {
            "banter_local_development_jwt_secret_must_be_32_chars".into()
        });

        let internal_token = env("BANTER_GATEWAY_INTERNAL_TOKEN")
            .unwrap_or_else(|_| "banter_local_development_internal_token".into());

        let database_url = env("BANTER_GATEWAY_DATABASE_URL").ok();

        let max_connections_per_user = env("BANTER_GATEWAY_MAX_CONNECTIONS_PER_USER")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_USER);
        let max_total_connections = env("BANTER_GATEWAY_MAX_TOTAL_CONNECTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_TOTAL_CONNECTIONS);

        // Sub-second values are rounded up; a zero timeout would mark every
        // user away on the first check.
        let away_timeout_secs: u64 = env("BANTER_GATEWAY_AWAY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(300);
        let away_check_interval_secs: u64 = env("BANTER_GATEWAY_AWAY_CHECK_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let log_filter = env("BANTER_GATEWAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        Self {
            listen_addr,
            jwt_secret,
            internal_token,
            database_url,
            max_connections_per_user,
            max_total_connections,
            away_timeout: Duration::from_secs(away_timeout_secs.max(1)),
            away_check_interval: Duration::from_secs(away_check_interval_secs.max(1)),
            log_filter,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == "banter_local_development_jwt_secret_must_be_32_chars"
    }

    /// Returns true when using the development-only internal API token.
    pub fn is_dev_internal_token(&self) -> bool {
        self.internal_token == "banter_local_development_internal_token"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = GatewayConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 8080);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert!(cfg.is_dev_internal_token());
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.max_connections_per_user, 5);
        assert_eq!(cfg.max_total_connections, 1000);
        assert_eq!(cfg.away_timeout, Duration::from_secs(300));
        assert_eq!(cfg.away_check_interval, Duration::from_secs(30));
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_HOST", "127.0.0.1");
        m.insert("BANTER_GATEWAY_PORT", "3000");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:3000");
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
        assert_eq!(cfg.jwt_secret, "production_secret_at_least_32_chars!!");
    }

    #[test]
    fn custom_internal_token_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_INTERNAL_TOKEN", "prod-internal-token");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_internal_token());
    }

    #[test]
    fn database_url_from_env() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_DATABASE_URL", "postgres://u:p@host/db");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://u:p@host/db"));
    }

    #[test]
    fn connection_limits_from_env() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_MAX_CONNECTIONS_PER_USER", "2");
        m.insert("BANTER_GATEWAY_MAX_TOTAL_CONNECTIONS", "50");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.max_connections_per_user, 2);
        assert_eq!(cfg.max_total_connections, 50);
    }

    #[test]
    fn invalid_limits_use_defaults() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_MAX_CONNECTIONS_PER_USER", "not_a_number");
        m.insert("BANTER_GATEWAY_MAX_TOTAL_CONNECTIONS", "");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.max_connections_per_user, 5);
        assert_eq!(cfg.max_total_connections, 1000);
    }

    #[test]
    fn away_settings_from_env() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_AWAY_TIMEOUT_SECS", "60");
        m.insert("BANTER_GATEWAY_AWAY_CHECK_INTERVAL_SECS", "5");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.away_timeout, Duration::from_secs(60));
        assert_eq!(cfg.away_check_interval, Duration::from_secs(5));
    }

    #[test]
    fn zero_away_settings_are_clamped() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_AWAY_TIMEOUT_SECS", "0");
        m.insert("BANTER_GATEWAY_AWAY_CHECK_INTERVAL_SECS", "0");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.away_timeout, Duration::from_secs(1));
        assert_eq!(cfg.away_check_interval, Duration::from_secs(1));
    }

    #[test]
    fn invalid_port_uses_default() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_PORT", "not_a_number");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 8080);
    }

    #[test]
    fn log_filter_override() {
        let mut m = HashMap::new();
        m.insert("BANTER_GATEWAY_LOG_FILTER", "debug,banter_gateway=trace");
        let cfg = GatewayConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.log_filter, "debug,banter_gateway=trace");
    }
}
