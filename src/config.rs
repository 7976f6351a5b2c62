use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests: u32,
    pub period_secs: u64,
    /// Key clients by `X-Real-IP`/`X-Forwarded-For` when a proxy sets them.
    pub trust_proxy_headers: bool,
}

impl RateLimitConfig {
    /// `None` when limiting is switched off or the window is empty.
    pub fn window(&self) -> Option<(u32, Duration)> {
        if !self.enabled || self.period_secs == 0 {
            return None;
        }
        Some((self.requests, Duration::from_secs(self.period_secs)))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub host: String,
    pub port: u16,
    pub json_logs: bool,
    pub log_level: Option<String>,
    pub request_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub body_limit_bytes: usize,
    pub rate_limit: RateLimitConfig,
    pub cors_allowed_origins: Vec<String>,
    pub seed_demo_users: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: "development".into(),
            host: "0.0.0.0".into(),
            port: 8080,
            json_logs: false,
            log_level: None,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(10),
            body_limit_bytes: 1024 * 1024,
            rate_limit: RateLimitConfig {
                enabled: true,
                requests: 100,
                period_secs: 60,
                trust_proxy_headers: true,
            },
            cors_allowed_origins: vec!["*".into()],
            seed_demo_users: true,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let d = Self::default();
        let parsed = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let port = match parsed("APP_PORT") {
            Some(v) => v
                .trim()
                .parse::<u16>()
                .with_context(|| format!("APP_PORT is not a valid port: {v}"))?,
            None => d.port,
        };

        Ok(Self {
            environment: parsed("APP_ENV").unwrap_or(d.environment),
            host: parsed("APP_HOST").unwrap_or(d.host),
            port,
            json_logs: parsed("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(d.json_logs),
            log_level: parsed("LOG_LEVEL")
                .map(|v| v.trim().to_ascii_lowercase())
                .filter(|v| LOG_LEVELS.contains(&v.as_str()))
                .or(d.log_level),
            request_timeout: parsed("REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|&secs| secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            shutdown_timeout: parsed("SHUTDOWN_TIMEOUT_SECS")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.shutdown_timeout),
            body_limit_bytes: parsed("BODY_LIMIT_BYTES")
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(d.body_limit_bytes),
            rate_limit: RateLimitConfig {
                enabled: parsed("RATE_LIMIT_ENABLED")
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(d.rate_limit.enabled),
                requests: parsed("RATE_LIMIT_REQUESTS")
                    .and_then(|v| v.trim().parse::<u32>().ok())
                    .unwrap_or(d.rate_limit.requests),
                period_secs: parsed("RATE_LIMIT_PERIOD_SECS")
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .unwrap_or(d.rate_limit.period_secs),
                trust_proxy_headers: parsed("TRUST_PROXY_HEADERS")
                    .and_then(|v| parse_bool(&v))
                    .unwrap_or(d.rate_limit.trust_proxy_headers),
            },
            cors_allowed_origins: parsed("CORS_ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or(d.cors_allowed_origins),
            seed_demo_users: parsed("SEED_DEMO_USERS")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(d.seed_demo_users),
        })
    }

    /// Filter used when `RUST_LOG` is unset; `LOG_LEVEL` only moves this crate's level.
    pub fn log_filter(&self) -> String {
        let level = self.log_level.as_deref().unwrap_or("debug");
        format!("userdir={level},axum=info,tower_http=info")
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.is_empty() || self.cors_allowed_origins.iter().any(|o| o == "*")
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.port, 8080);
        assert!(!cfg.json_logs);
        assert_eq!(cfg.body_limit_bytes, 1024 * 1024);
        assert_eq!(cfg.rate_limit.window(), Some((100, Duration::from_secs(60))));
        assert!(cfg.allows_any_origin());
        assert!(cfg.seed_demo_users);
        assert!(!cfg.is_production());
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(10));
        assert!(cfg.rate_limit.trust_proxy_headers);
        assert_eq!(cfg.log_filter(), "userdir=debug,axum=info,tower_http=info");
    }

    #[test]
    fn log_level_sets_crate_filter() {
        let cfg = from_pairs(&[("LOG_LEVEL", "WARN")]).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("warn"));
        assert_eq!(cfg.log_filter(), "userdir=warn,axum=info,tower_http=info");

        let cfg = from_pairs(&[("LOG_LEVEL", "loud")]).unwrap();
        assert_eq!(cfg.log_level, None);
    }

    #[test]
    fn reads_timeouts_and_proxy_trust() {
        let cfg = from_pairs(&[
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("SHUTDOWN_TIMEOUT_SECS", "2"),
            ("TRUST_PROXY_HEADERS", "no"),
        ])
        .unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(2));
        assert!(!cfg.rate_limit.trust_proxy_headers);

        let cfg = from_pairs(&[("REQUEST_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn reads_overrides() {
        let cfg = from_pairs(&[
            ("APP_ENV", "prod"),
            ("APP_PORT", "9090"),
            ("LOG_FORMAT", "JSON"),
            ("RATE_LIMIT_REQUESTS", "5"),
            ("RATE_LIMIT_PERIOD_SECS", "10"),
            ("CORS_ALLOWED_ORIGINS", "https://a.example, https://b.example"),
            ("SEED_DEMO_USERS", "false"),
        ])
        .unwrap();
        assert!(cfg.is_production());
        assert_eq!(cfg.port, 9090);
        assert!(cfg.json_logs);
        assert_eq!(cfg.rate_limit.window(), Some((5, Duration::from_secs(10))));
        assert_eq!(
            cfg.cors_allowed_origins,
            vec!["https://a.example".to_string(), "https://b.example".to_string()]
        );
        assert!(!cfg.allows_any_origin());
        assert!(!cfg.seed_demo_users);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let cfg = from_pairs(&[("BODY_LIMIT_BYTES", "lots"), ("RATE_LIMIT_ENABLED", "maybe")]).unwrap();
        assert_eq!(cfg.body_limit_bytes, 1024 * 1024);
        assert!(cfg.rate_limit.enabled);
    }

    #[test]
    fn rate_limit_disabled_by_flag_or_zero_period() {
        let off = from_pairs(&[("RATE_LIMIT_ENABLED", "false")]).unwrap();
        assert_eq!(off.rate_limit.window(), None);
        let empty = from_pairs(&[("RATE_LIMIT_PERIOD_SECS", "0")]).unwrap();
        assert_eq!(empty.rate_limit.window(), None);
    }

    #[test]
    fn bad_port_is_an_error() {
        let err = from_pairs(&[("APP_PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("APP_PORT"));
    }
}
