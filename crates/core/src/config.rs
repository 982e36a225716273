//! Layered configuration for the kitchenboard staff board.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (local Order Store, staff role, 1 s / 30 s / 5
//!    reconnect policy, 5 s notices)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `KB_`, nested with `__`)

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Roles the notification endpoint accepts (`/ws/{role}`).
pub const KNOWN_ROLES: &[&str] = &["staff", "customers", "admin"];

// ── Default value functions ────────────────────────────────────────────

/// Default request timeout: 5 000 ms.
fn default_timeout_ms() -> u64 {
    5_000
}

/// Default page size when walking `GET /orders/`: 100 (store maximum).
fn default_page_limit() -> u32 {
    100
}

/// Default initial reconnect backoff: 1 000 ms.
fn default_initial_backoff_ms() -> u64 {
    1_000
}

/// Default maximum reconnect backoff: 30 000 ms.
fn default_max_backoff_ms() -> u64 {
    30_000
}

/// Default maximum reconnect attempts: 5.
fn default_max_retries() -> u32 {
    5
}

/// Default keepalive ping interval: 20 000 ms.
fn default_ping_interval_ms() -> u64 {
    20_000
}

/// Default notice lifetime: 5 000 ms.
fn default_notice_ttl_ms() -> u64 {
    5_000
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Order Store REST settings.
    pub api: ApiConfig,
    /// Notification channel settings.
    pub channel: ChannelConfig,
    /// Transient notice settings.
    #[serde(default)]
    pub notices: NoticeConfig,
    /// Local staff console.
    pub console: ConsoleConfig,
}

/// Order Store REST API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Base URL including the version prefix, e.g. `http://localhost:8000/api/v1`.
    pub base_url: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Page size used when loading the full order list.
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
}

/// Notification channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// WebSocket base URL; the role path `/ws/{role}` is appended.
    pub ws_url: String,
    /// Subscription audience (`staff`, `customers`, `admin`).
    pub role: String,
    /// Keepalive ping interval in milliseconds (0 disables).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Reconnect parameters.
    pub reconnect: ReconnectConfig,
}

/// Reconnect parameters with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for any reconnect delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive reconnect attempts before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl ReconnectConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_retries: default_max_retries(),
        }
    }
}

/// Transient notice configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NoticeConfig {
    /// How long a notice stays visible, in milliseconds.
    #[serde(default = "default_notice_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for NoticeConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_notice_ttl_ms(),
        }
    }
}

/// Local staff console configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    /// Listen address, e.g. `127.0.0.1:8088`.
    pub bind_addr: String,
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `KB_` and `__` as the
    ///    nesting separator (e.g., `KB_CHANNEL__RECONNECT__MAX_RETRIES=8`).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default("api.base_url", "http://localhost:8000/api/v1")?
            .set_default("api.timeout_ms", 5000i64)?
            .set_default("api.page_limit", 100i64)?
            .set_default("channel.ws_url", "ws://localhost:8000")?
            .set_default("channel.role", "staff")?
            .set_default("channel.ping_interval_ms", 20000i64)?
            .set_default("channel.reconnect.initial_backoff_ms", 1000i64)?
            .set_default("channel.reconnect.max_backoff_ms", 30000i64)?
            .set_default("channel.reconnect.max_retries", 5i64)?
            .set_default("notices.ttl_ms", 5000i64)?
            .set_default("console.bind_addr", "127.0.0.1:8088")?;

        // ── Layer 2: TOML file ─────────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (KB_ prefix) ───────────────
        // The prefix separator is set explicitly; otherwise the `config`
        // crate would expect `KB__` once a nesting separator is given.
        builder = builder.add_source(
            Environment::with_prefix("KB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.api.base_url.trim().is_empty() {
            bail!("api.base_url must not be empty");
        }
        if self.channel.ws_url.trim().is_empty() {
            bail!("channel.ws_url must not be empty");
        }
        if !KNOWN_ROLES.contains(&self.channel.role.as_str()) {
            bail!(
                "unknown channel role {:?}; expected one of {:?}",
                self.channel.role,
                KNOWN_ROLES
            );
        }
        if self.api.page_limit == 0 {
            bail!("api.page_limit must be at least 1");
        }
        let reconnect = &self.channel.reconnect;
        if reconnect.max_retries == 0 {
            bail!("channel.reconnect.max_retries must be at least 1");
        }
        if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
            bail!(
                "channel.reconnect.initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                reconnect.initial_backoff_ms,
                reconnect.max_backoff_ms
            );
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.api.timeout_ms)
    }

    /// Notice lifetime as a [`Duration`].
    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notices.ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Serializes tests that manipulate environment variables. Recovers from
    /// a poisoned lock so one failing test does not cascade.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clear all env vars that could interfere with config loading.
    fn clear_env() {
        std::env::remove_var("KB_CHANNEL__ROLE");
        std::env::remove_var("KB_CHANNEL__RECONNECT__MAX_RETRIES");
        std::env::remove_var("KB_API__BASE_URL");
    }

    /// Create a temporary TOML config file; `.toml` suffix lets the `config`
    /// crate detect the format.
    fn write_temp_toml(content: &str) -> (tempfile::NamedTempFile, PathBuf) {
        let mut f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        write!(f, "{}", content).expect("write temp file");
        let path = f.path().to_path_buf();
        (f, path)
    }

    #[test]
    fn test_load_defaults_only() {
        let _lock = lock_env();
        clear_env();

        let cfg = AppConfig::load(None).expect("load defaults");
        assert_eq!(cfg.api.base_url, "http://localhost:8000/api/v1");
        assert_eq!(cfg.api.timeout_ms, 5000);
        assert_eq!(cfg.api.page_limit, 100);
        assert_eq!(cfg.channel.ws_url, "ws://localhost:8000");
        assert_eq!(cfg.channel.role, "staff");
        assert_eq!(cfg.channel.reconnect, ReconnectConfig::default());
        assert_eq!(cfg.notices.ttl_ms, 5000);
        assert_eq!(cfg.console.bind_addr, "127.0.0.1:8088");
    }

    #[test]
    fn test_reconnect_defaults() {
        let r = ReconnectConfig::default();
        assert_eq!(r.initial_backoff(), Duration::from_secs(1));
        assert_eq!(r.max_backoff(), Duration::from_secs(30));
        assert_eq!(r.max_retries, 5);
    }

    #[test]
    fn test_load_from_toml() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[api]
base_url = "https://orders.example.com/api/v1"
timeout_ms = 2500

[channel]
ws_url = "wss://orders.example.com"
role = "admin"
ping_interval_ms = 0

[channel.reconnect]
initial_backoff_ms = 500
max_backoff_ms = 10000
max_retries = 8

[notices]
ttl_ms = 8000
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let cfg = AppConfig::load(Some(path)).expect("load from toml");

        assert_eq!(cfg.api.base_url, "https://orders.example.com/api/v1");
        assert_eq!(cfg.request_timeout(), Duration::from_millis(2500));
        assert_eq!(cfg.channel.role, "admin");
        assert_eq!(cfg.channel.ping_interval_ms, 0);
        assert_eq!(cfg.channel.reconnect.max_retries, 8);
        assert_eq!(cfg.channel.reconnect.initial_backoff_ms, 500);
        assert_eq!(cfg.notice_ttl(), Duration::from_secs(8));
    }

    #[test]
    fn test_env_var_overrides() {
        let _lock = lock_env();
        clear_env();
        std::env::set_var("KB_CHANNEL__RECONNECT__MAX_RETRIES", "9");
        std::env::set_var("KB_CHANNEL__ROLE", "customers");

        let cfg = AppConfig::load(None).expect("load with env override");
        assert_eq!(cfg.channel.reconnect.max_retries, 9);
        assert_eq!(cfg.channel.role, "customers");

        clear_env();
    }

    #[test]
    fn test_unknown_role_rejected() {
        let _lock = lock_env();
        clear_env();

        let (_f, path) = write_temp_toml("[channel]\nrole = \"kitchen\"\n");
        let err = AppConfig::load(Some(path)).unwrap_err();
        assert!(format!("{err}").contains("unknown channel role"));
    }

    #[test]
    fn test_backoff_bounds_rejected() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[channel.reconnect]
initial_backoff_ms = 60000
max_backoff_ms = 30000
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let err = AppConfig::load(Some(path)).unwrap_err();
        assert!(format!("{err}").contains("exceeds max_backoff_ms"));
    }

    #[test]
    fn test_zero_retries_rejected() {
        let _lock = lock_env();
        clear_env();

        let (_f, path) = write_temp_toml("[channel.reconnect]\nmax_retries = 0\n");
        assert!(AppConfig::load(Some(path)).is_err());
    }
}
