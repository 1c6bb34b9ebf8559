use std::env;
use tracing::warn;

pub const ENV_PORT: &str = "PORT";
pub const ENV_HOST: &str = "HOST";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";
pub const ENV_AUTH_TOKEN: &str = "AUTH_TOKEN";
pub const ENV_MAX_CONCURRENT_PAGES: &str = "MAX_CONCURRENT_PAGES";
pub const ENV_TIMEOUT_MS: &str = "TIMEOUT_MS";
pub const ENV_PAGE_LOAD_TIMEOUT_MS: &str = "PAGE_LOAD_TIMEOUT_MS";
pub const ENV_PROXY_SERVER: &str = "PROXY_SERVER";
pub const ENV_PROXY_USERNAME: &str = "PROXY_USERNAME";
pub const ENV_PROXY_PASSWORD: &str = "PROXY_PASSWORD";
pub const ENV_BLOCK_MEDIA: &str = "BLOCK_MEDIA";
pub const ENV_HEADLESS: &str = "HEADLESS";
pub const ENV_STEALTH_ENABLED: &str = "STEALTH_ENABLED";
pub const ENV_JOB_TTL_MS: &str = "JOB_TTL_MS";
pub const ENV_JOB_CLEANUP_INTERVAL_MS: &str = "JOB_CLEANUP_INTERVAL_MS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Service configuration, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub log_level: String,
    /// When unset, bearer auth is disabled.
    pub auth_token: Option<String>,
    pub max_concurrent_pages: usize,
    pub timeout_ms: u64,
    pub page_load_timeout_ms: u64,
    pub proxy_server: Option<String>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub block_media: bool,
    pub headless: bool,
    pub stealth_enabled: bool,
    pub job_ttl_ms: u64,
    pub job_cleanup_interval_ms: u64,
    /// Optional override for the browser binary; auto-discovery otherwise.
    pub chrome_executable: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
            log_level: "info".to_string(),
            auth_token: None,
            max_concurrent_pages: 10,
            timeout_ms: 300_000,
            page_load_timeout_ms: 60_000,
            proxy_server: None,
            proxy_username: None,
            proxy_password: None,
            block_media: true,
            headless: true,
            stealth_enabled: true,
            job_ttl_ms: 600_000,
            job_cleanup_interval_ms: 60_000,
            chrome_executable: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var(ENV_PORT, defaults.port),
            host: string_var(ENV_HOST).unwrap_or(defaults.host),
            log_level: string_var(ENV_LOG_LEVEL).unwrap_or(defaults.log_level),
            auth_token: string_var(ENV_AUTH_TOKEN),
            max_concurrent_pages: parse_var(ENV_MAX_CONCURRENT_PAGES, defaults.max_concurrent_pages)
                .max(1),
            timeout_ms: parse_var(ENV_TIMEOUT_MS, defaults.timeout_ms),
            page_load_timeout_ms: parse_var(ENV_PAGE_LOAD_TIMEOUT_MS, defaults.page_load_timeout_ms),
            proxy_server: string_var(ENV_PROXY_SERVER),
            proxy_username: string_var(ENV_PROXY_USERNAME),
            proxy_password: string_var(ENV_PROXY_PASSWORD),
            block_media: bool_var(ENV_BLOCK_MEDIA, defaults.block_media),
            headless: bool_var(ENV_HEADLESS, defaults.headless),
            stealth_enabled: bool_var(ENV_STEALTH_ENABLED, defaults.stealth_enabled),
            job_ttl_ms: parse_var(ENV_JOB_TTL_MS, defaults.job_ttl_ms),
            job_cleanup_interval_ms: parse_var(
                ENV_JOB_CLEANUP_INTERVAL_MS,
                defaults.job_cleanup_interval_ms,
            ),
            chrome_executable: string_var(ENV_CHROME_EXECUTABLE),
        }
    }

    pub fn auth_enabled(&self) -> bool {
        self.auth_token.is_some()
    }
}

fn string_var(key: &str) -> Option<String> {
    let v = env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

fn parse_var<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    match string_var(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has unparseable value '{}'; using default", key, raw);
            default
        }),
        None => default,
    }
}

fn bool_var(key: &str, default: bool) -> bool {
    match string_var(key) {
        Some(v) => !matches!(
            v.to_ascii_lowercase().as_str(),
            "0" | "false" | "no" | "off" | "disabled"
        ),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_table() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.auth_token.is_none());
        assert!(!cfg.auth_enabled());
        assert_eq!(cfg.max_concurrent_pages, 10);
        assert_eq!(cfg.timeout_ms, 300_000);
        assert_eq!(cfg.page_load_timeout_ms, 60_000);
        assert!(cfg.block_media);
        assert!(cfg.headless);
        assert!(cfg.stealth_enabled);
        assert_eq!(cfg.job_ttl_ms, 600_000);
        assert_eq!(cfg.job_cleanup_interval_ms, 60_000);
    }
}
