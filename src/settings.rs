//! Process configuration from environment variables.

use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("{name} must be a number, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{0} and its pair must be set together")]
    IncompleteTls(&'static str),
}

#[derive(Clone)]
pub struct Settings {
    pub port: u16,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub chain_ws_url: String,
    pub chain_pallet: String,
    pub chain_query_timeout: Duration,
    /// Empty selects the in-process cache backend.
    pub redis_url: String,
    pub cache_prefix: String,
    pub cache_health_interval: Duration,
    pub signature_max_age_ms: i64,
    pub livekit_url: String,
    pub livekit_api_key: String,
    pub livekit_api_secret: String,
    pub credential_ttl: Duration,
}

fn number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, SettingsError> {
    match lookup(name) {
        Some(value) => value.trim().parse().map_err(|_| SettingsError::InvalidNumber { name, value }),
        None => Ok(default),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let tls_cert_path = lookup("TLS_CERT_PATH");
        let tls_key_path = lookup("TLS_KEY_PATH");
        match (&tls_cert_path, &tls_key_path) {
            (Some(_), None) => return Err(SettingsError::IncompleteTls("TLS_CERT_PATH")),
            (None, Some(_)) => return Err(SettingsError::IncompleteTls("TLS_KEY_PATH")),
            _ => {}
        }

        Ok(Settings {
            port: number(&lookup, "PORT", 8080)?,
            tls_cert_path,
            tls_key_path,
            chain_ws_url: text("CHAIN_WS_URL", "ws://127.0.0.1:9944"),
            chain_pallet: text("CHAIN_PALLET", "Livestream"),
            chain_query_timeout: Duration::from_millis(number(
                &lookup,
                "CHAIN_QUERY_TIMEOUT_MS",
                10_000,
            )?),
            redis_url: text("REDIS_URL", "redis://127.0.0.1:6379"),
            cache_prefix: text("CACHE_PREFIX", "stardust:"),
            cache_health_interval: Duration::from_secs(number(
                &lookup,
                "CACHE_HEALTH_INTERVAL_SECS",
                15,
            )?),
            signature_max_age_ms: number(&lookup, "SIGNATURE_MAX_AGE_MS", 300_000)?,
            livekit_url: text("LIVEKIT_URL", "ws://127.0.0.1:7880"),
            livekit_api_key: text("LIVEKIT_API_KEY", ""),
            livekit_api_secret: text("LIVEKIT_API_SECRET", ""),
            credential_ttl: Duration::from_secs(number(&lookup, "CREDENTIAL_TTL_SECS", 6 * 60 * 60)?),
        })
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_cert_path.is_some() && self.tls_key_path.is_some()
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("port", &self.port)
            .field("tls_enabled", &self.tls_enabled())
            .field("chain_ws_url", &self.chain_ws_url)
            .field("chain_pallet", &self.chain_pallet)
            .field("chain_query_timeout", &self.chain_query_timeout)
            .field("redis_url", &self.redis_url)
            .field("cache_prefix", &self.cache_prefix)
            .field("cache_health_interval", &self.cache_health_interval)
            .field("signature_max_age_ms", &self.signature_max_age_ms)
            .field("livekit_url", &self.livekit_url)
            .field("livekit_api_key", &self.livekit_api_key)
            .field("livekit_api_secret", &"<redacted>")
            .field("credential_ttl", &self.credential_ttl)
            .finish()
    }
}
