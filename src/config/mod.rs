// src/config/mod.rs
//! Startup configuration: secrets from a TOML key file, tunables from the
//! environment. Every error here is fatal.

use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::classifier::DEFAULT_CLASSIFIER_URL;
use crate::error::ConfigError;
use crate::ingest::{DEFAULT_LOOKBACK_SECS, DEFAULT_MAX_PAGES};
use crate::pipeline::DEFAULT_QUEUE_CAPACITY;

pub const DEFAULT_KEYS_PATH: &str = "keys.toml";

pub const KEYS_TEMPLATE: &str = r#"# adopt-detector secrets
[telegram]
api_key = ""
chat_id = 0

[deviantart]
client_id = ""
client_secret = ""
"#;

#[derive(Debug, Clone, Deserialize)]
pub struct Keys {
    pub telegram: TelegramKeys,
    #[serde(alias = "deviantArt")]
    pub deviantart: DeviantArtKeys,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramKeys {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub chat_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviantArtKeys {
    #[serde(default, deserialize_with = "string_or_int")]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

/// DeviantArt client ids are numeric; accept them quoted or bare.
fn string_or_int<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        S(String),
        I(i64),
    }
    Ok(match StringOrInt::deserialize(de)? {
        StringOrInt::S(s) => s,
        StringOrInt::I(i) => i.to_string(),
    })
}

impl Keys {
    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        let keys: Keys = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        keys.validate()?;
        Ok(keys)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.telegram.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("telegram.api_key"));
        }
        if self.telegram.chat_id == 0 {
            return Err(ConfigError::Missing("telegram.chat_id"));
        }
        if self.deviantart.client_id.trim().is_empty() {
            return Err(ConfigError::Missing("deviantart.client_id"));
        }
        if self.deviantart.client_secret.trim().is_empty() {
            return Err(ConfigError::Missing("deviantart.client_secret"));
        }
        Ok(())
    }
}

pub fn load_keys(path: &Path) -> Result<Keys, ConfigError> {
    let origin = path.display().to_string();
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: origin.clone(),
        source,
    })?;
    Keys::parse(&content, &origin)
}

/// Write [`KEYS_TEMPLATE`] unless a file already exists. Returns whether
/// the file was created.
pub fn write_keys_template(path: &Path) -> Result<bool, ConfigError> {
    if path.exists() {
        return Ok(false);
    }
    fs::write(path, KEYS_TEMPLATE).map_err(|source| ConfigError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(true)
}

/// Tunables read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub poll_interval: Duration,
    pub poll_workers: usize,
    pub max_pages: u32,
    pub lookback_secs: i64,
    pub queue_capacity: usize,
    pub classifier_url: String,
    pub notify_threshold: Option<f64>,
    pub mongo_uri: String,
    pub database_name: String,
    pub status_addr: SocketAddr,
    pub token_refresh: Duration,
    pub log_json: bool,
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env_nonempty(name) {
        None => Ok(default),
        Some(v) => v
            .parse()
            .map_err(|_| ConfigError::InvalidEnv { name, value: v }),
    }
}

fn env_string(name: &str, default: &str) -> String {
    env_nonempty(name).unwrap_or_else(|| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let notify_threshold = match env_nonempty("NOTIFY_THRESHOLD") {
            None => None,
            Some(v) => Some(v.parse::<f64>().map_err(|_| ConfigError::InvalidEnv {
                name: "NOTIFY_THRESHOLD",
                value: v,
            })?),
        };
        let poll_workers: usize = env_parse("POLL_WORKERS", 1)?;
        if poll_workers == 0 {
            return Err(ConfigError::InvalidEnv {
                name: "POLL_WORKERS",
                value: "0".into(),
            });
        }
        Ok(Self {
            poll_interval: Duration::from_secs(env_parse("POLL_INTERVAL_SECS", 300)?),
            poll_workers,
            max_pages: env_parse("MAX_PAGES", DEFAULT_MAX_PAGES)?.max(1),
            lookback_secs: env_parse("LOOKBACK_SECS", DEFAULT_LOOKBACK_SECS)?,
            queue_capacity: env_parse("QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?.max(1),
            classifier_url: env_string("CLASSIFIER_URL", DEFAULT_CLASSIFIER_URL),
            notify_threshold,
            mongo_uri: env_string("MONGO_URI", "mongodb://localhost:27017"),
            database_name: env_string("DATABASE_NAME", "adopt-detector-DB"),
            status_addr: env_parse("STATUS_ADDR", SocketAddr::from(([127, 0, 0, 1], 8080)))?,
            token_refresh: Duration::from_secs(env_parse("TOKEN_REFRESH_SECS", 3540)?),
            log_json: env_nonempty("LOG_FORMAT").is_some_and(|v| v.eq_ignore_ascii_case("json")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_id_accepts_int_or_string() {
        let k = Keys::parse(
            "[telegram]\napi_key = \"t\"\nchat_id = -100\n[deviantart]\nclient_id = 1234\nclient_secret = \"s\"\n",
            "inline",
        )
        .unwrap();
        assert_eq!(k.deviantart.client_id, "1234");
        assert_eq!(k.telegram.chat_id, -100);

        let k = Keys::parse(
            "[telegram]\napi_key = \"t\"\nchat_id = 5\n[deviantArt]\nclient_id = \"99\"\nclient_secret = \"s\"\n",
            "inline",
        )
        .unwrap();
        assert_eq!(k.deviantart.client_id, "99");
    }

    #[test]
    fn template_is_rejected_until_filled_in() {
        let err = Keys::parse(KEYS_TEMPLATE, "template").unwrap_err();
        assert!(matches!(err, ConfigError::Missing("telegram.api_key")));
    }

    #[test]
    fn missing_section_is_a_parse_error() {
        let err = Keys::parse("[telegram]\napi_key = \"t\"\nchat_id = 1\n", "inline").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
