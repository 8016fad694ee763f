//! Process configuration read from the environment.

use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};

use crate::error::ConfigError;

pub const DEFAULT_SOURCE: &str = "KingCounty";
pub const DEFAULT_JOB: &str = "data_miner_king_county";
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How the feed expects its API key, if it needs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedAuth {
    None,
    /// Sent as `Authorization: Bearer <key>`, or in the named header.
    Header { header_name: Option<String>, key: String },
    /// Appended as a URL query parameter with the given name.
    UrlParam { param_name: String, key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_url: String,
    pub telemetry_server: String,
    pub push_gateway: String,
    pub source: String,
    pub job: String,
    pub fetch_timeout: Duration,
    pub feed_auth: FeedAuth,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable lookup. Blank values count as
    /// missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| optional(name).ok_or(ConfigError::Missing(name));

        let data_url = required("DATA_MINER_URI")?;
        let telemetry_server = required("TELEMETRY_SERVER_URI")?;
        let push_gateway = required("PUSH_GATEWAY_URI")?;

        let fetch_timeout = match optional("DATA_MINER_TIMEOUT_SECS") {
            Some(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(ConfigError::Invalid {
                        name: "DATA_MINER_TIMEOUT_SECS",
                        value,
                    });
                }
            },
            None => DEFAULT_FETCH_TIMEOUT,
        };

        let feed_auth = match (
            optional("DATA_MINER_API_KEY"),
            optional("DATA_MINER_API_KEY_PARAM"),
        ) {
            (None, _) => FeedAuth::None,
            (Some(key), Some(param_name)) => FeedAuth::UrlParam { param_name, key },
            (Some(key), None) => {
                let header_name = optional("DATA_MINER_API_KEY_HEADER");
                if let Some(name) = &header_name {
                    if HeaderName::from_bytes(name.as_bytes()).is_err() {
                        return Err(ConfigError::Invalid {
                            name: "DATA_MINER_API_KEY_HEADER",
                            value: name.clone(),
                        });
                    }
                }
                if HeaderValue::from_str(&key).is_err() {
                    return Err(ConfigError::Invalid {
                        name: "DATA_MINER_API_KEY",
                        value: "<redacted>".to_string(),
                    });
                }
                FeedAuth::Header { header_name, key }
            }
        };

        Ok(Self {
            data_url,
            telemetry_server,
            push_gateway,
            source: optional("DATA_MINER_SOURCE").unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            job: optional("PUSH_GATEWAY_JOB").unwrap_or_else(|| DEFAULT_JOB.to_string()),
            fetch_timeout,
            feed_auth,
        })
    }
}
