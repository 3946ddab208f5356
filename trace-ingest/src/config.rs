use std::str::FromStr;

use common_batching::BufferingInterval;
use envconfig::Envconfig;
use thiserror::Error;

use crate::level::{ParseTraceLevelError, TraceLevel};
use crate::manifest::ManifestStore;
use crate::session::ProviderRegistration;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(from = "COLLECTOR_SESSION_PREFIX", default = "trace-collector")]
    pub session_prefix: NonEmptyString,

    /// Milliseconds between timer-triggered batches, or `disabled`
    #[envconfig(from = "BUFFERING_INTERVAL_MS", default = "1000")]
    pub buffering_interval: BufferingInterval,

    #[envconfig(from = "BUFFERING_COUNT", default = "1000")]
    pub buffering_count: i64,

    #[envconfig(from = "MAX_BUFFER_SIZE", default = "10000")]
    pub max_buffer_size: usize,

    #[envconfig(from = "MANIFEST_CACHE_DIR")]
    pub manifest_cache_dir: Option<String>,

    #[envconfig(from = "PROVIDERS", default = "")]
    pub providers: ProviderList,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_prefix: NonEmptyString("trace-collector".to_owned()),
            buffering_interval: BufferingInterval::from_millis(1000),
            buffering_count: 1000,
            max_buffer_size: 10_000,
            manifest_cache_dir: None,
            providers: ProviderList::default(),
        }
    }
}

impl Config {
    /// Name of the trace session feeding the given sink.
    pub fn session_name(&self, sink: &str) -> String {
        format!("{}-{}", self.session_prefix.as_str(), sink)
    }

    pub fn manifest_store(&self) -> ManifestStore {
        match &self.manifest_cache_dir {
            Some(dir) if !dir.is_empty() => ManifestStore::new(dir),
            _ => ManifestStore::disabled(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("provider entry {0:?} has no name")]
    EmptyProviderName(String),
    #[error("provider {provider} has an invalid level: {source}")]
    InvalidLevel {
        provider: String,
        #[source]
        source: ParseTraceLevelError,
    },
    #[error("provider {provider} has invalid keywords {value:?}")]
    InvalidKeywords { provider: String, value: String },
    #[error("provider entry {0:?} has too many fields, expected name:level[:keywords]")]
    TooManyFields(String),
}

/// Providers to monitor, written as `name:level[:keywords];...`. The level
/// defaults to informational and keywords may be decimal or `0x` hex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderList(pub Vec<ProviderRegistration>);

impl ProviderList {
    pub fn as_slice(&self) -> &[ProviderRegistration] {
        &self.0
    }
}

impl FromStr for ProviderList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut providers = Vec::new();

        for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let mut fields = entry.split(':').map(str::trim);
            let name = fields.next().unwrap_or_default();
            if name.is_empty() {
                return Err(ConfigError::EmptyProviderName(entry.to_owned()));
            }

            let level = match fields.next() {
                Some(level) if !level.is_empty() => {
                    level
                        .parse::<TraceLevel>()
                        .map_err(|source| ConfigError::InvalidLevel {
                            provider: name.to_owned(),
                            source,
                        })?
                }
                _ => TraceLevel::Informational,
            };

            let keywords = match fields.next() {
                Some(value) => parse_keywords(value).ok_or_else(|| ConfigError::InvalidKeywords {
                    provider: name.to_owned(),
                    value: value.to_owned(),
                })?,
                None => 0,
            };

            if fields.next().is_some() {
                return Err(ConfigError::TooManyFields(entry.to_owned()));
            }

            providers.push(ProviderRegistration::new(name, level).with_keywords(keywords));
        }

        Ok(ProviderList(providers))
    }
}

fn parse_keywords(value: &str) -> Option<u64> {
    match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => value.parse().ok(),
    }
}
