//! Connection settings read straight from the process environment.
//!
//! Redis targets are numbered from 1 (`Redis_URL_1`, `Redis_Password_1`, ...)
//! and enumeration stops at the first missing or empty address, so a gap
//! hides every target configured after it.

// Local crates
use crate::helpers::load_config::RedisSettings;

// External crates
use std::fmt;
use tracing::instrument;

pub const ELASTICSEARCH_URL_VAR: &str = "Elasticsearch_URL";
pub const ELASTICSEARCH_USERNAME_VAR: &str = "Elasticsearch_Username";
pub const ELASTICSEARCH_PASSWORD_VAR: &str = "Elasticsearch_Password";

/// Used when `Elasticsearch_URL` is unset or empty
pub const DEFAULT_ELASTICSEARCH_URL: &str = "http://127.0.0.1:9200";

/// One Redis instance to poll
#[derive(Clone, PartialEq, Eq)]
pub struct RedisTarget {
    /// Position in the enumeration, starting at 1
    pub ordinal: usize,
    pub address: String,
    pub password: String,
    pub db: i64,
}

impl fmt::Debug for RedisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTarget")
            .field("ordinal", &self.ordinal)
            .field("address", &self.address)
            .field("password", &redact(&self.password))
            .field("db", &self.db)
            .finish()
    }
}

impl fmt::Display for RedisTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.ordinal, self.address)
    }
}

/// Elasticsearch endpoint and basic-auth credentials
#[derive(Clone, PartialEq, Eq)]
pub struct ElasticsearchConfig {
    pub url: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ElasticsearchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElasticsearchConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .finish()
    }
}

impl ElasticsearchConfig {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup(ELASTICSEARCH_URL_VAR)
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_ELASTICSEARCH_URL.to_string());

        Self {
            url,
            username: lookup(ELASTICSEARCH_USERNAME_VAR).unwrap_or_default(),
            password: lookup(ELASTICSEARCH_PASSWORD_VAR).unwrap_or_default(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(env_lookup)
    }
}

/// Enumerate Redis targets through `lookup`.
///
/// For i = 1, 2, ... reads `<address_prefix>_<i>` and `<password_prefix>_<i>`
/// and stops at the first address that is unset or empty. Addresses are not
/// validated here; a missing password becomes an empty one.
#[instrument(
    name = "redis_monitor_targets::enumerate",
    target = "helpers::targets",
    skip_all,
    level = "debug"
)]
pub fn enumerate_targets<F>(settings: &RedisSettings, lookup: F) -> Vec<RedisTarget>
where
    F: Fn(&str) -> Option<String>,
{
    let mut targets = Vec::new();

    for ordinal in 1.. {
        let address_var = format!("{}_{}", settings.address_prefix, ordinal);
        let address = match lookup(&address_var) {
            Some(address) if !address.is_empty() => address,
            _ => {
                tracing::debug!(
                    stop_variable = %address_var,
                    targets_found = targets.len(),
                    "Redis target enumeration stopped"
                );
                break;
            }
        };

        let password_var = format!("{}_{}", settings.password_prefix, ordinal);
        let target = RedisTarget {
            ordinal,
            address,
            password: lookup(&password_var).unwrap_or_default(),
            db: settings.db,
        };
        tracing::debug!(redis_target = %target, "Redis target configured");
        targets.push(target);
    }

    targets
}

/// Enumerate Redis targets from the process environment
pub fn targets_from_env(settings: &RedisSettings) -> Vec<RedisTarget> {
    enumerate_targets(settings, env_lookup)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<empty>" } else { "<redacted>" }
}
