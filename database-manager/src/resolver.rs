// Config resolver: environment snapshot → one ConnectionDescriptor per logical database
// Pure and deterministic, so startup can fail before any socket is opened

use crate::config::PoolConfig;
use crate::errors::ConfigError;
use crate::models::{ConnectionDescriptor, DatabaseIdentifier};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use url::Url;

/// Prefix of the required per-database connection string
pub const URI_PREFIX: &str = "DATABASE_URI_";
/// Optional per-database override of `pool.max_connections`
pub const MAX_CONNECTIONS_PREFIX: &str = "DATABASE_MAX_CONNECTIONS_";
/// Optional per-database override of `pool.min_connections`
pub const MIN_CONNECTIONS_PREFIX: &str = "DATABASE_MIN_CONNECTIONS_";
/// Optional per-database override of `pool.acquire_timeout_ms`
pub const ACQUIRE_TIMEOUT_PREFIX: &str = "DATABASE_ACQUIRE_TIMEOUT_MS_";

const PREFIXES: [&str; 4] = [
    URI_PREFIX,
    MAX_CONNECTIONS_PREFIX,
    MIN_CONNECTIONS_PREFIX,
    ACQUIRE_TIMEOUT_PREFIX,
];

/// Resolved configuration, ordered by identifier
pub type ResolvedDatabases = BTreeMap<DatabaseIdentifier, ConnectionDescriptor>;

/// Immutable copy of the environment variables the resolver looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment
    pub fn capture() -> Self {
        std::env::vars().collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Resolve every logical database from the environment.
///
/// Every identifier needs a `DATABASE_URI_<NAME>`; any database-prefixed
/// variable naming something outside the closed set is rejected.
pub fn resolve(env: &EnvSnapshot, defaults: &PoolConfig) -> Result<ResolvedDatabases, ConfigError> {
    check_unknown_identifiers(env)?;

    DatabaseIdentifier::ALL
        .into_iter()
        .map(|identifier| Ok((identifier, resolve_one(env, defaults, identifier)?)))
        .collect()
}

fn check_unknown_identifiers(env: &EnvSnapshot) -> Result<(), ConfigError> {
    let mut unknown: Vec<(&str, &str)> = env
        .iter()
        .filter_map(|(key, _)| {
            let name = PREFIXES.iter().find_map(|prefix| key.strip_prefix(prefix))?;
            let known = DatabaseIdentifier::ALL
                .iter()
                .any(|id| id.env_suffix() == name);
            (!known).then_some((key, name))
        })
        .collect();

    // HashMap order is random; sort so the same environment always reports the same error
    unknown.sort_unstable();

    match unknown.first() {
        Some((variable, name)) => Err(ConfigError::UnknownIdentifier {
            name: name.to_string(),
            variable: variable.to_string(),
        }),
        None => Ok(()),
    }
}

fn resolve_one(
    env: &EnvSnapshot,
    defaults: &PoolConfig,
    identifier: DatabaseIdentifier,
) -> Result<ConnectionDescriptor, ConfigError> {
    let uri_var = format!("{}{}", URI_PREFIX, identifier.env_suffix());
    let raw_uri = env
        .get(&uri_var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingVariable(uri_var.clone()))?;
    let uri = parse_uri(&uri_var, raw_uri.trim())?;

    let max_connections = override_or(
        env,
        MAX_CONNECTIONS_PREFIX,
        identifier,
        defaults.max_connections,
    )?;
    let min_connections = override_or(
        env,
        MIN_CONNECTIONS_PREFIX,
        identifier,
        defaults.min_connections,
    )?;
    let acquire_timeout_ms = override_or(
        env,
        ACQUIRE_TIMEOUT_PREFIX,
        identifier,
        defaults.acquire_timeout_ms,
    )?;

    if max_connections == 0 {
        return Err(ConfigError::InvalidFormat {
            variable: format!("{}{}", MAX_CONNECTIONS_PREFIX, identifier.env_suffix()),
            reason: "must be greater than 0".to_string(),
        });
    }
    if min_connections > max_connections {
        return Err(ConfigError::InvalidFormat {
            variable: format!("{}{}", MIN_CONNECTIONS_PREFIX, identifier.env_suffix()),
            reason: format!(
                "min_connections {} exceeds max_connections {}",
                min_connections, max_connections
            ),
        });
    }
    if acquire_timeout_ms == 0 {
        return Err(ConfigError::InvalidFormat {
            variable: format!("{}{}", ACQUIRE_TIMEOUT_PREFIX, identifier.env_suffix()),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(ConnectionDescriptor::new(
        identifier,
        uri,
        max_connections,
        min_connections,
        Duration::from_millis(acquire_timeout_ms),
        defaults.connect_timeout(),
        defaults.connect_retries,
        defaults.retry_base_delay(),
    ))
}

fn parse_uri(variable: &str, raw: &str) -> Result<Url, ConfigError> {
    let uri = Url::parse(raw).map_err(|e| ConfigError::InvalidFormat {
        variable: variable.to_string(),
        reason: e.to_string(),
    })?;

    if !uri.has_host() || uri.host_str().is_some_and(str::is_empty) {
        return Err(ConfigError::InvalidFormat {
            variable: variable.to_string(),
            reason: "connection URI has no host".to_string(),
        });
    }

    Ok(uri)
}

fn override_or<T: std::str::FromStr>(
    env: &EnvSnapshot,
    prefix: &str,
    identifier: DatabaseIdentifier,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let variable = format!("{}{}", prefix, identifier.env_suffix());
    match env.get(&variable) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidFormat {
            variable,
            reason: e.to_string(),
        }),
    }
}
