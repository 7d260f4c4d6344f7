//! Configuration module
//!
//! Loads configuration once at startup. Core components only ever see the
//! resulting [`Config`] value; nothing below this module reads the environment.

use std::collections::BTreeMap;
use std::env;

use crate::aggregate::AggregateSpec;

/// Named configuration values (e.g. `POSTGRES_HOST`), captured once.
///
/// The connection resolver reads endpoint settings from here instead of the
/// process environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigValues {
    values: BTreeMap<String, String>,
}

impl ConfigValues {
    /// Build from arbitrary key/value pairs. Blank values are treated as absent.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();
        Self { values }
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Get a value or fall back to a default
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Set a value, returning the updated set
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Remove a value, returning the updated set
    pub fn without(mut self, key: &str) -> Self {
        self.values.remove(key);
        self
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Raw named values used for endpoint resolution
    pub values: ConfigValues,

    /// Maximum database connections per pool
    pub database_max_connections: u32,

    /// Dashboard server host
    pub host: String,

    /// Dashboard server port
    pub port: u16,

    /// Schema the source tables live in
    pub source_schema: String,

    /// Destination namespace holding the replica and aggregates
    pub replica_namespace: String,

    /// Aggregate relation shape published by the builder
    pub aggregate: AggregateSpec,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_values(ConfigValues::from_pairs(env::vars()))
    }

    /// Build configuration from an explicit set of values
    pub fn from_values(values: ConfigValues) -> Result<Self, ConfigError> {
        let database_max_connections = values
            .get_or("DATABASE_MAX_CONNECTIONS", "5")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("DATABASE_MAX_CONNECTIONS"))?;

        let host = values.get_or("HOST", "0.0.0.0").to_string();

        let port = values
            .get_or("PORT", "5001")
            .parse()
            .map_err(|_| ConfigError::InvalidValue("PORT"))?;

        let source_schema = values.get_or("SOURCE_SCHEMA", "public").to_string();
        let replica_namespace = values.get_or("REPLICA_NAMESPACE", "analytics").to_string();

        if !crate::store::is_valid_identifier(&source_schema) {
            return Err(ConfigError::InvalidValue("SOURCE_SCHEMA"));
        }
        if !crate::store::is_valid_identifier(&replica_namespace) {
            return Err(ConfigError::InvalidValue("REPLICA_NAMESPACE"));
        }

        let aggregate = match values.get_or("AGGREGATE_SHAPE", "pulse") {
            "pulse" => AggregateSpec::pulse_by_age_group(),
            "vitals" => AggregateSpec::vitals_by_age_group(),
            _ => return Err(ConfigError::InvalidValue("AGGREGATE_SHAPE")),
        };

        Ok(Self {
            values,
            database_max_connections,
            host,
            port,
            source_schema,
            replica_namespace,
            aggregate,
        })
    }
}

/// Configuration error types
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration value: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for configuration value: {0}")]
    InvalidValue(&'static str),
}

impl ConfigError {
    /// Name of the offending key
    pub fn key(&self) -> &'static str {
        match self {
            ConfigError::MissingEnv(key) | ConfigError::InvalidValue(key) => key,
        }
    }
}
