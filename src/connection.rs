//! Connection Resolver
//!
//! Builds validated connection descriptors for the source and destination
//! stores. Pure construction: no network I/O happens here.

use std::fmt;

use sqlx::postgres::PgConnectOptions;

use crate::config::{ConfigError, ConfigValues};

/// Which side of the pipeline an endpoint is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Source,
    Destination,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Source => write!(f, "source"),
            Endpoint::Destination => write!(f, "destination"),
        }
    }
}

/// Keys making up one endpoint's configuration namespace
struct EndpointKeys {
    host: &'static str,
    port: &'static str,
    user: &'static str,
    password: &'static str,
    database: &'static str,
}

const SOURCE_KEYS: EndpointKeys = EndpointKeys {
    host: "SOURCE_POSTGRES_HOST",
    port: "SOURCE_POSTGRES_PORT",
    user: "SOURCE_POSTGRES_USER",
    password: "SOURCE_POSTGRES_PASSWORD",
    database: "SOURCE_POSTGRES_DATABASE",
};

const DESTINATION_KEYS: EndpointKeys = EndpointKeys {
    host: "POSTGRES_HOST",
    port: "POSTGRES_PORT",
    user: "POSTGRES_USER",
    password: "POSTGRES_PASSWORD",
    database: "POSTGRES_DATABASE",
};

/// Local development defaults for the destination store
const DESTINATION_DEFAULTS: [&str; 5] = ["localhost", "5432", "demouser", "demopassword", "analytics"];

/// Opaque connection parameters for one PostgreSQL endpoint
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
}

impl ConnectionDescriptor {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// sqlx connect options for this endpoint
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    fn resolve(
        values: &ConfigValues,
        keys: &EndpointKeys,
        defaults: Option<&[&'static str; 5]>,
    ) -> Result<Self, ConfigError> {
        let lookup = |key: &'static str, index: usize| -> Result<String, ConfigError> {
            values
                .get(key)
                .or_else(|| defaults.map(|d| d[index]))
                .map(str::to_string)
                .ok_or(ConfigError::MissingEnv(key))
        };

        let host = lookup(keys.host, 0)?;
        let port = lookup(keys.port, 1)?
            .parse()
            .map_err(|_| ConfigError::InvalidValue(keys.port))?;
        let user = lookup(keys.user, 2)?;
        let password = lookup(keys.password, 3)?;
        let database = lookup(keys.database, 4)?;

        Ok(Self {
            host,
            port,
            user,
            password,
            database,
        })
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Descriptor for the operational source store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor(ConnectionDescriptor);

impl SourceDescriptor {
    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.0
    }
}

/// Descriptor for the analytics destination store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationDescriptor(ConnectionDescriptor);

impl DestinationDescriptor {
    pub fn connection(&self) -> &ConnectionDescriptor {
        &self.0
    }
}

/// Both descriptors for one pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
}

/// Resolves named configuration values into endpoint descriptors
pub struct ConnectionResolver;

impl ConnectionResolver {
    /// Resolve the source endpoint. Every key is required.
    pub fn resolve_source(values: &ConfigValues) -> Result<SourceDescriptor, ConfigError> {
        ConnectionDescriptor::resolve(values, &SOURCE_KEYS, None).map(SourceDescriptor)
    }

    /// Resolve the destination endpoint, falling back to local defaults.
    pub fn resolve_destination(values: &ConfigValues) -> Result<DestinationDescriptor, ConfigError> {
        ConnectionDescriptor::resolve(values, &DESTINATION_KEYS, Some(&DESTINATION_DEFAULTS))
            .map(DestinationDescriptor)
    }

    /// Resolve both endpoints, source first
    pub fn resolve(values: &ConfigValues) -> Result<ResolvedEndpoints, ConfigError> {
        Ok(ResolvedEndpoints {
            source: Self::resolve_source(values)?,
            destination: Self::resolve_destination(values)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_values() -> ConfigValues {
        ConfigValues::from_pairs([
            ("SOURCE_POSTGRES_HOST", "ops-db.internal"),
            ("SOURCE_POSTGRES_PORT", "5433"),
            ("SOURCE_POSTGRES_USER", "reader"),
            ("SOURCE_POSTGRES_PASSWORD", "s3cret"),
            ("SOURCE_POSTGRES_DATABASE", "clinic"),
        ])
    }

    #[test]
    fn test_resolve_source_complete() {
        let source = ConnectionResolver::resolve_source(&source_values()).unwrap();
        let conn = source.connection();

        assert_eq!(conn.host(), "ops-db.internal");
        assert_eq!(conn.port(), 5433);
        assert_eq!(conn.user(), "reader");
        assert_eq!(conn.database(), "clinic");
        assert_eq!(conn.to_string(), "ops-db.internal:5433/clinic");
    }

    #[test]
    fn test_source_has_no_defaults() {
        let err = ConnectionResolver::resolve_source(&ConfigValues::default()).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv("SOURCE_POSTGRES_HOST"));

        let values = source_values().without("SOURCE_POSTGRES_PASSWORD");
        let err = ConnectionResolver::resolve_source(&values).unwrap_err();
        assert_eq!(err, ConfigError::MissingEnv("SOURCE_POSTGRES_PASSWORD"));
    }

    #[test]
    fn test_first_missing_key_is_reported() {
        let values = source_values()
            .without("SOURCE_POSTGRES_USER")
            .without("SOURCE_POSTGRES_DATABASE");
        let err = ConnectionResolver::resolve_source(&values).unwrap_err();
        assert_eq!(err.key(), "SOURCE_POSTGRES_USER");
    }

    #[test]
    fn test_destination_defaults() {
        let dest = ConnectionResolver::resolve_destination(&ConfigValues::default()).unwrap();
        let conn = dest.connection();

        assert_eq!(conn.host(), "localhost");
        assert_eq!(conn.port(), 5432);
        assert_eq!(conn.user(), "demouser");
        assert_eq!(conn.database(), "analytics");
    }

    #[test]
    fn test_namespaces_are_disjoint() {
        // Source keys never satisfy the destination and vice versa
        let dest = ConnectionResolver::resolve_destination(&source_values()).unwrap();
        assert_eq!(dest.connection().host(), "localhost");

        let values = ConfigValues::default().with("POSTGRES_HOST", "warehouse");
        let err = ConnectionResolver::resolve_source(&values).unwrap_err();
        assert_eq!(err.key(), "SOURCE_POSTGRES_HOST");
    }

    #[test]
    fn test_invalid_port() {
        let values = source_values().with("SOURCE_POSTGRES_PORT", "five");
        let err = ConnectionResolver::resolve_source(&values).unwrap_err();
        assert_eq!(err, ConfigError::InvalidValue("SOURCE_POSTGRES_PORT"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let source = ConnectionResolver::resolve_source(&source_values()).unwrap();
        let printed = format!("{:?}", source);
        assert!(!printed.contains("s3cret"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_resolve_both() {
        let endpoints = ConnectionResolver::resolve(&source_values()).unwrap();
        assert_eq!(endpoints.source.connection().database(), "clinic");
        assert_eq!(endpoints.destination.connection().database(), "analytics");
    }
}
