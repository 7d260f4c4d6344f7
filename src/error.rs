//! Error handling module
//!
//! Error taxonomy shared by the resolver, replicator and aggregate builder,
//! plus classification of sqlx failures into it.

use crate::config::ConfigError;
use crate::connection::Endpoint;

/// Pipeline-wide Result type
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Broad category of a pipeline error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Connection,
    Schema,
    Computation,
}

/// Pipeline error types
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Missing or invalid connection parameter
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Endpoint unreachable or connection lost mid-run
    #[error("Connection error ({endpoint}): {message}")]
    Connection { endpoint: Endpoint, message: String },

    /// Expected table or relation absent
    #[error("Schema error: {0}")]
    Schema(String),

    /// Input data or aggregate definition prevents aggregation
    #[error("Computation error: {0}")]
    Computation(String),

    /// Some tables were loaded before a later table failed
    #[error("Replication of '{table}' failed after loading [{}]: {cause}", .completed.join(", "))]
    PartialReplication {
        completed: Vec<String>,
        table: String,
        #[source]
        cause: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn connection(endpoint: Endpoint, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn computation(message: impl Into<String>) -> Self {
        Self::Computation(message.into())
    }

    /// Classify an sqlx error raised while talking to `endpoint`
    pub fn from_sqlx(endpoint: Endpoint, err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // undefined_table, invalid_schema_name, undefined_column, wrong_object_type
                Some("42P01") | Some("3F000") | Some("42703") | Some("42809") => {
                    Self::Schema(db_err.message().to_string())
                }
                // connection_exception class, admin_shutdown, cannot_connect_now
                Some(code) if code.starts_with("08") || code == "57P01" || code == "57P03" => {
                    Self::connection(endpoint, db_err.message())
                }
                // invalid_password, invalid_authorization_specification, invalid_catalog_name
                Some("28P01") | Some("28000") | Some("3D000") => {
                    Self::connection(endpoint, db_err.message())
                }
                _ => Self::Computation(db_err.message().to_string()),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Self::connection(endpoint, err.to_string()),
            sqlx::Error::RowNotFound
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. } => Self::Schema(err.to_string()),
            _ => Self::Computation(err.to_string()),
        }
    }

    /// Category of this error; partial replication reports its cause's kind
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Configuration(_) => ErrorKind::Configuration,
            PipelineError::Connection { .. } => ErrorKind::Connection,
            PipelineError::Schema(_) => ErrorKind::Schema,
            PipelineError::Computation(_) => ErrorKind::Computation,
            PipelineError::PartialReplication { cause, .. } => cause.kind(),
        }
    }

    /// Whether a fresh invocation may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_and_retryable() {
        let err = PipelineError::connection(Endpoint::Source, "refused");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Connection error (source): refused");

        let err = PipelineError::schema("relation \"analytics.vitals\" does not exist");
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(!err.is_retryable());

        let err: PipelineError = ConfigError::MissingEnv("SOURCE_POSTGRES_HOST").into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_partial_replication_display() {
        let err = PipelineError::PartialReplication {
            completed: vec!["patients".to_string()],
            table: "vitals".to_string(),
            cause: Box::new(PipelineError::connection(Endpoint::Destination, "reset by peer")),
        };

        assert_eq!(err.kind(), ErrorKind::Connection);
        let msg = err.to_string();
        assert!(msg.contains("'vitals'"));
        assert!(msg.contains("[patients]"));
    }

    #[test]
    fn test_classify_sqlx_errors() {
        let err = PipelineError::from_sqlx(Endpoint::Destination, sqlx::Error::PoolTimedOut);
        assert!(matches!(
            err,
            PipelineError::Connection {
                endpoint: Endpoint::Destination,
                ..
            }
        ));

        let err = PipelineError::from_sqlx(
            Endpoint::Source,
            sqlx::Error::ColumnNotFound("date_of_birth".to_string()),
        );
        assert_eq!(err.kind(), ErrorKind::Schema);
    }
}
