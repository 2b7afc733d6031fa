//! Query error types
//!
//! Every failure of a broker metric query is terminal and local to that
//! query. The kind tells callers (and operators) which stage gave up:
//! configuration lookup, topology, planning, dispatch, the remote side,
//! the delivery protocol, or the caller's own deadline.

use std::fmt;

/// Query error with context
#[derive(Debug)]
pub struct QueryError {
    /// Error kind for programmatic handling
    pub kind: QueryErrorKind,
    /// Human-readable message
    pub message: String,
    /// Optional source error
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl QueryError {
    /// Create a new query error
    pub fn new(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Add source error for error chaining
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Target database is unknown to cluster state
    pub fn database_not_found(database: &str) -> Self {
        Self::new(
            QueryErrorKind::DatabaseNotFound,
            format!("database not found: {}", database),
        )
    }

    /// No storage node holds a queryable replica of the database
    pub fn replica_not_found(database: &str) -> Self {
        Self::new(
            QueryErrorKind::ReplicaNotFound,
            format!("no queryable replica for database: {}", database),
        )
    }

    /// Cluster state could not be read
    pub fn state(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(QueryErrorKind::StateUnavailable, source.to_string()).with_source(source)
    }

    /// Create a planning error
    pub fn planning(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::PlanningError, message)
    }

    /// Task dispatch rejected the plan
    pub fn dispatch(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::DispatchError, message)
    }

    /// Wrap an error reported by a remote node
    ///
    /// The message is the remote error's own text and the error is kept as
    /// the source, so nothing about it is lost.
    pub fn remote(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(QueryErrorKind::RemoteError, source.to_string()).with_source(source)
    }

    /// Delivery channel closed without a terminal event
    pub fn missing_response() -> Self {
        Self::new(
            QueryErrorKind::MissingResponse,
            "missing response from sent tasks",
        )
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Timeout, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(QueryErrorKind::Internal, message)
    }

    /// Whether the caller's deadline fired
    pub fn is_timeout(&self) -> bool {
        self.kind == QueryErrorKind::Timeout
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            // Remote and state errors surface verbatim
            QueryErrorKind::RemoteError | QueryErrorKind::StateUnavailable => {
                write!(f, "{}", self.message)
            },
            _ => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Categories of query errors for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryErrorKind {
    /// Target database is not configured
    DatabaseNotFound,
    /// No live storage replica holds the database
    ReplicaNotFound,
    /// Cluster state lookup failed for another reason than a missing key
    StateUnavailable,
    /// Query shape unsupported by the current topology
    PlanningError,
    /// Task dispatch refused the physical plan
    DispatchError,
    /// A storage node failed while executing its part
    RemoteError,
    /// Delivery channel closed without a value
    MissingResponse,
    /// Caller cancellation fired before delivery
    Timeout,
    /// Internal error (bug, unexpected state)
    Internal,
}

impl QueryErrorKind {
    /// Short label used in metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryErrorKind::DatabaseNotFound => "database_not_found",
            QueryErrorKind::ReplicaNotFound => "replica_not_found",
            QueryErrorKind::StateUnavailable => "state_unavailable",
            QueryErrorKind::PlanningError => "planning_error",
            QueryErrorKind::DispatchError => "dispatch_error",
            QueryErrorKind::RemoteError => "remote_error",
            QueryErrorKind::MissingResponse => "missing_response",
            QueryErrorKind::Timeout => "timeout",
            QueryErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for QueryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryErrorKind::DatabaseNotFound => write!(f, "DatabaseNotFound"),
            QueryErrorKind::ReplicaNotFound => write!(f, "ReplicaNotFound"),
            QueryErrorKind::StateUnavailable => write!(f, "StateUnavailable"),
            QueryErrorKind::PlanningError => write!(f, "PlanningError"),
            QueryErrorKind::DispatchError => write!(f, "DispatchError"),
            QueryErrorKind::RemoteError => write!(f, "RemoteError"),
            QueryErrorKind::MissingResponse => write!(f, "MissingResponse"),
            QueryErrorKind::Timeout => write!(f, "Timeout"),
            QueryErrorKind::Internal => write!(f, "Internal"),
        }
    }
}

/// Result type alias for query operations
pub type QueryResult<T> = std::result::Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = QueryError::database_not_found("metrics");
        assert_eq!(err.kind, QueryErrorKind::DatabaseNotFound);
        assert!(err.message.contains("metrics"));
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::planning("empty select list");
        let display = format!("{}", err);
        assert!(display.contains("PlanningError"));
        assert!(display.contains("empty select list"));
    }

    #[test]
    fn test_remote_error_is_verbatim() {
        use std::error::Error;
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "shard 3 unavailable");
        let err = QueryError::remote(io_err);
        assert_eq!(err.to_string(), "shard 3 unavailable");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_missing_response_distinct_from_remote() {
        let err = QueryError::missing_response();
        assert_eq!(err.kind, QueryErrorKind::MissingResponse);
        assert_ne!(err.kind, QueryErrorKind::RemoteError);
        assert!(!err.is_timeout());
    }
}
