//! Error types for the analytics domain.

use crate::catalog::{Category, DataType};
use crate::query::ProfileMatch;
use thiserror::Error;

/// Result type for analytics operations.
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Validation-time errors, raised synchronously at the call site.
///
/// Nothing is buffered when one of these is returned; the caller either
/// handles it or lets it propagate as a genuine application bug.
#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    /// Event name is not a member of the event catalog.
    #[error("Event '{0}' is not a member of the event catalog")]
    UnknownEvent(String),

    /// Property name is not a member of its catalog.
    #[error("Property '{name}' is not a member of the {category} catalog")]
    UnknownProperty { name: String, category: Category },

    /// Property value does not match the declared data type.
    #[error("Property '{name}' expects a {expected} value, got {got}")]
    InvalidValue {
        name: String,
        expected: DataType,
        got: String,
    },

    /// Operation requires a distinct id and none was resolved.
    #[error("distinct_id must be set before events can be tracked or profiles updated")]
    MissingDistinctId,

    /// Two catalog entries share a name. Detected at catalog build time.
    #[error("Catalog name '{name}' is declared in both the {first} and {second} catalogs")]
    DuplicateName {
        name: String,
        first: Category,
        second: Category,
    },
}

/// Flush-time backend errors.
///
/// Always caught at the consumer boundary, logged with replay context and
/// converted into a `FlushResult` count. Never raised to request code.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The HTTP request itself failed (connect, timeout, TLS).
    #[error("{backend}: transport failure: {message}")]
    Transport {
        backend: &'static str,
        message: String,
    },

    /// The backend answered with a non-success status.
    #[error("{backend}: batch rejected with status {status}: {body}")]
    Rejected {
        backend: &'static str,
        status: u16,
        body: String,
    },

    /// A payload could not be serialized for the wire.
    #[error("{backend}: failed to encode batch: {message}")]
    Encoding {
        backend: &'static str,
        message: String,
    },
}

/// Programming errors in the session lifecycle.
///
/// A session that reached a terminal state must never be used again; hitting
/// one of these means the lifecycle binding is wired wrong, not that the
/// input was bad.
#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    #[error("'{operation}' called on a session that was already flushed")]
    AlreadyFlushed { operation: &'static str },

    #[error("'{operation}' called on a session that was already discarded")]
    AlreadyDiscarded { operation: &'static str },
}

/// Errors from the read-only query client.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The query client needs an api secret and none was configured.
    #[error("api_secret is required for the analytics query client")]
    MissingApiSecret,

    /// The JQL request failed in transport.
    #[error("JQL request failed: {0}")]
    Transport(String),

    /// The JQL request was rejected by the backend.
    #[error("JQL request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The JQL response body was not the expected shape.
    #[error("Failed to parse JQL response: {0}")]
    Parse(String),

    /// A profile lookup matched more than one profile. Surfaced with the
    /// full match list so the caller never acts on an arbitrary profile.
    #[error("Found more than one profile for email '{email}': {matches:?}")]
    MultipleProfilesFound {
        email: String,
        matches: Vec<ProfileMatch>,
    },
}

/// Umbrella error for the analytics domain.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("Configuration error: {0}")]
    Config(#[from] core_config::ConfigError),
}
