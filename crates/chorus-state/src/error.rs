//! Error types for the state layer.

use thiserror::Error;

use crate::Snowflake;

/// Errors that can occur while synchronizing gateway events.
///
/// Absence is never an error: lookups and removals of unknown entities
/// return `None`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The payload could not be decoded into the expected shape.
    #[error("malformed {event} payload: {source}")]
    Payload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A field the handler requires was absent from the payload.
    #[error("{event} payload is missing required field `{field}`")]
    MissingField {
        event: &'static str,
        field: &'static str,
    },

    /// Command reconciliation against the remote failed.
    #[error("command reconciliation failed for application {application_id}: {message}")]
    Commands {
        application_id: Snowflake,
        message: String,
    },

    /// Settings could not be parsed.
    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
}
