use crate::types::{Hour, OfferId, UserId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Cannot access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {source_name} record at line {line}: {reason}")]
    MalformedRecord {
        source_name: &'static str,
        line: usize,
        reason: String,
    },

    #[error("Offer '{offer_id}' is not in the catalog")]
    UnknownOffer { offer_id: OfferId },

    #[error("No reception of offer '{offer_id}' for user '{user_id}' at or before {event} at time {time}")]
    OrphanEvent {
        user_id: UserId,
        offer_id: OfferId,
        event: &'static str,
        time: Hour,
    },

    #[error("Expiration of {event} for offer '{offer_id}' at time {time} exceeds the hour range")]
    ExpirationOverflow {
        offer_id: OfferId,
        event: &'static str,
        time: Hour,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub(crate) fn malformed(source_name: &'static str, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            source_name,
            line,
            reason: reason.into(),
        }
    }
}
