//! Typed transcript events.
//!
//! RULE: Payloads are decoded exactly once, at parse time, by event kind.
//! Nothing downstream of this module looks at the raw key-value object.

use crate::{
    error::{PipelineError, PipelineResult},
    jsonl,
    types::{Hour, OfferId, UserId},
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

pub const SOURCE_NAME: &str = "transcript";

/// One line of the transcript source, exactly as stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub person: UserId,
    pub event:  String,
    #[serde(default)]
    pub value:  Map<String, Value>,
    pub time:   Hour,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OfferReceived,
    OfferViewed,
    OfferCompleted,
    Transaction,
}

impl EventKind {
    /// Decode the free-text label used by the transcript source.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "offer received"  => Some(Self::OfferReceived),
            "offer viewed"    => Some(Self::OfferViewed),
            "offer completed" => Some(Self::OfferCompleted),
            "transaction"     => Some(Self::Transaction),
            _ => None,
        }
    }

    /// Stable snake_case name, also used as the cache column value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OfferReceived  => "offer_received",
            Self::OfferViewed    => "offer_viewed",
            Self::OfferCompleted => "offer_completed",
            Self::Transaction    => "transaction",
        }
    }

    pub fn parse_str(name: &str) -> Option<Self> {
        match name {
            "offer_received"  => Some(Self::OfferReceived),
            "offer_viewed"    => Some(Self::OfferViewed),
            "offer_completed" => Some(Self::OfferCompleted),
            "transaction"     => Some(Self::Transaction),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    Offer { offer_id: OfferId },
    Transaction { amount: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub user_id: UserId,
    pub kind:    EventKind,
    pub payload: EventPayload,
    pub time:    Hour,
}

/// Natural key of an offer event. Used for deduplication and as the
/// expiration cache key, so it must never depend on row position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub user_id:  UserId,
    pub offer_id: OfferId,
    pub kind:     EventKind,
    pub time:     Hour,
}

// The source writes the offer id under either spelling depending on kind.
const OFFER_ID_KEYS: [&str; 2] = ["offer id", "offer_id"];

impl RawEvent {
    /// Decode a transcript record. `line` is 1-based and only used for errors.
    pub fn from_record(record: TranscriptRecord, line: usize) -> PipelineResult<Self> {
        let kind = EventKind::from_label(&record.event).ok_or_else(|| {
            PipelineError::malformed(SOURCE_NAME, line, format!("unknown event label '{}'", record.event))
        })?;

        let payload = match kind {
            EventKind::Transaction => {
                let amount = record
                    .value
                    .get("amount")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| {
                        PipelineError::malformed(SOURCE_NAME, line, "transaction without numeric 'amount'")
                    })?;
                EventPayload::Transaction { amount }
            }
            _ => {
                let offer_id = OFFER_ID_KEYS
                    .iter()
                    .find_map(|k| record.value.get(*k))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        PipelineError::malformed(
                            SOURCE_NAME,
                            line,
                            format!("{} without an offer id", kind.as_str()),
                        )
                    })?;
                EventPayload::Offer { offer_id: offer_id.to_string() }
            }
        };

        Ok(Self {
            user_id: record.person,
            kind,
            payload,
            time: record.time,
        })
    }

    pub fn offer_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Offer { offer_id } => Some(offer_id),
            EventPayload::Transaction { .. } => None,
        }
    }

    /// The natural key, or None for transactions.
    pub fn key(&self) -> Option<EventKey> {
        self.offer_id().map(|offer_id| EventKey {
            user_id:  self.user_id.clone(),
            offer_id: offer_id.to_string(),
            kind:     self.kind,
            time:     self.time,
        })
    }
}

/// Decode numbered transcript records. The first bad record aborts.
pub fn decode_transcript(records: Vec<(usize, TranscriptRecord)>) -> PipelineResult<Vec<RawEvent>> {
    records
        .into_iter()
        .map(|(line, record)| RawEvent::from_record(record, line))
        .collect()
}

pub fn load_transcript(path: &Path) -> PipelineResult<Vec<RawEvent>> {
    decode_transcript(jsonl::read_numbered(path, SOURCE_NAME)?)
}
