//! Observation and envelope types passed from the source adapters to the signer.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::Identity;

/// Keys the envelope sets itself; adapters cannot override them.
const RESERVED_KEYS: [&str; 3] = ["feed", "timestamp", "identity"];

/// A source-reported value for one feed, consumed immediately by the signer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub feed: String,
    pub timestamp: String,
    /// Source-specific fields (price, volume, raw source responses, ...)
    pub data: Map<String, Value>,
}

impl RawObservation {
    pub fn new(feed: impl Into<String>, timestamp: impl Into<String>, mut data: Map<String, Value>) -> Self {
        for key in RESERVED_KEYS {
            data.remove(key);
        }
        Self { feed: feed.into(), timestamp: timestamp.into(), data }
    }
}

/// The signed part of a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeMessage {
    pub feed: String,
    pub timestamp: String,
    pub identity: Identity,
    #[serde(flatten)]
    pub data: Map<String, Value>,
}

/// Unsigned representation of one observation plus identity and timing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message: EnvelopeMessage,
    pub node_id: String,
    pub validation_timestamp: String,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(observation: RawObservation, identity: &Identity) -> Self {
        Self::at(observation, identity, Utc::now())
    }

    /// Build an envelope with an explicit validation timestamp.
    pub fn at(observation: RawObservation, identity: &Identity, validated: DateTime<Utc>) -> Self {
        Self {
            message: EnvelopeMessage {
                feed: observation.feed,
                timestamp: observation.timestamp,
                identity: identity.clone(),
                data: observation.data,
            },
            node_id: identity.node_id.clone(),
            validation_timestamp: validated.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }

    pub fn feed(&self) -> &str {
        &self.message.feed
    }
}

/// Render a timestamp the way envelopes carry them.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}
