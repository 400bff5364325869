//! Analytics domain models: queued messages and flush outcomes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use strum::Display;

/// Property name to value mapping, as supplied by application code.
pub type Properties = BTreeMap<String, Value>;

/// Backend endpoint a message is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    /// Event ingestion.
    Events,
    /// Profile updates.
    People,
}

/// A pre-validated payload queued for delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub endpoint: Endpoint,
    pub distinct_id: String,
    /// Complete wire payload for the destination backend.
    pub payload: Value,
}

impl Message {
    /// Event name carried by the payload, for logging and replay.
    pub fn event_name(&self) -> Option<&str> {
        self.payload.get("event").and_then(Value::as_str)
    }
}

/// Profile mutation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ProfileOpKind {
    /// Overwrite named properties, creating the profile if needed.
    Set,
    /// Set properties only where currently unset.
    SetOnce,
    /// Add a value to a list-valued property.
    Append,
    /// Set-union values into a list-valued property.
    Union,
    /// Apply a numeric delta.
    Increment,
}

impl ProfileOpKind {
    /// Operation marker key in the profile wire payload.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::Set => "$set",
            Self::SetOnce => "$set_once",
            Self::Append => "$append",
            Self::Union => "$union",
            Self::Increment => "$add",
        }
    }
}

/// Per-call options for operations that may mirror to the secondary backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackOptions {
    /// Suppress replication to the secondary backend for this call.
    pub skip_replication: bool,
}

impl TrackOptions {
    pub fn skip_replication() -> Self {
        Self {
            skip_replication: true,
        }
    }
}

/// Outcome of flushing one backend's queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushResult {
    /// Messages transmitted (or recorded, in mock mode).
    pub sent: usize,
    /// Messages dropped after the single retry failed.
    pub failed: usize,
}

/// Combined outcome of a session flush across both backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub primary: FlushResult,
    pub secondary: Option<FlushResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_profile_op_markers() {
        assert_eq!(ProfileOpKind::Set.marker(), "$set");
        assert_eq!(ProfileOpKind::SetOnce.marker(), "$set_once");
        assert_eq!(ProfileOpKind::Append.marker(), "$append");
        assert_eq!(ProfileOpKind::Union.marker(), "$union");
        assert_eq!(ProfileOpKind::Increment.marker(), "$add");
    }

    #[test]
    fn test_message_event_name() {
        let message = Message {
            endpoint: Endpoint::Events,
            distinct_id: "u1".to_string(),
            payload: json!({"event": "Signed Up", "properties": {}}),
        };
        assert_eq!(message.event_name(), Some("Signed Up"));

        let profile = Message {
            endpoint: Endpoint::People,
            distinct_id: "u1".to_string(),
            payload: json!({"$set": {}}),
        };
        assert_eq!(profile.event_name(), None);
    }
}
