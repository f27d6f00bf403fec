//! Versioned pub/sub envelopes.
//!
//! Envelopes borrow the entity they wrap so row callbacks can serialize
//! without cloning. Field names are camelCase on the wire:
//!
//! ```json
//! {"version":"v1","module":"m1","entity":{...},"callerIdentity":"c2b1...","action":"craft_item"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder used when the caller identity or action cannot be resolved.
pub const UNKNOWN_ORIGIN: &str = "UNKNOWN";

/// Caller and action stamped on gateway-originated system events.
pub const SYSTEM_ORIGIN: &str = "SYSTEM";

/// Envelope schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeVersion {
    /// First published version.
    #[serde(rename = "v1")]
    V1,
}

/// Insert, delete, and system event envelope.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<'a, T> {
    /// Schema version.
    pub version: EnvelopeVersion,
    /// Module that produced the event.
    pub module: &'a str,
    /// Wrapped entity.
    pub entity: &'a T,
    /// Identity of the caller that caused the change.
    pub caller_identity: &'a str,
    /// Name of the originating action.
    pub action: &'a str,
}

impl<'a, T> Envelope<'a, T> {
    /// Wrap an entity, falling back to [`UNKNOWN_ORIGIN`] for missing provenance.
    pub fn new(
        module: &'a str,
        entity: &'a T,
        caller_identity: Option<&'a str>,
        action: Option<&'a str>,
    ) -> Self {
        Self {
            version: EnvelopeVersion::V1,
            module,
            entity,
            caller_identity: caller_identity.unwrap_or(UNKNOWN_ORIGIN),
            action: action.unwrap_or(UNKNOWN_ORIGIN),
        }
    }
}

/// Update envelope carrying both the previous and the new entity.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvelope<'a, T> {
    /// Schema version.
    pub version: EnvelopeVersion,
    /// Module that produced the event.
    pub module: &'a str,
    /// Entity before the change.
    pub old_entity: &'a T,
    /// Entity after the change.
    pub new_entity: &'a T,
    /// Identity of the caller that caused the change.
    pub caller_identity: &'a str,
    /// Name of the originating action.
    pub action: &'a str,
}

impl<'a, T> UpdateEnvelope<'a, T> {
    /// Wrap an old/new pair, falling back to [`UNKNOWN_ORIGIN`] for missing provenance.
    pub fn new(
        module: &'a str,
        old_entity: &'a T,
        new_entity: &'a T,
        caller_identity: Option<&'a str>,
        action: Option<&'a str>,
    ) -> Self {
        Self {
            version: EnvelopeVersion::V1,
            module,
            old_entity,
            new_entity,
            caller_identity: caller_identity.unwrap_or(UNKNOWN_ORIGIN),
            action: action.unwrap_or(UNKNOWN_ORIGIN),
        }
    }
}

/// An event about the gateway itself, published on `system.{EVENT_TYPE}`.
pub trait SystemEvent: Serialize {
    /// Event type name used in the topic.
    const EVENT_TYPE: &'static str;

    /// Topic this event is published on.
    fn topic() -> String {
        format!("system.{}", Self::EVENT_TYPE)
    }
}

/// Liveness signal published periodically while an epoch is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatEvent {
    /// Publishing service name, `gateway-{module}`.
    pub application: String,
    /// Wall-clock publish time.
    pub published_at: DateTime<Utc>,
    /// Sequence number, starting at 0 for each epoch.
    pub seq: u64,
}

impl SystemEvent for HeartbeatEvent {
    const EVENT_TYPE: &'static str = "HeartbeatEvent";
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_defaults_missing_provenance() {
        let entity = json!({"id": "7"});
        let env = Envelope::new("m1", &entity, None, Some("craft"));
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["version"], "v1");
        assert_eq!(value["callerIdentity"], UNKNOWN_ORIGIN);
        assert_eq!(value["action"], "craft");
        assert_eq!(value["entity"]["id"], "7");
    }

    #[test]
    fn update_envelope_carries_both_entities() {
        let old = json!({"id": "1", "n": 1});
        let new = json!({"id": "1", "n": 2});
        let env = UpdateEnvelope::new("m1", &old, &new, Some("abc"), None);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["oldEntity"]["n"], 1);
        assert_eq!(value["newEntity"]["n"], 2);
        assert_eq!(value["callerIdentity"], "abc");
        assert_eq!(value["action"], UNKNOWN_ORIGIN);
    }

    #[test]
    fn heartbeat_topic() {
        assert_eq!(HeartbeatEvent::topic(), "system.HeartbeatEvent");
    }
}
