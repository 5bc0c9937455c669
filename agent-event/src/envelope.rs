//! Envelope (event_id, timestamp, session_id, agent_id) applied to every
//! emitted event. `EnvelopeState` tracks the next event id for one session
//! stream; `SessionEvent` is the typed enveloped form.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::event::AgentEvent;

/// Envelope fields stamped onto each serialized event.
#[derive(Clone, Debug, Default)]
pub struct Envelope {
    /// Session ID; constant within a session.
    pub session_id: Option<String>,
    /// Emitting agent ID; constant within a session.
    pub agent_id: Option<String>,
    /// Per-event sequence number; monotonically increasing within a stream.
    pub event_id: Option<u64>,
    /// Emission time, RFC 3339.
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_agent_id(mut self, id: impl Into<String>) -> Self {
        self.agent_id = Some(id.into());
        self
    }

    pub fn with_event_id(mut self, id: u64) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = Some(ts);
        self
    }

    /// Merges envelope fields into the given JSON object (top-level only).
    /// Does not overwrite existing keys.
    pub fn inject_into(&self, obj: &mut Value) {
        let Some(obj) = obj.as_object_mut() else {
            return;
        };
        if let Some(ref id) = self.session_id {
            obj.entry("session_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(ref id) = self.agent_id {
            obj.entry("agent_id")
                .or_insert_with(|| Value::String(id.clone()));
        }
        if let Some(id) = self.event_id {
            obj.entry("event_id")
                .or_insert_with(|| Value::Number(serde_json::Number::from(id)));
        }
        if let Some(ts) = self.timestamp {
            obj.entry("timestamp")
                .or_insert_with(|| Value::String(ts.to_rfc3339()));
        }
    }
}

/// One enveloped event as delivered to subscribers and replay buffers.
#[derive(Clone, Debug, Serialize)]
pub struct SessionEvent {
    pub event_id: u64,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    #[serde(flatten)]
    pub event: AgentEvent,
}

impl SessionEvent {
    /// Serializes to the wire shape: payload fields plus envelope at top level.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The `type` discriminant of the wrapped event.
    pub fn event_type(&self) -> &'static str {
        self.event.event_type()
    }
}

/// Envelope state for one session stream: ids plus the next event id.
pub struct EnvelopeState {
    pub session_id: String,
    pub agent_id: String,
    next_event_id: u64,
}

impl EnvelopeState {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            next_event_id: 1,
        }
    }

    /// Wraps an event with the envelope, advancing the event id.
    pub fn wrap(&mut self, event: AgentEvent) -> SessionEvent {
        let event_id = self.next_event_id;
        self.next_event_id += 1;
        SessionEvent {
            event_id,
            timestamp: Utc::now(),
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
            event,
        }
    }

    /// Injects envelope fields into an already-serialized event value and
    /// advances the event id.
    pub fn inject_into(&mut self, value: &mut Value) {
        let env = Envelope::new()
            .with_session_id(&self.session_id)
            .with_agent_id(&self.agent_id)
            .with_event_id(self.next_event_id)
            .with_timestamp(Utc::now());
        self.next_event_id += 1;
        env.inject_into(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_inject_does_not_overwrite_existing_keys() {
        let mut obj = serde_json::json!({"type": "reasoning", "session_id": "keep"});
        let env = Envelope::new()
            .with_session_id("sess-1")
            .with_agent_id("enhanced")
            .with_event_id(7);
        env.inject_into(&mut obj);
        assert_eq!(obj["session_id"], "keep");
        assert_eq!(obj["agent_id"], "enhanced");
        assert_eq!(obj["event_id"], 7);
    }

    #[test]
    fn wrap_assigns_monotonic_event_ids() {
        let mut state = EnvelopeState::new("sess-1", "enhanced");
        let first = state.wrap(AgentEvent::Thought {
            content: "a".to_string(),
            thought_type: "analysis".to_string(),
        });
        let second = state.wrap(AgentEvent::Thought {
            content: "b".to_string(),
            thought_type: "analysis".to_string(),
        });
        assert_eq!(first.event_id, 1);
        assert_eq!(second.event_id, 2);
        assert_eq!(first.session_id, "sess-1");
        assert_eq!(second.agent_id, "enhanced");
    }

    #[test]
    fn session_event_value_carries_envelope_and_payload() {
        let mut state = EnvelopeState::new("sess-9", "enhanced");
        let ev = state.wrap(AgentEvent::Error {
            error_type: "planning".to_string(),
            message: "malformed plan".to_string(),
            recoverable: false,
            recovery_action: None,
        });
        let value = ev.to_value().unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["session_id"], "sess-9");
        assert_eq!(value["event_id"], 1);
        assert!(value["timestamp"].is_string());
    }
}
