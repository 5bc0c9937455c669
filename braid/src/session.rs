//! Request context supplied by the host: a stable session id plus optional
//! user attributes. Never persisted by the core.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque per-request context. At minimum carries a stable `session_id`;
/// anything else (timezone, location, preferences, host extras) rides
/// along for planning and synthesis.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub preferences: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// The session id, or "default" when the host supplied none.
    pub fn session_id(&self) -> &str {
        self.session_id.as_deref().unwrap_or("default")
    }

    /// A fresh context with a generated (v4) session id.
    pub fn generated() -> Self {
        Self::new().with_session_id(uuid::Uuid::new_v4().to_string())
    }

    /// Digest of the planning-relevant attributes, used in plan cache keys.
    /// `None` when nothing beyond the session id is set, so context-free
    /// queries share one cache entry.
    pub fn plan_digest(&self) -> Option<Value> {
        if self.timezone.is_none() && self.location.is_none() && self.preferences.is_empty() {
            return None;
        }
        let mut digest = Map::new();
        if let Some(tz) = &self.timezone {
            digest.insert("timezone".to_string(), Value::String(tz.clone()));
        }
        if let Some(location) = &self.location {
            digest.insert("location".to_string(), Value::String(location.clone()));
        }
        if !self.preferences.is_empty() {
            digest.insert("preferences".to_string(), Value::Object(self.preferences.clone()));
        }
        Some(Value::Object(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_falls_back_to_default() {
        assert_eq!(SessionContext::new().session_id(), "default");
        assert_eq!(
            SessionContext::new().with_session_id("abc").session_id(),
            "abc"
        );
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = SessionContext::generated();
        let b = SessionContext::generated();
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn plan_digest_absent_without_attributes() {
        assert!(SessionContext::new().with_session_id("s").plan_digest().is_none());

        let ctx = SessionContext::new().with_timezone("Europe/Stockholm");
        let digest = ctx.plan_digest().unwrap();
        assert_eq!(digest["timezone"], "Europe/Stockholm");
    }

    #[test]
    fn extra_fields_survive_round_trip() {
        let json = serde_json::json!({
            "session_id": "s1",
            "timezone": "UTC",
            "device": "mobile"
        });
        let ctx: SessionContext = serde_json::from_value(json).unwrap();
        assert_eq!(ctx.session_id(), "s1");
        assert_eq!(ctx.extra["device"], "mobile");
    }
}
