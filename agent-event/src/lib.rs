//! Agent event protocol: typed event taxonomy plus the envelope applied to
//! every emitted event.
//!
//! `AgentEvent` is the wire shape for one progress event (type + payload);
//! `SessionEvent` wraps it with the envelope (`event_id`, `timestamp`,
//! `session_id`, `agent_id`). `EnvelopeState` assigns monotonically
//! increasing event ids within one session stream.

mod envelope;
mod event;

pub use envelope::{Envelope, EnvelopeState, SessionEvent};
pub use event::{AgentEvent, AgentPhase, Timing, ToolStatus};
