//! Inbound frame parsing and dispatch classification.
//!
//! The router is the single point of serialization: outbound messages are
//! encoded here, and every raw inbound frame is parsed and mapped onto a
//! [`Dispatch`] the engine applies to its state. Malformed frames are
//! dropped with a logged error; they never reach the engine.

use crate::session::protocol::{ClientMessage, ServerMessage};
use tracing::error;
use tutor_core::conversation::ConversationTurn;

/// What the engine should do with one inbound frame.
#[derive(Debug)]
pub(crate) enum Dispatch {
    /// A duplicate readiness/auth frame after the handshake; nothing to do.
    Ready,
    /// Append to the conversation log.
    Turn(ConversationTurn),
    /// Forward to the playback pipeline.
    Audio { seq: u64, data: String },
    /// Reconcile the active activity against the service's acknowledgement.
    SwitchAck { instance_id: String },
    /// Fold server-side counters into the metrics aggregator.
    Metrics {
        interactions: u64,
        turns: u64,
        voice_interactions: u64,
    },
    /// A non-fatal error report from the service.
    ServiceError { message: String },
}

/// Serializes an outbound message to its wire form.
pub(crate) fn encode(msg: &ClientMessage) -> serde_json::Result<String> {
    serde_json::to_string(msg)
}

/// Parses a raw text frame. Returns `None` (after logging) for anything the
/// protocol does not recognize.
pub(crate) fn parse(raw: &str) -> Option<ServerMessage> {
    match serde_json::from_str::<ServerMessage>(raw) {
        Ok(msg) => Some(msg),
        Err(e) => {
            error!(error = %e, "dropping malformed inbound frame");
            None
        }
    }
}

/// Maps a parsed message onto the action the engine should take.
pub(crate) fn dispatch(msg: ServerMessage) -> Dispatch {
    match msg {
        ServerMessage::AuthSuccess { .. } | ServerMessage::SessionReady => Dispatch::Ready,
        ServerMessage::AiResponse { text } => Dispatch::Turn(ConversationTurn::tutor(text, false)),
        ServerMessage::AiTranscription { text } => {
            Dispatch::Turn(ConversationTurn::tutor(text, true))
        }
        ServerMessage::UserTranscription { text } => {
            Dispatch::Turn(ConversationTurn::learner(text, true))
        }
        ServerMessage::AiAudio { data, seq, .. } => Dispatch::Audio { seq, data },
        ServerMessage::PrimitiveSwitched { instance_id } => Dispatch::SwitchAck { instance_id },
        ServerMessage::MetricsUpdate {
            interactions,
            turns,
            voice_interactions,
        } => Dispatch::Metrics {
            interactions,
            turns,
            voice_interactions,
        },
        ServerMessage::Error { message } => Dispatch::ServiceError { message },
    }
}
