//! Defines the WebSocket message protocol between the client engine and the
//! tutoring service.
//!
//! Every frame is a UTF-8 JSON object tagged by a `type` field. Audio rides
//! inside the same envelope as base64-encoded PCM16 rather than binary
//! frames, so one codec handles the whole protocol.

use serde::{Deserialize, Serialize};
use tutor_core::activity::{ActivityContext, LessonContext};
use uuid::Uuid;

/// Messages sent from the client engine to the tutoring service.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Carries the bearer token; must be the first frame on every connection.
    Authenticate {
        token: String,
        client_session_id: Uuid,
    },
    /// Describes what the learner is doing right now. Sent once after
    /// authentication and replayed verbatim after a reconnection.
    Context {
        activity: ActivityContext,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lesson: Option<LessonContext>,
    },
    /// Moves the tutor's attention to another activity in the current
    /// lesson, over the existing connection.
    SwitchPrimitive { activity: ActivityContext },
    /// A typed message from the learner.
    Text { text: String },
    /// Asks the tutor for a hint at the given level (1–3).
    RequestHint { level: u8 },
    /// A chunk of microphone audio (base64 PCM16, mono, 16 kHz).
    Audio { data: String },
}

/// Messages sent from the tutoring service to the client engine.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Acknowledges the authenticate frame.
    AuthSuccess {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// The service is ready for traffic. Accepted interchangeably with
    /// `auth_success` as the authentication acknowledgement.
    SessionReady,
    /// Acknowledges a switch; names the activity the service now attends to.
    PrimitiveSwitched { instance_id: String },
    /// A typed response from the tutor.
    AiResponse { text: String },
    /// Transcription of the tutor's spoken response.
    AiTranscription { text: String },
    /// Transcription of the learner's speech.
    UserTranscription { text: String },
    /// A chunk of synthesized speech (base64 PCM16, mono), sequence-tagged
    /// so playback can restore the intended order.
    AiAudio {
        data: String,
        sample_rate: u32,
        seq: u64,
    },
    /// Server-side counter increments for the session metrics.
    MetricsUpdate {
        #[serde(default)]
        interactions: u64,
        #[serde(default)]
        turns: u64,
        #[serde(default)]
        voice_interactions: u64,
    },
    /// Reports an error to the client.
    Error { message: String },
}
