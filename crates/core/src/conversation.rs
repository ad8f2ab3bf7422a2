//! Conversation log entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Who produced a conversation turn.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Learner,
    Tutor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Learner => write!(f, "learner"),
            Role::Tutor => write!(f, "tutor"),
        }
    }
}

/// One entry in the session's conversation log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// True when the content was transcribed from speech rather than typed.
    pub is_audio_origin: bool,
}

impl ConversationTurn {
    pub fn learner(content: impl Into<String>, is_audio_origin: bool) -> Self {
        Self {
            role: Role::Learner,
            content: content.into(),
            timestamp: Utc::now(),
            is_audio_origin,
        }
    }

    pub fn tutor(content: impl Into<String>, is_audio_origin: bool) -> Self {
        Self {
            role: Role::Tutor,
            content: content.into(),
            timestamp: Utc::now(),
            is_audio_origin,
        }
    }
}
