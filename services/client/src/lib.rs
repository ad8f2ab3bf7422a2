//! Tutor Client Library
//!
//! The session protocol engine for the learner-facing tutoring client. It
//! owns one persistent WebSocket connection to the tutoring service and
//! multiplexes control messages, outbound microphone audio, and inbound
//! synthesized speech over it, tracking which learning activity is active
//! without tearing the connection down between activities. The `client`
//! binary is a thin terminal wrapper around this library.

pub mod audio;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod session;

pub use config::EngineConfig;
pub use error::EngineError;
pub use metrics::SessionMetrics;
pub use session::{
    ConnectionState, HintLevel, SessionDeps, SessionEvent, SessionHandle, SessionMode,
};
