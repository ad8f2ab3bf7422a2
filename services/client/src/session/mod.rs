//! Session Protocol Engine
//!
//! This module contains the core logic for the live tutoring session. It is
//! structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON-based message format exchanged with the
//!   tutoring service.
//! - `connection`: Manages the transport lifecycle, from open and
//!   authentication to the read loop and close semantics.
//! - `router`: Parses inbound frames and classifies them for dispatch;
//!   serializes outbound frames.
//! - `engine`: The session state machine: the long-lived task that owns
//!   all session state, drives reconnection with context replay, and
//!   exposes the command/query surface the UI layer uses.

mod connection;
mod engine;
pub mod protocol;
mod router;

pub use engine::{
    ConnectionState, HintLevel, SessionDeps, SessionEvent, SessionHandle, SessionMode,
};
