//! Session-scoped metrics.
//!
//! Counters accumulate on every outbound hint/text command, every appended
//! conversation turn, every transcribed voice interaction, and every inbound
//! `metrics_update` frame. Snapshots are read-only; the aggregator is reset
//! only on disconnect.

use crate::session::HintLevel;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Read-only snapshot of the session counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionMetrics {
    /// Hints issued, indexed by level (1–3).
    pub hints: [u64; 3],
    /// Learner-initiated commands: text turns, hints, voice interactions.
    pub interactions: u64,
    /// Conversation turns appended, both parties.
    pub turns: u64,
    /// Learner utterances that produced a transcription.
    pub voice_interactions: u64,
    /// Cumulative time the connection has been open.
    pub connected: Duration,
}

/// Accumulates counters for one session. The engine task is the only writer.
#[derive(Debug, Default)]
pub(crate) struct MetricsAggregator {
    totals: SessionMetrics,
    connected_since: Option<Instant>,
}

impl MetricsAggregator {
    pub fn record_text(&mut self) {
        self.totals.interactions += 1;
    }

    pub fn record_hint(&mut self, level: HintLevel) {
        self.totals.hints[(level.as_u8() - 1) as usize] += 1;
        self.totals.interactions += 1;
    }

    pub fn record_voice_interaction(&mut self) {
        self.totals.voice_interactions += 1;
        self.totals.interactions += 1;
    }

    pub fn record_turn(&mut self) {
        self.totals.turns += 1;
    }

    /// Applies counter increments reported by the service.
    pub fn apply_update(&mut self, interactions: u64, turns: u64, voice_interactions: u64) {
        self.totals.interactions += interactions;
        self.totals.turns += turns;
        self.totals.voice_interactions += voice_interactions;
    }

    pub fn mark_connected(&mut self) {
        self.connected_since.get_or_insert_with(Instant::now);
    }

    pub fn mark_disconnected(&mut self) {
        if let Some(since) = self.connected_since.take() {
            self.totals.connected += since.elapsed();
        }
    }

    pub fn reset(&mut self) {
        self.totals = SessionMetrics::default();
        self.connected_since = None;
    }

    /// Current totals, including the in-flight connected period.
    pub fn snapshot(&self) -> SessionMetrics {
        let mut snapshot = self.totals.clone();
        if let Some(since) = self.connected_since {
            snapshot.connected += since.elapsed();
        }
        snapshot
    }
}
