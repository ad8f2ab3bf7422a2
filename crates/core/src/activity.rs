//! Activity and lesson descriptions.
//!
//! These are the payloads the engine sends to the tutoring service at
//! connect time (and replays after a reconnection). Identifiers are opaque
//! strings owned by the curriculum backend.

use serde::{Deserialize, Serialize};

/// Describes one interactive learning activity instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActivityContext {
    /// Kind of activity, e.g. "quiz" or "free_drawing".
    pub activity_type: String,
    /// Unique identifier of this activity instance.
    pub instance_id: String,
    /// Opaque domain data the activity renderer owns; passed through untouched.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lesson_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade_level: Option<String>,
}

/// A single learning objective within a lesson.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Objective {
    pub id: String,
    pub text: String,
    /// Bloom-style verb, e.g. "identify" or "apply".
    pub verb: String,
}

/// One entry in a lesson's ordered activity sequence.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActivityRef {
    pub activity_type: String,
    pub instance_id: String,
    pub title: String,
    pub objective_ids: Vec<String>,
}

/// Summary of a previously completed (or attempted) activity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PriorResult {
    pub instance_id: String,
    pub activity_type: String,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Describes a whole ordered sequence of activities for a lesson session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonContext {
    pub lesson_id: String,
    pub topic: String,
    pub grade_level: String,
    pub objectives: Vec<Objective>,
    pub ordered_activities: Vec<ActivityRef>,
    /// Index into `ordered_activities` of the activity currently in focus.
    pub current_index: usize,
    pub prior_results: Vec<PriorResult>,
}

impl LessonContext {
    /// Position of an activity instance within the ordered sequence.
    pub fn position(&self, instance_id: &str) -> Option<usize> {
        self.ordered_activities
            .iter()
            .position(|a| a.instance_id == instance_id)
    }

    /// Whether the lesson contains the given activity instance.
    pub fn contains(&self, instance_id: &str) -> bool {
        self.position(instance_id).is_some()
    }

    /// Builds the full [`ActivityContext`] for the activity at `index`,
    /// carrying the lesson's topic and grade level along.
    pub fn activity_context(&self, index: usize) -> Option<ActivityContext> {
        let entry = self.ordered_activities.get(index)?;
        Some(ActivityContext {
            activity_type: entry.activity_type.clone(),
            instance_id: entry.instance_id.clone(),
            payload: serde_json::Value::Null,
            lesson_id: Some(self.lesson_id.clone()),
            topic: Some(self.topic.clone()),
            grade_level: Some(self.grade_level.clone()),
        })
    }
}

/// Input to a lesson connect: names the lesson and optionally which activity
/// to start on. Everything else is fetched from the collaborators.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LessonSeed {
    pub lesson_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_instance_id: Option<String>,
}
