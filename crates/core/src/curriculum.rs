//! Curriculum collaborator.
//!
//! The engine never owns curriculum content; it queries a read-only service
//! for the objectives and ordered activity list of a lesson at the moment a
//! session is opened. The trait abstraction allows swapping between backends
//! (HTTP content service, local cache, static fixture) while keeping the
//! context builder agnostic.

use crate::activity::{ActivityRef, Objective};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;

/// Everything the curriculum backend knows about one lesson.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonPlan {
    pub lesson_id: String,
    pub topic: String,
    pub grade_level: String,
    pub objectives: Vec<Objective>,
    pub ordered_activities: Vec<ActivityRef>,
}

/// Defines the contract for any service that can describe lessons.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CurriculumService: Send + Sync {
    /// Fetches the plan for a lesson: objectives plus the ordered activity
    /// sequence the session will walk through.
    async fn lesson_plan(&self, lesson_id: &str) -> Result<LessonPlan>;
}

/// An in-memory [`CurriculumService`] backed by a fixed set of plans.
///
/// Used by the CLI client and by tests; a production deployment substitutes
/// a service that queries the real content backend.
#[derive(Debug, Default)]
pub struct StaticCurriculumService {
    plans: HashMap<String, LessonPlan>,
}

impl StaticCurriculumService {
    pub fn new(plans: impl IntoIterator<Item = LessonPlan>) -> Self {
        Self {
            plans: plans
                .into_iter()
                .map(|p| (p.lesson_id.clone(), p))
                .collect(),
        }
    }

    pub fn insert(&mut self, plan: LessonPlan) {
        self.plans.insert(plan.lesson_id.clone(), plan);
    }
}

#[async_trait]
impl CurriculumService for StaticCurriculumService {
    async fn lesson_plan(&self, lesson_id: &str) -> Result<LessonPlan> {
        self.plans
            .get(lesson_id)
            .cloned()
            .with_context(|| format!("unknown lesson: {lesson_id}"))
    }
}
