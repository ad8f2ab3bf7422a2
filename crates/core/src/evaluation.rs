//! Evaluation collaborator.
//!
//! Supplies summaries of the learner's prior work in a lesson so the tutor
//! can pick up where the learner left off. Read-only, queried once per
//! connect; the engine never writes evaluation state.

use crate::activity::PriorResult;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Defines the contract for any service that can report prior results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EvaluationService: Send + Sync {
    /// Prior result summaries for the activities of a lesson, in no
    /// particular order. An unknown lesson yields an empty list.
    async fn prior_results(&self, lesson_id: &str) -> Result<Vec<PriorResult>>;
}

/// An in-memory [`EvaluationService`] backed by fixed result lists.
#[derive(Debug, Default)]
pub struct StaticEvaluationService {
    results: HashMap<String, Vec<PriorResult>>,
}

impl StaticEvaluationService {
    pub fn new(results: impl IntoIterator<Item = (String, Vec<PriorResult>)>) -> Self {
        Self {
            results: results.into_iter().collect(),
        }
    }
}

#[async_trait]
impl EvaluationService for StaticEvaluationService {
    async fn prior_results(&self, lesson_id: &str) -> Result<Vec<PriorResult>> {
        Ok(self.results.get(lesson_id).cloned().unwrap_or_default())
    }
}
