//! Context builder.
//!
//! Pure assembly: collaborator state in, context payload out. The builder
//! takes the curriculum and evaluation services as arguments at call time
//! and never mutates either; all decisions about *when* to build a context
//! belong to the session engine.

use crate::activity::{ActivityContext, LessonContext, LessonSeed};
use crate::curriculum::CurriculumService;
use crate::evaluation::EvaluationService;
use anyhow::{Result, bail};

pub struct ContextBuilder;

impl ContextBuilder {
    /// Assembles the [`LessonContext`] for a lesson session.
    ///
    /// Queries the curriculum plan and prior results once, then resolves the
    /// starting activity: the one named by the seed if present, otherwise
    /// the first activity in the sequence.
    pub async fn lesson(
        curriculum: &dyn CurriculumService,
        evaluation: &dyn EvaluationService,
        seed: &LessonSeed,
    ) -> Result<LessonContext> {
        tracing::debug!(lesson_id = %seed.lesson_id, "assembling lesson context");
        let plan = curriculum.lesson_plan(&seed.lesson_id).await?;
        if plan.ordered_activities.is_empty() {
            bail!("lesson {} has no activities", seed.lesson_id);
        }
        let prior_results = evaluation.prior_results(&seed.lesson_id).await?;

        let current_index = seed
            .start_instance_id
            .as_deref()
            .and_then(|id| {
                plan.ordered_activities
                    .iter()
                    .position(|a| a.instance_id == id)
            })
            .unwrap_or(0);

        Ok(LessonContext {
            lesson_id: plan.lesson_id,
            topic: plan.topic,
            grade_level: plan.grade_level,
            objectives: plan.objectives,
            ordered_activities: plan.ordered_activities,
            current_index,
            prior_results,
        })
    }

    /// Builds the [`ActivityContext`] for the activity a lesson currently
    /// points at.
    pub fn current_activity(lesson: &LessonContext) -> Result<ActivityContext> {
        lesson.activity_context(lesson.current_index).ok_or_else(|| {
            anyhow::anyhow!(
                "lesson {} current_index {} is out of range",
                lesson.lesson_id,
                lesson.current_index
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{ActivityRef, PriorResult};
    use crate::curriculum::{LessonPlan, MockCurriculumService};
    use crate::evaluation::MockEvaluationService;

    fn plan() -> LessonPlan {
        LessonPlan {
            lesson_id: "fractions-101".to_string(),
            topic: "Fractions".to_string(),
            grade_level: "4".to_string(),
            objectives: vec![],
            ordered_activities: vec![
                ActivityRef {
                    activity_type: "quiz".to_string(),
                    instance_id: "a".to_string(),
                    title: "Warm-up".to_string(),
                    objective_ids: vec![],
                },
                ActivityRef {
                    activity_type: "number_line".to_string(),
                    instance_id: "b".to_string(),
                    title: "Place the fractions".to_string(),
                    objective_ids: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn lesson_context_starts_at_seeded_activity() {
        let mut curriculum = MockCurriculumService::new();
        curriculum
            .expect_lesson_plan()
            .returning(|_| Ok(plan()));
        let mut evaluation = MockEvaluationService::new();
        evaluation.expect_prior_results().returning(|_| {
            Ok(vec![PriorResult {
                instance_id: "a".to_string(),
                activity_type: "quiz".to_string(),
                completed: true,
                score: Some(1.0),
            }])
        });

        let seed = LessonSeed {
            lesson_id: "fractions-101".to_string(),
            start_instance_id: Some("b".to_string()),
        };
        let lesson = ContextBuilder::lesson(&curriculum, &evaluation, &seed)
            .await
            .unwrap();
        assert_eq!(lesson.current_index, 1);
        assert_eq!(lesson.prior_results.len(), 1);

        let activity = ContextBuilder::current_activity(&lesson).unwrap();
        assert_eq!(activity.instance_id, "b");
        assert_eq!(activity.lesson_id.as_deref(), Some("fractions-101"));
    }

    #[tokio::test]
    async fn unknown_seed_activity_falls_back_to_first() {
        let mut curriculum = MockCurriculumService::new();
        curriculum.expect_lesson_plan().returning(|_| Ok(plan()));
        let mut evaluation = MockEvaluationService::new();
        evaluation.expect_prior_results().returning(|_| Ok(vec![]));

        let seed = LessonSeed {
            lesson_id: "fractions-101".to_string(),
            start_instance_id: Some("zz".to_string()),
        };
        let lesson = ContextBuilder::lesson(&curriculum, &evaluation, &seed)
            .await
            .unwrap();
        assert_eq!(lesson.current_index, 0);
    }

    #[tokio::test]
    async fn empty_lesson_is_rejected() {
        let mut curriculum = MockCurriculumService::new();
        curriculum.expect_lesson_plan().returning(|_| {
            Ok(LessonPlan {
                ordered_activities: vec![],
                ..plan()
            })
        });
        let evaluation = MockEvaluationService::new();

        let seed = LessonSeed {
            lesson_id: "fractions-101".to_string(),
            start_instance_id: None,
        };
        let err = ContextBuilder::lesson(&curriculum, &evaluation, &seed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no activities"));
    }
}
