// src/services/player.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    config::AssignmentScope,
    error::AppError,
    models::{
        answer::{Answer, AnswerPayload},
        assignment::Assignment,
        attempt::{
            Attempt, AttemptResult, AttemptSession, Dashboard, OptionResult, QuestionResult,
            SubmissionReceipt,
        },
        question::PublicQuestion,
        test::TestDefinition,
    },
    services::{
        grading::grade_attempt,
        reconcile::{index_answers, plan_reconciliation},
    },
    store::{AssessmentStore, Completion, Finalization, Finalizer},
};

/// Result of start-or-resume.
#[derive(Debug, Clone)]
pub struct StartedAttempt {
    pub session: AttemptSession,
    /// `false` when an open attempt was resumed.
    pub created: bool,
}

/// Counts reported after a draft save.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DraftSaved {
    pub attempt_id: i64,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Attempt lifecycle: start or resume, save drafts, submit, read results.
///
/// Callers pass an already authenticated user id. Ownership misses are
/// reported as not-found so attempt ids of other users are not disclosed.
#[derive(Clone)]
pub struct TestPlayer {
    store: Arc<dyn AssessmentStore>,
    scope: AssignmentScope,
}

impl TestPlayer {
    pub fn new(store: Arc<dyn AssessmentStore>, scope: AssignmentScope) -> Self {
        Self { store, scope }
    }

    /// Opens the caller's attempt at `test_id`, or resumes the open one.
    pub async fn start_or_resume(
        &self,
        user_id: i64,
        test_id: i64,
    ) -> Result<StartedAttempt, AppError> {
        if !self.store.user_exists(user_id).await? {
            return Err(AppError::AuthError("Unknown user".to_string()));
        }

        let definition = self
            .store
            .load_test(test_id)
            .await?
            .ok_or(AppError::TestNotFound)?;

        let now = Utc::now();
        let assignment = self.active_assignment(user_id, test_id, now).await?;

        let (attempt, created) = self.store.open_attempt(user_id, test_id, now).await?;
        let answers = if created {
            Vec::new()
        } else {
            self.store.list_answers(attempt.id).await?
        };

        if created {
            tracing::info!(
                "User {} started attempt {} on test {}",
                user_id,
                attempt.id,
                test_id
            );
        } else {
            tracing::info!(
                "User {} resumed attempt {} on test {} ({} saved answers)",
                user_id,
                attempt.id,
                test_id,
                answers.len()
            );
        }

        Ok(StartedAttempt {
            session: AttemptSession {
                attempt,
                test_title: definition.test.title.clone(),
                duration_minutes: definition.test.duration_minutes,
                deadline: assignment.deadline,
                questions: definition.questions.iter().map(PublicQuestion::from).collect(),
                answers,
            },
            created,
        })
    }

    /// Picks the assignment granting access, preferring the latest deadline.
    async fn active_assignment(
        &self,
        user_id: i64,
        test_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Assignment, AppError> {
        let assignments = self
            .store
            .find_assignments(user_id, test_id, self.scope)
            .await?;

        if assignments.is_empty() {
            tracing::info!("User {} is not assigned to test {}", user_id, test_id);
            return Err(AppError::NotAssigned);
        }

        assignments
            .into_iter()
            .filter(|a| !a.is_expired(now))
            .max_by_key(|a| (a.deadline.is_none(), a.deadline))
            .ok_or_else(|| {
                tracing::info!("User {} has only expired assignments for test {}", user_id, test_id);
                AppError::AssignmentExpired
            })
    }

    async fn owned_attempt(
        &self,
        attempt_id: i64,
        user_id: i64,
        missing: AppError,
    ) -> Result<Attempt, AppError> {
        match self.store.find_attempt(attempt_id).await? {
            Some(attempt) if attempt.user_id == user_id => Ok(attempt),
            _ => Err(missing),
        }
    }

    /// Validates the payload and loads the caller's open attempt with its test.
    async fn writable_attempt(
        &self,
        attempt_id: i64,
        user_id: i64,
        payload: &AnswerPayload,
    ) -> Result<(Attempt, TestDefinition), AppError> {
        payload.validate()?;

        let attempt = self
            .owned_attempt(attempt_id, user_id, AppError::AttemptNotFound)
            .await?;
        if attempt.status.is_terminal() {
            return Err(AppError::AttemptAlreadyFinalized);
        }

        let definition = self
            .store
            .load_test(attempt.test_id)
            .await?
            .ok_or(AppError::TestNotFound)?;

        Ok((attempt, definition))
    }

    /// Persists answers without changing the attempt status.
    pub async fn save_draft(
        &self,
        attempt_id: i64,
        user_id: i64,
        payload: &AnswerPayload,
    ) -> Result<DraftSaved, AppError> {
        let (attempt, definition) = self.writable_attempt(attempt_id, user_id, payload).await?;
        let existing = self.store.list_answers(attempt.id).await?;
        let plan = plan_reconciliation(attempt.id, &definition.questions, existing, payload)?;

        if !plan.writes.is_empty() {
            self.store.save_answers(attempt.id, &plan.writes).await?;
        }

        tracing::info!(
            "Draft saved for attempt {}: {} inserted, {} updated, {} unchanged",
            attempt.id,
            plan.inserted,
            plan.updated,
            plan.unchanged
        );

        Ok(DraftSaved {
            attempt_id: attempt.id,
            inserted: plan.inserted,
            updated: plan.updated,
            unchanged: plan.unchanged,
        })
    }

    /// Reconciles the final payload, grades the attempt and closes it.
    ///
    /// Reconciliation and grading run inside the store's locked write, over
    /// the answers as they stand at that moment.
    pub async fn submit(
        &self,
        attempt_id: i64,
        user_id: i64,
        payload: &AnswerPayload,
    ) -> Result<SubmissionReceipt, AppError> {
        let (attempt, definition) = self.writable_attempt(attempt_id, user_id, payload).await?;
        let questions = &definition.questions;

        let finalize: Finalizer<'_> = Box::new(
            move |existing: Vec<Answer>| -> Result<Finalization, AppError> {
                let plan = plan_reconciliation(attempt_id, questions, existing, payload)?;
                let summary = grade_attempt(questions, &plan.merged);
                let grades = summary.answer_grades(&plan.merged);
                Ok(Finalization {
                    writes: plan.writes,
                    grades,
                    completion: Completion {
                        score: summary.score,
                        status: summary.status,
                        ended_at: Utc::now(),
                    },
                    summary,
                })
            },
        );

        let (attempt, finalization) = self.store.finalize_attempt(attempt.id, finalize).await?;
        let summary = finalization.summary;

        for flagged in summary.anomalies() {
            tracing::warn!(
                "Attempt {}: question {} graded with anomaly {:?}",
                attempt.id,
                flagged.question_id,
                flagged.anomaly
            );
        }

        tracing::info!(
            "Attempt {} submitted: {}/{} auto-graded correct, score {:.2}, status {}",
            attempt.id,
            summary.correct,
            summary.auto_gradable,
            summary.score,
            attempt.status.as_str()
        );

        Ok(SubmissionReceipt { attempt, summary })
    }

    /// Attempt with answers laid over the test's questions.
    ///
    /// Option correctness is only revealed once the attempt is terminal.
    pub async fn get_result(&self, attempt_id: i64, user_id: i64) -> Result<AttemptResult, AppError> {
        let attempt = self
            .owned_attempt(
                attempt_id,
                user_id,
                AppError::NotFound("Attempt not found".to_string()),
            )
            .await?;

        let definition = self
            .store
            .load_test(attempt.test_id)
            .await?
            .ok_or(AppError::TestNotFound)?;
        let answers = index_answers(self.store.list_answers(attempt.id).await?);
        let reveal = attempt.status.is_terminal();

        let questions = definition
            .questions
            .iter()
            .map(|q| {
                let answer = answers.get(&q.question_id);
                let selected = answer.map(|a| a.selected_option_ids()).unwrap_or_default();
                QuestionResult {
                    question_id: q.question_id,
                    order_no: q.order_no,
                    question_type: q.kind,
                    content: q.content.clone(),
                    options: q
                        .options
                        .iter()
                        .map(|o| OptionResult {
                            id: o.id,
                            content: o.content.clone(),
                            selected: selected.contains(&o.id),
                            is_correct: reveal.then_some(o.is_correct),
                        })
                        .collect(),
                    answer_text: answer.and_then(|a| a.answer_text.clone()),
                    is_correct: if reveal {
                        answer.and_then(|a| a.is_correct)
                    } else {
                        None
                    },
                }
            })
            .collect();

        Ok(AttemptResult {
            attempt,
            test_title: definition.test.title,
            pass_score: definition.test.pass_score,
            questions,
        })
    }

    /// Open assignments and attempt history of the caller.
    pub async fn dashboard(&self, user_id: i64) -> Result<Dashboard, AppError> {
        let now = Utc::now();
        let assignments = self
            .store
            .list_assigned_tests(user_id, self.scope)
            .await?
            .into_iter()
            .filter(|a| a.deadline.is_none_or(|d| d > now))
            .collect();
        let attempts = self.store.list_attempts(user_id).await?;

        Ok(Dashboard {
            assignments,
            attempts,
        })
    }
}
