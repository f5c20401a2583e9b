// src/store/mod.rs

//! Data-access interface consumed by the test player.
//!
//! Everything is keyed by plain ids and returns flat rows; callers join in memory.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::AssignmentScope,
    error::AppError,
    models::{
        answer::{Answer, AnswerGrade, AnswerWrite},
        assignment::{AssignedTest, Assignment},
        attempt::{Attempt, AttemptStatus, AttemptSummary},
        test::TestDefinition,
    },
    services::grading::GradeSummary,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Final state written by a submit.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub score: f64,
    pub status: AttemptStatus,
    pub ended_at: DateTime<Utc>,
}

/// Everything a submit writes, derived from the answers read under the lock.
#[derive(Debug, Clone)]
pub struct Finalization {
    pub writes: Vec<AnswerWrite>,
    pub grades: Vec<AnswerGrade>,
    pub completion: Completion,
    pub summary: GradeSummary,
}

/// Turns the attempt's locked answer rows into the writes that close it.
pub type Finalizer<'a> =
    Box<dyn FnOnce(Vec<Answer>) -> Result<Finalization, AppError> + Send + 'a>;

#[async_trait]
pub trait AssessmentStore: Send + Sync {
    async fn user_exists(&self, user_id: i64) -> Result<bool, AppError>;

    /// Test with its questions in `order_no` order, options in id order.
    async fn load_test(&self, test_id: i64) -> Result<Option<TestDefinition>, AppError>;

    /// Assignments of `test_id` that apply to `user_id` under `scope`, expired or not.
    async fn find_assignments(
        &self,
        user_id: i64,
        test_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<Assignment>, AppError>;

    /// All assignments applying to `user_id`, joined with test details.
    async fn list_assigned_tests(
        &self,
        user_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<AssignedTest>, AppError>;

    /// The user's attempts, newest first.
    async fn list_attempts(&self, user_id: i64) -> Result<Vec<AttemptSummary>, AppError>;

    /// Returns the open attempt for (user, test), creating it if there is none.
    /// The flag is `true` when a new attempt was created.
    ///
    /// Must not create a second `InProgress` attempt under concurrent calls.
    async fn open_attempt(
        &self,
        user_id: i64,
        test_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<(Attempt, bool), AppError>;

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError>;

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError>;

    /// Upserts `writes` in one transaction while the attempt is `InProgress`.
    /// Fails with `AttemptAlreadyFinalized` otherwise, writing nothing.
    async fn save_answers(&self, attempt_id: i64, writes: &[AnswerWrite]) -> Result<(), AppError>;

    /// Closes the attempt in one transaction: locks it, reads its answers,
    /// runs `finalize` over them, then applies the resulting writes, grades
    /// and completion. Concurrent answer saves cannot land in between.
    ///
    /// Fails with `AttemptAlreadyFinalized` if the attempt is no longer
    /// `InProgress`. Any error, including one from `finalize`, writes nothing.
    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        finalize: Finalizer<'_>,
    ) -> Result<(Attempt, Finalization), AppError>;
}
