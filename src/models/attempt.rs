// src/models/attempt.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::{
    error::AppError,
    models::{
        answer::Answer,
        assignment::AssignedTest,
        question::{PublicQuestion, QuestionKind},
    },
    services::grading::GradeSummary,
};

/// Lifecycle state of an attempt. `Completed` and `PendingReview` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum AttemptStatus {
    InProgress,
    Completed,
    PendingReview,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::InProgress => "InProgress",
            AttemptStatus::Completed => "Completed",
            AttemptStatus::PendingReview => "PendingReview",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "InProgress" => Ok(AttemptStatus::InProgress),
            "Completed" => Ok(AttemptStatus::Completed),
            "PendingReview" => Ok(AttemptStatus::PendingReview),
            other => Err(AppError::InternalServerError(format!(
                "unknown attempt status '{}'",
                other
            ))),
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::InProgress)
    }
}

/// One user's attempt at one test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Attempt {
    pub id: i64,
    pub user_id: i64,
    pub test_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Percentage 0-100, two decimals. `None` until submitted.
    pub score: Option<f64>,
    pub status: AttemptStatus,
}

/// Represents the 'test_attempts' table in the database.
#[derive(Debug, FromRow)]
pub struct AttemptRow {
    pub id: i64,
    pub user_id: i64,
    pub test_id: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub status: String,
}

impl TryFrom<AttemptRow> for Attempt {
    type Error = AppError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(Attempt {
            id: row.id,
            user_id: row.user_id,
            test_id: row.test_id,
            started_at: row.started_at,
            ended_at: row.ended_at,
            score: row.score,
            status: AttemptStatus::parse(&row.status)?,
        })
    }
}

/// Attempt history entry for the "my tests" listing.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttemptSummary {
    pub id: i64,
    pub test_id: i64,
    pub test_title: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
    pub status: AttemptStatus,
}

/// What a test-taker needs to render an attempt: the attempt, its saved answers
/// and the question paper.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttemptSession {
    pub attempt: Attempt,
    pub test_title: String,
    pub duration_minutes: i32,
    pub deadline: Option<DateTime<Utc>>,
    pub questions: Vec<PublicQuestion>,
    pub answers: Vec<Answer>,
}

/// Response for a submit call.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SubmissionReceipt {
    pub attempt: Attempt,
    pub summary: GradeSummary,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OptionResult {
    pub id: i64,
    pub content: String,
    pub selected: bool,
    /// Only revealed once the attempt is terminal.
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionResult {
    pub question_id: i64,
    pub order_no: i32,
    #[serde(rename = "type")]
    pub question_type: QuestionKind,
    pub content: String,
    pub options: Vec<OptionResult>,
    pub answer_text: Option<String>,
    pub is_correct: Option<bool>,
}

/// Attempt with its answers laid over the test's questions.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttemptResult {
    pub attempt: Attempt,
    pub test_title: String,
    pub pass_score: f64,
    pub questions: Vec<QuestionResult>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Dashboard {
    pub assignments: Vec<AssignedTest>,
    pub attempts: Vec<AttemptSummary>,
}
