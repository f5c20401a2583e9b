// src/models/question.rs

use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use utoipa::ToSchema;

use crate::error::AppError;

/// Closed set of question types known to the grading engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    /// Single or multiple choice; graded by exact option-set match.
    Choice,
    /// True/false; graded by the single selected option.
    Boolean,
    /// Open-ended; left for manual review.
    FreeText,
}

impl QuestionKind {
    pub const ALL: [QuestionKind; 3] = [
        QuestionKind::Choice,
        QuestionKind::Boolean,
        QuestionKind::FreeText,
    ];

    /// Tag stored in the `questions.question_type` column.
    pub fn as_db_str(self) -> &'static str {
        match self {
            QuestionKind::Choice => "MCQ",
            QuestionKind::Boolean => "TrueFalse",
            QuestionKind::FreeText => "Essay",
        }
    }

    pub fn from_db_str(tag: &str) -> Result<Self, AppError> {
        match tag.trim() {
            "MCQ" => Ok(QuestionKind::Choice),
            "TrueFalse" => Ok(QuestionKind::Boolean),
            "Essay" => Ok(QuestionKind::FreeText),
            other => Err(AppError::InternalServerError(format!(
                "unknown question type '{}'",
                other
            ))),
        }
    }

    pub fn is_auto_gradable(self) -> bool {
        !matches!(self, QuestionKind::FreeText)
    }

    pub fn is_option_based(self) -> bool {
        matches!(self, QuestionKind::Choice | QuestionKind::Boolean)
    }
}

/// Represents the 'question_options' table in the database.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub content: String,
    pub is_correct: bool,
}

/// One question as it appears inside a test, options in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct TestQuestion {
    pub question_id: i64,
    pub order_no: i32,
    pub content: String,
    pub kind: QuestionKind,
    pub options: Vec<QuestionOption>,
}

impl TestQuestion {
    pub fn correct_option_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.options.iter().filter(|o| o.is_correct).map(|o| o.id)
    }

    pub fn has_option(&self, option_id: i64) -> bool {
        self.options.iter().any(|o| o.id == option_id)
    }
}

/// DTO for sending an option to the test-taker (correctness hidden).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicOption {
    pub id: i64,
    pub content: String,
}

/// DTO for sending a question to the test-taker.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicQuestion {
    pub id: i64,
    pub order_no: i32,
    #[serde(rename = "type")]
    pub question_type: QuestionKind,
    pub content: String,
    pub options: Vec<PublicOption>,
}

impl From<&TestQuestion> for PublicQuestion {
    fn from(q: &TestQuestion) -> Self {
        PublicQuestion {
            id: q.question_id,
            order_no: q.order_no,
            question_type: q.kind,
            content: q.content.clone(),
            options: q
                .options
                .iter()
                .map(|o| PublicOption {
                    id: o.id,
                    content: o.content.clone(),
                })
                .collect(),
        }
    }
}
