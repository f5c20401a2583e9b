// src/models/answer.rs

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::config::{MAX_PAYLOAD_QUESTIONS, MAX_VALUE_LEN, MAX_VALUES_PER_QUESTION};

/// Represents the 'answers' table in the database.
/// Unique per (attempt_id, question_id).
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Answer {
    pub id: i64,
    pub attempt_id: i64,
    pub question_id: i64,

    /// Set when exactly one option is selected.
    pub option_id: Option<i64>,

    /// Free text, or the canonical comma-joined option ids for choice questions.
    pub answer_text: Option<String>,

    /// Written by grading; `None` for free-text and ungraded answers.
    pub is_correct: Option<bool>,
}

impl Answer {
    /// Option ids referenced by this answer; tokens that are not ids are skipped.
    pub fn selected_option_ids(&self) -> BTreeSet<i64> {
        let mut ids: BTreeSet<i64> = self
            .answer_text
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(|t| t.trim().parse().ok())
            .collect();
        ids.extend(self.option_id);
        ids
    }
}

/// Insert-or-update instruction produced by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerWrite {
    pub question_id: i64,
    pub option_id: Option<i64>,
    pub answer_text: Option<String>,
}

/// Correctness verdict persisted for one answered question at submit time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerGrade {
    pub question_id: i64,
    pub is_correct: Option<bool>,
}

/// One or many raw values for a question.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AnswerValues {
    One(String),
    Many(Vec<String>),
}

impl AnswerValues {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            AnswerValues::One(v) => vec![v],
            AnswerValues::Many(vs) => vs,
        }
    }
}

/// JSON body for draft-save and submit.
///
/// Key: question id. Value: selected option ids (or option contents) as strings,
/// or free-text content.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct SubmitAnswersRequest {
    #[serde(default)]
    pub answers: BTreeMap<i64, AnswerValues>,
}

/// Transport-independent answer payload consumed by the engine.
#[derive(Debug, Clone, Default, PartialEq, Validate)]
pub struct AnswerPayload {
    #[validate(custom(function = validate_answer_map))]
    pub answers: BTreeMap<i64, Vec<String>>,
}

impl AnswerPayload {
    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

impl From<SubmitAnswersRequest> for AnswerPayload {
    fn from(req: SubmitAnswersRequest) -> Self {
        AnswerPayload {
            answers: req
                .answers
                .into_iter()
                .map(|(q_id, values)| (q_id, values.into_vec()))
                .collect(),
        }
    }
}

fn validate_answer_map(answers: &BTreeMap<i64, Vec<String>>) -> Result<(), ValidationError> {
    if answers.len() > MAX_PAYLOAD_QUESTIONS {
        return Err(ValidationError::new("too_many_questions"));
    }
    for values in answers.values() {
        if values.len() > MAX_VALUES_PER_QUESTION {
            return Err(ValidationError::new("too_many_values"));
        }
        if values.iter().any(|v| v.len() > MAX_VALUE_LEN) {
            return Err(ValidationError::new("value_too_long"));
        }
    }
    Ok(())
}
