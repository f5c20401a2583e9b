// src/services/reconcile.rs

//! Merging of a submitted answer payload into an attempt's stored answers.
//!
//! Planning is pure: it yields the rows to insert or update plus the merged
//! answer set that grading should see. The store applies the writes in one
//! transaction.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::AppError,
    models::{
        answer::{Answer, AnswerPayload, AnswerWrite},
        question::TestQuestion,
    },
    utils::html::clean_html,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Inserts and in-place updates, ordered by question id.
    pub writes: Vec<AnswerWrite>,
    /// Stored answers with the payload applied. Rows not yet persisted have id 0.
    pub merged: BTreeMap<i64, Answer>,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Indexes stored answers by question. Duplicate rows keep the newest (highest id).
pub fn index_answers(existing: Vec<Answer>) -> BTreeMap<i64, Answer> {
    let mut by_question: BTreeMap<i64, Answer> = BTreeMap::new();
    for answer in existing {
        match by_question.get(&answer.question_id) {
            Some(kept) => {
                tracing::warn!(
                    "Attempt {} has duplicate answers for question {}",
                    answer.attempt_id,
                    answer.question_id
                );
                if answer.id > kept.id {
                    by_question.insert(answer.question_id, answer);
                }
            }
            None => {
                by_question.insert(answer.question_id, answer);
            }
        }
    }
    by_question
}

fn resolve_option(question: &TestQuestion, value: &str) -> Option<i64> {
    value
        .parse::<i64>()
        .ok()
        .filter(|id| question.has_option(*id))
        .or_else(|| {
            question
                .options
                .iter()
                .find(|o| o.content.trim() == value)
                .map(|o| o.id)
        })
}

/// Leads every stored value that matched no option.
pub const UNRESOLVED_PREFIX: char = '?';

/// Stored token for a value that matched no option. Commas are dropped and the
/// prefix keeps the token from ever parsing as an option id.
fn unresolved_token(value: &str) -> String {
    let cleaned: String = value.chars().filter(|c| *c != ',').collect();
    format!("{}{}", UNRESOLVED_PREFIX, cleaned.trim())
}

/// Reduces raw values to the stored `(option_id, answer_text)` pair.
///
/// Option-based questions store sorted, de-duplicated option ids joined by `,`;
/// values matching no option follow the ids as unresolved tokens so grading
/// rejects them.
fn normalize(question: &TestQuestion, raw: &[String]) -> (Option<i64>, Option<String>) {
    let values = raw.iter().map(|v| v.trim()).filter(|v| !v.is_empty());

    if !question.kind.is_option_based() {
        let text = values.map(clean_html).collect::<Vec<_>>().join("\n");
        return (None, (!text.is_empty()).then_some(text));
    }

    let mut ids = BTreeSet::new();
    let mut unresolved = BTreeSet::new();
    for value in values {
        match resolve_option(question, value) {
            Some(id) => {
                ids.insert(id);
            }
            None => {
                unresolved.insert(unresolved_token(value));
            }
        }
    }

    let option_id = match (ids.len(), unresolved.is_empty()) {
        (1, true) => ids.first().copied(),
        _ => None,
    };
    let tokens: Vec<String> = ids
        .iter()
        .map(|id| id.to_string())
        .chain(unresolved)
        .collect();
    let text = (!tokens.is_empty()).then(|| tokens.join(","));

    (option_id, text)
}

/// Plans how `payload` lands on the `existing` answers of `attempt_id`.
///
/// Fails with `Forbidden` if the payload names a question outside the test;
/// nothing is planned in that case.
pub fn plan_reconciliation(
    attempt_id: i64,
    questions: &[TestQuestion],
    existing: Vec<Answer>,
    payload: &AnswerPayload,
) -> Result<ReconcilePlan, AppError> {
    let by_id: BTreeMap<i64, &TestQuestion> =
        questions.iter().map(|q| (q.question_id, q)).collect();

    if let Some(stray) = payload.answers.keys().find(|id| !by_id.contains_key(id)) {
        return Err(AppError::Forbidden(format!(
            "Question {} is not part of this test",
            stray
        )));
    }

    let mut plan = ReconcilePlan {
        merged: index_answers(existing),
        ..Default::default()
    };

    for (question_id, raw) in &payload.answers {
        let question = by_id[question_id];
        let (option_id, answer_text) = normalize(question, raw);

        match plan.merged.get_mut(question_id) {
            Some(current)
                if current.option_id == option_id && current.answer_text == answer_text =>
            {
                plan.unchanged += 1;
            }
            Some(current) => {
                current.option_id = option_id;
                current.answer_text = answer_text.clone();
                current.is_correct = None;
                plan.updated += 1;
                plan.writes.push(AnswerWrite {
                    question_id: *question_id,
                    option_id,
                    answer_text,
                });
            }
            // Nothing stored and nothing selected: no row to create.
            None if option_id.is_none() && answer_text.is_none() => {
                plan.unchanged += 1;
            }
            None => {
                plan.merged.insert(
                    *question_id,
                    Answer {
                        id: 0,
                        attempt_id,
                        question_id: *question_id,
                        option_id,
                        answer_text: answer_text.clone(),
                        is_correct: None,
                    },
                );
                plan.inserted += 1;
                plan.writes.push(AnswerWrite {
                    question_id: *question_id,
                    option_id,
                    answer_text,
                });
            }
        }
    }

    Ok(plan)
}
