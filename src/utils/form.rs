// src/utils/form.rs

use std::sync::LazyLock;

use regex::Regex;

use crate::models::answer::AnswerPayload;

/// Field names carrying answers: `answer_<questionId>`.
static ANSWER_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^answer_(\d+)$").expect("answer field pattern is valid")
});

/// Groups urlencoded form pairs into an answer payload.
///
/// Repeated keys (multi-select checkboxes) collect into one question. Fields not
/// named `answer_<id>`, such as anti-forgery tokens, are ignored.
pub fn payload_from_form(pairs: Vec<(String, String)>) -> AnswerPayload {
    let mut payload = AnswerPayload::default();
    for (key, value) in pairs {
        let Some(question_id) = ANSWER_FIELD
            .captures(&key)
            .and_then(|c| c[1].parse::<i64>().ok())
        else {
            continue;
        };
        payload.answers.entry(question_id).or_default().push(value);
    }
    payload
}
