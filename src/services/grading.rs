// src/services/grading.rs

//! Scoring of a finished answer set.
//!
//! Choice questions are correct only when the selected option ids equal the
//! option ids flagged correct. Boolean questions need the single correct option.
//! Free-text questions are left for a reviewer and keep the attempt in
//! `PendingReview`.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use utoipa::ToSchema;

use crate::models::{
    answer::{Answer, AnswerGrade},
    attempt::AttemptStatus,
    question::{QuestionKind, TestQuestion},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Correct,
    Incorrect,
    Unanswered,
    ManualReview,
}

/// Question definitions that make a question impossible to grade fairly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum GradingAnomaly {
    NoCorrectOption,
    MultipleCorrectOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct QuestionGrade {
    pub question_id: i64,
    #[serde(rename = "type")]
    pub question_type: QuestionKind,
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<GradingAnomaly>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct KindTally {
    #[serde(rename = "type")]
    pub question_type: QuestionKind,
    pub questions: usize,
    pub answered: usize,
    pub correct: usize,
}

/// Outcome of grading one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct GradeSummary {
    /// Percentage of auto-gradable questions answered correctly, two decimals.
    pub score: f64,
    pub auto_gradable: usize,
    pub correct: usize,
    /// Free-text questions awaiting a reviewer.
    pub pending_review: usize,
    pub status: AttemptStatus,
    pub tally: Vec<KindTally>,
    pub questions: Vec<QuestionGrade>,
}

impl GradeSummary {
    /// Correctness flags to persist, one per question that has an answer row.
    pub fn answer_grades(&self, answers: &BTreeMap<i64, Answer>) -> Vec<AnswerGrade> {
        self.questions
            .iter()
            .filter(|g| answers.contains_key(&g.question_id))
            .map(|g| AnswerGrade {
                question_id: g.question_id,
                is_correct: match g.verdict {
                    Verdict::Correct => Some(true),
                    Verdict::Incorrect | Verdict::Unanswered => Some(false),
                    Verdict::ManualReview => None,
                },
            })
            .collect()
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &QuestionGrade> {
        self.questions.iter().filter(|g| g.anomaly.is_some())
    }
}

/// Options a stored answer points at.
#[derive(Debug, PartialEq)]
enum Selection {
    Empty,
    Ids(BTreeSet<i64>),
    /// Contains a token that is not an option of the question.
    Invalid,
}

fn selection_of(question: &TestQuestion, answer: Option<&Answer>) -> Selection {
    let Some(answer) = answer else {
        return Selection::Empty;
    };

    let tokens: Vec<&str> = answer
        .answer_text
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        // Rows written with only the option reference.
        return match answer.option_id {
            Some(id) if question.has_option(id) => Selection::Ids(BTreeSet::from([id])),
            Some(_) => Selection::Invalid,
            None => Selection::Empty,
        };
    }

    let mut ids = BTreeSet::new();
    for token in tokens {
        match token.parse::<i64>() {
            Ok(id) if question.has_option(id) => {
                ids.insert(id);
            }
            _ => return Selection::Invalid,
        }
    }
    Selection::Ids(ids)
}

fn grade_question(question: &TestQuestion, answer: Option<&Answer>) -> QuestionGrade {
    let mut grade = QuestionGrade {
        question_id: question.question_id,
        question_type: question.kind,
        verdict: Verdict::Unanswered,
        anomaly: None,
    };

    if question.kind == QuestionKind::FreeText {
        grade.verdict = Verdict::ManualReview;
        return grade;
    }

    let correct: BTreeSet<i64> = question.correct_option_ids().collect();
    grade.anomaly = match (question.kind, correct.len()) {
        (_, 0) => Some(GradingAnomaly::NoCorrectOption),
        (QuestionKind::Boolean, n) if n > 1 => Some(GradingAnomaly::MultipleCorrectOptions),
        _ => None,
    };
    if let Some(anomaly) = grade.anomaly {
        tracing::warn!(
            "Question {} cannot be satisfied: {:?}",
            question.question_id,
            anomaly
        );
    }

    grade.verdict = match selection_of(question, answer) {
        Selection::Empty => Verdict::Unanswered,
        Selection::Invalid => Verdict::Incorrect,
        Selection::Ids(_) if grade.anomaly.is_some() => Verdict::Incorrect,
        Selection::Ids(selected) => {
            let matches = match question.kind {
                QuestionKind::Boolean => selected.len() == 1 && selected == correct,
                _ => selected == correct,
            };
            if matches {
                Verdict::Correct
            } else {
                Verdict::Incorrect
            }
        }
    };
    grade
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Grades `answers` (keyed by question id) against the test's questions.
pub fn grade_attempt(questions: &[TestQuestion], answers: &BTreeMap<i64, Answer>) -> GradeSummary {
    let grades: Vec<QuestionGrade> = questions
        .iter()
        .map(|q| grade_question(q, answers.get(&q.question_id)))
        .collect();

    let tally = QuestionKind::ALL
        .iter()
        .map(|&kind| {
            let of_kind = grades.iter().filter(|g| g.question_type == kind);
            KindTally {
                question_type: kind,
                questions: of_kind.clone().count(),
                answered: of_kind
                    .clone()
                    .filter(|g| match kind {
                        QuestionKind::FreeText => answers
                            .get(&g.question_id)
                            .and_then(|a| a.answer_text.as_deref())
                            .is_some_and(|t| !t.trim().is_empty()),
                        _ => g.verdict != Verdict::Unanswered,
                    })
                    .count(),
                correct: of_kind.filter(|g| g.verdict == Verdict::Correct).count(),
            }
        })
        .filter(|t| t.questions > 0)
        .collect();

    let auto_gradable = questions.iter().filter(|q| q.kind.is_auto_gradable()).count();
    let correct = grades.iter().filter(|g| g.verdict == Verdict::Correct).count();
    let pending_review = grades
        .iter()
        .filter(|g| g.verdict == Verdict::ManualReview)
        .count();

    let score = if auto_gradable == 0 {
        0.0
    } else {
        round2(correct as f64 / auto_gradable as f64 * 100.0)
    };

    let status = if pending_review > 0 {
        AttemptStatus::PendingReview
    } else {
        AttemptStatus::Completed
    };

    GradeSummary {
        score,
        auto_gradable,
        correct,
        pending_review,
        status,
        tally,
        questions: grades,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{answer::AnswerPayload, question::QuestionOption};
    use crate::services::reconcile::plan_reconciliation;

    fn question(id: i64, kind: QuestionKind, options: &[(i64, &str, bool)]) -> TestQuestion {
        TestQuestion {
            question_id: id,
            order_no: id as i32,
            content: format!("Question {}", id),
            kind,
            options: options
                .iter()
                .map(|&(oid, content, is_correct)| QuestionOption {
                    id: oid,
                    question_id: id,
                    content: content.to_string(),
                    is_correct,
                })
                .collect(),
        }
    }

    fn answer(question_id: i64, text: &str) -> (i64, Answer) {
        (
            question_id,
            Answer {
                id: question_id * 100,
                attempt_id: 1,
                question_id,
                option_id: None,
                answer_text: Some(text.to_string()),
                is_correct: None,
            },
        )
    }

    fn true_false(id: i64) -> TestQuestion {
        question(id, QuestionKind::Boolean, &[(1, "True", true), (2, "False", false)])
    }

    #[test]
    fn test_multi_choice_partial_selection_scores_half() {
        let questions = vec![
            question(
                1,
                QuestionKind::Choice,
                &[(11, "A", true), (12, "B", true), (13, "C", false), (14, "D", false)],
            ),
            question(
                2,
                QuestionKind::Choice,
                &[(21, "A", true), (22, "B", false), (23, "C", true), (24, "D", false)],
            ),
        ];
        let answers = BTreeMap::from([answer(1, "11,12"), answer(2, "21")]);

        let summary = grade_attempt(&questions, &answers);
        assert_eq!(summary.score, 50.0);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.status, AttemptStatus::Completed);
        assert_eq!(summary.questions[1].verdict, Verdict::Incorrect);
    }

    #[test]
    fn test_superset_selection_is_incorrect() {
        let questions = vec![question(
            1,
            QuestionKind::Choice,
            &[(11, "A", true), (12, "B", false)],
        )];
        let answers = BTreeMap::from([answer(1, "11,12")]);
        assert_eq!(grade_attempt(&questions, &answers).score, 0.0);
    }

    #[test]
    fn test_boolean_correct_incorrect_and_unanswered() {
        let questions = vec![true_false(1)];

        let right = BTreeMap::from([answer(1, "1")]);
        assert_eq!(grade_attempt(&questions, &right).questions[0].verdict, Verdict::Correct);

        let wrong = BTreeMap::from([answer(1, "2")]);
        assert_eq!(grade_attempt(&questions, &wrong).questions[0].verdict, Verdict::Incorrect);

        let summary = grade_attempt(&questions, &BTreeMap::new());
        assert_eq!(summary.questions[0].verdict, Verdict::Unanswered);
        assert_eq!(summary.auto_gradable, 1);
        assert_eq!(summary.score, 0.0);
    }

    #[test]
    fn test_boolean_with_two_selections_is_incorrect() {
        let questions = vec![true_false(1)];
        let answers = BTreeMap::from([answer(1, "1,2")]);
        assert_eq!(grade_attempt(&questions, &answers).questions[0].verdict, Verdict::Incorrect);
    }

    #[test]
    fn test_free_text_forces_pending_review() {
        let questions = vec![true_false(1), question(2, QuestionKind::FreeText, &[])];
        let answers = BTreeMap::from([answer(1, "1"), answer(2, "Because.")]);

        let summary = grade_attempt(&questions, &answers);
        assert_eq!(summary.status, AttemptStatus::PendingReview);
        assert_eq!(summary.auto_gradable, 1);
        assert_eq!(summary.score, 100.0);
        assert_eq!(summary.pending_review, 1);
    }

    #[test]
    fn test_only_free_text_scores_zero() {
        let questions = vec![question(1, QuestionKind::FreeText, &[])];
        let summary = grade_attempt(&questions, &BTreeMap::new());
        assert_eq!(summary.score, 0.0);
        assert_eq!(summary.status, AttemptStatus::PendingReview);
    }

    #[test]
    fn test_empty_test_is_completed_with_zero() {
        let summary = grade_attempt(&[], &BTreeMap::new());
        assert_eq!(summary.score, 0.0);
        assert_eq!(summary.status, AttemptStatus::Completed);
    }

    #[test]
    fn test_question_without_correct_option_is_flagged() {
        let questions = vec![question(
            1,
            QuestionKind::Choice,
            &[(11, "A", false), (12, "B", false)],
        )];
        let summary = grade_attempt(&questions, &BTreeMap::from([answer(1, "")]));
        assert_eq!(summary.questions[0].anomaly, Some(GradingAnomaly::NoCorrectOption));
        assert_eq!(summary.anomalies().count(), 1);
        assert_eq!(summary.auto_gradable, 1);
    }

    #[test]
    fn test_foreign_or_raw_token_is_incorrect() {
        let questions = vec![true_false(1)];
        let foreign = BTreeMap::from([answer(1, "99")]);
        assert_eq!(grade_attempt(&questions, &foreign).questions[0].verdict, Verdict::Incorrect);

        let raw = BTreeMap::from([answer(1, "Maybe")]);
        assert_eq!(grade_attempt(&questions, &raw).questions[0].verdict, Verdict::Incorrect);
    }

    #[test]
    fn test_unresolved_value_with_comma_is_incorrect() {
        let questions = vec![question(
            1,
            QuestionKind::Choice,
            &[(3, "A", true), (4, "B", true), (5, "C", false)],
        )];
        let payload = AnswerPayload {
            answers: BTreeMap::from([(1, vec!["3, 4".to_string()])]),
        };
        let plan = plan_reconciliation(1, &questions, vec![], &payload).unwrap();

        let summary = grade_attempt(&questions, &plan.merged);
        assert_eq!(summary.questions[0].verdict, Verdict::Incorrect);
        assert_eq!(summary.score, 0.0);

        // Even alongside the right ids, an unresolved token fails the answer.
        let mixed = BTreeMap::from([answer(1, "3,4,?3 4")]);
        assert_eq!(grade_attempt(&questions, &mixed).questions[0].verdict, Verdict::Incorrect);
    }

    #[test]
    fn test_option_reference_without_text_is_graded() {
        let questions = vec![true_false(1)];
        let mut answers = BTreeMap::from([answer(1, "")]);
        if let Some(a) = answers.get_mut(&1) {
            a.answer_text = None;
            a.option_id = Some(1);
        }
        assert_eq!(grade_attempt(&questions, &answers).questions[0].verdict, Verdict::Correct);
    }

    #[test]
    fn test_score_rounds_to_two_decimals() {
        let questions = vec![true_false(1), true_false(2), true_false(3)];
        let answers = BTreeMap::from([answer(1, "1")]);
        assert_eq!(grade_attempt(&questions, &answers).score, 33.33);
    }

    #[test]
    fn test_tally_and_answer_grades() {
        let questions = vec![
            true_false(1),
            true_false(2),
            question(3, QuestionKind::FreeText, &[]),
        ];
        let answers = BTreeMap::from([answer(1, "2"), answer(3, "text")]);
        let summary = grade_attempt(&questions, &answers);

        let boolean = summary
            .tally
            .iter()
            .find(|t| t.question_type == QuestionKind::Boolean)
            .unwrap();
        assert_eq!((boolean.questions, boolean.answered, boolean.correct), (2, 1, 0));

        let grades = summary.answer_grades(&answers);
        assert_eq!(
            grades,
            vec![
                AnswerGrade { question_id: 1, is_correct: Some(false) },
                AnswerGrade { question_id: 3, is_correct: None },
            ]
        );
    }
}
