// tests/player_tests.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use survey_backend::{
    config::AssignmentScope,
    error::AppError,
    models::{
        answer::{Answer, AnswerPayload, AnswerWrite},
        assignment::{AssignedTest, Assignment},
        attempt::{Attempt, AttemptStatus, AttemptSummary},
        question::QuestionKind,
        test::TestDefinition,
    },
    services::player::TestPlayer,
    store::{AssessmentStore, Finalization, Finalizer, MemoryStore},
};

fn payload(entries: Vec<(i64, Vec<&str>)>) -> AnswerPayload {
    AnswerPayload {
        answers: entries
            .into_iter()
            .map(|(q, values)| (q, values.into_iter().map(str::to_string).collect()))
            .collect::<BTreeMap<_, _>>(),
    }
}

fn player(store: &Arc<MemoryStore>, scope: AssignmentScope) -> TestPlayer {
    TestPlayer::new(store.clone(), scope)
}

/// Two multi-choice questions, each with two correct options out of four.
fn two_choice_test(store: &MemoryStore) -> (i64, Vec<(i64, Vec<i64>)>) {
    let q1 = store.add_question(
        QuestionKind::Choice,
        "Select the fire exits",
        &[("North", true), ("South", true), ("East", false), ("West", false)],
    );
    let q2 = store.add_question(
        QuestionKind::Choice,
        "Select the first-aid rooms",
        &[("A1", false), ("B2", true), ("C3", true), ("D4", false)],
    );
    let test = store.add_test("Site safety", &[q1.0, q2.0]);
    (test, vec![q1, q2])
}

#[tokio::test]
async fn start_or_resume_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);

    let first = player.start_or_resume(user, test).await.unwrap();
    let second = player.start_or_resume(user, test).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.session.attempt.id, second.session.attempt.id);
    assert_eq!(store.attempt_count(user, test), 1);
}

#[tokio::test]
async fn concurrent_starts_create_one_attempt() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let player = player.clone();
            tokio::spawn(async move { player.start_or_resume(user, test).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().session.attempt.id);
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.attempt_count(user, test), 1);
}

#[tokio::test]
async fn start_checks_user_test_and_assignment() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    let player = player(&store, AssignmentScope::Direct);

    assert_eq!(
        player.start_or_resume(user, test).await.unwrap_err(),
        AppError::NotAssigned
    );
    assert_eq!(
        player.start_or_resume(user, 424_242).await.unwrap_err(),
        AppError::TestNotFound
    );
    assert_eq!(
        player.start_or_resume(999_999, test).await.unwrap_err().code(),
        "unauthorized"
    );
    assert_eq!(store.attempt_count(user, test), 0);
}

#[tokio::test]
async fn expired_assignment_creates_no_attempt() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    store.assign_user(test, user, Some(Utc::now() - Duration::minutes(5)));
    let player = player(&store, AssignmentScope::Direct);

    assert_eq!(
        player.start_or_resume(user, test).await.unwrap_err(),
        AppError::AssignmentExpired
    );
    assert_eq!(store.attempt_count(user, test), 0);
}

#[tokio::test]
async fn valid_assignment_wins_over_expired_one() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    let later = Utc::now() + Duration::days(3);
    store.assign_user(test, user, Some(Utc::now() - Duration::days(1)));
    store.assign_user(test, user, Some(Utc::now() + Duration::days(1)));
    store.assign_user(test, user, Some(later));
    let player = player(&store, AssignmentScope::Direct);

    let started = player.start_or_resume(user, test).await.unwrap();
    assert_eq!(started.session.deadline, Some(later));
}

#[tokio::test]
async fn departmental_assignment_depends_on_scope() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, _) = two_choice_test(&store);
    store.add_department_member(user, 7);
    store.assign_department(test, 7, None);

    let direct = player(&store, AssignmentScope::Direct);
    assert_eq!(
        direct.start_or_resume(user, test).await.unwrap_err(),
        AppError::NotAssigned
    );

    let departmental = player(&store, AssignmentScope::Departmental);
    assert!(departmental.start_or_resume(user, test).await.unwrap().created);
}

#[tokio::test]
async fn repeated_draft_keeps_one_row_with_latest_value() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;
    let (q1, opts) = &qs[0];

    let first = opts[0].to_string();
    let second = opts[2].to_string();
    player
        .save_draft(attempt.id, user, &payload(vec![(*q1, vec![first.as_str()])]))
        .await
        .unwrap();
    let saved = player
        .save_draft(attempt.id, user, &payload(vec![(*q1, vec![second.as_str()])]))
        .await
        .unwrap();
    assert_eq!(saved.updated, 1);

    let answers = store.list_answers(attempt.id).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].option_id, Some(opts[2]));

    // Same payload again: nothing to write.
    let again = player
        .save_draft(attempt.id, user, &payload(vec![(*q1, vec![second.as_str()])]))
        .await
        .unwrap();
    assert_eq!((again.inserted, again.updated, again.unchanged), (0, 0, 1));
    assert_eq!(store.list_answers(attempt.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn omitted_questions_keep_their_answers() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let a = qs[0].1[0].to_string();
    let b = qs[1].1[1].to_string();
    player
        .save_draft(
            attempt.id,
            user,
            &payload(vec![(qs[0].0, vec![a.as_str()]), (qs[1].0, vec![b.as_str()])]),
        )
        .await
        .unwrap();
    player
        .save_draft(attempt.id, user, &payload(vec![(qs[1].0, vec![])]))
        .await
        .unwrap();

    let answers = store.list_answers(attempt.id).await.unwrap();
    let q1 = answers.iter().find(|a| a.question_id == qs[0].0).unwrap();
    let q2 = answers.iter().find(|a| a.question_id == qs[1].0).unwrap();
    assert_eq!(q1.option_id, Some(qs[0].1[0]));
    assert_eq!(q2.answer_text, None);
}

#[tokio::test]
async fn half_right_multi_choice_scores_fifty() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let q1_a = qs[0].1[0].to_string();
    let q1_b = qs[0].1[1].to_string();
    let q2_a = qs[1].1[1].to_string();
    let receipt = player
        .submit(
            attempt.id,
            user,
            &payload(vec![
                (qs[0].0, vec![q1_b.as_str(), q1_a.as_str()]),
                (qs[1].0, vec![q2_a.as_str()]),
            ]),
        )
        .await
        .unwrap();

    assert_eq!(receipt.attempt.score, Some(50.0));
    assert_eq!(receipt.attempt.status, AttemptStatus::Completed);
    assert!(receipt.attempt.ended_at.is_some());

    let result = player.get_result(attempt.id, user).await.unwrap();
    assert_eq!(result.attempt.status, AttemptStatus::Completed);
    assert_eq!(result.questions[0].is_correct, Some(true));
    assert_eq!(result.questions[1].is_correct, Some(false));
}

#[tokio::test]
async fn boolean_answers_by_content_and_unanswered() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let make = |text: &str| {
        store.add_question(
            QuestionKind::Boolean,
            text,
            &[("True", true), ("False", false)],
        )
    };
    let (yes, _) = make("Visitors sign in");
    let (no, _) = make("Doors may be propped open");
    let (skipped, _) = make("Alarms are tested weekly");
    let test = store.add_test("Policies", &[yes, no, skipped]);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let receipt = player
        .submit(
            attempt.id,
            user,
            &payload(vec![(yes, vec!["True"]), (no, vec!["False"])]),
        )
        .await
        .unwrap();

    assert_eq!(receipt.summary.auto_gradable, 3);
    assert_eq!(receipt.summary.correct, 1);
    assert_eq!(receipt.attempt.score, Some(33.33));
    assert_eq!(receipt.attempt.status, AttemptStatus::Completed);
}

#[tokio::test]
async fn free_text_forces_pending_review() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (choice, opts) = store.add_question(
        QuestionKind::Choice,
        "Pick the right one",
        &[("Right", true), ("Wrong", false)],
    );
    let (essay, _) = store.add_question(QuestionKind::FreeText, "Describe the process", &[]);
    let test = store.add_test("Mixed", &[choice, essay]);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let right = opts[0].to_string();
    let receipt = player
        .submit(
            attempt.id,
            user,
            &payload(vec![(choice, vec![right.as_str()]), (essay, vec!["<b>Step one</b>"])]),
        )
        .await
        .unwrap();

    assert_eq!(receipt.attempt.status, AttemptStatus::PendingReview);
    assert_eq!(receipt.attempt.score, Some(100.0));
    assert_eq!(receipt.summary.pending_review, 1);

    let answers = store.list_answers(attempt.id).await.unwrap();
    let essay_answer = answers.iter().find(|a| a.question_id == essay).unwrap();
    assert_eq!(essay_answer.is_correct, None);
}

#[tokio::test]
async fn finalized_attempt_rejects_further_writes() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let receipt = player
        .submit(attempt.id, user, &AnswerPayload::default())
        .await
        .unwrap();
    assert_eq!(receipt.attempt.score, Some(0.0));

    let value = qs[0].1[0].to_string();
    let change = payload(vec![(qs[0].0, vec![value.as_str()])]);
    assert_eq!(
        player.save_draft(attempt.id, user, &change).await.unwrap_err(),
        AppError::AttemptAlreadyFinalized
    );
    assert_eq!(
        player.submit(attempt.id, user, &change).await.unwrap_err(),
        AppError::AttemptAlreadyFinalized
    );
    assert!(store.list_answers(attempt.id).await.unwrap().is_empty());

    // A fresh start after submission opens a new attempt.
    let next = player.start_or_resume(user, test).await.unwrap();
    assert!(next.created);
    assert_ne!(next.session.attempt.id, attempt.id);
}

#[tokio::test]
async fn persistence_failure_leaves_attempt_untouched() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let value = qs[0].1[0].to_string();
    let answers = payload(vec![(qs[0].0, vec![value.as_str()])]);

    store.fail_writes(true);
    let err = player.submit(attempt.id, user, &answers).await.unwrap_err();
    assert_eq!(err.code(), "persistence_failure");
    store.fail_writes(false);

    let stored = store.find_attempt(attempt.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AttemptStatus::InProgress);
    assert_eq!(stored.score, None);
    assert!(store.list_answers(attempt.id).await.unwrap().is_empty());

    // The same submission goes through once the store recovers.
    let receipt = player.submit(attempt.id, user, &answers).await.unwrap();
    assert_eq!(receipt.attempt.status, AttemptStatus::Completed);
}

#[tokio::test]
async fn attempts_of_other_users_are_not_found() {
    let store = Arc::new(MemoryStore::new());
    let owner = store.add_user();
    let other = store.add_user();
    let (test, _) = two_choice_test(&store);
    store.assign_user(test, owner, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(owner, test).await.unwrap().session.attempt;

    assert_eq!(
        player
            .save_draft(attempt.id, other, &AnswerPayload::default())
            .await
            .unwrap_err(),
        AppError::AttemptNotFound
    );
    assert_eq!(
        player.get_result(attempt.id, other).await.unwrap_err().code(),
        "not_found"
    );
}

#[tokio::test]
async fn result_hides_correctness_while_in_progress() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let value = qs[0].1[0].to_string();
    player
        .save_draft(attempt.id, user, &payload(vec![(qs[0].0, vec![value.as_str()])]))
        .await
        .unwrap();

    let result = player.get_result(attempt.id, user).await.unwrap();
    let first = &result.questions[0];
    assert!(first.options[0].selected);
    assert!(first.options.iter().all(|o| o.is_correct.is_none()));
    assert_eq!(first.is_correct, None);
}

#[tokio::test]
async fn dashboard_hides_expired_assignments() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (open_test, _) = two_choice_test(&store);
    let (closed_test, _) = two_choice_test(&store);
    store.assign_user(open_test, user, None);
    store.assign_user(closed_test, user, Some(Utc::now() - Duration::days(1)));
    let player = player(&store, AssignmentScope::Direct);

    let dashboard = player.dashboard(user).await.unwrap();
    assert_eq!(dashboard.assignments.len(), 1);
    assert_eq!(dashboard.assignments[0].test_id, open_test);
    assert!(dashboard.attempts.is_empty());
}

/// Store whose submit lets one autosave commit right before the attempt is locked.
struct AutosaveBeforeSubmit {
    inner: Arc<MemoryStore>,
    autosave: AnswerWrite,
}

#[async_trait]
impl AssessmentStore for AutosaveBeforeSubmit {
    async fn user_exists(&self, user_id: i64) -> Result<bool, AppError> {
        self.inner.user_exists(user_id).await
    }

    async fn load_test(&self, test_id: i64) -> Result<Option<TestDefinition>, AppError> {
        self.inner.load_test(test_id).await
    }

    async fn find_assignments(
        &self,
        user_id: i64,
        test_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<Assignment>, AppError> {
        self.inner.find_assignments(user_id, test_id, scope).await
    }

    async fn list_assigned_tests(
        &self,
        user_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<AssignedTest>, AppError> {
        self.inner.list_assigned_tests(user_id, scope).await
    }

    async fn list_attempts(&self, user_id: i64) -> Result<Vec<AttemptSummary>, AppError> {
        self.inner.list_attempts(user_id).await
    }

    async fn open_attempt(
        &self,
        user_id: i64,
        test_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<(Attempt, bool), AppError> {
        self.inner.open_attempt(user_id, test_id, started_at).await
    }

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        self.inner.find_attempt(attempt_id).await
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError> {
        self.inner.list_answers(attempt_id).await
    }

    async fn save_answers(&self, attempt_id: i64, writes: &[AnswerWrite]) -> Result<(), AppError> {
        self.inner.save_answers(attempt_id, writes).await
    }

    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        finalize: Finalizer<'_>,
    ) -> Result<(Attempt, Finalization), AppError> {
        self.inner
            .save_answers(attempt_id, std::slice::from_ref(&self.autosave))
            .await?;
        self.inner.finalize_attempt(attempt_id, finalize).await
    }
}

#[tokio::test]
async fn submit_grades_answers_saved_just_before_it() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);

    // q2's correct pair arrives from an autosave racing the submit.
    let (q2, q2_opts) = qs[1].clone();
    let wrapped = Arc::new(AutosaveBeforeSubmit {
        inner: store.clone(),
        autosave: AnswerWrite {
            question_id: q2,
            option_id: None,
            answer_text: Some(format!("{},{}", q2_opts[1], q2_opts[2])),
        },
    });
    let player = TestPlayer::new(wrapped, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    let a = qs[0].1[0].to_string();
    let b = qs[0].1[1].to_string();
    let receipt = player
        .submit(attempt.id, user, &payload(vec![(qs[0].0, vec![a.as_str(), b.as_str()])]))
        .await
        .unwrap();

    assert_eq!(receipt.attempt.score, Some(100.0));
    assert_eq!(receipt.summary.correct, 2);

    let answers = store.list_answers(attempt.id).await.unwrap();
    let stored_q2 = answers.iter().find(|a| a.question_id == q2).unwrap();
    assert_eq!(stored_q2.is_correct, Some(true));
}

#[tokio::test]
async fn submit_with_unresolved_comma_value_scores_zero() {
    let store = Arc::new(MemoryStore::new());
    let user = store.add_user();
    let (test, qs) = two_choice_test(&store);
    store.assign_user(test, user, None);
    let player = player(&store, AssignmentScope::Direct);
    let attempt = player.start_or_resume(user, test).await.unwrap().session.attempt;

    // One raw value spelling both correct ids; it matches no single option.
    let joined = format!("{}, {}", qs[0].1[0], qs[0].1[1]);
    let receipt = player
        .submit(attempt.id, user, &payload(vec![(qs[0].0, vec![joined.as_str()])]))
        .await
        .unwrap();

    assert_eq!(receipt.attempt.score, Some(0.0));
    let answers = store.list_answers(attempt.id).await.unwrap();
    assert_eq!(answers[0].is_correct, Some(false));
}
