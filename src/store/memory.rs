// src/store/memory.rs

//! In-process store backed by plain collections behind one mutex.
//!
//! Every trait call takes the lock once, so check-then-insert and multi-row
//! writes are atomic. Used by the test suites and for running the service
//! without a database.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    config::AssignmentScope,
    error::AppError,
    models::{
        answer::{Answer, AnswerWrite},
        assignment::{AssignedTest, Assignment},
        attempt::{Attempt, AttemptStatus, AttemptSummary},
        question::{QuestionKind, QuestionOption, TestQuestion},
        test::{TestDefinition, TestRecord},
    },
    store::{AssessmentStore, Finalization, Finalizer},
};

#[derive(Debug)]
struct StoredQuestion {
    content: String,
    kind: QuestionKind,
}

#[derive(Debug, Default)]
struct Tables {
    last_id: i64,
    users: BTreeSet<i64>,
    /// (user_id, department_id)
    memberships: BTreeSet<(i64, i64)>,
    questions: BTreeMap<i64, StoredQuestion>,
    options: Vec<QuestionOption>,
    tests: BTreeMap<i64, TestRecord>,
    /// (test_id, question_id, order_no)
    test_questions: Vec<(i64, i64, i32)>,
    assignments: Vec<Assignment>,
    attempts: BTreeMap<i64, Attempt>,
    answers: Vec<Answer>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn applies(&self, assignment: &Assignment, user_id: i64, scope: AssignmentScope) -> bool {
        if assignment.user_id == Some(user_id) {
            return true;
        }
        match (scope, assignment.department_id) {
            (AssignmentScope::Departmental, Some(dept)) => {
                self.memberships.contains(&(user_id, dept))
            }
            _ => false,
        }
    }

    fn in_progress(&self, attempt_id: i64) -> Result<(), AppError> {
        match self.attempts.get(&attempt_id) {
            None => Err(AppError::AttemptNotFound),
            Some(a) if a.status.is_terminal() => Err(AppError::AttemptAlreadyFinalized),
            Some(_) => Ok(()),
        }
    }

    fn upsert(&mut self, attempt_id: i64, writes: &[AnswerWrite]) {
        for write in writes {
            let existing = self
                .answers
                .iter_mut()
                .find(|a| a.attempt_id == attempt_id && a.question_id == write.question_id);
            match existing {
                Some(answer) => {
                    answer.option_id = write.option_id;
                    answer.answer_text = write.answer_text.clone();
                    answer.is_correct = None;
                }
                None => {
                    let id = self.next_id();
                    self.answers.push(Answer {
                        id,
                        attempt_id,
                        question_id: write.question_id,
                        option_id: write.option_id,
                        answer_text: write.answer_text.clone(),
                        is_correct: None,
                    });
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), AppError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::PersistenceFailure(
                "write rejected by memory store".to_string(),
            ));
        }
        Ok(())
    }

    /// Makes every subsequent write fail with `PersistenceFailure` until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn add_user(&self) -> i64 {
        let mut t = self.tables();
        let id = t.next_id();
        t.users.insert(id);
        id
    }

    pub fn add_department_member(&self, user_id: i64, department_id: i64) {
        self.tables().memberships.insert((user_id, department_id));
    }

    /// Adds a question and its options; returns the question id and option ids in order.
    pub fn add_question(
        &self,
        kind: QuestionKind,
        content: &str,
        options: &[(&str, bool)],
    ) -> (i64, Vec<i64>) {
        let mut t = self.tables();
        let question_id = t.next_id();
        t.questions.insert(
            question_id,
            StoredQuestion {
                content: content.to_string(),
                kind,
            },
        );
        let mut option_ids = Vec::with_capacity(options.len());
        for (content, is_correct) in options {
            let id = t.next_id();
            t.options.push(QuestionOption {
                id,
                question_id,
                content: content.to_string(),
                is_correct: *is_correct,
            });
            option_ids.push(id);
        }
        (question_id, option_ids)
    }

    /// Adds a test whose questions are ordered as given.
    pub fn add_test(&self, title: &str, question_ids: &[i64]) -> i64 {
        let mut t = self.tables();
        let test_id = t.next_id();
        t.tests.insert(
            test_id,
            TestRecord {
                id: test_id,
                title: title.to_string(),
                description: None,
                duration_minutes: 30,
                pass_score: 70.0,
            },
        );
        for (i, question_id) in question_ids.iter().enumerate() {
            t.test_questions.push((test_id, *question_id, i as i32 + 1));
        }
        test_id
    }

    pub fn assign_user(&self, test_id: i64, user_id: i64, deadline: Option<DateTime<Utc>>) -> i64 {
        self.assign(test_id, Some(user_id), None, deadline)
    }

    pub fn assign_department(
        &self,
        test_id: i64,
        department_id: i64,
        deadline: Option<DateTime<Utc>>,
    ) -> i64 {
        self.assign(test_id, None, Some(department_id), deadline)
    }

    fn assign(
        &self,
        test_id: i64,
        user_id: Option<i64>,
        department_id: Option<i64>,
        deadline: Option<DateTime<Utc>>,
    ) -> i64 {
        let mut t = self.tables();
        let id = t.next_id();
        t.assignments.push(Assignment {
            id,
            test_id,
            user_id,
            department_id,
            assigned_at: Some(Utc::now()),
            deadline,
        });
        id
    }

    /// Number of attempts stored for (user, test), any status.
    pub fn attempt_count(&self, user_id: i64, test_id: i64) -> usize {
        self.tables()
            .attempts
            .values()
            .filter(|a| a.user_id == user_id && a.test_id == test_id)
            .count()
    }
}

#[async_trait]
impl AssessmentStore for MemoryStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, AppError> {
        Ok(self.tables().users.contains(&user_id))
    }

    async fn load_test(&self, test_id: i64) -> Result<Option<TestDefinition>, AppError> {
        let t = self.tables();
        let Some(test) = t.tests.get(&test_id).cloned() else {
            return Ok(None);
        };

        let mut links: Vec<&(i64, i64, i32)> =
            t.test_questions.iter().filter(|l| l.0 == test_id).collect();
        links.sort_by_key(|l| l.2);

        let mut questions = Vec::with_capacity(links.len());
        for &&(_, question_id, order_no) in &links {
            let Some(stored) = t.questions.get(&question_id) else {
                continue;
            };
            let mut options: Vec<QuestionOption> = t
                .options
                .iter()
                .filter(|o| o.question_id == question_id)
                .cloned()
                .collect();
            options.sort_by_key(|o| o.id);
            questions.push(TestQuestion {
                question_id,
                order_no,
                content: stored.content.clone(),
                kind: stored.kind,
                options,
            });
        }

        Ok(Some(TestDefinition { test, questions }))
    }

    async fn find_assignments(
        &self,
        user_id: i64,
        test_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<Assignment>, AppError> {
        let t = self.tables();
        Ok(t.assignments
            .iter()
            .filter(|a| a.test_id == test_id && t.applies(a, user_id, scope))
            .cloned()
            .collect())
    }

    async fn list_assigned_tests(
        &self,
        user_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<AssignedTest>, AppError> {
        let t = self.tables();
        let mut assignments: Vec<&Assignment> = t
            .assignments
            .iter()
            .filter(|a| t.applies(a, user_id, scope))
            .collect();
        // Same order as the SQL listing: deadline NULLS LAST, then id.
        assignments.sort_by_key(|a| (a.deadline.is_none(), a.deadline, a.id));

        Ok(assignments
            .into_iter()
            .filter_map(|a| {
                t.tests.get(&a.test_id).map(|test| AssignedTest {
                    assignment_id: a.id,
                    test_id: test.id,
                    title: test.title.clone(),
                    description: test.description.clone(),
                    duration_minutes: test.duration_minutes,
                    deadline: a.deadline,
                })
            })
            .collect())
    }

    async fn list_attempts(&self, user_id: i64) -> Result<Vec<AttemptSummary>, AppError> {
        let t = self.tables();
        let mut attempts: Vec<AttemptSummary> = t
            .attempts
            .values()
            .filter(|a| a.user_id == user_id)
            .map(|a| AttemptSummary {
                id: a.id,
                test_id: a.test_id,
                test_title: t
                    .tests
                    .get(&a.test_id)
                    .map(|test| test.title.clone())
                    .unwrap_or_default(),
                started_at: a.started_at,
                ended_at: a.ended_at,
                score: a.score,
                status: a.status,
            })
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(attempts)
    }

    async fn open_attempt(
        &self,
        user_id: i64,
        test_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<(Attempt, bool), AppError> {
        let mut t = self.tables();
        let open = t.attempts.values().find(|a| {
            a.user_id == user_id && a.test_id == test_id && a.status == AttemptStatus::InProgress
        });
        if let Some(attempt) = open {
            return Ok((attempt.clone(), false));
        }

        self.check_writable()?;
        let id = t.next_id();
        let attempt = Attempt {
            id,
            user_id,
            test_id,
            started_at,
            ended_at: None,
            score: None,
            status: AttemptStatus::InProgress,
        };
        t.attempts.insert(id, attempt.clone());
        Ok((attempt, true))
    }

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        Ok(self.tables().attempts.get(&attempt_id).cloned())
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError> {
        Ok(self
            .tables()
            .answers
            .iter()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect())
    }

    async fn save_answers(&self, attempt_id: i64, writes: &[AnswerWrite]) -> Result<(), AppError> {
        let mut t = self.tables();
        t.in_progress(attempt_id)?;
        self.check_writable()?;
        t.upsert(attempt_id, writes);
        Ok(())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        finalize: Finalizer<'_>,
    ) -> Result<(Attempt, Finalization), AppError> {
        let mut t = self.tables();
        t.in_progress(attempt_id)?;

        let current: Vec<Answer> = t
            .answers
            .iter()
            .filter(|a| a.attempt_id == attempt_id)
            .cloned()
            .collect();
        let finalization = finalize(current)?;
        self.check_writable()?;

        t.upsert(attempt_id, &finalization.writes);
        for grade in &finalization.grades {
            if let Some(answer) = t
                .answers
                .iter_mut()
                .find(|a| a.attempt_id == attempt_id && a.question_id == grade.question_id)
            {
                answer.is_correct = grade.is_correct;
            }
        }

        let completion = &finalization.completion;
        let attempt = t
            .attempts
            .get_mut(&attempt_id)
            .ok_or(AppError::AttemptNotFound)?;
        attempt.ended_at = Some(completion.ended_at);
        attempt.score = Some(completion.score);
        attempt.status = completion.status;
        let attempt = attempt.clone();
        Ok((attempt, finalization))
    }
}
