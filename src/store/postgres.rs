// src/store/postgres.rs

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use crate::{
    config::AssignmentScope,
    error::AppError,
    models::{
        answer::{Answer, AnswerWrite},
        assignment::{AssignedTest, Assignment},
        attempt::{Attempt, AttemptRow, AttemptStatus, AttemptSummary},
        question::{QuestionKind, QuestionOption, TestQuestion},
        test::{TestDefinition, TestRecord},
    },
    store::{AssessmentStore, Finalization, Finalizer},
};

const ATTEMPT_COLUMNS: &str = "id, user_id, test_id, started_at, ended_at, score, status";

/// Helper struct for fetching a test's questions through the join table.
#[derive(sqlx::FromRow)]
struct QuestionRow {
    question_id: i64,
    order_no: i32,
    content: String,
    question_type: String,
}

/// Helper struct for the attempt history listing.
#[derive(sqlx::FromRow)]
struct AttemptSummaryRow {
    id: i64,
    test_id: i64,
    test_title: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    score: Option<f64>,
    status: String,
}

/// Postgres-backed store. Multi-row writes run inside one transaction.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Locks the attempt row and checks it can still be written.
async fn lock_in_progress(conn: &mut PgConnection, attempt_id: i64) -> Result<(), AppError> {
    let status: Option<String> =
        sqlx::query_scalar("SELECT status FROM test_attempts WHERE id = $1 FOR UPDATE")
            .bind(attempt_id)
            .fetch_optional(&mut *conn)
            .await?;

    let status = status.ok_or(AppError::AttemptNotFound)?;
    if AttemptStatus::parse(&status)?.is_terminal() {
        return Err(AppError::AttemptAlreadyFinalized);
    }
    Ok(())
}

async fn upsert_answers(
    conn: &mut PgConnection,
    attempt_id: i64,
    writes: &[AnswerWrite],
) -> Result<(), AppError> {
    if writes.is_empty() {
        return Ok(());
    }

    let mut query_builder = QueryBuilder::<Postgres>::new(
        "INSERT INTO answers (attempt_id, question_id, option_id, answer_text) ",
    );
    query_builder.push_values(writes, |mut row, w| {
        row.push_bind(attempt_id)
            .push_bind(w.question_id)
            .push_bind(w.option_id)
            .push_bind(w.answer_text.clone());
    });
    query_builder.push(
        " ON CONFLICT (attempt_id, question_id) DO UPDATE SET
            option_id = EXCLUDED.option_id,
            answer_text = EXCLUDED.answer_text,
            is_correct = NULL",
    );

    query_builder.build().execute(&mut *conn).await?;
    Ok(())
}

#[async_trait]
impl AssessmentStore for PgStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool, AppError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn load_test(&self, test_id: i64) -> Result<Option<TestDefinition>, AppError> {
        let test = sqlx::query_as::<_, TestRecord>(
            "SELECT id, title, description, duration_minutes, pass_score FROM tests WHERE id = $1",
        )
        .bind(test_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(test) = test else {
            return Ok(None);
        };

        let rows = sqlx::query_as::<_, QuestionRow>(
            r#"
            SELECT
                q.id AS question_id,
                tq.order_no,
                q.content,
                q.question_type
            FROM test_questions tq
            JOIN questions q ON q.id = tq.question_id
            WHERE tq.test_id = $1
            ORDER BY tq.order_no, q.id
            "#,
        )
        .bind(test_id)
        .fetch_all(&self.pool)
        .await?;

        let question_ids: Vec<i64> = rows.iter().map(|r| r.question_id).collect();

        let options = sqlx::query_as::<_, QuestionOption>(
            r#"
            SELECT id, question_id, content, is_correct
            FROM question_options
            WHERE question_id = ANY($1)
            ORDER BY id
            "#,
        )
        .bind(&question_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut options_by_question: BTreeMap<i64, Vec<QuestionOption>> = BTreeMap::new();
        for option in options {
            options_by_question
                .entry(option.question_id)
                .or_default()
                .push(option);
        }

        let questions = rows
            .into_iter()
            .map(|row| {
                Ok(TestQuestion {
                    kind: QuestionKind::from_db_str(&row.question_type)?,
                    options: options_by_question
                        .remove(&row.question_id)
                        .unwrap_or_default(),
                    question_id: row.question_id,
                    order_no: row.order_no,
                    content: row.content,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;

        Ok(Some(TestDefinition { test, questions }))
    }

    async fn find_assignments(
        &self,
        user_id: i64,
        test_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<Assignment>, AppError> {
        let assignments = sqlx::query_as::<_, Assignment>(
            r#"
            SELECT a.id, a.test_id, a.user_id, a.department_id, a.assigned_at, a.deadline
            FROM assignments a
            WHERE a.test_id = $1
              AND (
                a.user_id = $2
                OR ($3 AND a.department_id IN (
                    SELECT department_id FROM user_departments WHERE user_id = $2
                ))
              )
            ORDER BY a.id
            "#,
        )
        .bind(test_id)
        .bind(user_id)
        .bind(scope == AssignmentScope::Departmental)
        .fetch_all(&self.pool)
        .await?;

        Ok(assignments)
    }

    async fn list_assigned_tests(
        &self,
        user_id: i64,
        scope: AssignmentScope,
    ) -> Result<Vec<AssignedTest>, AppError> {
        let tests = sqlx::query_as::<_, AssignedTest>(
            r#"
            SELECT
                a.id AS assignment_id,
                t.id AS test_id,
                t.title,
                t.description,
                t.duration_minutes,
                a.deadline
            FROM assignments a
            JOIN tests t ON t.id = a.test_id
            WHERE a.user_id = $1
               OR ($2 AND a.department_id IN (
                    SELECT department_id FROM user_departments WHERE user_id = $1
               ))
            ORDER BY a.deadline NULLS LAST, a.id
            "#,
        )
        .bind(user_id)
        .bind(scope == AssignmentScope::Departmental)
        .fetch_all(&self.pool)
        .await?;

        Ok(tests)
    }

    async fn list_attempts(&self, user_id: i64) -> Result<Vec<AttemptSummary>, AppError> {
        let rows = sqlx::query_as::<_, AttemptSummaryRow>(
            r#"
            SELECT
                ta.id, ta.test_id, t.title AS test_title,
                ta.started_at, ta.ended_at, ta.score, ta.status
            FROM test_attempts ta
            JOIN tests t ON t.id = ta.test_id
            WHERE ta.user_id = $1
            ORDER BY ta.started_at DESC, ta.id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                Ok(AttemptSummary {
                    id: r.id,
                    test_id: r.test_id,
                    test_title: r.test_title,
                    started_at: r.started_at,
                    ended_at: r.ended_at,
                    score: r.score,
                    status: AttemptStatus::parse(&r.status)?,
                })
            })
            .collect()
    }

    async fn open_attempt(
        &self,
        user_id: i64,
        test_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<(Attempt, bool), AppError> {
        // The partial unique index on (user_id, test_id) WHERE status = 'InProgress'
        // turns a concurrent duplicate insert into a no-op; the loser re-reads.
        for _ in 0..3 {
            let inserted = sqlx::query_as::<_, AttemptRow>(&format!(
                r#"
                INSERT INTO test_attempts (user_id, test_id, started_at, status)
                VALUES ($1, $2, $3, 'InProgress')
                ON CONFLICT (user_id, test_id) WHERE status = 'InProgress' DO NOTHING
                RETURNING {}
                "#,
                ATTEMPT_COLUMNS
            ))
            .bind(user_id)
            .bind(test_id)
            .bind(started_at)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = inserted {
                return Ok((row.try_into()?, true));
            }

            let existing = sqlx::query_as::<_, AttemptRow>(&format!(
                "SELECT {} FROM test_attempts
                 WHERE user_id = $1 AND test_id = $2 AND status = 'InProgress'",
                ATTEMPT_COLUMNS
            ))
            .bind(user_id)
            .bind(test_id)
            .fetch_optional(&self.pool)
            .await?;

            if let Some(row) = existing {
                return Ok((row.try_into()?, false));
            }
            // Finalized between the insert and the read; try again.
        }

        Err(AppError::PersistenceFailure(format!(
            "could not open attempt for user {} on test {}",
            user_id, test_id
        )))
    }

    async fn find_attempt(&self, attempt_id: i64) -> Result<Option<Attempt>, AppError> {
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            "SELECT {} FROM test_attempts WHERE id = $1",
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Attempt::try_from).transpose()
    }

    async fn list_answers(&self, attempt_id: i64) -> Result<Vec<Answer>, AppError> {
        let answers = sqlx::query_as::<_, Answer>(
            r#"
            SELECT id, attempt_id, question_id, option_id, answer_text, is_correct
            FROM answers
            WHERE attempt_id = $1
            ORDER BY question_id
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(answers)
    }

    async fn save_answers(&self, attempt_id: i64, writes: &[AnswerWrite]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        lock_in_progress(&mut *tx, attempt_id).await?;
        upsert_answers(&mut *tx, attempt_id, writes).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn finalize_attempt(
        &self,
        attempt_id: i64,
        finalize: Finalizer<'_>,
    ) -> Result<(Attempt, Finalization), AppError> {
        let mut tx = self.pool.begin().await?;
        lock_in_progress(&mut *tx, attempt_id).await?;

        // Read under the row lock so a concurrent draft save cannot slip in
        // between grading and the status change.
        let current = sqlx::query_as::<_, Answer>(
            r#"
            SELECT id, attempt_id, question_id, option_id, answer_text, is_correct
            FROM answers
            WHERE attempt_id = $1
            ORDER BY question_id
            "#,
        )
        .bind(attempt_id)
        .fetch_all(&mut *tx)
        .await?;

        let finalization = finalize(current)?;
        upsert_answers(&mut *tx, attempt_id, &finalization.writes).await?;

        let grades = &finalization.grades;
        if !grades.is_empty() {
            let question_ids: Vec<i64> = grades.iter().map(|g| g.question_id).collect();
            let flags: Vec<Option<bool>> = grades.iter().map(|g| g.is_correct).collect();

            sqlx::query(
                r#"
                UPDATE answers AS a
                SET is_correct = g.is_correct
                FROM UNNEST($2::BIGINT[], $3::BOOLEAN[]) AS g(question_id, is_correct)
                WHERE a.attempt_id = $1 AND a.question_id = g.question_id
                "#,
            )
            .bind(attempt_id)
            .bind(&question_ids)
            .bind(&flags)
            .execute(&mut *tx)
            .await?;
        }

        let completion = &finalization.completion;
        let row = sqlx::query_as::<_, AttemptRow>(&format!(
            r#"
            UPDATE test_attempts
            SET ended_at = $2, score = $3, status = $4
            WHERE id = $1
            RETURNING {}
            "#,
            ATTEMPT_COLUMNS
        ))
        .bind(attempt_id)
        .bind(completion.ended_at)
        .bind(completion.score)
        .bind(completion.status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((row.try_into()?, finalization))
    }
}
