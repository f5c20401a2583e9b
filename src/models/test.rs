// src/models/test.rs

use serde::Serialize;
use sqlx::FromRow;

use crate::models::question::TestQuestion;

/// Represents the 'tests' table in the database.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TestRecord {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    /// Time allowed, in minutes.
    pub duration_minutes: i32,
    /// Pass threshold in percent. Not enforced by the grading engine.
    pub pass_score: f64,
}

/// A test together with its ordered question set.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    pub test: TestRecord,
    pub questions: Vec<TestQuestion>,
}
