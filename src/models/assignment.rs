// src/models/assignment.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;

/// Represents the 'assignments' table in the database.
/// Exactly one of `user_id` / `department_id` is normally set.
#[derive(Debug, Clone, FromRow)]
pub struct Assignment {
    pub id: i64,
    pub test_id: i64,
    pub user_id: Option<i64>,
    pub department_id: Option<i64>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.is_some_and(|d| d < now)
    }
}

/// Assignment joined with its test, for the "my tests" listing.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct AssignedTest {
    pub assignment_id: i64,
    pub test_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub duration_minutes: i32,
    pub deadline: Option<DateTime<Utc>>,
}
