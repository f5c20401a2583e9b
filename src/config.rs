// src/config.rs

use std::env;
use std::str::FromStr;

use dotenvy::dotenv;

/// Upper bound on distinct questions accepted in one answer payload.
pub const MAX_PAYLOAD_QUESTIONS: usize = 500;

/// Upper bound on raw values submitted for a single question.
pub const MAX_VALUES_PER_QUESTION: usize = 50;

/// Upper bound (in bytes) on a single raw value, free-text included.
pub const MAX_VALUE_LEN: usize = 10_000;

/// How assignments are matched to a caller.
///
/// `Direct` only honours assignments naming the user; `Departmental` also honours
/// assignments made to any department the user belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignmentScope {
    #[default]
    Direct,
    Departmental,
}

impl FromStr for AssignmentScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" | "user" => Ok(AssignmentScope::Direct),
            "departmental" | "department" => Ok(AssignmentScope::Departmental),
            other => Err(format!("unknown assignment scope '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub rust_log: String,
    pub assignment_scope: AssignmentScope,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let assignment_scope = env::var("ASSIGNMENT_SCOPE")
            .ok()
            .map(|v| v.parse().expect("ASSIGNMENT_SCOPE must be 'direct' or 'departmental'"))
            .unwrap_or_default();

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(3000);

        Self {
            database_url,
            jwt_secret,
            rust_log,
            assignment_scope,
            port,
        }
    }
}
