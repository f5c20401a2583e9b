// src/handlers/player.rs

use axum::{
    Extension, Form, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        answer::{AnswerPayload, SubmitAnswersRequest},
        attempt::{AttemptResult, AttemptSession, Dashboard, SubmissionReceipt},
    },
    services::player::{DraftSaved, TestPlayer},
    utils::{form::payload_from_form, jwt::Claims},
};

/// Lists the caller's open assignments and attempt history.
#[utoipa::path(
    get,
    path = "/api/me/tests",
    tag = "test-player",
    responses((status = 200, description = "Assigned tests and attempts", body = Dashboard))
)]
pub async fn my_tests(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, AppError> {
    let dashboard = player.dashboard(claims.user_id()?).await?;
    Ok(Json(dashboard))
}

/// Starts an attempt at a test, or resumes the caller's open one.
///
/// * 201 when a new attempt was created, 200 when resumed.
#[utoipa::path(
    post,
    path = "/api/tests/{test_id}/attempts",
    tag = "test-player",
    params(("test_id" = i64, Path, description = "Test to take")),
    responses(
        (status = 201, description = "Attempt started", body = AttemptSession),
        (status = 200, description = "Open attempt resumed", body = AttemptSession),
        (status = 403, description = "Not assigned, or assignment expired"),
        (status = 404, description = "Unknown test")
    )
)]
pub async fn start_attempt(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(test_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let started = player.start_or_resume(claims.user_id()?, test_id).await?;
    let status = if started.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(started.session)))
}

/// Saves answers without submitting.
#[utoipa::path(
    put,
    path = "/api/attempts/{attempt_id}/draft",
    tag = "test-player",
    params(("attempt_id" = i64, Path, description = "Caller's attempt")),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Draft saved", body = DraftSaved),
        (status = 404, description = "Unknown attempt"),
        (status = 409, description = "Attempt already submitted")
    )
)]
pub async fn save_draft(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payload = AnswerPayload::from(req);
    let saved = player
        .save_draft(attempt_id, claims.user_id()?, &payload)
        .await?;
    Ok(Json(saved))
}

/// Form-encoded variant of [`save_draft`] (`answer_<questionId>=value`).
pub async fn save_draft_form(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload_from_form(pairs);
    let saved = player
        .save_draft(attempt_id, claims.user_id()?, &payload)
        .await?;
    Ok(Json(saved))
}

/// Submits the attempt: final answers are saved, graded and the attempt closed.
#[utoipa::path(
    post,
    path = "/api/attempts/{attempt_id}/submit",
    tag = "test-player",
    params(("attempt_id" = i64, Path, description = "Caller's attempt")),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Attempt graded", body = SubmissionReceipt),
        (status = 404, description = "Unknown attempt"),
        (status = 409, description = "Attempt already submitted")
    )
)]
pub async fn submit_attempt(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Json(req): Json<SubmitAnswersRequest>,
) -> Result<impl IntoResponse, AppError> {
    let payload = AnswerPayload::from(req);
    let receipt = player
        .submit(attempt_id, claims.user_id()?, &payload)
        .await?;
    Ok(Json(receipt))
}

/// Form-encoded variant of [`submit_attempt`].
pub async fn submit_attempt_form(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
    Form(pairs): Form<Vec<(String, String)>>,
) -> Result<impl IntoResponse, AppError> {
    let payload = payload_from_form(pairs);
    let receipt = player
        .submit(attempt_id, claims.user_id()?, &payload)
        .await?;
    Ok(Json(receipt))
}

/// Returns an attempt with its answers and question context.
#[utoipa::path(
    get,
    path = "/api/attempts/{attempt_id}",
    tag = "test-player",
    params(("attempt_id" = i64, Path, description = "Caller's attempt")),
    responses(
        (status = 200, description = "Attempt result", body = AttemptResult),
        (status = 404, description = "Unknown attempt")
    )
)]
pub async fn get_result(
    State(player): State<TestPlayer>,
    Extension(claims): Extension<Claims>,
    Path(attempt_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = player.get_result(attempt_id, claims.user_id()?).await?;
    Ok(Json(result))
}
