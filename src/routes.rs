// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    handlers::player,
    models::{
        answer::{Answer, AnswerValues, SubmitAnswersRequest},
        assignment::AssignedTest,
        attempt::{
            Attempt, AttemptResult, AttemptSession, AttemptStatus, AttemptSummary, Dashboard,
            OptionResult, QuestionResult, SubmissionReceipt,
        },
        question::{PublicOption, PublicQuestion, QuestionKind},
    },
    services::{
        grading::{GradeSummary, GradingAnomaly, KindTally, QuestionGrade, Verdict},
        player::DraftSaved,
    },
    state::AppState,
    utils::jwt::auth_middleware,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        player::my_tests,
        player::start_attempt,
        player::save_draft,
        player::submit_attempt,
        player::get_result,
    ),
    components(schemas(
        Answer,
        AnswerValues,
        SubmitAnswersRequest,
        AssignedTest,
        Attempt,
        AttemptStatus,
        AttemptSummary,
        AttemptSession,
        AttemptResult,
        QuestionResult,
        OptionResult,
        SubmissionReceipt,
        Dashboard,
        DraftSaved,
        PublicQuestion,
        PublicOption,
        QuestionKind,
        GradeSummary,
        GradingAnomaly,
        KindTally,
        QuestionGrade,
        Verdict,
    )),
    tags((name = "test-player", description = "Taking and grading assigned tests"))
)]
pub struct ApiDoc;

/// Assembles the main application router.
///
/// * Test-player routes sit behind bearer-token authentication.
/// * OpenAPI document and Swagger UI are public.
/// * Global middleware: Trace, CORS.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
        ])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let player_routes = Router::new()
        .route("/me/tests", get(player::my_tests))
        .route("/tests/{test_id}/attempts", post(player::start_attempt))
        .route("/attempts/{attempt_id}", get(player::get_result))
        .route("/attempts/{attempt_id}/draft", put(player::save_draft))
        .route("/attempts/{attempt_id}/draft/form", post(player::save_draft_form))
        .route("/attempts/{attempt_id}/submit", post(player::submit_attempt))
        .route(
            "/attempts/{attempt_id}/submit/form",
            post(player::submit_attempt_form),
        )
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api", player_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Global Middleware (applied from outside in)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
