use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use tower_http::trace::TraceLayer;

use crate::policy::engine::Evaluator;
use crate::policy::types::AccessRequest;
use crate::settings::Settings;

pub fn router(evaluator: Arc<Evaluator>) -> Router {
    Router::new()
        .route("/v1/evaluate", post(handle_evaluate))
        .route("/healthz", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(evaluator)
}

async fn handle_evaluate(
    State(evaluator): State<Arc<Evaluator>>,
    Json(req): Json<AccessRequest>,
) -> impl IntoResponse {
    match evaluator.evaluate(&req).await {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn serve(settings: &Settings, evaluator: Arc<Evaluator>) -> miette::Result<()> {
    let app = router(evaluator);
    let addr = settings.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.into_diagnostic()?;
    tracing::info!(%addr, "Listening");
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}
