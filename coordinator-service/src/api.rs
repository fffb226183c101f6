use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::{BizData, BizId};

use crate::coordinator::{Coordinator, PurchaseOutcome};

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Coordinator,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurchaseResponse {
    pub biz_id: BizId,
    pub outcome: PurchaseOutcome,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/purchase", post(purchase))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

/// Runs a purchase to the end of its forward path.
///
/// The workflow runs on its own task so a client that hangs up, or the
/// request timeout, cannot stop it between two participant calls.
pub async fn purchase(
    State(state): State<AppState>,
    payload: Result<Json<BizData>, JsonRejection>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let Json(biz) = payload.map_err(|rejection| {
        tracing::warn!("Rejected purchase body: {}", rejection.body_text());
        api_error(StatusCode::BAD_REQUEST, rejection.body_text())
    })?;
    if let Err(e) = biz.validate() {
        tracing::warn!(biz_id = biz.biz_id(), "Rejected purchase: {}", e);
        return Err(api_error(StatusCode::BAD_REQUEST, e.to_string()));
    }

    let coordinator = state.coordinator.clone();
    let outcome = tokio::spawn(async move { coordinator.purchase(biz).await })
        .await
        .map_err(|e| {
            tracing::error!(biz_id = biz.biz_id(), "Purchase task failed: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "purchase task failed")
        })?
        .map_err(|e| {
            tracing::error!(biz_id = biz.biz_id(), "Failed to start purchase: {}", e);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    tracing::info!(biz_id = biz.biz_id(), ?outcome, "Purchase handled");
    Ok(Json(PurchaseResponse {
        biz_id: biz.biz_id(),
        outcome,
    }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
