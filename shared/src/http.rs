//! HTTP surface of a participant service: `POST /try`, `/cancel`, `/confirm`.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tracing::{error, info, warn};

use crate::participant::{ParticipantError, ParticipantStore};
use crate::BizData;

type SharedStore = Arc<dyn ParticipantStore>;

pub fn router<S: ParticipantStore>(store: S) -> Router {
    let store: SharedStore = Arc::new(store);
    Router::new()
        .route("/try", post(try_reserve))
        .route("/cancel", post(cancel))
        .route("/confirm", post(confirm))
        .route("/health", get(health_check))
        .with_state(store)
}

fn decode(
    store: &SharedStore,
    op: &str,
    payload: Result<Json<BizData>, JsonRejection>,
) -> Result<BizData, StatusCode> {
    let Json(biz) = payload.map_err(|e| {
        warn!(participant = store.kind().name(), "Dropping malformed {} request: {}", op, e);
        StatusCode::BAD_REQUEST
    })?;
    biz.validate().map_err(|e| {
        warn!(participant = store.kind().name(), biz_id = biz.biz_id(), "Rejecting {}: {}", op, e);
        StatusCode::BAD_REQUEST
    })?;
    Ok(biz)
}

fn failure_status(store: &SharedStore, op: &str, biz: &BizData, err: &ParticipantError) -> StatusCode {
    let participant = store.kind().name();
    match err {
        ParticipantError::Insufficient { .. } => {
            info!(participant, biz_id = biz.biz_id(), "{} refused: {}", op, err);
            StatusCode::CONFLICT
        }
        ParticipantError::Contended(_) => {
            warn!(participant, biz_id = biz.biz_id(), "{} contended: {}", op, err);
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => {
            error!(participant, biz_id = biz.biz_id(), "{} failed: {}", op, err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn try_reserve(
    State(store): State<SharedStore>,
    payload: Result<Json<BizData>, JsonRejection>,
) -> StatusCode {
    let biz = match decode(&store, "try", payload) {
        Ok(biz) => biz,
        Err(status) => return status,
    };
    match store.try_reserve(&biz).await {
        Ok(outcome) => {
            info!(participant = store.kind().name(), biz_id = biz.biz_id(), ?outcome, "try");
            StatusCode::OK
        }
        Err(e) => failure_status(&store, "try", &biz, &e),
    }
}

async fn cancel(
    State(store): State<SharedStore>,
    payload: Result<Json<BizData>, JsonRejection>,
) -> StatusCode {
    let biz = match decode(&store, "cancel", payload) {
        Ok(biz) => biz,
        Err(status) => return status,
    };
    match store.cancel(&biz).await {
        Ok(outcome) => {
            info!(participant = store.kind().name(), biz_id = biz.biz_id(), ?outcome, "cancel");
            StatusCode::OK
        }
        Err(e) => failure_status(&store, "cancel", &biz, &e),
    }
}

async fn confirm(
    State(store): State<SharedStore>,
    payload: Result<Json<BizData>, JsonRejection>,
) -> StatusCode {
    let biz = match decode(&store, "confirm", payload) {
        Ok(biz) => biz,
        Err(status) => return status,
    };
    match store.confirm(&biz).await {
        Ok(outcome) => {
            info!(participant = store.kind().name(), biz_id = biz.biz_id(), ?outcome, "confirm");
            StatusCode::OK
        }
        Err(e) => failure_status(&store, "confirm", &biz, &e),
    }
}

pub async fn health_check() -> &'static str {
    "OK"
}
