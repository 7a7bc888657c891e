use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};

use crate::error::AppError;
use crate::services::webhooks::{WebhookOutcome, WebhookService};
use crate::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/twitch", post(handle_twitch_webhook))
}

async fn handle_twitch_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    match WebhookService::ingest(&state, &headers, &body).await? {
        WebhookOutcome::Challenge(challenge) => Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain")],
            challenge,
        )
            .into_response()),
        WebhookOutcome::NoContent => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}
