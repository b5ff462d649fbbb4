use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::datastore::StreamStatus;
use crate::websocket::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

#[derive(Debug, Serialize)]
pub struct StreamStatusResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StreamStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

pub async fn get_stream_status(
    Path(stream_id): Path<String>,
    State(state): State<AppState>,
) -> (StatusCode, Json<StreamStatusResponse>) {
    match state.datastore.get_stream(&stream_id).await {
        Ok(Some(record)) => (
            StatusCode::OK,
            Json(StreamStatusResponse {
                exists: true,
                status: Some(record.status),
                created_at: Some(record.created_at),
            }),
        ),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(StreamStatusResponse {
                exists: false,
                status: None,
                created_at: None,
            }),
        ),
        Err(err) => {
            warn!(stream = %stream_id, error = %err, "datastore lookup failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StreamStatusResponse {
                    exists: false,
                    status: None,
                    created_at: None,
                }),
            )
        }
    }
}
