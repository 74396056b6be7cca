use crate::transport::http::types::{ApiResponse, AppState};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database, ledger and pinning service reachable", body = ApiResponse),
        (status = 503, description = "At least one dependency is unreachable", body = ApiResponse)
    )
)]
pub async fn healthcheck_handler(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.certificates.health().await;
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ApiResponse {
            success: report.healthy(),
            data: serde_json::to_value(&report).ok(),
            error: (!report.healthy()).then(|| "One or more dependencies are unavailable".to_string()),
        }),
    )
        .into_response()
}
