use crate::app::ServiceError;
use crate::domain::model::{LoginRequest, RegisterInstitution};
use crate::transport::http::auth::Caller;
use crate::transport::http::handlers::common::{fail, fail_as, ok};
use crate::transport::http::types::{json_422, ApiResponse, AppState};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/api/institutions/register",
    request_body = RegisterInstitution,
    responses(
        (status = 201, description = "Institution registered", body = ApiResponse),
        (status = 400, description = "Invalid fields or body, or e-mail / wallet address / registration number already taken (`data.code` is `CONFLICT`)", body = ApiResponse)
    )
)]
pub async fn register_handler(
    State(state): State<AppState>,
    request: Result<Json<RegisterInstitution>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return fail(
                &ServiceError::BadRequest(format!("Invalid registration body: {}", e.body_text())),
                state.development,
            )
        }
    };
    match state.institutions.register(request).await {
        Ok(outcome) => ok(StatusCode::CREATED, outcome),
        Err(e @ ServiceError::Conflict(_)) => fail_as(StatusCode::BAD_REQUEST, &e, state.development),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    post,
    path = "/api/institutions/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Bearer token and institution summary", body = ApiResponse),
        (status = 401, description = "Invalid credentials", body = ApiResponse),
        (status = 422, description = "Unprocessable entity (invalid JSON body)", body = ApiResponse)
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    request: Result<Json<LoginRequest>, JsonRejection>,
) -> impl IntoResponse {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return json_422(e, "{\"email\": \"...\", \"password\": \"...\"}").into_response()
        }
    };
    match state.institutions.login(request).await {
        Ok(outcome) => ok(StatusCode::OK, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/institutions/me",
    responses(
        (status = 200, description = "The caller's institution", body = ApiResponse),
        (status = 401, description = "Missing token", body = ApiResponse),
        (status = 403, description = "Invalid or expired token", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn profile_handler(Caller(caller): Caller) -> impl IntoResponse {
    ok(
        StatusCode::OK,
        crate::app::dto::InstitutionSummary::from(&caller.institution),
    )
}

#[utoipa::path(
    post,
    path = "/api/admin/institutions/{id}/verify",
    params(
        ("id" = Uuid, Path, description = "Institution to mark as verified")
    ),
    responses(
        (status = 200, description = "Institution verified", body = ApiResponse),
        (status = 403, description = "Caller is not an admin", body = ApiResponse),
        (status = 404, description = "Institution not found", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn verify_institution_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    id: Result<Path<Uuid>, PathRejection>,
) -> impl IntoResponse {
    let Path(id) = match id {
        Ok(v) => v,
        Err(e) => {
            return fail(
                &ServiceError::BadRequest(format!("Invalid institution id: {}", e)),
                state.development,
            )
        }
    };
    match state.institutions.verify_institution(&caller, id).await {
        Ok(summary) => ok(StatusCode::OK, summary),
        Err(e) => fail(&e, state.development),
    }
}
