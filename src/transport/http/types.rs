use crate::app::{CertificateService, InstitutionService};
use crate::domain::model::SearchScope;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

#[derive(Clone)]
pub struct AppState {
    pub certificates: Arc<CertificateService>,
    pub institutions: Arc<InstitutionService>,
    /// Include error chains in 5xx responses.
    pub development: bool,
    /// Per-file upload limit in bytes.
    pub max_upload_bytes: usize,
}

#[derive(Serialize, Debug, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub data: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize, Debug, ToSchema)]
pub struct RevokeRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize, Debug, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SearchParams {
    /// Text to look for; required.
    #[serde(default)]
    pub query: String,
    /// `student`, `course`, `tokenId`; anything else searches all fields.
    #[serde(default, rename = "type")]
    #[param(value_type = Option<String>)]
    pub scope: SearchScope,
}

/// Multipart form of `/api/certificates/upload` (documentation only).
#[derive(Serialize, Debug, ToSchema)]
#[allow(dead_code)]
#[serde(rename_all = "camelCase")]
pub struct UploadForm {
    /// Image or PDF document.
    #[schema(value_type = String, format = Binary)]
    pub certificate: Vec<u8>,
    pub student_name: String,
    pub student_id: String,
    pub student_email: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: Option<String>,
    /// `YYYY-MM-DD` or RFC 3339.
    pub graduation_date: String,
    /// Only read by `/api/certificates/issue-document`.
    pub student_wallet_address: Option<String>,
}

/// Multipart form of `/api/certificates/batch-upload` (documentation only).
#[derive(Serialize, Debug, ToSchema)]
#[allow(dead_code)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadForm {
    #[schema(value_type = Vec<String>)]
    pub certificates: Vec<Vec<u8>>,
    /// JSON array with one certificate draft per file, in file order.
    pub students_data: String,
}

pub fn json_422(err: JsonRejection, expected: &str) -> (StatusCode, Json<ApiResponse>) {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(ApiResponse {
            success: false,
            data: None,
            error: Some(format!("Invalid JSON body: {} (expected: {})", err, expected)),
        }),
    )
}
