use crate::app::ServiceError;
use crate::domain::model::{CertificateDraft, IssueCertificateInput, IssueDocumentInput};
use crate::domain::validate;
use crate::infra::pinning::FileUpload;
use crate::transport::http::auth::Caller;
use crate::transport::http::handlers::common::{fail, ok, parse_token_id};
use crate::transport::http::types::{
    json_422, ApiResponse, AppState, BatchUploadForm, RevokeRequest, SearchParams, UploadForm,
};
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value as JsonValue};

const FILE_FIELD: &str = "certificate";
const BATCH_FILE_FIELD: &str = "certificates";
const STUDENTS_FIELD: &str = "studentsData";

/// Files and text fields of a multipart request.
#[derive(Debug, Default)]
struct Form {
    files: Vec<FileUpload>,
    fields: Map<String, JsonValue>,
}

impl Form {
    fn single_file(&mut self) -> Result<FileUpload, ServiceError> {
        match self.files.len() {
            0 => Err(ServiceError::BadRequest(format!(
                "No file uploaded (expected a '{}' field)",
                FILE_FIELD
            ))),
            1 => Ok(self.files.remove(0)),
            _ => Err(ServiceError::BadRequest("Only one file can be uploaded".to_string())),
        }
    }

    /// Deserializes the text fields. An empty `certificateType` falls back to the default.
    fn parse<T: DeserializeOwned>(&self) -> Result<T, ServiceError> {
        let mut fields = self.fields.clone();
        if fields
            .get("certificateType")
            .and_then(JsonValue::as_str)
            .is_some_and(|t| t.trim().is_empty())
        {
            fields.remove("certificateType");
        }
        serde_json::from_value(JsonValue::Object(fields))
            .map_err(|e| ServiceError::BadRequest(format!("Invalid certificate fields: {}", e)))
    }
}

fn multipart_error(e: MultipartError) -> ServiceError {
    ServiceError::BadRequest(format!("Invalid multipart body: {}", e.body_text()))
}

async fn read_form(
    mut multipart: Multipart,
    file_field: &str,
    max_file_bytes: usize,
) -> Result<Form, ServiceError> {
    let mut form = Form::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        if name != file_field {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, JsonValue::String(value));
            continue;
        }

        let file_name = field.file_name().unwrap_or(FILE_FIELD).to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if validate::document_content_type(&content_type).is_err() {
            return Err(ServiceError::BadRequest(format!(
                "Only image and PDF files are allowed (got {})",
                content_type
            )));
        }
        let bytes = field.bytes().await.map_err(multipart_error)?;
        if bytes.is_empty() {
            return Err(ServiceError::BadRequest(format!("File {} is empty", file_name)));
        }
        if bytes.len() > max_file_bytes {
            return Err(ServiceError::BadRequest(format!(
                "File {} exceeds the {} byte limit",
                file_name, max_file_bytes
            )));
        }
        form.files.push(FileUpload {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        });
    }
    Ok(form)
}

async fn form_or_fail(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
    file_field: &str,
) -> Result<Form, Response> {
    let multipart = multipart.map_err(|e| {
        fail(
            &ServiceError::BadRequest(format!("Expected a multipart/form-data body: {}", e)),
            state.development,
        )
    })?;
    read_form(multipart, file_field, state.max_upload_bytes)
        .await
        .map_err(|e| fail(&e, state.development))
}

#[utoipa::path(
    post,
    path = "/api/certificates/upload",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Document and metadata pinned; `ipfsHash` is the metadata hash to issue", body = ApiResponse),
        (status = 400, description = "Invalid fields or file", body = ApiResponse),
        (status = 403, description = "Institution not verified", body = ApiResponse),
        (status = 502, description = "Pinning service failure", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn upload_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = match form_or_fail(&state, multipart, FILE_FIELD).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let parsed = form
        .single_file()
        .and_then(|file| form.parse::<CertificateDraft>().map(|draft| (file, draft)));
    let (file, draft) = match parsed {
        Ok(v) => v,
        Err(e) => return fail(&e, state.development),
    };
    match state
        .certificates
        .upload_document(&caller.institution, file, draft)
        .await
    {
        Ok(outcome) => ok(StatusCode::OK, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    post,
    path = "/api/certificates/batch-upload",
    request_body(content = BatchUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Per-entry results", body = ApiResponse),
        (status = 400, description = "Missing files or mismatched studentsData", body = ApiResponse),
        (status = 403, description = "Institution not verified", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn batch_upload_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let form = match form_or_fail(&state, multipart, BATCH_FILE_FIELD).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let students = form
        .fields
        .get(STUDENTS_FIELD)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ServiceError::BadRequest(format!("Missing '{}' field", STUDENTS_FIELD)))
        .and_then(|raw| {
            serde_json::from_str::<Vec<CertificateDraft>>(raw).map_err(|e| {
                ServiceError::BadRequest(format!("Invalid {}: {}", STUDENTS_FIELD, e))
            })
        });
    let students = match students {
        Ok(s) => s,
        Err(e) => return fail(&e, state.development),
    };
    match state
        .certificates
        .batch_upload(&caller.institution, form.files, students)
        .await
    {
        Ok(outcome) => ok(StatusCode::OK, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    post,
    path = "/api/certificates/issue",
    request_body = IssueCertificateInput,
    responses(
        (status = 201, description = "Certificate issued", body = ApiResponse),
        (status = 400, description = "Invalid fields", body = ApiResponse),
        (status = 403, description = "Institution not verified", body = ApiResponse),
        (status = 409, description = "Already issued for this student and course", body = ApiResponse),
        (status = 502, description = "Ledger rejected the transaction", body = ApiResponse),
        (status = 504, description = "Ledger outcome unknown; carries the transaction reference", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn issue_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    request: Result<Json<IssueCertificateInput>, JsonRejection>,
) -> Response {
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => {
            return json_422(e, "certificate fields plus studentWalletAddress and ipfsHash")
                .into_response()
        }
    };
    match state.certificates.issue(&caller.institution, request).await {
        Ok(outcome) => ok(StatusCode::CREATED, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    post,
    path = "/api/certificates/issue-document",
    request_body(content = UploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 201, description = "Document pinned and certificate issued", body = ApiResponse),
        (status = 400, description = "Invalid fields or file", body = ApiResponse),
        (status = 409, description = "Already issued for this student and course", body = ApiResponse),
        (status = 502, description = "Pinning or ledger failure", body = ApiResponse),
        (status = 504, description = "Ledger outcome unknown", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn issue_document_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = match form_or_fail(&state, multipart, FILE_FIELD).await {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let parsed = form
        .single_file()
        .and_then(|file| form.parse::<IssueDocumentInput>().map(|input| (file, input)));
    let (file, input) = match parsed {
        Ok(v) => v,
        Err(e) => return fail(&e, state.development),
    };
    match state
        .certificates
        .issue_document(&caller.institution, file, input)
        .await
    {
        Ok(outcome) => ok(StatusCode::CREATED, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/certificates/verify/{tokenId}",
    params(
        ("tokenId" = u64, Path, description = "Ledger token id")
    ),
    responses(
        (status = 200, description = "Ledger state plus local details", body = ApiResponse),
        (status = 404, description = "No such certificate on the ledger", body = ApiResponse)
    )
)]
pub async fn verify_handler(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
) -> Response {
    let token_id = match parse_token_id(&token_id, state.development) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match state.certificates.verify(token_id).await {
        Ok(report) => ok(StatusCode::OK, report),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/certificates/student/{studentId}",
    params(
        ("studentId" = String, Path, description = "Institution-assigned student id")
    ),
    responses(
        (status = 200, description = "Certificates of the student, newest first", body = ApiResponse)
    )
)]
pub async fn student_certificates_handler(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Response {
    match state.certificates.list_by_student(&student_id).await {
        Ok(list) => ok(StatusCode::OK, list),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/certificates/institution",
    responses(
        (status = 200, description = "Certificates issued by the caller, newest first", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn institution_certificates_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Response {
    match state.certificates.list_by_institution(caller.id()).await {
        Ok(list) => ok(StatusCode::OK, list),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    post,
    path = "/api/certificates/revoke/{tokenId}",
    params(
        ("tokenId" = u64, Path, description = "Ledger token id")
    ),
    request_body = RevokeRequest,
    responses(
        (status = 200, description = "Certificate revoked", body = ApiResponse),
        (status = 400, description = "Missing reason", body = ApiResponse),
        (status = 403, description = "Caller did not issue this certificate", body = ApiResponse),
        (status = 404, description = "Certificate not found", body = ApiResponse),
        (status = 409, description = "Already revoked", body = ApiResponse),
        (status = 500, description = "Revoked on-chain but not recorded locally", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn revoke_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(token_id): Path<String>,
    request: Result<Json<RevokeRequest>, JsonRejection>,
) -> Response {
    let token_id = match parse_token_id(&token_id, state.development) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(request) = match request {
        Ok(v) => v,
        Err(e) => return json_422(e, "{\"reason\": \"...\"}").into_response(),
    };
    match state
        .certificates
        .revoke(&caller.institution, token_id, &request.reason)
        .await
    {
        Ok(outcome) => ok(StatusCode::OK, outcome),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/certificates/search",
    params(SearchParams),
    responses(
        (status = 200, description = "Up to 50 matches, newest first", body = ApiResponse),
        (status = 400, description = "Empty query", body = ApiResponse)
    )
)]
pub async fn search_handler(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(v) => v,
        Err(e) => {
            return fail(
                &ServiceError::BadRequest(format!("Invalid search parameters: {}", e)),
                state.development,
            )
        }
    };
    match state.certificates.search(&params.query, params.scope).await {
        Ok(list) => ok(StatusCode::OK, list),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/certificates/metadata/{ipfsHash}",
    params(
        ("ipfsHash" = String, Path, description = "Content hash of a pinned metadata document")
    ),
    responses(
        (status = 200, description = "The pinned JSON document", body = ApiResponse),
        (status = 404, description = "Unknown to the gateway", body = ApiResponse)
    )
)]
pub async fn metadata_handler(
    State(state): State<AppState>,
    Path(ipfs_hash): Path<String>,
) -> Response {
    match state.certificates.metadata(&ipfs_hash).await {
        Ok(document) => ok(StatusCode::OK, document),
        Err(e) => fail(&e, state.development),
    }
}

#[utoipa::path(
    get,
    path = "/api/stats",
    responses(
        (status = 200, description = "Totals for the caller's institution", body = ApiResponse)
    ),
    security(("bearer" = []))
)]
pub async fn stats_handler(State(state): State<AppState>, Caller(caller): Caller) -> Response {
    match state.certificates.stats(caller.id()).await {
        Ok(stats) => ok(StatusCode::OK, stats),
        Err(e) => fail(&e, state.development),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_certificate_type_uses_default() {
        let mut form = Form::default();
        for (k, v) in [
            ("studentName", "Jane Doe"),
            ("studentId", "S1"),
            ("studentEmail", "jane@example.com"),
            ("courseName", "CS101"),
            ("grade", "A"),
            ("certificateType", ""),
            ("graduationDate", "2024-06-30"),
        ] {
            form.fields.insert(k.into(), JsonValue::String(v.into()));
        }
        let draft: CertificateDraft = form.parse().unwrap();
        assert_eq!(draft.certificate_type, Default::default());
        assert_eq!(draft.graduation_date.format("%Y-%m-%d").to_string(), "2024-06-30");
    }
}
