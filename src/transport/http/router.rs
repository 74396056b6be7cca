use crate::app::dto::{
    AdditionalInfo, BatchEntryError, BatchUploadOutcome, DependencyStatus, HealthReport,
    InstitutionSummary, IssueOutcome, LoginOutcome, RegistrationOutcome, RevocationOutcome,
    UploadOutcome, VerificationReport,
};
use crate::app::MAX_BATCH_SIZE;
use crate::domain::metadata::{
    CertificateData, CertificateMetadata, MetadataAttribute, MetadataProperties,
};
use crate::domain::model::{
    Certificate, CertificateDraft, CertificateStats, CertificateType, ContactInfo,
    IssueCertificateInput, LoginRequest, RegisterInstitution, StudentCertificate, TypeCount,
};
use crate::transport::http::handlers::{certificates, health, institutions};
use crate::transport::http::types::{
    ApiResponse, AppState, BatchUploadForm, RevokeRequest, UploadForm,
};
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

/// Room for the text fields of a multipart form next to its files.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthcheck_handler,
        institutions::register_handler,
        institutions::login_handler,
        institutions::profile_handler,
        institutions::verify_institution_handler,
        certificates::upload_handler,
        certificates::batch_upload_handler,
        certificates::issue_handler,
        certificates::issue_document_handler,
        certificates::verify_handler,
        certificates::student_certificates_handler,
        certificates::institution_certificates_handler,
        certificates::revoke_handler,
        certificates::search_handler,
        certificates::metadata_handler,
        certificates::stats_handler
    ),
    components(schemas(
        ApiResponse,
        RegisterInstitution,
        ContactInfo,
        LoginRequest,
        CertificateDraft,
        CertificateType,
        IssueCertificateInput,
        RevokeRequest,
        UploadForm,
        BatchUploadForm,
        Certificate,
        StudentCertificate,
        CertificateStats,
        TypeCount,
        CertificateMetadata,
        CertificateData,
        MetadataAttribute,
        MetadataProperties,
        UploadOutcome,
        BatchUploadOutcome,
        BatchEntryError,
        IssueOutcome,
        VerificationReport,
        AdditionalInfo,
        RevocationOutcome,
        InstitutionSummary,
        RegistrationOutcome,
        LoginOutcome,
        HealthReport,
        DependencyStatus
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

pub fn create_router(app_state: AppState) -> Router {
    let single_upload_limit = app_state.max_upload_bytes + FORM_OVERHEAD_BYTES;
    let batch_upload_limit = app_state.max_upload_bytes * MAX_BATCH_SIZE + FORM_OVERHEAD_BYTES;

    Router::new()
        .route("/health", get(health::healthcheck_handler))
        .route("/api/institutions/register", post(institutions::register_handler))
        .route("/api/institutions/login", post(institutions::login_handler))
        .route("/api/institutions/me", get(institutions::profile_handler))
        .route(
            "/api/admin/institutions/:id/verify",
            post(institutions::verify_institution_handler),
        )
        .route(
            "/api/certificates/upload",
            post(certificates::upload_handler).layer(DefaultBodyLimit::max(single_upload_limit)),
        )
        .route(
            "/api/certificates/batch-upload",
            post(certificates::batch_upload_handler)
                .layer(DefaultBodyLimit::max(batch_upload_limit)),
        )
        .route("/api/certificates/issue", post(certificates::issue_handler))
        .route(
            "/api/certificates/issue-document",
            post(certificates::issue_document_handler)
                .layer(DefaultBodyLimit::max(single_upload_limit)),
        )
        .route("/api/certificates/verify/:tokenId", get(certificates::verify_handler))
        .route(
            "/api/certificates/student/:studentId",
            get(certificates::student_certificates_handler),
        )
        .route(
            "/api/certificates/institution",
            get(certificates::institution_certificates_handler),
        )
        .route("/api/certificates/revoke/:tokenId", post(certificates::revoke_handler))
        .route("/api/certificates/search", get(certificates::search_handler))
        .route(
            "/api/certificates/metadata/:ipfsHash",
            get(certificates::metadata_handler),
        )
        .route("/api/stats", get(certificates::stats_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
