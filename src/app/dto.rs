//! Results returned by the services and serialized as the `data` of API responses.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::metadata::{CertificateData, CertificateMetadata};
use crate::domain::model::{CertificateType, ContactInfo, Institution};

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UploadOutcome {
    /// Content hash of the metadata document; this is what gets issued.
    pub ipfs_hash: String,
    /// Content hash of the uploaded document itself.
    pub file_hash: String,
    pub metadata: CertificateMetadata,
    pub certificate_data: CertificateData,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueOutcome {
    pub token_id: u64,
    pub transaction_hash: String,
    pub ipfs_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalInfo {
    pub certificate_type: CertificateType,
    pub transaction_hash: String,
    pub ipfs_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub exists: bool,
    pub is_revoked: bool,
    pub token_id: u64,
    pub student_name: String,
    pub course_name: String,
    pub institution_name: String,
    pub grade: String,
    pub issue_date: DateTime<Utc>,
    pub graduation_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_date: Option<DateTime<Utc>>,
    /// `null` when the certificate exists on-chain but is not indexed locally.
    pub additional_info: Option<AdditionalInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RevocationOutcome {
    pub token_id: u64,
    pub transaction_hash: String,
    pub revoke_reason: String,
    pub revoke_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntryError {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BatchUploadOutcome {
    pub uploaded: Vec<UploadOutcome>,
    pub failed: Vec<BatchEntryError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstitutionSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub wallet_address: String,
    pub registration_number: String,
    pub is_verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    pub created_at: DateTime<Utc>,
}

impl From<&Institution> for InstitutionSummary {
    fn from(i: &Institution) -> Self {
        Self {
            id: i.id,
            name: i.name.clone(),
            email: i.email.clone(),
            wallet_address: i.wallet_address.to_string(),
            registration_number: i.registration_number.clone(),
            is_verified: i.is_verified,
            contact_info: i.contact_info.clone(),
            created_at: i.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub institution_id: Uuid,
    pub wallet_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct LoginOutcome {
    pub token: String,
    pub institution: InstitutionSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum DependencyStatus {
    Ok,
    Unavailable,
}

impl DependencyStatus {
    pub fn of<E>(result: &Result<(), E>) -> Self {
        if result.is_ok() {
            Self::Ok
        } else {
            Self::Unavailable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct HealthReport {
    pub status: DependencyStatus,
    pub database: DependencyStatus,
    pub ledger: DependencyStatus,
    pub pinning: DependencyStatus,
    pub timestamp: DateTime<Utc>,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.status == DependencyStatus::Ok
    }
}
