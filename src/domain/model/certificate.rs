use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use super::{truncate_to_millis, CertificateType, IpfsHash, WalletAddress};
use crate::domain::validate;

/// Student and course fields shared by every issuance entry point.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateDraft {
    #[validate(length(min = 2, max = 200), custom(function = "validate::student_name_bytes"))]
    pub student_name: String,
    #[validate(length(min = 1, max = 50), custom(function = "validate::student_id_bytes"))]
    pub student_id: String,
    #[validate(email)]
    pub student_email: String,
    #[validate(length(min = 2, max = 300), custom(function = "validate::course_name_bytes"))]
    pub course_name: String,
    #[validate(custom(function = "validate::grade"))]
    pub grade: String,
    #[serde(default)]
    pub certificate_type: CertificateType,
    #[serde(deserialize_with = "super::deserialize_date")]
    pub graduation_date: DateTime<Utc>,
}

impl CertificateDraft {
    pub fn normalized(self) -> Self {
        Self {
            student_name: self.student_name.trim().to_string(),
            student_id: self.student_id.trim().to_string(),
            student_email: self.student_email.trim().to_lowercase(),
            course_name: self.course_name.trim().to_string(),
            grade: self.grade.trim().to_string(),
            certificate_type: self.certificate_type,
            graduation_date: truncate_to_millis(self.graduation_date),
        }
    }

    /// Runs the derived field checks plus the clock-dependent graduation date check.
    pub fn check(&self, now: DateTime<Utc>) -> ValidationErrors {
        let mut errors = self.validate().err().unwrap_or_else(ValidationErrors::new);
        if let Err(e) = validate::graduation_date(self.graduation_date, now) {
            errors.add("graduation_date", e);
        }
        errors
    }

    pub fn validated(self, now: DateTime<Utc>) -> Result<Self, ValidationErrors> {
        let draft = self.normalized();
        into_result(draft.check(now)).map(|_| draft)
    }
}

/// Body of the issue call: a draft whose metadata was already pinned.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueCertificateInput {
    #[serde(flatten)]
    pub draft: CertificateDraft,
    pub student_wallet_address: String,
    pub ipfs_hash: String,
}

/// A validated issue request. `ipfs_hash` is the metadata document's content hash.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub draft: CertificateDraft,
    pub student_wallet: WalletAddress,
    pub ipfs_hash: IpfsHash,
}

impl IssueCertificateInput {
    pub fn validated(self, now: DateTime<Utc>) -> Result<IssueRequest, ValidationErrors> {
        let draft = self.draft.normalized();
        let mut errors = draft.check(now);
        let wallet = record(&mut errors, "student_wallet_address", self.student_wallet_address.parse());
        let hash = record(&mut errors, "ipfs_hash", self.ipfs_hash.parse());
        into_result(errors)?;
        match (wallet, hash) {
            (Some(student_wallet), Some(ipfs_hash)) => Ok(IssueRequest {
                draft,
                student_wallet,
                ipfs_hash,
            }),
            _ => Err(ValidationErrors::new()),
        }
    }
}

/// Fields of the one-shot issuance (document upload + mint) next to the document itself.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IssueDocumentInput {
    #[serde(flatten)]
    pub draft: CertificateDraft,
    pub student_wallet_address: String,
}

impl IssueDocumentInput {
    pub fn validated(
        self,
        now: DateTime<Utc>,
    ) -> Result<(CertificateDraft, WalletAddress), ValidationErrors> {
        let draft = self.draft.normalized();
        let mut errors = draft.check(now);
        let wallet = record(&mut errors, "student_wallet_address", self.student_wallet_address.parse());
        into_result(errors)?;
        wallet
            .map(|w| (draft, w))
            .ok_or_else(ValidationErrors::new)
    }
}

fn record<T>(
    errors: &mut ValidationErrors,
    field: &'static str,
    parsed: Result<T, ValidationError>,
) -> Option<T> {
    match parsed {
        Ok(v) => Some(v),
        Err(e) => {
            errors.add(field, e);
            None
        }
    }
}

pub fn into_result(errors: ValidationErrors) -> Result<(), ValidationErrors> {
    if errors.errors().is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Identity of an issuance: one certificate per student, course and institution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IssuanceKey {
    pub student_id: String,
    pub course_name: String,
    pub institution_id: Uuid,
}

/// A locally indexed certificate. The ledger is authoritative; this row follows it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub token_id: u64,
    pub student_name: String,
    pub student_id: String,
    pub student_email: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: CertificateType,
    pub institution_id: Uuid,
    pub ipfs_hash: String,
    pub transaction_hash: String,
    pub issue_date: DateTime<Utc>,
    pub graduation_date: DateTime<Utc>,
    pub is_revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoke_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certificate {
    pub fn key(&self) -> IssuanceKey {
        IssuanceKey {
            student_id: self.student_id.clone(),
            course_name: self.course_name.clone(),
            institution_id: self.institution_id,
        }
    }
}

/// A certificate as listed for a student, with the issuer's display name.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentCertificate {
    #[serde(flatten)]
    pub certificate: Certificate,
    pub institution_name: String,
}

/// Pending claim on an [`IssuanceKey`] while its ledger write is in flight.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceReservation {
    pub key: IssuanceKey,
    pub ipfs_hash: String,
    pub transaction_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum SearchScope {
    Student,
    Course,
    TokenId,
    #[default]
    #[serde(other)]
    Any,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub scope: SearchScope,
    pub limit: u32,
}

impl SearchQuery {
    pub const DEFAULT_LIMIT: u32 = 50;

    /// The query parsed as a token id, if it is one.
    pub fn token_id(&self) -> Option<u64> {
        self.text.trim().parse().ok()
    }

    /// Case-insensitive substring match used by non-SQL backends.
    pub fn matches_text(&self, haystack: &str) -> bool {
        haystack.to_lowercase().contains(&self.text.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    pub certificate_type: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStats {
    pub total_certificates: u64,
    pub active_certificates: u64,
    pub revoked_certificates: u64,
    pub certificates_by_type: Vec<TypeCount>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn draft(graduation_date: DateTime<Utc>) -> CertificateDraft {
        CertificateDraft {
            student_name: " Jane Doe ".into(),
            student_id: "S1".into(),
            student_email: "Jane@Example.com".into(),
            course_name: "CS101".into(),
            grade: "A".into(),
            certificate_type: CertificateType::Degree,
            graduation_date,
        }
    }

    #[test]
    fn draft_is_trimmed_and_lowercased() {
        let now = Utc::now();
        let d = draft(now - Duration::days(1)).validated(now).unwrap();
        assert_eq!(d.student_name, "Jane Doe");
        assert_eq!(d.student_email, "jane@example.com");
    }

    #[test]
    fn future_graduation_is_rejected() {
        let now = Utc::now();
        let errors = draft(now + Duration::milliseconds(1)).validated(now).unwrap_err();
        assert!(errors.field_errors().contains_key("graduation_date"));
    }

    #[test]
    fn issue_input_reports_wallet_and_hash() {
        let now = Utc::now();
        let input = IssueCertificateInput {
            draft: draft(now),
            student_wallet_address: "nope".into(),
            ipfs_hash: "nope".into(),
        };
        let errors = input.validated(now).unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("student_wallet_address"));
        assert!(fields.contains_key("ipfs_hash"));
    }

    #[test]
    fn issue_input_flattens_draft_fields() {
        let body = serde_json::json!({
            "studentName": "Jane Doe",
            "studentId": "S1",
            "studentEmail": "jane@example.com",
            "courseName": "CS101",
            "grade": "A",
            "certificateType": "Diploma",
            "graduationDate": "2024-06-30T00:00:00Z",
            "studentWalletAddress": "0xde709f2102306220921060314715629080e2fb77",
            "ipfsHash": "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"
        });
        let input: IssueCertificateInput = serde_json::from_value(body).unwrap();
        let request = input.validated(Utc::now()).unwrap();
        assert_eq!(request.draft.certificate_type, CertificateType::Diploma);
        assert_eq!(request.ipfs_hash.as_str(), "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG");
    }

    #[test]
    fn search_scope_falls_back_to_any() {
        let scope: SearchScope = serde_json::from_str("\"tokenId\"").unwrap();
        assert_eq!(scope, SearchScope::TokenId);
        let scope: SearchScope = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(scope, SearchScope::Any);
    }
}
