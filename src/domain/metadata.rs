//! The off-chain metadata document pinned next to every certificate.
//!
//! Its content hash is what the ledger records, so the layout is kept stable: NFT-style
//! `name` / `description` / `image` / `attributes`, plus the full certificate fields under
//! `properties.certificate_data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::ToSchema;

use super::model::{CertificateDraft, CertificateType};

pub const LEDGER_NAME: &str = "Solana";
pub const TOKEN_STANDARD: &str = "certificate-registry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CertificateData {
    pub student_name: String,
    pub student_id: String,
    pub student_email: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: CertificateType,
    pub institution_name: String,
    pub issue_date: DateTime<Utc>,
    pub graduation_date: DateTime<Utc>,
    pub image_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetadataAttribute {
    pub trait_type: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MetadataProperties {
    pub certificate_data: CertificateData,
    pub blockchain: String,
    pub standard: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CertificateMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub attributes: Vec<MetadataAttribute>,
    pub properties: MetadataProperties,
}

impl CertificateMetadata {
    pub fn build(
        draft: &CertificateDraft,
        institution_name: &str,
        image_url: String,
        issue_date: DateTime<Utc>,
    ) -> Self {
        let data = CertificateData {
            student_name: draft.student_name.clone(),
            student_id: draft.student_id.clone(),
            student_email: draft.student_email.clone(),
            course_name: draft.course_name.clone(),
            grade: draft.grade.clone(),
            certificate_type: draft.certificate_type,
            institution_name: institution_name.to_string(),
            issue_date,
            graduation_date: draft.graduation_date,
            image_url: image_url.clone(),
        };

        let attribute = |trait_type: &str, value: String| MetadataAttribute {
            trait_type: trait_type.to_string(),
            value,
        };
        let attributes = vec![
            attribute("Student Name", data.student_name.clone()),
            attribute("Course", data.course_name.clone()),
            attribute("Grade", data.grade.clone()),
            attribute("Institution", data.institution_name.clone()),
            attribute("Certificate Type", data.certificate_type.to_string()),
            attribute("Issue Date", data.issue_date.format("%Y-%m-%d").to_string()),
            attribute(
                "Graduation Date",
                data.graduation_date.format("%Y-%m-%d").to_string(),
            ),
        ];

        Self {
            name: format!("Academic Certificate - {}", data.student_name),
            description: format!(
                "{} in {} awarded to {} by {}",
                data.certificate_type, data.course_name, data.student_name, data.institution_name
            ),
            image: image_url,
            attributes,
            properties: MetadataProperties {
                certificate_data: data,
                blockchain: LEDGER_NAME.to_string(),
                standard: TOKEN_STANDARD.to_string(),
            },
        }
    }

    /// Reads the student e-mail back out of a pinned document, if it has our layout.
    pub fn student_email(document: &JsonValue) -> Option<String> {
        document
            .pointer("/properties/certificate_data/studentEmail")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_embeds_fields_and_file_link() {
        let graduation = DateTime::parse_from_rfc3339("2024-06-30T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let draft = CertificateDraft {
            student_name: "Jane Doe".into(),
            student_id: "S1".into(),
            student_email: "jane@example.com".into(),
            course_name: "CS101".into(),
            grade: "A".into(),
            certificate_type: CertificateType::Degree,
            graduation_date: graduation,
        };
        let meta = CertificateMetadata::build(
            &draft,
            "Makerere University",
            "https://gateway.pinata.cloud/ipfs/QmFile".into(),
            graduation,
        );

        assert_eq!(meta.name, "Academic Certificate - Jane Doe");
        assert_eq!(
            meta.description,
            "Degree in CS101 awarded to Jane Doe by Makerere University"
        );
        assert_eq!(meta.image, "https://gateway.pinata.cloud/ipfs/QmFile");
        assert!(meta
            .attributes
            .iter()
            .any(|a| a.trait_type == "Graduation Date" && a.value == "2024-06-30"));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(
            CertificateMetadata::student_email(&json).as_deref(),
            Some("jane@example.com")
        );
    }

    #[test]
    fn student_email_is_absent_for_foreign_documents() {
        assert_eq!(CertificateMetadata::student_email(&serde_json::json!({"a": 1})), None);
    }
}
