//! Field-level checks shared by every mutating request.
//!
//! Each check has the `fn(&T) -> Result<(), ValidationError>` shape so it can be plugged into
//! `#[validate(custom(function = ...))]` as well as called directly.

use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;
use validator::ValidationError;

use crate::domain::model::ContactInfo;

static WALLET_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[a-fA-F0-9]{40}$").expect("static regex"));

// CIDv0 (base58btc, sha2-256) and CIDv1 (base32 lower, multibase prefix `b`).
static IPFS_HASH_V0: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Qm[1-9A-HJ-NP-Za-km-z]{44}$").expect("static regex"));
static IPFS_HASH_V1: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^b[a-z2-7]{58,}$").expect("static regex"));

static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{1,14}$").expect("static regex"));
static WEBSITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://\S+$").expect("static regex"));

pub const MAX_ADDRESS_LEN: usize = 500;

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

pub fn wallet_address(value: &str) -> Result<(), ValidationError> {
    if WALLET_ADDRESS.is_match(value.trim()) {
        Ok(())
    } else {
        Err(invalid("wallet_address", "Please provide a valid Ethereum address"))
    }
}

pub fn ipfs_hash(value: &str) -> Result<(), ValidationError> {
    let value = value.trim();
    if IPFS_HASH_V0.is_match(value) || IPFS_HASH_V1.is_match(value) {
        Ok(())
    } else {
        Err(invalid("ipfs_hash", "Please provide a valid IPFS hash"))
    }
}

pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(invalid("required", "Value is required"))
    } else {
        Ok(())
    }
}

/// At least one lowercase letter, one uppercase letter and one digit.
pub fn password_strength(value: &str) -> Result<(), ValidationError> {
    let lower = value.chars().any(|c| c.is_ascii_lowercase());
    let upper = value.chars().any(|c| c.is_ascii_uppercase());
    let digit = value.chars().any(|c| c.is_ascii_digit());
    if lower && upper && digit {
        Ok(())
    } else {
        Err(invalid(
            "password_strength",
            "Password must contain at least one uppercase letter, one lowercase letter, and one number",
        ))
    }
}

pub fn contact_info(value: &ContactInfo) -> Result<(), ValidationError> {
    if let Some(phone) = value.phone.as_deref() {
        if !PHONE.is_match(phone.trim()) {
            return Err(invalid("phone", "Please provide a valid phone number"));
        }
    }
    if let Some(website) = value.website.as_deref() {
        if !WEBSITE.is_match(website.trim()) {
            return Err(invalid("website", "Please provide a valid URL"));
        }
    }
    if let Some(address) = value.address.as_deref() {
        if address.chars().count() > MAX_ADDRESS_LEN {
            return Err(invalid("address", "Address cannot exceed 500 characters"));
        }
    }
    Ok(())
}

/// A graduation date may be any instant up to and including `now`.
pub fn graduation_date(date: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), ValidationError> {
    if date > now {
        Err(invalid("future_date", "Graduation date cannot be in the future"))
    } else {
        Ok(())
    }
}

/// Byte capacities of the on-chain certificate record. The character limits on the request
/// types are not enough on their own: multibyte text can pass them and still overflow these.
pub mod ledger_limits {
    pub const INSTITUTION_NAME: usize = 200;
    pub const STUDENT_NAME: usize = 200;
    pub const STUDENT_ID: usize = 50;
    pub const COURSE_NAME: usize = 300;
    pub const GRADE: usize = 50;
    pub const REVOKE_REASON: usize = 256;
}

pub fn within_bytes(value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().len() <= max {
        Ok(())
    } else {
        let mut err = ValidationError::new("byte_length");
        err.message = Some(Cow::Owned(format!("Must be at most {} bytes of UTF-8 text", max)));
        err.add_param(Cow::Borrowed("max_bytes"), &max);
        Err(err)
    }
}

pub fn institution_name_bytes(value: &str) -> Result<(), ValidationError> {
    within_bytes(value, ledger_limits::INSTITUTION_NAME)
}

pub fn student_name_bytes(value: &str) -> Result<(), ValidationError> {
    within_bytes(value, ledger_limits::STUDENT_NAME)
}

pub fn student_id_bytes(value: &str) -> Result<(), ValidationError> {
    within_bytes(value, ledger_limits::STUDENT_ID)
}

pub fn course_name_bytes(value: &str) -> Result<(), ValidationError> {
    within_bytes(value, ledger_limits::COURSE_NAME)
}

pub fn grade(value: &str) -> Result<(), ValidationError> {
    not_blank(value)?;
    within_bytes(value, ledger_limits::GRADE)
}

/// Accepted document types for pinning: any image, or PDF.
pub fn document_content_type(value: &str) -> Result<(), ValidationError> {
    if value.starts_with("image/") || value == "application/pdf" {
        Ok(())
    } else {
        Err(invalid("file_type", "Only images and PDFs are allowed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn wallet_address_accepts_mixed_case_hex() {
        assert!(wallet_address("0x52908400098527886E0F7030069857D2E4169EE7").is_ok());
        assert!(wallet_address("0xde709f2102306220921060314715629080e2fb77").is_ok());
    }

    #[test]
    fn wallet_address_rejects_bad_shapes() {
        assert!(wallet_address("52908400098527886E0F7030069857D2E4169EE7").is_err());
        assert!(wallet_address("0x52908400098527886E0F7030069857D2E4169EE").is_err());
        assert!(wallet_address("0xZZ908400098527886E0F7030069857D2E4169EE7").is_err());
    }

    #[test]
    fn ipfs_hash_accepts_both_cid_versions() {
        assert!(ipfs_hash("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG").is_ok());
        assert!(ipfs_hash("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").is_ok());
        assert!(ipfs_hash("Qm123").is_err());
        assert!(ipfs_hash("").is_err());
    }

    #[test]
    fn graduation_date_boundary() {
        let now = Utc::now();
        assert!(graduation_date(now, now).is_ok());
        assert!(graduation_date(now - Duration::days(365), now).is_ok());
        assert!(graduation_date(now + Duration::milliseconds(1), now).is_err());
    }

    #[test]
    fn password_policy() {
        assert!(password_strength("Secret123").is_ok());
        assert!(password_strength("secret123").is_err());
        assert!(password_strength("SECRET123").is_err());
        assert!(password_strength("SecretOnly").is_err());
    }

    #[test]
    fn contact_info_checks_each_present_field() {
        let ok = ContactInfo {
            phone: Some("+256700000000".into()),
            address: Some("Plot 1, Kampala".into()),
            website: Some("https://mak.ac.ug".into()),
        };
        assert!(contact_info(&ok).is_ok());

        let bad_phone = ContactInfo { phone: Some("0700".into()), ..ok.clone() };
        assert!(contact_info(&bad_phone).is_err());

        let bad_site = ContactInfo { website: Some("mak.ac.ug".into()), ..ok };
        assert!(contact_info(&bad_site).is_err());

        assert!(contact_info(&ContactInfo::default()).is_ok());
    }

    #[test]
    fn byte_limits_count_utf8_bytes() {
        // 150 characters, 450 bytes.
        let name = "\u{5b66}".repeat(150);
        assert_eq!(name.chars().count(), 150);
        assert!(student_name_bytes(&name).is_err());
        assert!(student_name_bytes(&"a".repeat(200)).is_ok());
        assert!(student_id_bytes(&"\u{e9}".repeat(26)).is_err());
        assert!(grade("A+").is_ok());
        assert!(grade("  ").is_err());
    }

    #[test]
    fn document_types() {
        assert!(document_content_type("application/pdf").is_ok());
        assert!(document_content_type("image/png").is_ok());
        assert!(document_content_type("text/plain").is_err());
    }
}
