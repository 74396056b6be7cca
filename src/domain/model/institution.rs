use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use super::WalletAddress;
use crate::domain::validate;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl ContactInfo {
    fn normalized(self) -> Option<Self> {
        let clean = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let info = Self {
            phone: clean(self.phone),
            address: clean(self.address),
            website: clean(self.website),
        };
        (info != Self::default()).then_some(info)
    }
}

/// A certificate-issuing organisation.
#[derive(Debug, Clone, PartialEq)]
pub struct Institution {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub wallet_address: WalletAddress,
    pub registration_number: String,
    pub is_verified: bool,
    pub contact_info: Option<ContactInfo>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registration payload as submitted by the client.
#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInstitution {
    #[validate(length(min = 2, max = 200), custom(function = "validate::institution_name_bytes"))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8), custom(function = "validate::password_strength"))]
    pub password: String,
    #[validate(custom(function = "validate::wallet_address"))]
    pub wallet_address: String,
    #[validate(length(min = 1, max = 50))]
    pub registration_number: String,
    #[serde(default)]
    #[validate(custom(function = "validate::contact_info"))]
    pub contact_info: Option<ContactInfo>,
}

/// A registration that passed validation; the password is still in clear text and is hashed by
/// the institution service.
#[derive(Debug, Clone)]
pub struct ValidRegistration {
    pub name: String,
    pub email: String,
    pub password: String,
    pub wallet_address: WalletAddress,
    pub registration_number: String,
    pub contact_info: Option<ContactInfo>,
}

impl RegisterInstitution {
    pub fn validated(self) -> Result<ValidRegistration, ValidationErrors> {
        let trimmed = Self {
            name: self.name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            password: self.password,
            wallet_address: self.wallet_address.trim().to_string(),
            registration_number: self.registration_number.trim().to_string(),
            contact_info: self.contact_info.and_then(ContactInfo::normalized),
        };
        trimmed.validate()?;

        let wallet_address = trimmed.wallet_address.parse::<WalletAddress>().map_err(|e| {
            let mut errors = ValidationErrors::new();
            errors.add("wallet_address", e);
            errors
        })?;

        Ok(ValidRegistration {
            name: trimmed.name,
            email: trimmed.email,
            password: trimmed.password,
            wallet_address,
            registration_number: trimmed.registration_number,
            contact_info: trimmed.contact_info,
        })
    }
}

/// Row to insert once the password has been hashed.
#[derive(Debug, Clone)]
pub struct NewInstitution {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub wallet_address: WalletAddress,
    pub registration_number: String,
    pub contact_info: Option<ContactInfo>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}
