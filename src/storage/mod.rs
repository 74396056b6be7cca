//! Persistence seams for institutions, certificates and issuance reservations.
//!
//! The services only see these traits; `postgres` is the production backend.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::model::{
    Certificate, CertificateStats, Institution, IssuanceKey, IssuanceReservation, NewInstitution,
    SearchQuery, StudentCertificate, WalletAddress,
};

pub use postgres::{DbSettings, PgRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("record not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Which unique institution attribute an existing record already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstitutionConflict {
    Email,
    WalletAddress,
    RegistrationNumber,
}

impl InstitutionConflict {
    /// Maps a unique-constraint name reported by the backend.
    pub fn from_constraint(constraint: &str) -> Option<Self> {
        if constraint.contains("email") {
            Some(Self::Email)
        } else if constraint.contains("wallet") {
            Some(Self::WalletAddress)
        } else if constraint.contains("registration") {
            Some(Self::RegistrationNumber)
        } else {
            None
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Email => "An institution with this email already exists",
            Self::WalletAddress => "An institution with this wallet address already exists",
            Self::RegistrationNumber => {
                "An institution with this registration number already exists"
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstitutionRepository: Send + Sync {
    async fn create_institution(
        &self,
        institution: NewInstitution,
    ) -> Result<Institution, RepositoryError>;

    async fn get_institution(&self, id: Uuid) -> Result<Option<Institution>, RepositoryError>;

    async fn get_institution_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Institution>, RepositoryError>;

    /// First unique attribute already taken by another institution, if any.
    async fn find_conflicting_institution(
        &self,
        email: &str,
        wallet_address: &WalletAddress,
        registration_number: &str,
    ) -> Result<Option<InstitutionConflict>, RepositoryError>;

    /// Returns false when no institution has this id.
    async fn set_institution_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CertificateRepository: Send + Sync {
    /// Claims the reservation's key. Fails with `Conflict` when the key is already reserved or
    /// already has a certificate.
    async fn reserve_issuance(
        &self,
        reservation: &IssuanceReservation,
    ) -> Result<(), RepositoryError>;

    async fn attach_reservation_transaction(
        &self,
        key: &IssuanceKey,
        transaction_hash: &str,
    ) -> Result<(), RepositoryError>;

    async fn release_reservation(&self, key: &IssuanceKey) -> Result<(), RepositoryError>;

    async fn list_reservations(&self) -> Result<Vec<IssuanceReservation>, RepositoryError>;

    /// Inserts the certificate and drops the reservation for its key in one transaction.
    async fn complete_issuance(&self, certificate: &Certificate) -> Result<(), RepositoryError>;

    async fn get_certificate(&self, token_id: u64) -> Result<Option<Certificate>, RepositoryError>;

    async fn find_certificate_for(
        &self,
        key: &IssuanceKey,
    ) -> Result<Option<Certificate>, RepositoryError>;

    /// Flips the revoked flag. Returns false if the certificate is missing or already revoked.
    async fn mark_revoked(
        &self,
        token_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn list_by_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<StudentCertificate>, RepositoryError>;

    async fn list_by_institution(
        &self,
        institution_id: Uuid,
    ) -> Result<Vec<Certificate>, RepositoryError>;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Certificate>, RepositoryError>;

    async fn stats(&self, institution_id: Uuid) -> Result<CertificateStats, RepositoryError>;

    async fn ping(&self) -> Result<(), RepositoryError>;
}
