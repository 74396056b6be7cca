//! Ledger seam: the on-chain certificate registry as seen by the services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::model::{CertificateType, WalletAddress};

/// Everything the registry stores for a new certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerIssueRequest {
    pub student_wallet: WalletAddress,
    pub student_name: String,
    pub student_id: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: CertificateType,
    pub graduation_date: DateTime<Utc>,
    pub metadata_hash: String,
    pub institution_name: String,
    pub institution_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerReceipt {
    pub token_id: u64,
    pub transaction: String,
}

/// A certificate as recorded on-chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerCertificate {
    pub token_id: u64,
    pub student_wallet: WalletAddress,
    /// `None` when the stored reference is not a UUID.
    pub institution_id: Option<Uuid>,
    pub institution_name: String,
    pub student_name: String,
    pub student_id: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: String,
    pub metadata_hash: String,
    pub graduation_date: DateTime<Utc>,
    pub issue_date: DateTime<Utc>,
    pub is_revoked: bool,
    pub revoke_reason: Option<String>,
    pub revoke_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum LedgerError {
    /// Refused before broadcast (simulation or preflight failure). Nothing was written.
    #[error("ledger rejected the transaction: {0}")]
    Rejected(String),
    /// Broadcast and confirmed, but the program returned an error.
    #[error("transaction {transaction} failed on-chain: {reason}")]
    Reverted { transaction: String, reason: String },
    /// Broadcast, but confirmation could not be observed. The write may still land.
    #[error("transaction {transaction} was not confirmed: {reason}")]
    Unconfirmed { transaction: String, reason: String },
    #[error("ledger writer is not running")]
    WriterClosed,
    #[error(transparent)]
    Rpc(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn transaction(&self) -> Option<&str> {
        match self {
            Self::Reverted { transaction, .. } | Self::Unconfirmed { transaction, .. } => {
                Some(transaction)
            }
            _ => None,
        }
    }

    /// Whether the outcome of the write is unknown.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Unconfirmed { .. })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Mints a certificate and returns the token id assigned by the registry.
    async fn issue_certificate(
        &self,
        request: LedgerIssueRequest,
    ) -> Result<LedgerReceipt, LedgerError>;

    async fn verify_certificate(
        &self,
        token_id: u64,
    ) -> Result<Option<LedgerCertificate>, LedgerError>;

    /// Returns the transaction reference of the revocation.
    async fn revoke_certificate(&self, token_id: u64, reason: &str) -> Result<String, LedgerError>;

    /// Number of certificates ever issued; token ids run from 1 to this value.
    async fn total_certificates(&self) -> Result<u64, LedgerError>;

    /// Transaction that created the certificate, if it can still be found.
    async fn issuance_transaction(&self, token_id: u64) -> Result<Option<String>, LedgerError>;

    async fn ping(&self) -> Result<(), LedgerError>;
}
