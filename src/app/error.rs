use thiserror::Error;
use validator::ValidationErrors;

use crate::infra::ledger::LedgerError;
use crate::storage::RepositoryError;

/// Step of the issuance workflow at which a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum IssuanceStage {
    PinDocument,
    PinMetadata,
    Reserve,
    LedgerSubmit,
    LedgerConfirm,
    Persist,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Validation failed")]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Certificate {0} is already revoked")]
    AlreadyRevoked(u64),
    #[error("Certificate issuance failed at stage {stage}")]
    Issuance {
        stage: IssuanceStage,
        transaction: Option<String>,
        #[source]
        source: anyhow::Error,
    },
    #[error("Certificate {token_id} was revoked on-chain but the local record was not updated")]
    RevocationDiverged {
        token_id: u64,
        transaction: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("Pinning service request failed")]
    Pinning(#[source] anyhow::Error),
    #[error("Ledger request failed")]
    Ledger(#[from] LedgerError),
    #[error("Database request failed")]
    Repository(#[source] anyhow::Error),
    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl From<RepositoryError> for ServiceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(what) => {
                ServiceError::Conflict(format!("Record already exists ({})", what))
            }
            RepositoryError::NotFound => ServiceError::NotFound("Record not found".to_string()),
            RepositoryError::Backend(e) => ServiceError::Repository(e),
        }
    }
}

impl ServiceError {
    pub fn issuance(stage: IssuanceStage, source: impl Into<anyhow::Error>) -> Self {
        ServiceError::Issuance {
            stage,
            transaction: None,
            source: source.into(),
        }
    }

    /// Transaction reference attached to the failure, if a ledger write was broadcast.
    pub fn transaction(&self) -> Option<&str> {
        match self {
            ServiceError::Issuance { transaction, .. } => transaction.as_deref(),
            ServiceError::RevocationDiverged { transaction, .. } => Some(transaction),
            ServiceError::Ledger(e) => e.transaction(),
            _ => None,
        }
    }

    /// Full cause chain, for logs and development responses.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
