//! Institution registration, login and admin verification.

use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use super::dto::{InstitutionSummary, LoginOutcome, RegistrationOutcome};
use super::error::{ServiceError, ServiceResult};
use super::{system_clock, Clock};
use crate::crypto::{hash_password, verify_password, Claims, TokenIssuer};
use crate::domain::model::{Institution, LoginRequest, NewInstitution, RegisterInstitution, WalletAddress};
use crate::storage::{InstitutionConflict, InstitutionRepository, RepositoryError};

const INVALID_CREDENTIALS: &str = "Invalid credentials";

/// The institution behind a valid bearer token.
#[derive(Debug, Clone)]
pub struct AuthenticatedInstitution {
    pub institution: Institution,
    pub claims: Claims,
}

impl AuthenticatedInstitution {
    pub fn id(&self) -> Uuid {
        self.institution.id
    }
}

pub struct InstitutionService {
    repo: Arc<dyn InstitutionRepository>,
    tokens: TokenIssuer,
    admin_wallets: Vec<WalletAddress>,
    clock: Clock,
}

impl InstitutionService {
    pub fn new(
        repo: Arc<dyn InstitutionRepository>,
        tokens: TokenIssuer,
        admin_wallets: Vec<WalletAddress>,
    ) -> Self {
        Self {
            repo,
            tokens,
            admin_wallets,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn register(&self, input: RegisterInstitution) -> ServiceResult<RegistrationOutcome> {
        let valid = input.validated()?;

        // Friendly pre-check; the unique constraints below are what actually enforce it.
        if let Some(conflict) = self
            .repo
            .find_conflicting_institution(&valid.email, &valid.wallet_address, &valid.registration_number)
            .await?
        {
            return Err(ServiceError::Conflict(conflict.message().to_string()));
        }

        let password = valid.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?
            .map_err(ServiceError::Internal)?;

        let institution = self
            .repo
            .create_institution(NewInstitution {
                id: Uuid::new_v4(),
                name: valid.name,
                email: valid.email,
                password_hash,
                wallet_address: valid.wallet_address,
                registration_number: valid.registration_number,
                contact_info: valid.contact_info,
                created_at: (self.clock)(),
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(constraint) => ServiceError::Conflict(
                    InstitutionConflict::from_constraint(&constraint)
                        .map(|c| c.message().to_string())
                        .unwrap_or_else(|| "Institution already exists".to_string()),
                ),
                other => other.into(),
            })?;

        tracing::info!(institution_id = %institution.id, name = %institution.name, "institution registered");
        Ok(RegistrationOutcome {
            institution_id: institution.id,
            wallet_address: institution.wallet_address.to_string(),
        })
    }

    pub async fn login(&self, request: LoginRequest) -> ServiceResult<LoginOutcome> {
        if request.validate().is_err() {
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }
        let institution = self
            .repo
            .get_institution_by_email(&request.email.trim().to_lowercase())
            .await?
            .ok_or_else(|| ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()))?;

        let password = request.password;
        let stored = institution.password_hash.clone();
        let matches = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;
        if !matches {
            tracing::info!(institution_id = %institution.id, "login rejected");
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        let token = self
            .tokens
            .issue(
                institution.id,
                institution.wallet_address.as_str(),
                &institution.name,
                (self.clock)(),
            )
            .map_err(ServiceError::Internal)?;
        Ok(LoginOutcome {
            token,
            institution: InstitutionSummary::from(&institution),
        })
    }

    /// Resolves a bearer token. Bad or expired tokens are `Forbidden`; a token for an
    /// institution that no longer exists is `Unauthorized`.
    pub async fn authenticate(&self, token: &str) -> ServiceResult<AuthenticatedInstitution> {
        let claims = self
            .tokens
            .verify(token, (self.clock)())
            .map_err(|e| ServiceError::Forbidden(format!("Invalid or expired token: {}", e)))?;
        let institution = self
            .repo
            .get_institution(claims.institution_id)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Institution not found".to_string()))?;
        Ok(AuthenticatedInstitution {
            institution,
            claims,
        })
    }

    pub fn is_admin(&self, wallet: &WalletAddress) -> bool {
        self.admin_wallets.contains(wallet)
    }

    pub async fn verify_institution(
        &self,
        caller: &AuthenticatedInstitution,
        institution_id: Uuid,
    ) -> ServiceResult<InstitutionSummary> {
        if !self.is_admin(&caller.institution.wallet_address) {
            return Err(ServiceError::Forbidden("Admin access required".to_string()));
        }
        if !self
            .repo
            .set_institution_verified(institution_id, (self.clock)())
            .await?
        {
            return Err(ServiceError::NotFound("Institution not found".to_string()));
        }
        let institution = self
            .repo
            .get_institution(institution_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Institution not found".to_string()))?;
        tracing::info!(
            institution_id = %institution.id,
            admin = %caller.institution.wallet_address,
            "institution verified"
        );
        Ok(InstitutionSummary::from(&institution))
    }
}
