//! Certificate issuance, verification, revocation and the read-side queries.
//!
//! Issuance runs in stages: pin the document, pin the metadata, reserve the issuance key,
//! write the ledger, persist. Everything before the ledger write can fail without side
//! effects. After it, failures keep enough state (reservation, transaction reference) for
//! the reconciler to finish the job.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

use super::dto::{
    AdditionalInfo, BatchEntryError, BatchUploadOutcome, DependencyStatus, HealthReport,
    IssueOutcome, RevocationOutcome, UploadOutcome, VerificationReport,
};
use super::error::{IssuanceStage, ServiceError, ServiceResult};
use super::{system_clock, Clock};
use crate::domain::metadata::CertificateMetadata;
use crate::domain::model::{
    Certificate, CertificateDraft, CertificateStats, Institution, IpfsHash, IssuanceKey,
    IssuanceReservation, IssueCertificateInput, IssueDocumentInput, SearchQuery, SearchScope,
    StudentCertificate, WalletAddress,
};
use crate::domain::validate::ledger_limits;
use crate::infra::ledger::{Ledger, LedgerError, LedgerIssueRequest};
use crate::infra::pinning::{FileUpload, PinMetadata, Pinning};
use crate::infra::retry::{with_retry, RetryPolicy};
use crate::storage::{CertificateRepository, RepositoryError};

pub const MAX_BATCH_SIZE: usize = 50;
pub const MAX_REVOKE_REASON_LEN: usize = ledger_limits::REVOKE_REASON;

pub struct CertificateService {
    certificates: Arc<dyn CertificateRepository>,
    ledger: Arc<dyn Ledger>,
    pinning: Arc<dyn Pinning>,
    retry: RetryPolicy,
    clock: Clock,
}

impl CertificateService {
    pub fn new(
        certificates: Arc<dyn CertificateRepository>,
        ledger: Arc<dyn Ledger>,
        pinning: Arc<dyn Pinning>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            certificates,
            ledger,
            pinning,
            retry,
            clock: system_clock(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Pins the document and its metadata. The returned `ipfs_hash` is what `issue` expects.
    pub async fn upload_document(
        &self,
        caller: &Institution,
        file: FileUpload,
        draft: CertificateDraft,
    ) -> ServiceResult<UploadOutcome> {
        ensure_verified(caller)?;
        let draft = draft.validated(self.now())?;
        self.pin_certificate(caller, file, &draft).await
    }

    pub async fn batch_upload(
        &self,
        caller: &Institution,
        files: Vec<FileUpload>,
        students: Vec<CertificateDraft>,
    ) -> ServiceResult<BatchUploadOutcome> {
        ensure_verified(caller)?;
        if files.is_empty() {
            return Err(ServiceError::BadRequest("No files uploaded".to_string()));
        }
        if files.len() > MAX_BATCH_SIZE {
            return Err(ServiceError::BadRequest(format!(
                "At most {} certificates can be uploaded at once",
                MAX_BATCH_SIZE
            )));
        }
        if files.len() != students.len() {
            return Err(ServiceError::BadRequest(
                "Number of files must match number of student records".to_string(),
            ));
        }

        let mut outcome = BatchUploadOutcome {
            uploaded: Vec::new(),
            failed: Vec::new(),
        };
        for (index, (file, draft)) in files.into_iter().zip(students).enumerate() {
            let student_id = Some(draft.student_id.trim().to_string()).filter(|s| !s.is_empty());
            let result = match draft.validated(self.now()) {
                Ok(draft) => self.pin_certificate(caller, file, &draft).await,
                Err(e) => Err(e.into()),
            };
            match result {
                Ok(uploaded) => outcome.uploaded.push(uploaded),
                Err(e) => {
                    tracing::warn!(index, error = %e.chain(), "batch entry failed");
                    outcome.failed.push(BatchEntryError {
                        index,
                        student_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        tracing::info!(
            institution_id = %caller.id,
            uploaded = outcome.uploaded.len(),
            failed = outcome.failed.len(),
            "batch upload finished"
        );
        Ok(outcome)
    }

    /// Issues a certificate whose metadata was pinned by an earlier upload.
    pub async fn issue(
        &self,
        caller: &Institution,
        input: IssueCertificateInput,
    ) -> ServiceResult<IssueOutcome> {
        ensure_verified(caller)?;
        let request = input.validated(self.now())?;
        self.issue_pinned(
            caller,
            &request.draft,
            &request.student_wallet,
            &request.ipfs_hash,
            None,
        )
        .await
    }

    /// Upload and issue in one call.
    pub async fn issue_document(
        &self,
        caller: &Institution,
        file: FileUpload,
        input: IssueDocumentInput,
    ) -> ServiceResult<IssueOutcome> {
        ensure_verified(caller)?;
        let (draft, wallet) = input.validated(self.now())?;
        // Saves two uploads for the common duplicate case; the reservation still decides.
        self.ensure_not_issued(&issuance_key(caller, &draft)).await?;

        let uploaded = self.pin_certificate(caller, file, &draft).await?;
        let metadata_hash: IpfsHash = uploaded.ipfs_hash.parse().map_err(|_| {
            ServiceError::issuance(
                IssuanceStage::PinMetadata,
                anyhow::anyhow!("pinning service returned an invalid hash: {}", uploaded.ipfs_hash),
            )
        })?;
        self.issue_pinned(caller, &draft, &wallet, &metadata_hash, Some(uploaded.file_hash))
            .await
    }

    async fn pin_certificate(
        &self,
        caller: &Institution,
        file: FileUpload,
        draft: &CertificateDraft,
    ) -> ServiceResult<UploadOutcome> {
        let stamp = self.now().timestamp_millis();
        let file_pin = PinMetadata::named(format!("certificate-{}-{}", draft.student_id, stamp))
            .with("studentId", draft.student_id.as_str())
            .with("courseName", draft.course_name.as_str())
            .with("institution", caller.name.as_str());
        let file_receipt = with_retry(self.retry, "pin_file", || {
            self.pinning.pin_file(file.clone(), file_pin.clone())
        })
        .await
        .map_err(|e| ServiceError::issuance(IssuanceStage::PinDocument, e))?;

        let image_url = self.pinning.gateway_url(&file_receipt.ipfs_hash);
        let metadata = CertificateMetadata::build(draft, &caller.name, image_url, self.now());
        let document = serde_json::to_value(&metadata)
            .map_err(|e| ServiceError::issuance(IssuanceStage::PinMetadata, e))?;
        let metadata_pin = PinMetadata::named(format!("metadata-{}-{}", draft.student_id, stamp))
            .with("studentId", draft.student_id.as_str())
            .with("fileHash", file_receipt.ipfs_hash.as_str());
        let metadata_receipt = with_retry(self.retry, "pin_json", || {
            self.pinning.pin_json(document.clone(), metadata_pin.clone())
        })
        .await
        .map_err(|e| ServiceError::issuance(IssuanceStage::PinMetadata, e))?;

        tracing::info!(
            student_id = %draft.student_id,
            file_hash = %file_receipt.ipfs_hash,
            metadata_hash = %metadata_receipt.ipfs_hash,
            "certificate document pinned"
        );
        Ok(UploadOutcome {
            ipfs_hash: metadata_receipt.ipfs_hash,
            file_hash: file_receipt.ipfs_hash,
            certificate_data: metadata.properties.certificate_data.clone(),
            metadata,
        })
    }

    async fn ensure_not_issued(&self, key: &IssuanceKey) -> ServiceResult<()> {
        match self.certificates.find_certificate_for(key).await {
            Ok(None) => Ok(()),
            Ok(Some(existing)) => Err(duplicate_issuance(Some(existing.token_id))),
            Err(e) => Err(ServiceError::issuance(IssuanceStage::Reserve, e)),
        }
    }

    async fn issue_pinned(
        &self,
        caller: &Institution,
        draft: &CertificateDraft,
        student_wallet: &WalletAddress,
        metadata_hash: &IpfsHash,
        file_hash: Option<String>,
    ) -> ServiceResult<IssueOutcome> {
        let key = issuance_key(caller, draft);
        self.ensure_not_issued(&key).await?;

        let reservation = IssuanceReservation {
            key: key.clone(),
            ipfs_hash: metadata_hash.to_string(),
            transaction_hash: None,
            created_at: self.now(),
        };
        match self.certificates.reserve_issuance(&reservation).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => return Err(duplicate_issuance(None)),
            Err(e) => return Err(ServiceError::issuance(IssuanceStage::Reserve, e)),
        }

        let request = LedgerIssueRequest {
            student_wallet: student_wallet.clone(),
            student_name: draft.student_name.clone(),
            student_id: draft.student_id.clone(),
            course_name: draft.course_name.clone(),
            grade: draft.grade.clone(),
            certificate_type: draft.certificate_type,
            graduation_date: draft.graduation_date,
            metadata_hash: metadata_hash.to_string(),
            institution_name: caller.name.clone(),
            institution_id: caller.id,
        };
        let receipt = match self.ledger.issue_certificate(request).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.ledger_write_failed(&key, e).await),
        };

        let now = self.now();
        let certificate = Certificate {
            token_id: receipt.token_id,
            student_name: draft.student_name.clone(),
            student_id: draft.student_id.clone(),
            student_email: draft.student_email.clone(),
            course_name: draft.course_name.clone(),
            grade: draft.grade.clone(),
            certificate_type: draft.certificate_type,
            institution_id: caller.id,
            ipfs_hash: metadata_hash.to_string(),
            transaction_hash: receipt.transaction.clone(),
            issue_date: now,
            graduation_date: draft.graduation_date,
            is_revoked: false,
            revoke_reason: None,
            revoke_date: None,
            created_at: now,
            updated_at: now,
        };
        if let Err(e) = self.certificates.complete_issuance(&certificate).await {
            if matches!(e, RepositoryError::Conflict(_))
                && self.recorded_elsewhere(receipt.token_id, &key).await
            {
                tracing::info!(
                    token_id = receipt.token_id,
                    transaction = %receipt.transaction,
                    "certificate already recorded by reconciliation"
                );
                return Ok(IssueOutcome {
                    token_id: receipt.token_id,
                    transaction_hash: receipt.transaction,
                    ipfs_hash: metadata_hash.to_string(),
                    file_hash,
                });
            }
            tracing::error!(
                token_id = receipt.token_id,
                transaction = %receipt.transaction,
                error = %e,
                "certificate issued on-chain but not persisted; reconciliation will backfill it"
            );
            return Err(ServiceError::Issuance {
                stage: IssuanceStage::Persist,
                transaction: Some(receipt.transaction),
                source: e.into(),
            });
        }

        tracing::info!(
            token_id = receipt.token_id,
            transaction = %receipt.transaction,
            institution_id = %caller.id,
            student_id = %draft.student_id,
            "certificate issued"
        );
        Ok(IssueOutcome {
            token_id: receipt.token_id,
            transaction_hash: receipt.transaction,
            ipfs_hash: metadata_hash.to_string(),
            file_hash,
        })
    }

    /// Whether `token_id` is already stored for `key`, e.g. by a reconciliation pass that ran
    /// between ledger confirmation and persistence.
    async fn recorded_elsewhere(&self, token_id: u64, key: &IssuanceKey) -> bool {
        match self.certificates.get_certificate(token_id).await {
            Ok(Some(existing)) => &existing.key() == key,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(token_id, error = %e, "could not re-read certificate after conflict");
                false
            }
        }
    }

    /// Keeps the reservation when the write may still land, releases it otherwise.
    async fn ledger_write_failed(&self, key: &IssuanceKey, error: LedgerError) -> ServiceError {
        let keep_reservation = error.is_ambiguous() || matches!(error, LedgerError::WriterClosed);
        if keep_reservation {
            if let Some(transaction) = error.transaction() {
                if let Err(e) = self
                    .certificates
                    .attach_reservation_transaction(key, transaction)
                    .await
                {
                    tracing::warn!(%transaction, error = %e, "could not record transaction on reservation");
                }
            }
            tracing::warn!(
                student_id = %key.student_id,
                course_name = %key.course_name,
                error = %error,
                "ledger outcome unknown; reservation kept for reconciliation"
            );
            return ServiceError::Issuance {
                stage: IssuanceStage::LedgerConfirm,
                transaction: error.transaction().map(str::to_string),
                source: error.into(),
            };
        }

        if let Err(e) = self.certificates.release_reservation(key).await {
            tracing::warn!(error = %e, "could not release reservation after rejected ledger write");
        }
        ServiceError::Issuance {
            stage: IssuanceStage::LedgerSubmit,
            transaction: error.transaction().map(str::to_string),
            source: error.into(),
        }
    }

    /// Ledger state, enriched with the local record when there is one.
    pub async fn verify(&self, token_id: u64) -> ServiceResult<VerificationReport> {
        let on_chain = self
            .ledger
            .verify_certificate(token_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Certificate not found".to_string()))?;

        let local = match self.certificates.get_certificate(token_id).await {
            Ok(local) => local,
            Err(e) => {
                tracing::warn!(token_id, error = %e, "local certificate lookup failed during verification");
                None
            }
        };

        Ok(VerificationReport {
            exists: true,
            is_revoked: on_chain.is_revoked,
            token_id: on_chain.token_id,
            student_name: on_chain.student_name,
            course_name: on_chain.course_name,
            institution_name: on_chain.institution_name,
            grade: on_chain.grade,
            issue_date: on_chain.issue_date,
            graduation_date: on_chain.graduation_date,
            revoke_reason: on_chain.revoke_reason,
            revoke_date: on_chain.revoke_date,
            additional_info: local.map(|c| AdditionalInfo {
                certificate_type: c.certificate_type,
                transaction_hash: c.transaction_hash,
                ipfs_hash: c.ipfs_hash,
            }),
        })
    }

    pub async fn revoke(
        &self,
        caller: &Institution,
        token_id: u64,
        reason: &str,
    ) -> ServiceResult<RevocationOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::BadRequest("Revocation reason is required".to_string()));
        }
        if reason.len() > MAX_REVOKE_REASON_LEN {
            return Err(ServiceError::BadRequest(format!(
                "Revocation reason must be at most {} bytes",
                MAX_REVOKE_REASON_LEN
            )));
        }
        ensure_verified(caller)?;

        let certificate = self
            .certificates
            .get_certificate(token_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Certificate not found".to_string()))?;
        if certificate.institution_id != caller.id {
            return Err(ServiceError::Forbidden(
                "Not authorized to revoke this certificate".to_string(),
            ));
        }
        if certificate.is_revoked {
            return Err(ServiceError::AlreadyRevoked(token_id));
        }

        let transaction = self.ledger.revoke_certificate(token_id, reason).await?;
        let revoke_date = self.now();
        match self
            .certificates
            .mark_revoked(token_id, reason, revoke_date)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(token_id, "certificate was already flagged revoked locally");
            }
            Err(e) => {
                tracing::error!(token_id, %transaction, error = %e, "revocation not recorded locally");
                return Err(ServiceError::RevocationDiverged {
                    token_id,
                    transaction,
                    source: e.into(),
                });
            }
        }

        tracing::info!(token_id, %transaction, institution_id = %caller.id, "certificate revoked");
        Ok(RevocationOutcome {
            token_id,
            transaction_hash: transaction,
            revoke_reason: reason.to_string(),
            revoke_date,
        })
    }

    pub async fn search(&self, text: &str, scope: SearchScope) -> ServiceResult<Vec<Certificate>> {
        let text = text.trim();
        if text.is_empty() {
            let mut errors = ValidationErrors::new();
            let mut error = ValidationError::new("required");
            error.message = Some("Search query is required".into());
            errors.add("query", error);
            return Err(errors.into());
        }
        let query = SearchQuery {
            text: text.to_string(),
            scope,
            limit: SearchQuery::DEFAULT_LIMIT,
        };
        Ok(self.certificates.search(&query).await?)
    }

    pub async fn list_by_student(&self, student_id: &str) -> ServiceResult<Vec<StudentCertificate>> {
        Ok(self.certificates.list_by_student(student_id.trim()).await?)
    }

    pub async fn list_by_institution(&self, institution_id: Uuid) -> ServiceResult<Vec<Certificate>> {
        Ok(self.certificates.list_by_institution(institution_id).await?)
    }

    pub async fn stats(&self, institution_id: Uuid) -> ServiceResult<CertificateStats> {
        Ok(self.certificates.stats(institution_id).await?)
    }

    /// A pinned metadata document, fetched through the gateway.
    pub async fn metadata(&self, ipfs_hash: &str) -> ServiceResult<serde_json::Value> {
        let hash: IpfsHash = ipfs_hash.parse().map_err(|e: ValidationError| {
            let mut errors = ValidationErrors::new();
            errors.add("ipfs_hash", e);
            ServiceError::Validation(errors)
        })?;
        with_retry(self.retry, "fetch_json", || self.pinning.fetch_json(hash.as_str()))
            .await
            .map_err(ServiceError::Pinning)?
            .ok_or_else(|| ServiceError::NotFound("Metadata not found".to_string()))
    }

    pub async fn health(&self) -> HealthReport {
        let (database, ledger, pinning) = tokio::join!(
            self.certificates.ping(),
            self.ledger.ping(),
            self.pinning.ping()
        );
        for (dependency, error) in [
            ("database", database.as_ref().err().map(|e| e.to_string())),
            ("ledger", ledger.as_ref().err().map(|e| e.to_string())),
            ("pinning", pinning.as_ref().err().map(|e| e.to_string())),
        ] {
            if let Some(error) = error {
                tracing::warn!(dependency, %error, "health check failed");
            }
        }

        let database = DependencyStatus::of(&database);
        let ledger = DependencyStatus::of(&ledger);
        let pinning = DependencyStatus::of(&pinning);
        let all_ok = [database, ledger, pinning]
            .iter()
            .all(|s| *s == DependencyStatus::Ok);
        HealthReport {
            status: if all_ok {
                DependencyStatus::Ok
            } else {
                DependencyStatus::Unavailable
            },
            database,
            ledger,
            pinning,
            timestamp: self.now(),
        }
    }
}

fn ensure_verified(institution: &Institution) -> ServiceResult<()> {
    if institution.is_verified {
        Ok(())
    } else {
        Err(ServiceError::Forbidden(
            "Institution must be verified to issue certificates".to_string(),
        ))
    }
}

fn issuance_key(caller: &Institution, draft: &CertificateDraft) -> IssuanceKey {
    IssuanceKey {
        student_id: draft.student_id.clone(),
        course_name: draft.course_name.clone(),
        institution_id: caller.id,
    }
}

fn duplicate_issuance(token_id: Option<u64>) -> ServiceError {
    let message = match token_id {
        Some(id) => format!(
            "Certificate already issued for this student and course (token {})",
            id
        ),
        None => "Certificate issuance for this student and course is already in progress or complete"
            .to_string(),
    };
    ServiceError::Conflict(message)
}
