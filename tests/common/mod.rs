//! In-memory stand-ins for the database, ledger and pinning service, plus helpers to wire them
//! into the real services and router.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

use certificate_portal::app::{CertificateService, InstitutionService, Reconciler};
use certificate_portal::domain::model::{
    Certificate, CertificateStats, Institution, IssuanceKey, IssuanceReservation, NewInstitution,
    SearchQuery, SearchScope, StudentCertificate, TypeCount, WalletAddress,
};
use certificate_portal::infra::{
    FileUpload, Ledger, LedgerCertificate, LedgerError, LedgerIssueRequest, LedgerReceipt,
    PinMetadata, PinReceipt, Pinning, RetryPolicy,
};
use certificate_portal::storage::{
    CertificateRepository, InstitutionConflict, InstitutionRepository, RepositoryError,
};
use certificate_portal::transport;
use certificate_portal::TokenIssuer;

pub const ADMIN_WALLET: &str = "0x00000000000000000000000000000000000000ad";
pub const STUDENT_WALLET: &str = "0xde709f2102306220921060314715629080e2fb77";
pub const JWT_SECRET: &str = "integration-test-secret";

#[derive(Default)]
struct Tables {
    institutions: Vec<Institution>,
    certificates: BTreeMap<u64, Certificate>,
    reservations: Vec<IssuanceReservation>,
}

/// Both repositories over one set of in-memory tables, with the same uniqueness rules as the
/// Postgres schema.
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    pub fail_complete: Mutex<bool>,
}

impl MemoryRepository {
    pub fn certificate_count(&self) -> usize {
        self.tables.lock().unwrap().certificates.len()
    }

    pub fn reservation_count(&self) -> usize {
        self.tables.lock().unwrap().reservations.len()
    }

    pub fn reservations(&self) -> Vec<IssuanceReservation> {
        self.tables.lock().unwrap().reservations.clone()
    }

    pub fn institution_count(&self) -> usize {
        self.tables.lock().unwrap().institutions.len()
    }
}

#[async_trait]
impl InstitutionRepository for MemoryRepository {
    async fn create_institution(
        &self,
        institution: NewInstitution,
    ) -> Result<Institution, RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        for existing in &tables.institutions {
            if existing.email == institution.email {
                return Err(RepositoryError::Conflict("institutions_email_key".into()));
            }
            if existing.wallet_address == institution.wallet_address {
                return Err(RepositoryError::Conflict("institutions_wallet_address_key".into()));
            }
            if existing.registration_number == institution.registration_number {
                return Err(RepositoryError::Conflict(
                    "institutions_registration_number_key".into(),
                ));
            }
        }
        let created = Institution {
            id: institution.id,
            name: institution.name,
            email: institution.email,
            password_hash: institution.password_hash,
            wallet_address: institution.wallet_address,
            registration_number: institution.registration_number,
            is_verified: false,
            contact_info: institution.contact_info,
            created_at: institution.created_at,
            updated_at: institution.created_at,
        };
        tables.institutions.push(created.clone());
        Ok(created)
    }

    async fn get_institution(&self, id: Uuid) -> Result<Option<Institution>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.institutions.iter().find(|i| i.id == id).cloned())
    }

    async fn get_institution_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Institution>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.institutions.iter().find(|i| i.email == email).cloned())
    }

    async fn find_conflicting_institution(
        &self,
        email: &str,
        wallet_address: &WalletAddress,
        registration_number: &str,
    ) -> Result<Option<InstitutionConflict>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.institutions.iter().find_map(|i| {
            if i.email == email {
                Some(InstitutionConflict::Email)
            } else if &i.wallet_address == wallet_address {
                Some(InstitutionConflict::WalletAddress)
            } else if i.registration_number == registration_number {
                Some(InstitutionConflict::RegistrationNumber)
            } else {
                None
            }
        }))
    }

    async fn set_institution_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.institutions.iter_mut().find(|i| i.id == id) {
            Some(institution) => {
                institution.is_verified = true;
                institution.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CertificateRepository for MemoryRepository {
    async fn reserve_issuance(
        &self,
        reservation: &IssuanceReservation,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        if tables.reservations.iter().any(|r| r.key == reservation.key) {
            return Err(RepositoryError::Conflict("issuance_reservations_pkey".into()));
        }
        if tables.certificates.values().any(|c| c.key() == reservation.key) {
            return Err(RepositoryError::Conflict("certificates_issuance_key".into()));
        }
        tables.reservations.push(reservation.clone());
        Ok(())
    }

    async fn attach_reservation_transaction(
        &self,
        key: &IssuanceKey,
        transaction_hash: &str,
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(r) = tables.reservations.iter_mut().find(|r| &r.key == key) {
            r.transaction_hash = Some(transaction_hash.to_string());
        }
        Ok(())
    }

    async fn release_reservation(&self, key: &IssuanceKey) -> Result<(), RepositoryError> {
        self.tables.lock().unwrap().reservations.retain(|r| &r.key != key);
        Ok(())
    }

    async fn list_reservations(&self) -> Result<Vec<IssuanceReservation>, RepositoryError> {
        Ok(self.reservations())
    }

    async fn complete_issuance(&self, certificate: &Certificate) -> Result<(), RepositoryError> {
        if *self.fail_complete.lock().unwrap() {
            return Err(RepositoryError::Backend(anyhow::anyhow!("database went away")));
        }
        let mut tables = self.tables.lock().unwrap();
        if tables.certificates.contains_key(&certificate.token_id) {
            return Err(RepositoryError::Conflict("certificates_pkey".into()));
        }
        let key = certificate.key();
        if tables.certificates.values().any(|c| c.key() == key) {
            return Err(RepositoryError::Conflict("certificates_issuance_key".into()));
        }
        tables
            .certificates
            .insert(certificate.token_id, certificate.clone());
        tables.reservations.retain(|r| r.key != key);
        Ok(())
    }

    async fn get_certificate(&self, token_id: u64) -> Result<Option<Certificate>, RepositoryError> {
        Ok(self.tables.lock().unwrap().certificates.get(&token_id).cloned())
    }

    async fn find_certificate_for(
        &self,
        key: &IssuanceKey,
    ) -> Result<Option<Certificate>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        Ok(tables.certificates.values().find(|c| &c.key() == key).cloned())
    }

    async fn mark_revoked(
        &self,
        token_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.lock().unwrap();
        match tables.certificates.get_mut(&token_id) {
            Some(c) if !c.is_revoked => {
                c.is_revoked = true;
                c.revoke_reason = Some(reason.to_string());
                c.revoke_date = Some(at);
                c.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<StudentCertificate>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        let mut list: Vec<StudentCertificate> = tables
            .certificates
            .values()
            .filter(|c| c.student_id == student_id)
            .map(|c| StudentCertificate {
                certificate: c.clone(),
                institution_name: tables
                    .institutions
                    .iter()
                    .find(|i| i.id == c.institution_id)
                    .map(|i| i.name.clone())
                    .unwrap_or_default(),
            })
            .collect();
        list.sort_by(|a, b| b.certificate.created_at.cmp(&a.certificate.created_at));
        Ok(list)
    }

    async fn list_by_institution(
        &self,
        institution_id: Uuid,
    ) -> Result<Vec<Certificate>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        let mut list: Vec<Certificate> = tables
            .certificates
            .values()
            .filter(|c| c.institution_id == institution_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Certificate>, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        let token_id = query.token_id();
        let mut list: Vec<Certificate> = tables
            .certificates
            .values()
            .filter(|c| match query.scope {
                SearchScope::Student => {
                    query.matches_text(&c.student_name)
                        || query.matches_text(&c.student_id)
                        || query.matches_text(&c.student_email)
                }
                SearchScope::Course => query.matches_text(&c.course_name),
                SearchScope::TokenId => token_id == Some(c.token_id),
                SearchScope::Any => {
                    query.matches_text(&c.student_name)
                        || query.matches_text(&c.student_id)
                        || query.matches_text(&c.course_name)
                        || token_id == Some(c.token_id)
                }
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list.truncate(query.limit as usize);
        Ok(list)
    }

    async fn stats(&self, institution_id: Uuid) -> Result<CertificateStats, RepositoryError> {
        let tables = self.tables.lock().unwrap();
        let mine: Vec<&Certificate> = tables
            .certificates
            .values()
            .filter(|c| c.institution_id == institution_id)
            .collect();
        let revoked = mine.iter().filter(|c| c.is_revoked).count() as u64;
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        for c in &mine {
            *by_type.entry(c.certificate_type.to_string()).or_default() += 1;
        }
        Ok(CertificateStats {
            total_certificates: mine.len() as u64,
            active_certificates: mine.len() as u64 - revoked,
            revoked_certificates: revoked,
            certificates_by_type: by_type
                .into_iter()
                .map(|(certificate_type, count)| TypeCount {
                    certificate_type,
                    count,
                })
                .collect(),
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Registry kept in memory. Token ids are assigned in order, starting at 1.
#[derive(Default)]
pub struct FakeLedger {
    records: Mutex<Vec<(LedgerCertificate, String)>>,
    /// Error returned (once) by the next issue call.
    pub fail_next_issue: Mutex<Option<LedgerError>>,
    /// When set, the next issue lands on the ledger but is reported as unconfirmed.
    pub lose_next_confirmation: Mutex<bool>,
    /// When set, the next issue lands on the ledger, signals `written`, then waits for
    /// `resume` before returning its receipt.
    pub pause_after_write: Mutex<Option<Pause>>,
    pub issue_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct Pause {
    pub written: Arc<Notify>,
    pub resume: Arc<Notify>,
}

impl FakeLedger {
    pub fn certificate_count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn record(&self, token_id: u64) -> Option<LedgerCertificate> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c.token_id == token_id)
            .map(|(c, _)| c.clone())
    }

    /// Revokes directly on the ledger, bypassing the service.
    pub fn revoke_out_of_band(&self, token_id: u64, reason: &str) {
        let mut records = self.records.lock().unwrap();
        if let Some((c, _)) = records.iter_mut().find(|(c, _)| c.token_id == token_id) {
            c.is_revoked = true;
            c.revoke_reason = Some(reason.to_string());
            c.revoke_date = Some(Utc::now());
        }
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn issue_certificate(
        &self,
        request: LedgerIssueRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.issue_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fail_next_issue.lock().unwrap().take() {
            return Err(e);
        }

        let (token_id, transaction) = {
            let mut records = self.records.lock().unwrap();
            let token_id = records.len() as u64 + 1;
            let transaction = format!("sig-issue-{}", token_id);
            records.push((
                LedgerCertificate {
                    token_id,
                    student_wallet: request.student_wallet,
                    institution_id: Some(request.institution_id),
                    institution_name: request.institution_name,
                    student_name: request.student_name,
                    student_id: request.student_id,
                    course_name: request.course_name,
                    grade: request.grade,
                    certificate_type: request.certificate_type.to_string(),
                    metadata_hash: request.metadata_hash,
                    graduation_date: request.graduation_date,
                    issue_date: Utc::now(),
                    is_revoked: false,
                    revoke_reason: None,
                    revoke_date: None,
                },
                transaction.clone(),
            ));
            (token_id, transaction)
        };

        let pause = self.pause_after_write.lock().unwrap().take();
        if let Some(pause) = pause {
            pause.written.notify_one();
            pause.resume.notified().await;
        }

        let lost = std::mem::take(&mut *self.lose_next_confirmation.lock().unwrap());
        if lost {
            return Err(LedgerError::Unconfirmed {
                transaction,
                reason: "blockhash expired while polling".into(),
            });
        }
        Ok(LedgerReceipt {
            token_id,
            transaction,
        })
    }

    async fn verify_certificate(
        &self,
        token_id: u64,
    ) -> Result<Option<LedgerCertificate>, LedgerError> {
        Ok(self.record(token_id))
    }

    async fn revoke_certificate(&self, token_id: u64, reason: &str) -> Result<String, LedgerError> {
        let mut records = self.records.lock().unwrap();
        let Some((c, _)) = records.iter_mut().find(|(c, _)| c.token_id == token_id) else {
            return Err(LedgerError::Rejected("certificate account does not exist".into()));
        };
        if c.is_revoked {
            return Err(LedgerError::Rejected("AlreadyRevoked".into()));
        }
        c.is_revoked = true;
        c.revoke_reason = Some(reason.to_string());
        c.revoke_date = Some(Utc::now());
        Ok(format!("sig-revoke-{}", token_id))
    }

    async fn total_certificates(&self) -> Result<u64, LedgerError> {
        Ok(self.certificate_count() as u64)
    }

    async fn issuance_transaction(&self, token_id: u64) -> Result<Option<String>, LedgerError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .find(|(c, _)| c.token_id == token_id)
            .map(|(_, tx)| tx.clone()))
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

/// Content-addressed store: identical content always gets the same hash.
#[derive(Default)]
pub struct FakePinning {
    documents: Mutex<HashMap<String, JsonValue>>,
    pub files: Mutex<HashMap<String, Vec<u8>>>,
}

fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    // CIDv1-looking: 'b' followed by base32 alphabet characters.
    let body: String = hex::encode(digest)
        .chars()
        .map(|c| {
            let n = c.to_digit(16).unwrap_or(0) as u8;
            (b'a' + n) as char
        })
        .collect();
    format!("b{}", body)
}

#[async_trait]
impl Pinning for FakePinning {
    async fn pin_file(&self, file: FileUpload, _metadata: PinMetadata) -> anyhow::Result<PinReceipt> {
        let hash = content_hash(&file.bytes);
        let size = file.bytes.len() as u64;
        self.files.lock().unwrap().insert(hash.clone(), file.bytes);
        Ok(PinReceipt {
            ipfs_hash: hash,
            pin_size: size,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    async fn pin_json(
        &self,
        document: JsonValue,
        _metadata: PinMetadata,
    ) -> anyhow::Result<PinReceipt> {
        let bytes = serde_json::to_vec(&document)?;
        let hash = content_hash(&bytes);
        self.documents.lock().unwrap().insert(hash.clone(), document);
        Ok(PinReceipt {
            ipfs_hash: hash,
            pin_size: bytes.len() as u64,
            timestamp: Utc::now().to_rfc3339(),
        })
    }

    async fn fetch_json(&self, ipfs_hash: &str) -> anyhow::Result<Option<JsonValue>> {
        Ok(self.documents.lock().unwrap().get(ipfs_hash).cloned())
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    fn gateway_url(&self, ipfs_hash: &str) -> String {
        format!("https://gateway.test/ipfs/{}", ipfs_hash)
    }
}

/// Services wired over the fakes.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub ledger: Arc<FakeLedger>,
    pub pinning: Arc<FakePinning>,
    pub institutions: Arc<InstitutionService>,
    pub certificates: Arc<CertificateService>,
}

impl Harness {
    pub fn new() -> Self {
        let repo = Arc::new(MemoryRepository::default());
        let ledger = Arc::new(FakeLedger::default());
        let pinning = Arc::new(FakePinning::default());
        let admin: WalletAddress = ADMIN_WALLET.parse().unwrap();

        let institutions = Arc::new(InstitutionService::new(
            repo.clone(),
            TokenIssuer::new(JWT_SECRET),
            vec![admin],
        ));
        let certificates = Arc::new(CertificateService::new(
            repo.clone(),
            ledger.clone(),
            pinning.clone(),
            RetryPolicy::none(),
        ));
        Self {
            repo,
            ledger,
            pinning,
            institutions,
            certificates,
        }
    }

    pub fn reconciler(&self, grace: std::time::Duration) -> Reconciler {
        Reconciler::new(
            self.repo.clone(),
            self.repo.clone(),
            self.ledger.clone(),
            self.pinning.clone(),
            grace,
        )
    }

    pub fn app_state(&self) -> transport::http::AppState {
        transport::http::AppState {
            certificates: self.certificates.clone(),
            institutions: self.institutions.clone(),
            development: true,
            max_upload_bytes: 1024 * 1024,
        }
    }

    /// Starts the real router on an ephemeral port and returns its base URL.
    pub async fn serve(&self) -> String {
        let router = transport::http::create_router(self.app_state());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://127.0.0.1:{}", port)
    }
}
