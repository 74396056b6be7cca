//! Brings the local index back in line with the ledger.
//!
//! The scan is keyed by token id and idempotent, so it runs at startup and then on an
//! interval. It converts reservations whose ledger write landed, backfills certificates that
//! were minted but never persisted, copies ledger revocations into the local flag and drops
//! reservations that outlived the grace period without a ledger counterpart.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};

use super::{system_clock, Clock};
use crate::domain::metadata::CertificateMetadata;
use crate::domain::model::{Certificate, CertificateType, IssuanceKey, IssuanceReservation};
use crate::infra::ledger::{Ledger, LedgerCertificate};
use crate::infra::pinning::Pinning;
use crate::storage::{CertificateRepository, InstitutionRepository, RepositoryError};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub scanned: u64,
    pub converted: u64,
    pub backfilled: u64,
    pub revocations_applied: u64,
    pub reservations_released: u64,
    pub skipped: u64,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.converted + self.backfilled + self.revocations_applied + self.reservations_released
            > 0
    }
}

pub struct Reconciler {
    institutions: Arc<dyn InstitutionRepository>,
    certificates: Arc<dyn CertificateRepository>,
    ledger: Arc<dyn Ledger>,
    pinning: Arc<dyn Pinning>,
    grace: chrono::Duration,
    clock: Clock,
    run_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl Reconciler {
    pub fn new(
        institutions: Arc<dyn InstitutionRepository>,
        certificates: Arc<dyn CertificateRepository>,
        ledger: Arc<dyn Ledger>,
        pinning: Arc<dyn Pinning>,
        reservation_grace: Duration,
    ) -> Self {
        Self {
            institutions,
            certificates,
            ledger,
            pinning,
            grace: chrono::Duration::from_std(reservation_grace)
                .unwrap_or_else(|_| chrono::Duration::minutes(10)),
            clock: system_clock(),
            run_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// One full pass over the ledger. Runs never overlap.
    pub async fn run_once(&self) -> anyhow::Result<ReconcileReport> {
        let _guard = self.run_lock.lock().await;
        let mut report = ReconcileReport::default();

        let total = self.ledger.total_certificates().await?;
        let mut pending = self.certificates.list_reservations().await?;

        let mut failed = 0u64;
        for token_id in 1..=total {
            report.scanned += 1;
            if let Err(e) = self.reconcile_token(token_id, &mut pending, &mut report).await {
                tracing::warn!(token_id, error = %e, "could not reconcile token, skipping");
                report.skipped += 1;
                failed += 1;
            }
        }

        let now = (self.clock)();
        let stale: Vec<_> = pending
            .into_iter()
            .filter(|r| now - r.created_at > self.grace)
            .collect();
        if failed > 0 && !stale.is_empty() {
            // A failed token may be the ledger counterpart of one of these.
            tracing::warn!(
                failed,
                held = stale.len(),
                "holding stale reservations until every token reconciles"
            );
        } else {
            for reservation in stale {
                if let Err(e) = self.certificates.release_reservation(&reservation.key).await {
                    tracing::warn!(
                        student_id = %reservation.key.student_id,
                        error = %e,
                        "could not release stale issuance reservation"
                    );
                    continue;
                }
                tracing::warn!(
                    student_id = %reservation.key.student_id,
                    course_name = %reservation.key.course_name,
                    institution_id = %reservation.key.institution_id,
                    transaction = reservation.transaction_hash.as_deref().unwrap_or("-"),
                    "released stale issuance reservation"
                );
                report.reservations_released += 1;
            }
        }

        if report.changed() {
            tracing::info!(?report, "reconciliation changed local state");
        } else {
            tracing::debug!(?report, "reconciliation found nothing to do");
        }
        Ok(report)
    }

    async fn reconcile_token(
        &self,
        token_id: u64,
        pending: &mut Vec<IssuanceReservation>,
        report: &mut ReconcileReport,
    ) -> anyhow::Result<()> {
        let Some(on_chain) = self.ledger.verify_certificate(token_id).await? else {
            tracing::warn!(token_id, "token id below the registry counter has no account");
            report.skipped += 1;
            return Ok(());
        };

        match self.certificates.get_certificate(token_id).await? {
            Some(local) => {
                if on_chain.is_revoked && !local.is_revoked {
                    let reason = on_chain.revoke_reason.as_deref().unwrap_or_default();
                    let at = on_chain.revoke_date.unwrap_or_else(|| (self.clock)());
                    if self.certificates.mark_revoked(token_id, reason, at).await? {
                        tracing::info!(token_id, "applied ledger revocation locally");
                        report.revocations_applied += 1;
                    }
                }
                Ok(())
            }
            None => self.restore(on_chain, pending, report).await,
        }
    }

    /// Writes the local record for a ledger certificate that has none.
    async fn restore(
        &self,
        on_chain: LedgerCertificate,
        pending: &mut Vec<IssuanceReservation>,
        report: &mut ReconcileReport,
    ) -> anyhow::Result<()> {
        let token_id = on_chain.token_id;
        let Some(institution_id) = on_chain.institution_id else {
            tracing::warn!(token_id, "ledger certificate has no usable institution reference");
            report.skipped += 1;
            return Ok(());
        };
        if self.institutions.get_institution(institution_id).await?.is_none() {
            tracing::warn!(token_id, %institution_id, "ledger certificate references an unknown institution");
            report.skipped += 1;
            return Ok(());
        }

        let key = IssuanceKey {
            student_id: on_chain.student_id.clone(),
            course_name: on_chain.course_name.clone(),
            institution_id,
        };
        let reservation = pending
            .iter()
            .position(|r| r.key == key)
            .map(|i| pending.swap_remove(i));

        let transaction_hash = match reservation.as_ref().and_then(|r| r.transaction_hash.clone()) {
            Some(tx) => tx,
            None => self
                .ledger
                .issuance_transaction(token_id)
                .await?
                .unwrap_or_default(),
        };
        let student_email = self.student_email(token_id, &on_chain.metadata_hash).await;
        let certificate = certificate_from_ledger(
            on_chain,
            institution_id,
            student_email,
            transaction_hash,
            (self.clock)(),
        );

        match self.certificates.complete_issuance(&certificate).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(what)) => {
                tracing::warn!(token_id, %what, "another certificate already holds this issuance key");
                report.skipped += 1;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        if reservation.is_some() {
            tracing::info!(token_id, "converted pending reservation into certificate");
            report.converted += 1;
        } else {
            tracing::info!(token_id, "backfilled certificate from ledger");
            report.backfilled += 1;
        }
        Ok(())
    }

    async fn student_email(&self, token_id: u64, metadata_hash: &str) -> String {
        match self.pinning.fetch_json(metadata_hash).await {
            Ok(Some(document)) => CertificateMetadata::student_email(&document).unwrap_or_default(),
            Ok(None) => String::new(),
            Err(e) => {
                tracing::warn!(token_id, error = %e, "could not fetch metadata for backfill");
                String::new()
            }
        }
    }

    /// Runs `run_once` every `every` until [`Reconciler::shutdown`] is called.
    pub fn start_background_task(self: Arc<Self>, every: Duration) {
        tokio::spawn(async move {
            let mut timer = interval(every);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick fires immediately; startup already ran a pass.
            timer.tick().await;
            let shutdown = self.shutdown.clone();

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = self.run_once().await {
                            tracing::error!(error = %e, "reconciliation pass failed");
                        }
                    }
                    _ = shutdown.notified() => {
                        tracing::info!("reconciliation task shutting down");
                        break;
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

fn certificate_from_ledger(
    on_chain: LedgerCertificate,
    institution_id: uuid::Uuid,
    student_email: String,
    transaction_hash: String,
    now: DateTime<Utc>,
) -> Certificate {
    Certificate {
        token_id: on_chain.token_id,
        student_name: on_chain.student_name,
        student_id: on_chain.student_id,
        student_email,
        course_name: on_chain.course_name,
        grade: on_chain.grade,
        certificate_type: on_chain.certificate_type.parse::<CertificateType>().unwrap_or_default(),
        institution_id,
        ipfs_hash: on_chain.metadata_hash,
        transaction_hash,
        issue_date: on_chain.issue_date,
        graduation_date: on_chain.graduation_date,
        is_revoked: on_chain.is_revoked,
        revoke_reason: on_chain.revoke_reason,
        revoke_date: on_chain.revoke_date,
        created_at: now,
        updated_at: now,
    }
}
