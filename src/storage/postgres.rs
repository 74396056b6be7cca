//! PostgreSQL backend for the repository traits.
//!
//! Tables are created on connect (`CREATE TABLE IF NOT EXISTS`), and a session-level advisory
//! lock keeps a single API instance per database unless explicitly allowed.

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{CertificateRepository, InstitutionConflict, InstitutionRepository, RepositoryError};
use crate::domain::model::{
    Certificate, CertificateStats, CertificateType, ContactInfo, Institution, IssuanceKey,
    IssuanceReservation, NewInstitution, SearchQuery, SearchScope, StudentCertificate, TypeCount,
    WalletAddress,
};

// Stable across instances; any process holding it owns the database.
const INSTANCE_LOCK_ID: i64 = 4_240_017;

const UNIQUE_VIOLATION: &str = "23505";

const CERTIFICATE_COLUMNS: &str = "c.token_id, c.student_name, c.student_id, c.student_email, \
     c.course_name, c.grade, c.certificate_type, c.institution_id, c.ipfs_hash, \
     c.transaction_hash, c.issue_date, c.graduation_date, c.is_revoked, c.revoke_reason, \
     c.revoke_date, c.created_at, c.updated_at";

#[derive(Debug, Clone)]
pub struct DbSettings {
    pub url: String,
    pub max_connections: u32,
    pub allow_multi_instance: bool,
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
                return RepositoryError::Conflict(
                    db.constraint().unwrap_or("unique constraint").to_string(),
                );
            }
        }
        RepositoryError::Backend(err.into())
    }
}

pub struct PgRepository {
    pool: PgPool,
    /// Held for the lifetime of the process; dropping it releases the advisory lock.
    #[allow(dead_code)]
    instance_lock: Option<sqlx::pool::PoolConnection<sqlx::Postgres>>,
}

impl PgRepository {
    pub async fn connect(settings: &DbSettings) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .connect(&settings.url)
            .await
            .context("failed to connect to Postgres")?;

        Self::create_schema(&pool).await?;

        let instance_lock = if settings.allow_multi_instance {
            None
        } else {
            let mut conn = pool.acquire().await?;
            let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                .bind(INSTANCE_LOCK_ID)
                .fetch_one(&mut *conn)
                .await?;
            if !locked {
                return Err(anyhow::anyhow!(
                    "Another certificate portal instance is already running against this Postgres (pg_advisory_lock). \
Set ALLOW_MULTI_INSTANCE=true to bypass (NOT recommended)."
                ));
            }
            Some(conn)
        };

        Ok(Self { pool, instance_lock })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn create_schema(pool: &PgPool) -> anyhow::Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS institutions (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL CONSTRAINT institutions_email_key UNIQUE,
                password_hash TEXT NOT NULL,
                wallet_address TEXT NOT NULL CONSTRAINT institutions_wallet_address_key UNIQUE,
                registration_number TEXT NOT NULL CONSTRAINT institutions_registration_number_key UNIQUE,
                is_verified BOOLEAN NOT NULL DEFAULT false,
                contact_info JSONB,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS certificates (
                token_id BIGINT PRIMARY KEY,
                student_name TEXT NOT NULL,
                student_id TEXT NOT NULL,
                student_email TEXT NOT NULL,
                course_name TEXT NOT NULL,
                grade TEXT NOT NULL,
                certificate_type TEXT NOT NULL,
                institution_id UUID NOT NULL REFERENCES institutions(id),
                ipfs_hash TEXT NOT NULL,
                transaction_hash TEXT NOT NULL,
                issue_date TIMESTAMPTZ NOT NULL,
                graduation_date TIMESTAMPTZ NOT NULL,
                is_revoked BOOLEAN NOT NULL DEFAULT false,
                revoke_reason TEXT,
                revoke_date TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                CONSTRAINT certificates_issuance_key UNIQUE (student_id, course_name, institution_id)
            )",
            "CREATE INDEX IF NOT EXISTS certificates_student_id_idx ON certificates (student_id)",
            "CREATE INDEX IF NOT EXISTS certificates_institution_id_idx ON certificates (institution_id)",
            "CREATE INDEX IF NOT EXISTS certificates_transaction_hash_idx ON certificates (transaction_hash)",
            "CREATE TABLE IF NOT EXISTS issuance_reservations (
                student_id TEXT NOT NULL,
                course_name TEXT NOT NULL,
                institution_id UUID NOT NULL,
                ipfs_hash TEXT NOT NULL,
                transaction_hash TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                CONSTRAINT issuance_reservations_key PRIMARY KEY (student_id, course_name, institution_id)
            )",
        ];
        for sql in statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .context("failed to create schema")?;
        }
        Ok(())
    }
}

fn token_id_to_db(token_id: u64) -> Result<i64, RepositoryError> {
    i64::try_from(token_id)
        .map_err(|_| RepositoryError::Backend(anyhow::anyhow!("token id {} out of range", token_id)))
}

/// Escapes `%`, `_` and the escape character itself so user text matches literally.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.trim().chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

fn institution_from_row(row: &PgRow) -> anyhow::Result<Institution> {
    let wallet: String = row.try_get("wallet_address")?;
    let contact_info: Option<Json<ContactInfo>> = row.try_get("contact_info")?;
    Ok(Institution {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        wallet_address: wallet
            .parse::<WalletAddress>()
            .map_err(|e| anyhow::anyhow!("stored wallet address {} is invalid: {}", wallet, e))?,
        registration_number: row.try_get("registration_number")?,
        is_verified: row.try_get("is_verified")?,
        contact_info: contact_info.map(|j| j.0),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn certificate_from_row(row: &PgRow) -> anyhow::Result<Certificate> {
    let token_id: i64 = row.try_get("token_id")?;
    let certificate_type: String = row.try_get("certificate_type")?;
    Ok(Certificate {
        token_id: u64::try_from(token_id)
            .map_err(|_| anyhow::anyhow!("stored token id {} is negative", token_id))?,
        student_name: row.try_get("student_name")?,
        student_id: row.try_get("student_id")?,
        student_email: row.try_get("student_email")?,
        course_name: row.try_get("course_name")?,
        grade: row.try_get("grade")?,
        certificate_type: certificate_type
            .parse::<CertificateType>()
            .with_context(|| format!("stored certificate type {} is unknown", certificate_type))?,
        institution_id: row.try_get("institution_id")?,
        ipfs_hash: row.try_get("ipfs_hash")?,
        transaction_hash: row.try_get("transaction_hash")?,
        issue_date: row.try_get("issue_date")?,
        graduation_date: row.try_get("graduation_date")?,
        is_revoked: row.try_get("is_revoked")?,
        revoke_reason: row.try_get("revoke_reason")?,
        revoke_date: row.try_get("revoke_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn certificates_from_rows(rows: &[PgRow]) -> Result<Vec<Certificate>, RepositoryError> {
    rows.iter()
        .map(|r| certificate_from_row(r).map_err(RepositoryError::Backend))
        .collect()
}

#[async_trait]
impl InstitutionRepository for PgRepository {
    async fn create_institution(
        &self,
        institution: NewInstitution,
    ) -> Result<Institution, RepositoryError> {
        let row = sqlx::query(
            "INSERT INTO institutions
                (id, name, email, password_hash, wallet_address, registration_number,
                 is_verified, contact_info, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, false, $7, $8, $8)
             RETURNING *",
        )
        .bind(institution.id)
        .bind(&institution.name)
        .bind(&institution.email)
        .bind(&institution.password_hash)
        .bind(institution.wallet_address.as_str())
        .bind(&institution.registration_number)
        .bind(institution.contact_info.map(Json))
        .bind(institution.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(institution_from_row(&row)?)
    }

    async fn get_institution(&self, id: Uuid) -> Result<Option<Institution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM institutions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(institution_from_row).transpose()?)
    }

    async fn get_institution_by_email(
        &self,
        email: &str,
    ) -> Result<Option<Institution>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM institutions WHERE email = $1")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(institution_from_row).transpose()?)
    }

    async fn find_conflicting_institution(
        &self,
        email: &str,
        wallet_address: &WalletAddress,
        registration_number: &str,
    ) -> Result<Option<InstitutionConflict>, RepositoryError> {
        let row = sqlx::query(
            "SELECT email, wallet_address, registration_number FROM institutions
             WHERE email = $1 OR wallet_address = $2 OR registration_number = $3
             LIMIT 1",
        )
        .bind(email)
        .bind(wallet_address.as_str())
        .bind(registration_number)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let existing_email: String = row.try_get("email")?;
        let existing_wallet: String = row.try_get("wallet_address")?;
        Ok(Some(if existing_email == email {
            InstitutionConflict::Email
        } else if existing_wallet == wallet_address.as_str() {
            InstitutionConflict::WalletAddress
        } else {
            InstitutionConflict::RegistrationNumber
        }))
    }

    async fn set_institution_verified(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE institutions SET is_verified = true, updated_at = $2 WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl CertificateRepository for PgRepository {
    async fn reserve_issuance(
        &self,
        reservation: &IssuanceReservation,
    ) -> Result<(), RepositoryError> {
        let key = &reservation.key;
        let mut tx = self.pool.begin().await?;

        // Insert first: a concurrent completion deletes its reservation in the same transaction
        // that inserts the certificate, so once this insert succeeds the check below sees it.
        sqlx::query(
            "INSERT INTO issuance_reservations
                (student_id, course_name, institution_id, ipfs_hash, transaction_hash, created_at)
             VALUES ($1, $2, $3, $4, NULL, $5)",
        )
        .bind(&key.student_id)
        .bind(&key.course_name)
        .bind(key.institution_id)
        .bind(&reservation.ipfs_hash)
        .bind(reservation.created_at)
        .execute(&mut *tx)
        .await?;

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM certificates
                WHERE student_id = $1 AND course_name = $2 AND institution_id = $3)",
        )
        .bind(&key.student_id)
        .bind(&key.course_name)
        .bind(key.institution_id)
        .fetch_one(&mut *tx)
        .await?;
        if exists {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict("certificates_issuance_key".into()));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn attach_reservation_transaction(
        &self,
        key: &IssuanceKey,
        transaction_hash: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE issuance_reservations SET transaction_hash = $4
             WHERE student_id = $1 AND course_name = $2 AND institution_id = $3",
        )
        .bind(&key.student_id)
        .bind(&key.course_name)
        .bind(key.institution_id)
        .bind(transaction_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_reservation(&self, key: &IssuanceKey) -> Result<(), RepositoryError> {
        sqlx::query(
            "DELETE FROM issuance_reservations
             WHERE student_id = $1 AND course_name = $2 AND institution_id = $3",
        )
        .bind(&key.student_id)
        .bind(&key.course_name)
        .bind(key.institution_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_reservations(&self) -> Result<Vec<IssuanceReservation>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM issuance_reservations ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<IssuanceReservation, RepositoryError> {
                Ok(IssuanceReservation {
                    key: IssuanceKey {
                        student_id: row.try_get("student_id")?,
                        course_name: row.try_get("course_name")?,
                        institution_id: row.try_get("institution_id")?,
                    },
                    ipfs_hash: row.try_get("ipfs_hash")?,
                    transaction_hash: row.try_get("transaction_hash")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    async fn complete_issuance(&self, certificate: &Certificate) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO certificates
                (token_id, student_name, student_id, student_email, course_name, grade,
                 certificate_type, institution_id, ipfs_hash, transaction_hash, issue_date,
                 graduation_date, is_revoked, revoke_reason, revoke_date, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(token_id_to_db(certificate.token_id)?)
        .bind(&certificate.student_name)
        .bind(&certificate.student_id)
        .bind(&certificate.student_email)
        .bind(&certificate.course_name)
        .bind(&certificate.grade)
        .bind(certificate.certificate_type.as_ref())
        .bind(certificate.institution_id)
        .bind(&certificate.ipfs_hash)
        .bind(&certificate.transaction_hash)
        .bind(certificate.issue_date)
        .bind(certificate.graduation_date)
        .bind(certificate.is_revoked)
        .bind(&certificate.revoke_reason)
        .bind(certificate.revoke_date)
        .bind(certificate.created_at)
        .bind(certificate.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM issuance_reservations
             WHERE student_id = $1 AND course_name = $2 AND institution_id = $3",
        )
        .bind(&certificate.student_id)
        .bind(&certificate.course_name)
        .bind(certificate.institution_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_certificate(&self, token_id: u64) -> Result<Option<Certificate>, RepositoryError> {
        let sql = format!("SELECT {} FROM certificates c WHERE c.token_id = $1", CERTIFICATE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(token_id_to_db(token_id)?)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(certificate_from_row).transpose()?)
    }

    async fn find_certificate_for(
        &self,
        key: &IssuanceKey,
    ) -> Result<Option<Certificate>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM certificates c
             WHERE c.student_id = $1 AND c.course_name = $2 AND c.institution_id = $3",
            CERTIFICATE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&key.student_id)
            .bind(&key.course_name)
            .bind(key.institution_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(certificate_from_row).transpose()?)
    }

    async fn mark_revoked(
        &self,
        token_id: u64,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE certificates
             SET is_revoked = true, revoke_reason = $2, revoke_date = $3, updated_at = $3
             WHERE token_id = $1 AND is_revoked = false",
        )
        .bind(token_id_to_db(token_id)?)
        .bind(reason)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_by_student(
        &self,
        student_id: &str,
    ) -> Result<Vec<StudentCertificate>, RepositoryError> {
        let sql = format!(
            "SELECT {}, i.name AS institution_name
             FROM certificates c JOIN institutions i ON i.id = c.institution_id
             WHERE c.student_id = $1
             ORDER BY c.created_at DESC",
            CERTIFICATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(student_id.trim())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> anyhow::Result<StudentCertificate> {
                Ok(StudentCertificate {
                    certificate: certificate_from_row(row)?,
                    institution_name: row.try_get("institution_name")?,
                })
            })
            .collect::<anyhow::Result<Vec<_>>>()
            .map_err(RepositoryError::Backend)
    }

    async fn list_by_institution(
        &self,
        institution_id: Uuid,
    ) -> Result<Vec<Certificate>, RepositoryError> {
        let sql = format!(
            "SELECT {} FROM certificates c WHERE c.institution_id = $1 ORDER BY c.created_at DESC",
            CERTIFICATE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(institution_id)
            .fetch_all(&self.pool)
            .await?;
        certificates_from_rows(&rows)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Certificate>, RepositoryError> {
        let filter = match query.scope {
            SearchScope::Student => {
                "c.student_name ILIKE $1 OR c.student_id ILIKE $1 OR c.student_email ILIKE $1"
            }
            SearchScope::Course => "c.course_name ILIKE $1",
            SearchScope::TokenId => "c.token_id = $2",
            SearchScope::Any => {
                "c.student_name ILIKE $1 OR c.student_id ILIKE $1 OR c.course_name ILIKE $1 \
                 OR c.token_id = $2"
            }
        };
        let sql = format!(
            "SELECT {} FROM certificates c WHERE {} ORDER BY c.created_at DESC LIMIT $3",
            CERTIFICATE_COLUMNS, filter
        );
        let token_id = query.token_id().and_then(|id| i64::try_from(id).ok());
        let rows = sqlx::query(&sql)
            .bind(like_pattern(&query.text))
            .bind(token_id)
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await?;
        certificates_from_rows(&rows)
    }

    async fn stats(&self, institution_id: Uuid) -> Result<CertificateStats, RepositoryError> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total, COUNT(*) FILTER (WHERE is_revoked) AS revoked
             FROM certificates WHERE institution_id = $1",
        )
        .bind(institution_id)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = totals.try_get("total")?;
        let revoked: i64 = totals.try_get("revoked")?;

        let by_type = sqlx::query(
            "SELECT certificate_type, COUNT(*) AS count FROM certificates
             WHERE institution_id = $1
             GROUP BY certificate_type ORDER BY certificate_type",
        )
        .bind(institution_id)
        .fetch_all(&self.pool)
        .await?;
        let certificates_by_type = by_type
            .iter()
            .map(|row| -> Result<TypeCount, sqlx::Error> {
                let count: i64 = row.try_get("count")?;
                Ok(TypeCount {
                    certificate_type: row.try_get("certificate_type")?,
                    count: count.max(0) as u64,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(CertificateStats {
            total_certificates: total.max(0) as u64,
            active_certificates: (total - revoked).max(0) as u64,
            revoked_certificates: revoked.max(0) as u64,
            certificates_by_type,
        })
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("CS101"), "%CS101%");
        assert_eq!(like_pattern(" 100%_off\\ "), "%100\\%\\_off\\\\%");
    }

    #[test]
    fn token_ids_beyond_bigint_are_rejected() {
        assert_eq!(token_id_to_db(7).unwrap(), 7);
        assert!(token_id_to_db(u64::MAX).is_err());
    }
}
