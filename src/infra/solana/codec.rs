//! Wire layout of the `certificate_registry` program: PDAs, instruction data, account data and
//! emitted events (Anchor discriminators followed by Borsh fields).

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use solana_program::pubkey::Pubkey;

use crate::crypto::hashing::{account_discriminator, event_discriminator, instruction_discriminator};
use crate::domain::model::WalletAddress;
use crate::infra::ledger::{LedgerCertificate, LedgerIssueRequest};

pub const REGISTRY_SEED: &[u8] = b"certificate_registry";
pub const CERTIFICATE_SEED: &[u8] = b"certificate";

const PROGRAM_DATA_PREFIX: &str = "Program data: ";

pub fn registry_address(program_id: &Pubkey) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[REGISTRY_SEED], program_id)
}

pub fn certificate_address(program_id: &Pubkey, token_id: u64) -> (Pubkey, u8) {
    Pubkey::find_program_address(&[CERTIFICATE_SEED, &token_id.to_le_bytes()], program_id)
}

#[derive(Default)]
struct Encoder(Vec<u8>);

impl Encoder {
    fn instruction(name: &str) -> Self {
        Self(instruction_discriminator(name).to_vec())
    }

    fn u64(mut self, v: u64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64(mut self, v: i64) -> Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn raw(mut self, bytes: &[u8]) -> Self {
        self.0.extend_from_slice(bytes);
        self
    }

    fn string(mut self, s: &str) -> Self {
        self.0.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.0.extend_from_slice(s.as_bytes());
        self
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

pub fn initialize_data() -> Vec<u8> {
    Encoder::instruction("initialize").finish()
}

/// `issue_certificate(token_id, CertificateArgs)`.
pub fn issue_data(token_id: u64, request: &LedgerIssueRequest) -> Vec<u8> {
    Encoder::instruction("issue_certificate")
        .u64(token_id)
        .raw(&request.student_wallet.to_bytes())
        .string(&request.institution_id.to_string())
        .string(&request.institution_name)
        .string(&request.student_name)
        .string(&request.student_id)
        .string(&request.course_name)
        .string(&request.grade)
        .string(request.certificate_type.as_ref())
        .string(&request.metadata_hash)
        .i64(request.graduation_date.timestamp_millis())
        .finish()
}

pub fn revoke_data(token_id: u64, reason: &str) -> Vec<u8> {
    Encoder::instruction("revoke_certificate")
        .u64(token_id)
        .string(reason)
        .finish()
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Checks the 8-byte discriminator and positions after it.
    fn new(data: &'a [u8], discriminator: [u8; 8], what: &str) -> anyhow::Result<Self> {
        if data.len() < 8 || data[..8] != discriminator {
            return Err(anyhow::anyhow!("data is not a {}", what));
        }
        Ok(Self { data, pos: 8 })
    }

    fn take(&mut self, n: usize) -> anyhow::Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| anyhow::anyhow!("data too short"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> anyhow::Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> anyhow::Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> anyhow::Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u64(&mut self) -> anyhow::Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> anyhow::Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn pubkey(&mut self) -> anyhow::Result<Pubkey> {
        Ok(Pubkey::new_from_array(self.array()?))
    }

    fn string(&mut self) -> anyhow::Result<String> {
        let len = u32::from_le_bytes(self.array()?) as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryState {
    pub authority: Pubkey,
    pub next_token_id: u64,
    pub total_issued: u64,
    pub total_revoked: u64,
    pub bump: u8,
}

pub fn decode_registry(data: &[u8]) -> anyhow::Result<RegistryState> {
    let mut d = Decoder::new(data, account_discriminator("Registry"), "Registry account")?;
    Ok(RegistryState {
        authority: d.pubkey()?,
        next_token_id: d.u64()?,
        total_issued: d.u64()?,
        total_revoked: d.u64()?,
        bump: d.u8()?,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct CertificateRecordState {
    pub token_id: u64,
    pub issuer: Pubkey,
    pub student_wallet: [u8; 20],
    pub institution_ref: String,
    pub institution_name: String,
    pub student_name: String,
    pub student_id: String,
    pub course_name: String,
    pub grade: String,
    pub certificate_type: String,
    pub metadata_hash: String,
    pub graduation_date_ms: i64,
    pub issued_at_ms: i64,
    pub is_revoked: bool,
    pub revoke_reason: String,
    pub revoked_at_ms: i64,
}

pub fn decode_certificate(data: &[u8]) -> anyhow::Result<CertificateRecordState> {
    let mut d = Decoder::new(
        data,
        account_discriminator("CertificateRecord"),
        "CertificateRecord account",
    )?;
    Ok(CertificateRecordState {
        token_id: d.u64()?,
        issuer: d.pubkey()?,
        student_wallet: d.array()?,
        institution_ref: d.string()?,
        institution_name: d.string()?,
        student_name: d.string()?,
        student_id: d.string()?,
        course_name: d.string()?,
        grade: d.string()?,
        certificate_type: d.string()?,
        metadata_hash: d.string()?,
        graduation_date_ms: d.i64()?,
        issued_at_ms: d.i64()?,
        is_revoked: d.bool()?,
        revoke_reason: d.string()?,
        revoked_at_ms: d.i64()?,
    })
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow::anyhow!("timestamp {} out of range", ms))
}

impl CertificateRecordState {
    pub fn into_certificate(self) -> anyhow::Result<LedgerCertificate> {
        let revoked = self.is_revoked;
        Ok(LedgerCertificate {
            token_id: self.token_id,
            student_wallet: WalletAddress::from_bytes(self.student_wallet),
            institution_id: self.institution_ref.parse().ok(),
            institution_name: self.institution_name,
            student_name: self.student_name,
            student_id: self.student_id,
            course_name: self.course_name,
            grade: self.grade,
            certificate_type: self.certificate_type,
            metadata_hash: self.metadata_hash,
            graduation_date: from_millis(self.graduation_date_ms)?,
            issue_date: from_millis(self.issued_at_ms)?,
            is_revoked: revoked,
            revoke_reason: revoked.then_some(self.revoke_reason),
            revoke_date: if revoked {
                Some(from_millis(self.revoked_at_ms)?)
            } else {
                None
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedEvent {
    pub token_id: u64,
    pub student_wallet: [u8; 20],
    pub metadata_hash: String,
}

/// Finds the `CertificateIssued` event among a transaction's log lines.
pub fn issued_event_from_logs(logs: &[String]) -> Option<IssuedEvent> {
    let discriminator = event_discriminator("CertificateIssued");
    logs.iter()
        .filter_map(|line| line.strip_prefix(PROGRAM_DATA_PREFIX))
        .filter_map(|payload| STANDARD.decode(payload.trim()).ok())
        .find_map(|bytes| {
            let mut d = Decoder::new(&bytes, discriminator, "CertificateIssued event").ok()?;
            Some(IssuedEvent {
                token_id: d.u64().ok()?,
                student_wallet: d.array().ok()?,
                metadata_hash: d.string().ok()?,
            })
        })
}
