// On-chain registry of academic certificates issued by the portal.
use anchor_lang::prelude::*;

declare_id!("GvxmK6N2UjDvhd1k6fr9NdvudTGK6Wgb89Na5gWK4jFT");

pub const REGISTRY_SEED: &[u8] = b"certificate_registry";
pub const CERTIFICATE_SEED: &[u8] = b"certificate";

#[program]
pub mod certificate_registry {
    use super::*;

    pub fn initialize(ctx: Context<Initialize>) -> Result<()> {
        let registry = &mut ctx.accounts.registry;
        registry.authority = ctx.accounts.authority.key();
        registry.next_token_id = 1;
        registry.total_issued = 0;
        registry.total_revoked = 0;
        registry.bump = ctx.bumps.registry;
        Ok(())
    }

    /// Records a new certificate. `token_id` must equal the registry counter, so two writers
    /// racing on the same id cannot both succeed.
    pub fn issue_certificate(
        ctx: Context<IssueCertificate>,
        token_id: u64,
        args: CertificateArgs,
    ) -> Result<()> {
        let registry = &mut ctx.accounts.registry;
        require!(token_id == registry.next_token_id, RegistryError::TokenIdMismatch);
        args.check()?;

        let now_ms = Clock::get()?
            .unix_timestamp
            .checked_mul(1000)
            .ok_or(RegistryError::Overflow)?;

        let record = &mut ctx.accounts.certificate;
        record.token_id = token_id;
        record.issuer = ctx.accounts.authority.key();
        record.student_wallet = args.student_wallet;
        record.institution_ref = args.institution_ref;
        record.institution_name = args.institution_name;
        record.student_name = args.student_name;
        record.student_id = args.student_id;
        record.course_name = args.course_name;
        record.grade = args.grade;
        record.certificate_type = args.certificate_type;
        record.metadata_hash = args.metadata_hash;
        record.graduation_date_ms = args.graduation_date_ms;
        record.issued_at_ms = now_ms;
        record.is_revoked = false;
        record.revoke_reason = String::new();
        record.revoked_at_ms = 0;
        record.bump = ctx.bumps.certificate;

        registry.next_token_id = registry
            .next_token_id
            .checked_add(1)
            .ok_or(RegistryError::Overflow)?;
        registry.total_issued = registry
            .total_issued
            .checked_add(1)
            .ok_or(RegistryError::Overflow)?;

        emit!(CertificateIssued {
            token_id,
            student_wallet: record.student_wallet,
            metadata_hash: record.metadata_hash.clone(),
        });
        Ok(())
    }

    pub fn revoke_certificate(
        ctx: Context<RevokeCertificate>,
        token_id: u64,
        reason: String,
    ) -> Result<()> {
        require!(!reason.trim().is_empty(), RegistryError::EmptyReason);
        require!(reason.len() <= MAX_REASON_LEN, RegistryError::FieldTooLong);

        let record = &mut ctx.accounts.certificate;
        require!(!record.is_revoked, RegistryError::AlreadyRevoked);

        record.is_revoked = true;
        record.revoke_reason = reason.clone();
        record.revoked_at_ms = Clock::get()?
            .unix_timestamp
            .checked_mul(1000)
            .ok_or(RegistryError::Overflow)?;

        let registry = &mut ctx.accounts.registry;
        registry.total_revoked = registry
            .total_revoked
            .checked_add(1)
            .ok_or(RegistryError::Overflow)?;

        emit!(CertificateRevoked { token_id, reason });
        Ok(())
    }
}

const MAX_REASON_LEN: usize = 256;

#[derive(AnchorSerialize, AnchorDeserialize, Clone)]
pub struct CertificateArgs {
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
}

impl CertificateArgs {
    fn check(&self) -> Result<()> {
        let limits: [(&String, usize); 8] = [
            (&self.institution_ref, 36),
            (&self.institution_name, 200),
            (&self.student_name, 200),
            (&self.student_id, 50),
            (&self.course_name, 300),
            (&self.grade, 50),
            (&self.certificate_type, 16),
            (&self.metadata_hash, 100),
        ];
        for (value, max) in limits {
            require!(value.len() <= max, RegistryError::FieldTooLong);
        }
        require!(!self.metadata_hash.is_empty(), RegistryError::MissingMetadata);
        Ok(())
    }
}

#[derive(Accounts)]
pub struct Initialize<'info> {
    #[account(
        init_if_needed,
        payer = authority,
        space = 8 + Registry::INIT_SPACE,
        seeds = [REGISTRY_SEED],
        bump
    )]
    pub registry: Account<'info, Registry>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(token_id: u64)]
pub struct IssueCertificate<'info> {
    #[account(
        mut,
        seeds = [REGISTRY_SEED],
        bump = registry.bump,
        has_one = authority @ RegistryError::Unauthorized
    )]
    pub registry: Account<'info, Registry>,
    #[account(
        init,
        payer = authority,
        space = 8 + CertificateRecord::INIT_SPACE,
        seeds = [CERTIFICATE_SEED, token_id.to_le_bytes().as_ref()],
        bump
    )]
    pub certificate: Account<'info, CertificateRecord>,
    #[account(mut)]
    pub authority: Signer<'info>,
    pub system_program: Program<'info, System>,
}

#[derive(Accounts)]
#[instruction(token_id: u64)]
pub struct RevokeCertificate<'info> {
    #[account(
        mut,
        seeds = [REGISTRY_SEED],
        bump = registry.bump,
        has_one = authority @ RegistryError::Unauthorized
    )]
    pub registry: Account<'info, Registry>,
    #[account(
        mut,
        seeds = [CERTIFICATE_SEED, token_id.to_le_bytes().as_ref()],
        bump = certificate.bump
    )]
    pub certificate: Account<'info, CertificateRecord>,
    pub authority: Signer<'info>,
}

#[account]
#[derive(InitSpace)]
pub struct Registry {
    pub authority: Pubkey,
    pub next_token_id: u64,
    pub total_issued: u64,
    pub total_revoked: u64,
    pub bump: u8,
}

#[account]
#[derive(InitSpace)]
pub struct CertificateRecord {
    pub token_id: u64,
    pub issuer: Pubkey,
    pub student_wallet: [u8; 20],
    #[max_len(36)]
    pub institution_ref: String,
    #[max_len(200)]
    pub institution_name: String,
    #[max_len(200)]
    pub student_name: String,
    #[max_len(50)]
    pub student_id: String,
    #[max_len(300)]
    pub course_name: String,
    #[max_len(50)]
    pub grade: String,
    #[max_len(16)]
    pub certificate_type: String,
    #[max_len(100)]
    pub metadata_hash: String,
    pub graduation_date_ms: i64,
    pub issued_at_ms: i64,
    pub is_revoked: bool,
    #[max_len(256)]
    pub revoke_reason: String,
    pub revoked_at_ms: i64,
    pub bump: u8,
}

#[event]
pub struct CertificateIssued {
    pub token_id: u64,
    pub student_wallet: [u8; 20],
    pub metadata_hash: String,
}

#[event]
pub struct CertificateRevoked {
    pub token_id: u64,
    pub reason: String,
}

#[error_code]
pub enum RegistryError {
    #[msg("Token id does not match the registry counter")]
    TokenIdMismatch,
    #[msg("Signer is not the registry authority")]
    Unauthorized,
    #[msg("Certificate already revoked")]
    AlreadyRevoked,
    #[msg("Revocation reason is required")]
    EmptyReason,
    #[msg("A certificate field exceeds its maximum length")]
    FieldTooLong,
    #[msg("Metadata hash is required")]
    MissingMetadata,
    #[msg("Arithmetic overflow")]
    Overflow,
}
