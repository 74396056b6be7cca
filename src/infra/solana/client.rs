// Responsible for all communication with the Solana blockchain.

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_program::pubkey::Pubkey;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::signer::keypair::read_keypair_file;
use solana_sdk::signer::Signer;
use std::str::FromStr;
use std::sync::Arc;

use super::codec::{self, RegistryState};
use super::writer::{rpc_error, LedgerWriter, LedgerWriterHandle};
use crate::infra::ledger::{
    Ledger, LedgerCertificate, LedgerError, LedgerIssueRequest, LedgerReceipt,
};
use crate::infra::retry::{with_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct SolanaSettings {
    pub rpc_url: String,
    pub program_id: String,
    /// May start with `~`.
    pub keypair_path: String,
}

pub struct SolanaLedger {
    rpc: Arc<RpcClient>,
    program_id: Pubkey,
    payer: Pubkey,
    writer: LedgerWriterHandle,
    retry: RetryPolicy,
}

impl SolanaLedger {
    /// Loads the custodial keypair and starts the writer task.
    pub fn connect(settings: &SolanaSettings, retry: RetryPolicy) -> anyhow::Result<Self> {
        let program_id = Pubkey::from_str(&settings.program_id)
            .map_err(|e| anyhow::anyhow!("SOLANA_PROGRAM_ID is not a valid pubkey: {}", e))?;
        let keypair_path = shellexpand::tilde(&settings.keypair_path).to_string();
        let payer = read_keypair_file(&keypair_path)
            .map_err(|e| anyhow::anyhow!("Failed to read keypair file {}: {}", keypair_path, e))?;
        let payer_pubkey = payer.pubkey();

        let rpc = Arc::new(RpcClient::new_with_commitment(
            settings.rpc_url.clone(),
            CommitmentConfig::confirmed(),
        ));
        let writer = LedgerWriter::spawn(rpc.clone(), payer, program_id);

        Ok(Self {
            rpc,
            program_id,
            payer: payer_pubkey,
            writer,
            retry,
        })
    }

    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn payer(&self) -> Pubkey {
        self.payer
    }

    pub fn registry_address(&self) -> Pubkey {
        codec::registry_address(&self.program_id).0
    }

    /// Creates the registry account if it does not exist yet.
    pub async fn initialize_registry(&self) -> Result<Option<String>, LedgerError> {
        self.writer.initialize().await
    }

    pub async fn registry_state(&self) -> Result<Option<RegistryState>, LedgerError> {
        let address = self.registry_address();
        let account = with_retry(self.retry, "get_registry_account", || {
            self.rpc
                .get_account_with_commitment(&address, self.rpc.commitment())
        })
        .await
        .map_err(rpc_error)?
        .value;
        account
            .map(|a| codec::decode_registry(&a.data))
            .transpose()
            .map_err(LedgerError::Rpc)
    }
}

#[async_trait]
impl Ledger for SolanaLedger {
    async fn issue_certificate(
        &self,
        request: LedgerIssueRequest,
    ) -> Result<LedgerReceipt, LedgerError> {
        self.writer.issue(request).await
    }

    async fn verify_certificate(
        &self,
        token_id: u64,
    ) -> Result<Option<LedgerCertificate>, LedgerError> {
        let (address, _) = codec::certificate_address(&self.program_id, token_id);
        let account = with_retry(self.retry, "get_certificate_account", || {
            self.rpc
                .get_account_with_commitment(&address, self.rpc.commitment())
        })
        .await
        .map_err(rpc_error)?
        .value;

        let Some(account) = account else {
            return Ok(None);
        };
        let record = codec::decode_certificate(&account.data).map_err(LedgerError::Rpc)?;
        Ok(Some(record.into_certificate().map_err(LedgerError::Rpc)?))
    }

    async fn revoke_certificate(&self, token_id: u64, reason: &str) -> Result<String, LedgerError> {
        self.writer.revoke(token_id, reason.to_string()).await
    }

    async fn total_certificates(&self) -> Result<u64, LedgerError> {
        Ok(self
            .registry_state()
            .await?
            .map(|r| r.next_token_id.saturating_sub(1))
            .unwrap_or(0))
    }

    async fn issuance_transaction(&self, token_id: u64) -> Result<Option<String>, LedgerError> {
        let (address, _) = codec::certificate_address(&self.program_id, token_id);
        let signatures = with_retry(self.retry, "get_signatures_for_address", || {
            self.rpc.get_signatures_for_address(&address)
        })
        .await
        .map_err(rpc_error)?;
        // Newest first; the account is created by its issuance.
        Ok(signatures.last().map(|s| s.signature.clone()))
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        self.rpc.get_slot().await.map_err(rpc_error)?;
        Ok(())
    }
}
