//! Single writer for the custodial keypair.
//!
//! Every registry write goes through one task that owns the keypair and handles commands
//! strictly in order, so reading the next token id and submitting the transaction that claims
//! it never interleave with another write from this process.

use solana_client::client_error::{ClientError, ClientErrorKind};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcTransactionConfig;
use solana_program::instruction::{AccountMeta, Instruction};
use solana_program::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;
use solana_transaction_status::UiTransactionEncoding;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::codec::{self, RegistryState};
use crate::infra::ledger::{LedgerError, LedgerIssueRequest, LedgerReceipt};

const COMMAND_BUFFER: usize = 64;

enum WriteCommand {
    Initialize {
        reply: oneshot::Sender<Result<Option<String>, LedgerError>>,
    },
    Issue {
        request: LedgerIssueRequest,
        reply: oneshot::Sender<Result<LedgerReceipt, LedgerError>>,
    },
    Revoke {
        token_id: u64,
        reason: String,
        reply: oneshot::Sender<Result<String, LedgerError>>,
    },
}

/// Cheap handle used to queue writes on the writer task.
#[derive(Clone)]
pub struct LedgerWriterHandle {
    commands: mpsc::Sender<WriteCommand>,
}

impl LedgerWriterHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, LedgerError>>) -> WriteCommand,
    ) -> Result<T, LedgerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::WriterClosed)?;
        response.await.map_err(|_| LedgerError::WriterClosed)?
    }

    /// Creates the registry account. `None` if it already existed.
    pub async fn initialize(&self) -> Result<Option<String>, LedgerError> {
        self.send(|reply| WriteCommand::Initialize { reply }).await
    }

    pub async fn issue(&self, request: LedgerIssueRequest) -> Result<LedgerReceipt, LedgerError> {
        self.send(|reply| WriteCommand::Issue { request, reply }).await
    }

    pub async fn revoke(&self, token_id: u64, reason: String) -> Result<String, LedgerError> {
        self.send(|reply| WriteCommand::Revoke {
            token_id,
            reason,
            reply,
        })
        .await
    }
}

pub struct LedgerWriter {
    rpc: Arc<RpcClient>,
    payer: Keypair,
    program_id: Pubkey,
    commands: mpsc::Receiver<WriteCommand>,
}

impl LedgerWriter {
    pub fn spawn(rpc: Arc<RpcClient>, payer: Keypair, program_id: Pubkey) -> LedgerWriterHandle {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let writer = Self {
            rpc,
            payer,
            program_id,
            commands: rx,
        };
        tokio::spawn(writer.run());
        LedgerWriterHandle { commands: tx }
    }

    async fn run(mut self) {
        tracing::info!(payer = %self.payer.pubkey(), "ledger writer started");
        while let Some(command) = self.commands.recv().await {
            // A dropped receiver only means the caller went away; the write itself stands.
            match command {
                WriteCommand::Initialize { reply } => {
                    let _ = reply.send(self.initialize().await);
                }
                WriteCommand::Issue { request, reply } => {
                    let _ = reply.send(self.issue(request).await);
                }
                WriteCommand::Revoke {
                    token_id,
                    reason,
                    reply,
                } => {
                    let _ = reply.send(self.revoke(token_id, &reason).await);
                }
            }
        }
        tracing::info!("ledger writer stopped");
    }

    async fn registry(&self) -> Result<Option<RegistryState>, LedgerError> {
        let (registry, _) = codec::registry_address(&self.program_id);
        let account = self
            .rpc
            .get_account_with_commitment(&registry, self.rpc.commitment())
            .await
            .map_err(rpc_error)?
            .value;
        account
            .map(|a| codec::decode_registry(&a.data))
            .transpose()
            .map_err(LedgerError::Rpc)
    }

    async fn initialize(&self) -> Result<Option<String>, LedgerError> {
        if self.registry().await?.is_some() {
            return Ok(None);
        }
        let (registry, _) = codec::registry_address(&self.program_id);
        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(registry, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data: codec::initialize_data(),
        };
        let signature = self.submit(instruction).await?;
        tracing::info!(%registry, %signature, "certificate registry initialized");
        Ok(Some(signature.to_string()))
    }

    async fn issue(&self, request: LedgerIssueRequest) -> Result<LedgerReceipt, LedgerError> {
        let registry_state = self.registry().await?.ok_or_else(|| {
            LedgerError::Rejected("certificate registry is not initialized".to_string())
        })?;
        let token_id = registry_state.next_token_id;

        let (registry, _) = codec::registry_address(&self.program_id);
        let (certificate, _) = codec::certificate_address(&self.program_id, token_id);
        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(registry, false),
                AccountMeta::new(certificate, false),
                AccountMeta::new(self.payer.pubkey(), true),
                AccountMeta::new_readonly(solana_program::system_program::ID, false),
            ],
            data: codec::issue_data(token_id, &request),
        };

        let signature = self.submit(instruction).await?;
        let token_id = self.issued_token_id(&signature, token_id).await;
        tracing::info!(token_id, %signature, "certificate issued on-chain");
        Ok(LedgerReceipt {
            token_id,
            transaction: signature.to_string(),
        })
    }

    /// Reads the token id back from the confirmed transaction's `CertificateIssued` event.
    async fn issued_token_id(&self, signature: &Signature, expected: u64) -> u64 {
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::Json),
            commitment: Some(self.rpc.commitment()),
            max_supported_transaction_version: Some(0),
        };
        let logs = match self.rpc.get_transaction_with_config(signature, config).await {
            Ok(tx) => tx
                .transaction
                .meta
                .and_then(|meta| Option::<Vec<String>>::from(meta.log_messages))
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(%signature, error = %e, "could not fetch issuance logs");
                Vec::new()
            }
        };
        match codec::issued_event_from_logs(&logs) {
            Some(event) => {
                if event.token_id != expected {
                    tracing::warn!(
                        expected,
                        emitted = event.token_id,
                        "issued token id differs from the registry counter read before submit"
                    );
                }
                event.token_id
            }
            None => {
                tracing::warn!(%signature, expected, "CertificateIssued event not found, using registry counter");
                expected
            }
        }
    }

    async fn revoke(&self, token_id: u64, reason: &str) -> Result<String, LedgerError> {
        let (registry, _) = codec::registry_address(&self.program_id);
        let (certificate, _) = codec::certificate_address(&self.program_id, token_id);
        let instruction = Instruction {
            program_id: self.program_id,
            accounts: vec![
                AccountMeta::new(registry, false),
                AccountMeta::new(certificate, false),
                AccountMeta::new_readonly(self.payer.pubkey(), true),
            ],
            data: codec::revoke_data(token_id, reason),
        };
        let signature = self.submit(instruction).await?;
        tracing::info!(token_id, %signature, "certificate revoked on-chain");
        Ok(signature.to_string())
    }

    /// Signs, broadcasts and waits for confirmation. Never retried: a second submit of the
    /// same write could land twice.
    async fn submit(&self, instruction: Instruction) -> Result<Signature, LedgerError> {
        let blockhash = self.rpc.get_latest_blockhash().await.map_err(rpc_error)?;
        let transaction = Transaction::new_signed_with_payer(
            &[instruction],
            Some(&self.payer.pubkey()),
            &[&self.payer],
            blockhash,
        );
        let signature = transaction.signatures[0];

        if let Err(e) = self.rpc.send_transaction(&transaction).await {
            return Err(classify_send_error(e, signature));
        }

        let commitment = self.rpc.commitment();
        if let Err(e) = self
            .rpc
            .poll_for_signature_with_commitment(&signature, commitment)
            .await
        {
            return Err(LedgerError::Unconfirmed {
                transaction: signature.to_string(),
                reason: e.to_string(),
            });
        }

        match self
            .rpc
            .get_signature_status_with_commitment(&signature, commitment)
            .await
        {
            Ok(Some(Ok(()))) => Ok(signature),
            Ok(Some(Err(e))) => Err(LedgerError::Reverted {
                transaction: signature.to_string(),
                reason: e.to_string(),
            }),
            Ok(None) => Err(LedgerError::Unconfirmed {
                transaction: signature.to_string(),
                reason: "signature status unavailable".to_string(),
            }),
            Err(e) => Err(LedgerError::Unconfirmed {
                transaction: signature.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

pub(crate) fn rpc_error(e: ClientError) -> LedgerError {
    LedgerError::Rpc(anyhow::Error::new(e))
}

/// Preflight and simulation failures mean the node refused the transaction; transport errors
/// leave it unknown whether it was forwarded.
fn classify_send_error(e: ClientError, signature: Signature) -> LedgerError {
    match e.kind() {
        ClientErrorKind::RpcError(solana_client::rpc_request::RpcError::RpcResponseError {
            ..
        })
        | ClientErrorKind::TransactionError(_)
        | ClientErrorKind::SigningError(_) => LedgerError::Rejected(e.to_string()),
        _ => LedgerError::Unconfirmed {
            transaction: signature.to_string(),
            reason: e.to_string(),
        },
    }
}
