pub mod config;
pub mod ledger;
pub mod pinata;
pub mod pinning;
pub mod retry;
pub mod solana;

pub use config::AppConfig;
pub use ledger::{Ledger, LedgerCertificate, LedgerError, LedgerIssueRequest, LedgerReceipt};
pub use pinata::{PinataClient, PinataSettings};
pub use pinning::{FileUpload, PinMetadata, PinReceipt, Pinning};
pub use retry::{with_retry, RetryPolicy};
pub use solana::{SolanaLedger, SolanaSettings};
