pub mod app;
pub mod crypto;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::{CertificateService, InstitutionService, Reconciler, ServiceError};
pub use crypto::TokenIssuer;
pub use infra::{AppConfig, PinataClient, SolanaLedger};
pub use storage::PgRepository;
