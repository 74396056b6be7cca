pub mod client;
pub mod codec;
pub mod writer;

pub use client::{SolanaLedger, SolanaSettings};
pub use writer::{LedgerWriter, LedgerWriterHandle};
