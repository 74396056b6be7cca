pub mod hashing;
pub mod password;
pub mod token;

pub use hashing::{account_discriminator, event_discriminator, instruction_discriminator, sha256};
pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenError, TokenIssuer};
