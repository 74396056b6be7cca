// Hashes used to talk to the on-chain registry program.

use sha2::{Digest, Sha256};

// Anchor namespaces for the 8-byte discriminators.
const INSTRUCTION_NAMESPACE: &str = "global";
const ACCOUNT_NAMESPACE: &str = "account";
const EVENT_NAMESPACE: &str = "event";

pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let digest = sha256(format!("{}:{}", namespace, name).as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Prefix of the instruction data for `name` (snake_case instruction name).
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator(INSTRUCTION_NAMESPACE, name)
}

/// Prefix of an account's data for the account struct `name` (CamelCase).
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator(ACCOUNT_NAMESPACE, name)
}

/// Prefix of a `Program data:` log payload for the event struct `name`.
pub fn event_discriminator(name: &str) -> [u8; 8] {
    discriminator(EVENT_NAMESPACE, name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_discriminator_matches_anchor() {
        // Anchor's well-known discriminator for an instruction named `initialize`.
        assert_eq!(
            instruction_discriminator("initialize"),
            [175, 175, 109, 31, 13, 152, 155, 237]
        );
    }

    #[test]
    fn namespaces_are_distinct() {
        assert_ne!(
            account_discriminator("CertificateRecord"),
            event_discriminator("CertificateRecord")
        );
    }
}
