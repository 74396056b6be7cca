//! Centralized configuration (environment variables + defaults).
//!
//! Everything is read once at startup into [`AppConfig`]; missing required variables are
//! reported as errors rather than panics.

use anyhow::Context;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::model::WalletAddress;
use crate::infra::pinata::PinataSettings;
use crate::infra::retry::RetryPolicy;
use crate::infra::solana::SolanaSettings;
use crate::storage::DbSettings;

pub const DEFAULT_KEYPAIR_PATH: &str = "~/.config/solana/id.json";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DbSettings,
    pub solana: SolanaSettings,
    pub pinata: PinataSettings,
    pub jwt_secret: String,
    pub host: String,
    pub port: u16,
    /// CORS origin of the web client.
    pub frontend_url: String,
    /// `APP_ENV=development`: error chains are returned to clients.
    pub development: bool,
    pub admin_wallets: Vec<WalletAddress>,
    pub max_upload_bytes: usize,
    /// `None` disables the periodic reconciliation (it still runs once at startup).
    pub reconcile_interval: Option<Duration>,
    pub reservation_grace: Duration,
    pub retry: RetryPolicy,
}

fn required(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{} must be set", name))
}

fn optional(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parsed<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        _ => Ok(default),
    }
}

fn flag(name: &str) -> bool {
    std::env::var(name).unwrap_or_default() == "true"
}

/// Comma-separated list of admin wallet addresses; blanks are skipped.
pub fn parse_admin_wallets(raw: &str) -> anyhow::Result<Vec<WalletAddress>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<WalletAddress>()
                .map_err(|_| anyhow::anyhow!("ADMIN_WALLETS contains an invalid address: {}", s))
        })
        .collect()
}

impl AppConfig {
    /// Loads `.env` (if present) and reads the environment.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database = DbSettings {
            url: required("DATABASE_URL")?,
            max_connections: parsed("DB_MAX_CONNECTIONS", 5u32)?.max(1),
            allow_multi_instance: flag("ALLOW_MULTI_INSTANCE"),
        };

        let solana = SolanaSettings {
            rpc_url: required("SOLANA_RPC_URL")?,
            program_id: required("SOLANA_PROGRAM_ID")?,
            keypair_path: optional("SOLANA_KEYPAIR_PATH", DEFAULT_KEYPAIR_PATH),
        };

        let pinata = PinataSettings {
            api_key: required("PINATA_API_KEY")?,
            secret_key: required("PINATA_SECRET_KEY")?,
            api_url: optional("PINATA_API_URL", "https://api.pinata.cloud"),
            gateway_url: optional("PINATA_GATEWAY_URL", "https://gateway.pinata.cloud"),
        };

        let reconcile_secs = parsed("RECONCILE_INTERVAL_SECS", 300u64)?;

        Ok(Self {
            database,
            solana,
            pinata,
            jwt_secret: required("JWT_SECRET")?,
            host: optional("HOST", "0.0.0.0"),
            port: parsed("PORT", 5000u16)?,
            frontend_url: optional("FRONTEND_URL", "http://localhost:3000"),
            development: optional("APP_ENV", "production") == "development",
            admin_wallets: parse_admin_wallets(&optional("ADMIN_WALLETS", ""))?,
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            reconcile_interval: (reconcile_secs > 0).then(|| Duration::from_secs(reconcile_secs)),
            reservation_grace: Duration::from_secs(parsed("RESERVATION_GRACE_SECS", 600u64)?),
            retry: RetryPolicy {
                retries: parsed("RETRY_ATTEMPTS", 3u32)?,
                base_delay: Duration::from_millis(parsed("RETRY_DELAY_MS", 1000u64)?),
            },
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_wallets_are_parsed_and_lowercased() {
        let wallets = parse_admin_wallets(
            " 0x52908400098527886E0F7030069857D2E4169EE7, ,0xde709f2102306220921060314715629080e2fb77",
        )
        .unwrap();
        assert_eq!(wallets.len(), 2);
        assert_eq!(wallets[0].as_str(), "0x52908400098527886e0f7030069857d2e4169ee7");
        assert!(parse_admin_wallets("").unwrap().is_empty());
        assert!(parse_admin_wallets("0x1").is_err());
    }
}
