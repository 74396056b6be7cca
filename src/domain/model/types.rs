use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;
use validator::ValidationError;

use crate::domain::validate;

/// A 20-byte account address in `0x`-prefixed hex, always stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WalletAddress(String);

impl WalletAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // The constructor guarantees 40 hex digits after the prefix.
        if hex::decode_to_slice(&self.0[2..], &mut out).is_err() {
            return [0u8; 20];
        }
        out
    }

    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }
}

impl FromStr for WalletAddress {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        validate::wallet_address(s)?;
        Ok(Self(s.to_lowercase()))
    }
}

impl TryFrom<String> for WalletAddress {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WalletAddress> for String {
    fn from(value: WalletAddress) -> Self {
        value.0
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content address returned by the pinning service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpfsHash(String);

impl IpfsHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for IpfsHash {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        validate::ipfs_hash(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for IpfsHash {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpfsHash> for String {
    fn from(value: IpfsHash) -> Self {
        value.0
    }
}

impl fmt::Display for IpfsHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    ToSchema,
    Display,
    EnumString,
    AsRefStr,
)]
pub enum CertificateType {
    #[default]
    Certificate,
    Diploma,
    Degree,
    Transcript,
    Award,
}

/// Drops sub-millisecond precision so a timestamp survives the ledger's millisecond encoding
/// and the database round trip unchanged.
pub fn truncate_to_millis(value: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(value.timestamp_millis()).unwrap_or(value)
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date (midnight UTC).
pub fn parse_date(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date '{}', expected YYYY-MM-DD or RFC 3339", raw))
}

pub fn deserialize_date<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_date(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dates_accept_plain_days_and_timestamps() {
        assert_eq!(
            parse_date("2024-06-30").unwrap(),
            parse_date("2024-06-30T00:00:00Z").unwrap()
        );
        assert!(parse_date("30/06/2024").is_err());
    }

    #[test]
    fn wallet_address_is_lowercased_and_round_trips_bytes() {
        let addr: WalletAddress = "0x52908400098527886E0F7030069857D2E4169EE7".parse().unwrap();
        assert_eq!(addr.as_str(), "0x52908400098527886e0f7030069857d2e4169ee7");
        assert_eq!(WalletAddress::from_bytes(addr.to_bytes()), addr);
    }

    #[test]
    fn wallet_address_deserialization_validates() {
        let ok: Result<WalletAddress, _> =
            serde_json::from_str("\"0xde709f2102306220921060314715629080e2fb77\"");
        assert!(ok.is_ok());
        let bad: Result<WalletAddress, _> = serde_json::from_str("\"0x1234\"");
        assert!(bad.is_err());
    }

    #[test]
    fn certificate_type_parses_by_name() {
        assert_eq!("Diploma".parse::<CertificateType>().unwrap(), CertificateType::Diploma);
        assert!("Badge".parse::<CertificateType>().is_err());
        assert_eq!(CertificateType::Award.to_string(), "Award");
    }

    #[test]
    fn millisecond_truncation() {
        let precise = DateTime::parse_from_rfc3339("2024-06-30T10:15:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let truncated = truncate_to_millis(precise);
        assert_eq!(truncated.timestamp_millis(), precise.timestamp_millis());
        assert_eq!(truncate_to_millis(truncated), truncated);
    }
}
