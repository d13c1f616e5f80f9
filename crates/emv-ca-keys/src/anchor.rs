//! Trust-anchor document format
//!
//! A trust-anchor document is a JSON array with one record per
//! Certification Authority:
//!
//! ```json
//! [
//!   {
//!     "rid": "A000000003",
//!     "keys": [
//!       {
//!         "index": 146,
//!         "description": "Visa 1408",
//!         "expirationDate": "31 Dec 2028",
//!         "exponent": "03",
//!         "modulus": "996AF56F...",
//!         "hashAlgorithmIndicator": 1,
//!         "publicKeyAlgorithmIndicator": 1,
//!         "hash": "429C9542..."
//!       }
//!     ]
//!   }
//! ]
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::key::{CaKeyParts, CaPublicKey, Rid};

/// One Certification Authority and its published keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaRecord {
    pub rid: String,
    pub keys: Vec<CaKeyRecord>,
}

/// A single public key entry, all binary fields hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaKeyRecord {
    pub index: u8,
    pub description: String,
    #[serde(with = "anchor_date")]
    pub expiration_date: NaiveDate,
    pub exponent: String,
    pub modulus: String,
    pub hash_algorithm_indicator: u8,
    pub public_key_algorithm_indicator: u8,
    pub hash: String,
}

impl CaKeyRecord {
    /// Decode and verify this entry for the CA identified by `rid`
    pub fn to_key(&self, rid: Rid) -> Result<CaPublicKey, LoadError> {
        let rid_hex = hex::encode_upper(rid);
        let decode = |field: &'static str, value: &str| {
            hex::decode(value).map_err(|_| LoadError::InvalidHex {
                rid: rid_hex.clone(),
                index: self.index,
                field,
            })
        };

        CaPublicKey::new(CaKeyParts {
            rid,
            index: self.index,
            description: self.description.clone(),
            expiration_date: self.expiration_date,
            modulus: decode("modulus", &self.modulus)?,
            exponent: decode("exponent", &self.exponent)?,
            hash_algorithm_indicator: self.hash_algorithm_indicator,
            public_key_algorithm_indicator: self.public_key_algorithm_indicator,
            checksum: decode("hash", &self.hash)?,
        })
    }

    pub fn from_key(key: &CaPublicKey) -> Self {
        Self {
            index: key.index(),
            description: key.description().to_string(),
            expiration_date: key.expiration_date(),
            exponent: hex::encode_upper(key.exponent()),
            modulus: hex::encode_upper(key.modulus()),
            hash_algorithm_indicator: key.hash_algorithm_indicator(),
            public_key_algorithm_indicator: key.public_key_algorithm_indicator(),
            hash: hex::encode_upper(key.checksum()),
        }
    }
}

/// Parse a 5-byte RID from its hex representation
pub fn parse_rid(value: &str) -> Result<Rid, LoadError> {
    let bytes = hex::decode(value).map_err(|_| LoadError::InvalidRid(value.to_string()))?;
    Rid::try_from(bytes.as_slice()).map_err(|_| LoadError::InvalidRid(value.to_string()))
}

/// Parse a trust-anchor document into its records without verifying keys
pub fn parse_document(source: &str) -> Result<Vec<CaRecord>, LoadError> {
    Ok(serde_json::from_str(source)?)
}

/// Render records in the canonical document layout
pub fn render_document(records: &[CaRecord]) -> Result<String, serde_json::Error> {
    let mut out = serde_json::to_string_pretty(records)?;
    out.push('\n');
    Ok(out)
}

/// Dates are written as `dd Mon yyyy`, e.g. `31 Dec 2028`
mod anchor_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%d %b %Y";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let value = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&value, FORMAT).map_err(serde::de::Error::custom)
    }
}
