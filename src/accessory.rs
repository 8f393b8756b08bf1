//! Accessory Module
//!
//! Parses the accessory export blob into the descriptor the hub polls for.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Length of the P-224 master private key
pub const MASTER_KEY_LEN: usize = 28;

/// Length of each symmetric shared secret
pub const SHARED_SECRET_LEN: usize = 32;

/// Identity and key material of one tracked accessory
#[derive(Clone, PartialEq, Eq)]
pub struct Accessory {
    identifier: String,
    name: String,
    model: Option<String>,
    paired_at: Option<DateTime<Utc>>,
    master_key: [u8; MASTER_KEY_LEN],
    primary_secret: [u8; SHARED_SECRET_LEN],
    secondary_secret: [u8; SHARED_SECRET_LEN],
}

impl Accessory {
    /// Parse an accessory export blob
    pub fn from_export(blob: &str) -> Result<Self, ImportError> {
        let raw: AccessoryExport = serde_json::from_str(blob.trim())
            .map_err(|e| ImportError::Malformed(e.to_string()))?;

        let identifier = raw.identifier.trim().to_string();
        if identifier.is_empty() {
            return Err(ImportError::MissingField("identifier"));
        }

        let private_key = decode_field("privateKey", &raw.private_key)?;
        if private_key.len() < MASTER_KEY_LEN {
            return Err(ImportError::KeyLength {
                field: "privateKey",
                expected: MASTER_KEY_LEN,
                actual: private_key.len(),
            });
        }
        // Exports may carry a public key prefix; the private scalar is the tail.
        let mut master_key = [0u8; MASTER_KEY_LEN];
        master_key.copy_from_slice(&private_key[private_key.len() - MASTER_KEY_LEN..]);

        let primary_secret = secret_field("sharedSecret", &raw.shared_secret)?;
        let secondary_secret =
            secret_field("secondarySharedSecret", &raw.secondary_shared_secret)?;

        let name = raw
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| identifier.clone());

        debug!("Loaded accessory export: {}", identifier);

        Ok(Self {
            identifier,
            name,
            model: raw.model,
            paired_at: raw.pairing_date,
            master_key,
            primary_secret,
            secondary_secret,
        })
    }

    /// Stable identifier of the accessory
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Human readable name, falls back to the identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn paired_at(&self) -> Option<DateTime<Utc>> {
        self.paired_at
    }

    /// Key material in the shape the report gateway expects
    pub(crate) fn keys(&self) -> AccessoryKeys {
        AccessoryKeys {
            identifier: self.identifier.clone(),
            master_key: STANDARD.encode(self.master_key),
            shared_secret: STANDARD.encode(self.primary_secret),
            secondary_shared_secret: STANDARD.encode(self.secondary_secret),
            paired_at: self.paired_at,
        }
    }
}

impl std::fmt::Debug for Accessory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessory")
            .field("identifier", &self.identifier)
            .field("name", &self.name)
            .field("model", &self.model)
            .field("paired_at", &self.paired_at)
            .finish_non_exhaustive()
    }
}

fn decode_field(field: &'static str, value: &str) -> Result<Vec<u8>, ImportError> {
    STANDARD
        .decode(value.trim())
        .map_err(|e| ImportError::InvalidKey { field, reason: e.to_string() })
}

fn secret_field(field: &'static str, value: &str) -> Result<[u8; SHARED_SECRET_LEN], ImportError> {
    let bytes = decode_field(field, value)?;
    bytes.as_slice().try_into().map_err(|_| ImportError::KeyLength {
        field,
        expected: SHARED_SECRET_LEN,
        actual: bytes.len(),
    })
}

// Import/wire types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessoryExport {
    identifier: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    pairing_date: Option<DateTime<Utc>>,
    private_key: String,
    shared_secret: String,
    secondary_shared_secret: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct AccessoryKeys {
    pub identifier: String,
    pub master_key: String,
    pub shared_secret: String,
    pub secondary_shared_secret: String,
    pub paired_at: Option<DateTime<Utc>>,
}

/// Accessory import errors
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("Malformed accessory export: {0}")]
    Malformed(String),

    #[error("Missing accessory field: {0}")]
    MissingField(&'static str),

    #[error("Invalid key material in {field}: {reason}")]
    InvalidKey { field: &'static str, reason: String },

    #[error("Key {field} must be {expected} bytes, got {actual}")]
    KeyLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(private_key: &[u8]) -> String {
        serde_json::json!({
            "identifier": "6F1B2C3D-AAAA-4BBB-8CCC-0123456789AB",
            "name": "Backpack",
            "model": "AirTag1,1",
            "pairingDate": "2024-03-01T10:00:00Z",
            "privateKey": STANDARD.encode(private_key),
            "sharedSecret": STANDARD.encode([2u8; 32]),
            "secondarySharedSecret": STANDARD.encode([3u8; 32]),
        })
        .to_string()
    }

    #[test]
    fn parses_full_export() {
        let accessory = Accessory::from_export(&export(&[1u8; 28])).unwrap();

        assert_eq!(accessory.identifier(), "6F1B2C3D-AAAA-4BBB-8CCC-0123456789AB");
        assert_eq!(accessory.name(), "Backpack");
        assert_eq!(accessory.model(), Some("AirTag1,1"));
        assert!(accessory.paired_at().is_some());
    }

    #[test]
    fn master_key_is_trailing_bytes() {
        let mut key = vec![0xAAu8; 57];
        key[29..].copy_from_slice(&[9u8; 28]);

        let accessory = Accessory::from_export(&export(&key)).unwrap();

        assert_eq!(accessory.keys().master_key, STANDARD.encode([9u8; 28]));
    }

    #[test]
    fn name_falls_back_to_identifier() {
        let blob = serde_json::json!({
            "identifier": "tag-1",
            "privateKey": STANDARD.encode([1u8; 28]),
            "sharedSecret": STANDARD.encode([2u8; 32]),
            "secondarySharedSecret": STANDARD.encode([3u8; 32]),
        })
        .to_string();

        let accessory = Accessory::from_export(&blob).unwrap();

        assert_eq!(accessory.name(), "tag-1");
    }

    #[test]
    fn rejects_garbage() {
        let err = Accessory::from_export("<plist>nope</plist>").unwrap_err();
        assert!(matches!(err, ImportError::Malformed(_)));
    }

    #[test]
    fn rejects_short_private_key() {
        let err = Accessory::from_export(&export(&[1u8; 10])).unwrap_err();
        assert!(matches!(
            err,
            ImportError::KeyLength { field: "privateKey", actual: 10, .. }
        ));
    }

    #[test]
    fn rejects_blank_identifier() {
        let blob = export(&[1u8; 28]).replace("6F1B2C3D-AAAA-4BBB-8CCC-0123456789AB", " ");
        let err = Accessory::from_export(&blob).unwrap_err();
        assert!(matches!(err, ImportError::MissingField("identifier")));
    }

    #[test]
    fn debug_hides_keys() {
        let accessory = Accessory::from_export(&export(&[1u8; 28])).unwrap();
        let printed = format!("{:?}", accessory);

        assert!(printed.contains("Backpack"));
        assert!(!printed.contains("master_key"));
    }
}
