//! Versioned JSON backup format for the keyring.
//!
//! ```json
//! { "version": 1, "keys": [ { "fileId": "...", "key": "<base64>", "nonce": "<base64>",
//!   "salt": "<base64>", "fileName": "...", "mimeType": "...", "createdAt": 1700000000000,
//!   "ownerId": "...", "isPasswordProtected": false } ] }
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::{KeyringEntry, KeyringError};
use crate::crypto::{Nonce, Salt, Secret};

/// The only backup version this build reads and writes
pub const BACKUP_VERSION: u32 = 1;

/// Top-level backup document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeyringBackup {
    pub version: u32,
    pub keys: Vec<BackupEntry>,
}

/// Persisted shape of one keyring entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BackupEntry {
    pub file_id: String,
    /// Base64 key bytes; empty for password protected entries
    pub key: String,
    pub nonce: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    pub file_name: String,
    pub mime_type: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    pub is_password_protected: bool,
}

impl From<&KeyringEntry> for BackupEntry {
    fn from(entry: &KeyringEntry) -> Self {
        Self {
            file_id: entry.file_id.clone(),
            key: entry
                .key
                .as_ref()
                .map(|k| STANDARD.encode(k.bytes()))
                .unwrap_or_default(),
            nonce: STANDARD.encode(entry.nonce.bytes()),
            salt: entry.salt.as_ref().map(|s| STANDARD.encode(s.bytes())),
            file_name: entry.file_name.clone(),
            mime_type: entry.mime_type.clone(),
            created_at: entry.created_at,
            owner_id: entry.owner_id.clone(),
            is_password_protected: entry.is_password_protected,
        }
    }
}

impl TryFrom<BackupEntry> for KeyringEntry {
    type Error = KeyringError;

    fn try_from(raw: BackupEntry) -> Result<Self, Self::Error> {
        let invalid = |reason: String| KeyringError::ImportFormat(format!("{}: {}", raw.file_id, reason));

        if raw.file_id.trim().is_empty() {
            return Err(KeyringError::ImportFormat("entry with empty fileId".into()));
        }

        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| invalid(format!("{} is not valid base64: {}", field, e)))
        };

        let nonce = Nonce::from_slice(&decode("nonce", &raw.nonce)?)
            .map_err(|e| invalid(e.to_string()))?;

        let (key, salt) = if raw.is_password_protected {
            let salt = raw
                .salt
                .as_deref()
                .ok_or_else(|| invalid("password protected entry without salt".into()))?;
            let salt = Salt::from_slice(&decode("salt", salt)?).map_err(|e| invalid(e.to_string()))?;
            if !raw.key.is_empty() {
                return Err(invalid("password protected entry must not carry a key".into()));
            }
            (None, Some(salt))
        } else {
            if raw.salt.is_some() {
                return Err(invalid("salt present on an entry without password".into()));
            }
            let key = Secret::from_slice(&decode("key", &raw.key)?)
                .map_err(|e| invalid(e.to_string()))?;
            (Some(key), None)
        };

        Ok(KeyringEntry {
            file_id: raw.file_id,
            key,
            nonce,
            salt,
            file_name: raw.file_name,
            mime_type: raw.mime_type,
            created_at: raw.created_at,
            owner_id: raw.owner_id,
            is_password_protected: raw.is_password_protected,
        })
    }
}

/// Serialize entries into a backup document.
pub fn encode_backup(entries: &[KeyringEntry]) -> Result<String, KeyringError> {
    let backup = KeyringBackup {
        version: BACKUP_VERSION,
        keys: entries.iter().map(BackupEntry::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&backup)?)
}

/// Parse and validate a backup document.
///
/// Either every entry is well formed and the full list is returned, or the
/// whole document is rejected.
pub fn decode_backup(json: &str) -> Result<Vec<KeyringEntry>, KeyringError> {
    let backup: KeyringBackup =
        serde_json::from_str(json).map_err(|e| KeyringError::ImportFormat(e.to_string()))?;

    if backup.version != BACKUP_VERSION {
        return Err(KeyringError::ImportFormat(format!(
            "unsupported backup version {}",
            backup.version
        )));
    }

    backup
        .keys
        .into_iter()
        .map(KeyringEntry::try_from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_entry(file_id: &str) -> KeyringEntry {
        KeyringEntry {
            file_id: file_id.to_string(),
            key: Some(Secret::from([5u8; 32])),
            nonce: Nonce::from([6u8; 12]),
            salt: None,
            file_name: "photo.jpg".into(),
            mime_type: "image/jpeg".into(),
            created_at: 1_700_000_000_000,
            owner_id: Some("alice".into()),
            is_password_protected: false,
        }
    }

    #[test]
    fn test_persisted_shape() {
        let json = encode_backup(&[random_entry("bafy-1")]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["version"], 1);
        let key = &value["keys"][0];
        assert_eq!(key["fileId"], "bafy-1");
        assert_eq!(key["fileName"], "photo.jpg");
        assert_eq!(key["mimeType"], "image/jpeg");
        assert_eq!(key["ownerId"], "alice");
        assert_eq!(key["isPasswordProtected"], false);
        assert!(key.get("salt").is_none());
        assert_eq!(
            STANDARD.decode(key["key"].as_str().unwrap()).unwrap(),
            vec![5u8; 32]
        );
    }

    #[test]
    fn test_missing_version_rejected() {
        let result = decode_backup(r#"{"keys": []}"#);
        assert!(matches!(result, Err(KeyringError::ImportFormat(_))));
    }

    #[test]
    fn test_wrong_version_rejected() {
        let result = decode_backup(r#"{"version": 2, "keys": []}"#);
        assert!(matches!(result, Err(KeyringError::ImportFormat(_))));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result = decode_backup(r#"{"version": 1, "keys": [], "extra": 1}"#);
        assert!(matches!(result, Err(KeyringError::ImportFormat(_))));

        let mut entry = serde_json::to_value(BackupEntry::from(&random_entry("a"))).unwrap();
        entry["shareWith"] = "bob".into();
        let json = serde_json::json!({ "version": 1, "keys": [entry] }).to_string();
        assert!(matches!(
            decode_backup(&json),
            Err(KeyringError::ImportFormat(_))
        ));
    }

    #[test]
    fn test_keys_must_be_array() {
        let result = decode_backup(r#"{"version": 1, "keys": {}}"#);
        assert!(matches!(result, Err(KeyringError::ImportFormat(_))));
    }

    #[test]
    fn test_bad_entry_rejects_whole_document() {
        let good = BackupEntry::from(&random_entry("good"));
        let mut bad = BackupEntry::from(&random_entry("bad"));
        bad.nonce = STANDARD.encode([1u8; 5]);

        let json = serde_json::to_string(&KeyringBackup {
            version: 1,
            keys: vec![good, bad],
        })
        .unwrap();

        assert!(matches!(
            decode_backup(&json),
            Err(KeyringError::ImportFormat(_))
        ));
    }

    #[test]
    fn test_password_entry_requires_salt() {
        let mut raw = BackupEntry::from(&random_entry("pw"));
        raw.is_password_protected = true;
        raw.key = String::new();

        assert!(KeyringEntry::try_from(raw.clone()).is_err());

        raw.salt = Some(STANDARD.encode([7u8; 16]));
        let entry = KeyringEntry::try_from(raw).unwrap();
        assert!(entry.key.is_none());
        assert_eq!(entry.salt.unwrap(), Salt::from([7u8; 16]));
    }
}
