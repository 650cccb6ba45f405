//! Local custody of per-file key material.
//!
//! Every encrypted upload leaves one [`KeyringEntry`] behind, keyed by the
//! backend file id. Entries can be linked to an owner; an owned entry is only
//! handed back to that owner or to an unscoped caller.

mod backup;

use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::crypto::{Algorithm, KeyMaterial, Nonce, Salt, Secret};
use crate::database::Database;

pub use backup::{decode_backup, encode_backup, BackupEntry, KeyringBackup, BACKUP_VERSION};

#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("keyring database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("no keyring entry for file {0}")]
    NotFound(String),
    #[error("keyring entry for file {0} already exists")]
    AlreadyExists(String),
    #[error("invalid keyring entry for file {file_id}: {reason}")]
    InvalidEntry { file_id: String, reason: String },
    #[error("malformed keyring backup: {0}")]
    ImportFormat(String),
    #[error("failed to serialize keyring backup: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key material and file metadata for one encrypted file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyringEntry {
    pub file_id: String,
    /// `None` for password protected entries
    pub key: Option<Secret>,
    pub nonce: Nonce,
    pub salt: Option<Salt>,
    pub file_name: String,
    pub mime_type: String,
    /// Unix milliseconds
    pub created_at: i64,
    pub owner_id: Option<String>,
    pub is_password_protected: bool,
}

impl KeyringEntry {
    pub fn material(&self) -> KeyMaterial {
        KeyMaterial {
            algorithm: Algorithm::Aes256Gcm,
            key: self.key.clone(),
            nonce: self.nonce,
            salt: self.salt,
        }
    }

    fn visible_to(&self, owner: Option<&str>) -> bool {
        match (self.owner_id.as_deref(), owner) {
            (Some(entry_owner), Some(caller)) => entry_owner == caller,
            _ => true,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<Self, KeyringError> {
        let file_id: String = row.get("file_id");
        let invalid = |reason: String| KeyringError::InvalidEntry {
            file_id: file_id.clone(),
            reason,
        };

        let key_bytes: Vec<u8> = row.get("key");
        let nonce_bytes: Vec<u8> = row.get("nonce");
        let salt_bytes: Option<Vec<u8>> = row.get("salt");
        let is_password_protected: bool = row.get("is_password_protected");

        let nonce = Nonce::from_slice(&nonce_bytes).map_err(|e| invalid(e.to_string()))?;
        let salt = salt_bytes
            .map(|s| Salt::from_slice(&s))
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;
        let key = if key_bytes.is_empty() {
            None
        } else {
            Some(Secret::from_slice(&key_bytes).map_err(|e| invalid(e.to_string()))?)
        };

        Ok(Self {
            file_id: file_id.clone(),
            key,
            nonce,
            salt,
            file_name: row.get("file_name"),
            mime_type: row.get("mime_type"),
            created_at: row.get("created_at"),
            owner_id: row.get("owner_id"),
            is_password_protected,
        })
    }
}

/// Entry counts reported by [`Keyring::get_stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyringStats {
    pub total: u64,
    pub private: u64,
    pub password_protected: u64,
}

const SELECT_ENTRY: &str = r#"
    SELECT file_id, key, nonce, salt, file_name, mime_type, created_at, owner_id,
           is_password_protected
    FROM keyring
"#;

#[derive(Debug, Clone)]
pub struct Keyring {
    db: Database,
}

impl Keyring {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record the key material produced by encrypting `file_id`.
    ///
    /// Entries are immutable once written: storing again under the same id
    /// fails with [`KeyringError::AlreadyExists`] and leaves the entry alone.
    pub async fn store_key(
        &self,
        file_id: &str,
        material: &KeyMaterial,
        file_name: &str,
        mime_type: &str,
    ) -> Result<(), KeyringError> {
        let entry = KeyringEntry {
            file_id: file_id.to_string(),
            key: material.key.clone(),
            nonce: material.nonce,
            salt: material.salt,
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            created_at: chrono::Utc::now().timestamp_millis(),
            owner_id: None,
            is_password_protected: material.is_password_protected(),
        };
        validate(&entry)?;

        let result = sqlx::query(
            r#"
            INSERT INTO keyring (file_id, key, nonce, salt, file_name, mime_type, created_at,
                                 owner_id, is_password_protected)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT(file_id) DO NOTHING
            "#,
        )
        .bind(&entry.file_id)
        .bind(key_bytes(&entry))
        .bind(entry.nonce.bytes())
        .bind(entry.salt.as_ref().map(|s| s.bytes().to_vec()))
        .bind(&entry.file_name)
        .bind(&entry.mime_type)
        .bind(entry.created_at)
        .bind(entry.is_password_protected)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KeyringError::AlreadyExists(entry.file_id));
        }

        tracing::debug!(file_id, password = entry.is_password_protected, "stored key");
        Ok(())
    }

    /// Fetch the entry for `file_id`, honoring owner scoping.
    ///
    /// Returns `None` when the entry does not exist or is owned by someone
    /// other than `owner`.
    pub async fn get_key(
        &self,
        file_id: &str,
        owner: Option<&str>,
    ) -> Result<Option<KeyringEntry>, KeyringError> {
        let row = sqlx::query(&format!("{} WHERE file_id = ?", SELECT_ENTRY))
            .bind(file_id)
            .fetch_optional(&*self.db)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let entry = KeyringEntry::from_row(&row)?;
        if !entry.visible_to(owner) {
            tracing::debug!(file_id, "keyring entry withheld from non-owner");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    pub async fn has_key(&self, file_id: &str) -> Result<bool, KeyringError> {
        let row = sqlx::query("SELECT 1 FROM keyring WHERE file_id = ?")
            .bind(file_id)
            .fetch_optional(&*self.db)
            .await?;
        Ok(row.is_some())
    }

    /// Remove the entry; returns whether one existed.
    pub async fn delete_key(&self, file_id: &str) -> Result<bool, KeyringError> {
        let result = sqlx::query("DELETE FROM keyring WHERE file_id = ?")
            .bind(file_id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Attach an owner to an existing entry.
    pub async fn link_file_to_user(&self, file_id: &str, owner: &str) -> Result<(), KeyringError> {
        let result = sqlx::query("UPDATE keyring SET owner_id = ? WHERE file_id = ?")
            .bind(owner)
            .bind(file_id)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(KeyringError::NotFound(file_id.to_string()));
        }
        Ok(())
    }

    pub async fn get_keys_by_owner(&self, owner: &str) -> Result<Vec<KeyringEntry>, KeyringError> {
        let rows = sqlx::query(&format!(
            "{} WHERE owner_id = ? ORDER BY created_at, file_id",
            SELECT_ENTRY
        ))
        .bind(owner)
        .fetch_all(&*self.db)
        .await?;

        rows.iter().map(KeyringEntry::from_row).collect()
    }

    pub async fn list_keys(&self) -> Result<Vec<KeyringEntry>, KeyringError> {
        let rows = sqlx::query(&format!("{} ORDER BY created_at, file_id", SELECT_ENTRY))
            .fetch_all(&*self.db)
            .await?;

        rows.iter().map(KeyringEntry::from_row).collect()
    }

    /// Serialize every entry into a version 1 backup document.
    pub async fn export_keyring(&self) -> Result<String, KeyringError> {
        let entries = self.list_keys().await?;
        encode_backup(&entries)
    }

    /// Restore entries from a backup document.
    ///
    /// The document is validated in full before anything is written, and all
    /// entries are written in one transaction. Existing entries with the same
    /// file id are replaced.
    pub async fn import_keyring(&self, json: &str) -> Result<usize, KeyringError> {
        let entries = decode_backup(json)?;

        let mut tx = self.db.begin().await?;
        for entry in &entries {
            sqlx::query(
                r#"
                INSERT INTO keyring (file_id, key, nonce, salt, file_name, mime_type, created_at,
                                     owner_id, is_password_protected)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(file_id) DO UPDATE SET
                    key = excluded.key,
                    nonce = excluded.nonce,
                    salt = excluded.salt,
                    file_name = excluded.file_name,
                    mime_type = excluded.mime_type,
                    created_at = excluded.created_at,
                    owner_id = excluded.owner_id,
                    is_password_protected = excluded.is_password_protected
                "#,
            )
            .bind(&entry.file_id)
            .bind(key_bytes(entry))
            .bind(entry.nonce.bytes())
            .bind(entry.salt.as_ref().map(|s| s.bytes().to_vec()))
            .bind(&entry.file_name)
            .bind(&entry.mime_type)
            .bind(entry.created_at)
            .bind(&entry.owner_id)
            .bind(entry.is_password_protected)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::info!(count = entries.len(), "imported keyring backup");
        Ok(entries.len())
    }

    pub async fn get_stats(&self) -> Result<KeyringStats, KeyringError> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(SUM(CASE WHEN is_password_protected = 0 THEN 1 ELSE 0 END), 0) AS private,
                   COALESCE(SUM(CASE WHEN is_password_protected = 1 THEN 1 ELSE 0 END), 0) AS password
            FROM keyring
            "#,
        )
        .fetch_one(&*self.db)
        .await?;

        let total: i64 = row.get("total");
        let private: i64 = row.get("private");
        let password: i64 = row.get("password");
        Ok(KeyringStats {
            total: total as u64,
            private: private as u64,
            password_protected: password as u64,
        })
    }
}

fn key_bytes(entry: &KeyringEntry) -> Vec<u8> {
    entry
        .key
        .as_ref()
        .map(|k| k.bytes().to_vec())
        .unwrap_or_default()
}

fn validate(entry: &KeyringEntry) -> Result<(), KeyringError> {
    let reason = match (&entry.key, &entry.salt) {
        (Some(_), Some(_)) => "entry carries both a key and a salt",
        (None, None) => "entry carries neither a key nor a salt",
        _ => return Ok(()),
    };
    Err(KeyringError::InvalidEntry {
        file_id: entry.file_id.clone(),
        reason: reason.to_string(),
    })
}
