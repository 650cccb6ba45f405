//! Fingerprint → backend reference cache used to skip redundant uploads.
//!
//! Hits are authoritative: the orchestrator returns the cached reference
//! without touching any backend. Open content is keyed by its plain hash,
//! encrypted content by a blinded hash, so the two never collide.

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::crypto::Digest;
use crate::database::Database;
use crate::storage::{BackendKind, UploadResult};
use crate::visibility::Visibility;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("content index database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt content index row for {fingerprint}: {reason}")]
    Corrupt { fingerprint: String, reason: String },
}

/// Where a previously uploaded piece of content lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReference {
    pub backend: BackendKind,
    pub id: String,
    pub url: String,
    pub locator: Option<String>,
    pub visibility: Visibility,
    pub size: u64,
}

impl ContentReference {
    /// Turn a cached reference into the result of a skipped upload.
    pub fn into_result(self) -> UploadResult {
        UploadResult {
            backend: self.backend,
            id: self.id,
            url: self.url,
            locator: self.locator,
            size: self.size,
            visibility: self.visibility,
            deduplicated: true,
        }
    }
}

impl From<&UploadResult> for ContentReference {
    fn from(result: &UploadResult) -> Self {
        Self {
            backend: result.backend,
            id: result.id.clone(),
            url: result.url.clone(),
            locator: result.locator.clone(),
            visibility: result.visibility,
            size: result.size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContentIndex {
    db: Database,
}

impl ContentIndex {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn lookup(&self, fingerprint: &Digest) -> Result<Option<ContentReference>, IndexError> {
        let key = fingerprint.to_hex();
        let row = sqlx::query(
            r#"
            SELECT backend, reference_id, url, locator, visibility, size
            FROM content_index
            WHERE fingerprint = ?
            "#,
        )
        .bind(&key)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|r| reference_from_row(&key, &r)).transpose()
    }

    /// Record the reference for a fingerprint.
    ///
    /// The first reference stored for a fingerprint wins; returns whether this
    /// call inserted it.
    pub async fn store(
        &self,
        fingerprint: &Digest,
        reference: &ContentReference,
    ) -> Result<bool, IndexError> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_index (fingerprint, backend, reference_id, url, locator,
                                       visibility, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(fingerprint) DO NOTHING
            "#,
        )
        .bind(fingerprint.to_hex())
        .bind(reference.backend.as_str())
        .bind(&reference.id)
        .bind(&reference.url)
        .bind(&reference.locator)
        .bind(reference.visibility.as_str())
        .bind(reference.size as i64)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&*self.db)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Any reference recorded for backend id `id`.
    pub async fn find_by_reference(&self, id: &str) -> Result<Option<ContentReference>, IndexError> {
        let row = sqlx::query(
            r#"
            SELECT fingerprint, backend, reference_id, url, locator, visibility, size
            FROM content_index
            WHERE reference_id = ?
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|r| {
            let fingerprint: String = r.get("fingerprint");
            reference_from_row(&fingerprint, &r)
        })
        .transpose()
    }

    /// Drop every fingerprint pointing at `id`.
    pub async fn remove_reference(&self, id: &str) -> Result<u64, IndexError> {
        let result = sqlx::query("DELETE FROM content_index WHERE reference_id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64, IndexError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM content_index")
            .fetch_one(&*self.db)
            .await?;
        let count: i64 = row.get("count");
        Ok(count as u64)
    }
}

fn reference_from_row(fingerprint: &str, row: &SqliteRow) -> Result<ContentReference, IndexError> {
    let corrupt = |reason: String| IndexError::Corrupt {
        fingerprint: fingerprint.to_string(),
        reason,
    };

    let backend: String = row.get("backend");
    let visibility: String = row.get("visibility");
    let size: i64 = row.get("size");

    Ok(ContentReference {
        backend: backend
            .parse::<BackendKind>()
            .map_err(|e| corrupt(e.to_string()))?,
        id: row.get("reference_id"),
        url: row.get("url"),
        locator: row.get("locator"),
        visibility: visibility
            .parse::<Visibility>()
            .map_err(|e| corrupt(e.to_string()))?,
        size: size as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{blinded_hash, hash};

    async fn index() -> ContentIndex {
        ContentIndex::new(Database::in_memory().await.unwrap())
    }

    fn reference(id: &str, visibility: Visibility) -> ContentReference {
        ContentReference {
            backend: BackendKind::Node,
            id: id.to_string(),
            url: format!("http://127.0.0.1:8080/ipfs/{}", id),
            locator: None,
            visibility,
            size: 42,
        }
    }

    #[tokio::test]
    async fn test_lookup_miss_then_hit() {
        let index = index().await;
        let fingerprint = hash(b"hello");

        assert!(index.lookup(&fingerprint).await.unwrap().is_none());

        let stored = reference("bafy-1", Visibility::Public);
        assert!(index.store(&fingerprint, &stored).await.unwrap());
        assert_eq!(index.lookup(&fingerprint).await.unwrap(), Some(stored));
    }

    #[tokio::test]
    async fn test_first_reference_wins() {
        let index = index().await;
        let fingerprint = hash(b"hello");

        assert!(index
            .store(&fingerprint, &reference("first", Visibility::Public))
            .await
            .unwrap());
        assert!(!index
            .store(&fingerprint, &reference("second", Visibility::Public))
            .await
            .unwrap());

        let hit = index.lookup(&fingerprint).await.unwrap().unwrap();
        assert_eq!(hit.id, "first");
    }

    #[tokio::test]
    async fn test_blinded_fingerprints_do_not_collide() {
        let index = index().await;
        let open = hash(b"same bytes");
        let private = blinded_hash(b"same bytes", b"installation secret");

        index
            .store(&open, &reference("open-ref", Visibility::Public))
            .await
            .unwrap();

        assert!(index.lookup(&private).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_reference() {
        let index = index().await;
        index
            .store(&hash(b"a"), &reference("ref", Visibility::Public))
            .await
            .unwrap();
        index
            .store(&hash(b"b"), &reference("ref", Visibility::Public))
            .await
            .unwrap();
        index
            .store(&hash(b"c"), &reference("other", Visibility::Public))
            .await
            .unwrap();

        let found = index.find_by_reference("ref").await.unwrap().unwrap();
        assert_eq!(found.id, "ref");

        assert_eq!(index.remove_reference("ref").await.unwrap(), 2);
        assert!(index.find_by_reference("ref").await.unwrap().is_none());
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hit_becomes_deduplicated_result() {
        let mut stored = reference("swarm-ref", Visibility::Private);
        stored.backend = BackendKind::Swarm;
        stored.locator = Some("magnet:?xt=urn:blake3:abc".into());

        let result = stored.clone().into_result();
        assert!(result.deduplicated);
        assert_eq!(result.locator, stored.locator);
        assert_eq!(result.visibility, Visibility::Private);
    }
}
