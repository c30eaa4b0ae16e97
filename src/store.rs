//! On-disk persistence of a built index.
//!
//! Each build owns one directory (its *location*) containing a single
//! SQLite file, [`INDEX_FILE`]. The file is written once, inside one
//! transaction, and then verified against the in-memory index: row counts
//! must match and every stored vector must decode to the vector it was
//! written from. Locations are never reopened for writing: a rebuild always gets a
//! fresh one.
//!
//! Tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `chunks` | position, unit index, character offset, text, SHA-256 |
//! | `embeddings` | position, dims, little-endian `f32` BLOB |
//! | `index_meta` | key/value build metadata (dataset, model, counts) |

use chrono::{DateTime, Utc};
use datamat_core::index::VectorIndex;
use datamat_core::vector::{blob_to_vec, vec_to_blob};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::db;
use crate::error::{PipelineError, Result};
use crate::migrate;

/// File name of the index database inside a build location.
pub const INDEX_FILE: &str = "index.sqlite";

/// Summary of the active index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStats {
    pub dataset: PathBuf,
    pub dataset_modified: DateTime<Utc>,
    pub rows: usize,
    pub chunks: usize,
    pub model: String,
    pub dims: usize,
    pub location: PathBuf,
    pub built_at: DateTime<Utc>,
}

/// Row counts and metadata read back from a persisted index.
#[derive(Debug, Clone, Default)]
pub struct StoredIndex {
    pub chunks: i64,
    pub embeddings: i64,
    pub meta: BTreeMap<String, String>,
}

/// Write `index` to `<location>/index.sqlite` and verify it.
pub async fn persist(location: &Path, index: &VectorIndex, stats: &IndexStats) -> Result<()> {
    let pool = db::connect(&location.join(INDEX_FILE)).await?;
    migrate::create_schema(&pool).await?;

    let mut tx = pool.begin().await?;

    for (chunk, vector) in index.entries() {
        sqlx::query(
            "INSERT INTO chunks (position, unit_index, char_offset, text, hash) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(chunk.position as i64)
        .bind(chunk.unit_index as i64)
        .bind(chunk.offset as i64)
        .bind(&chunk.text)
        .bind(&chunk.hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO embeddings (position, dims, embedding) VALUES (?, ?, ?)")
            .bind(chunk.position as i64)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await?;
    }

    let meta = [
        ("dataset", stats.dataset.display().to_string()),
        ("dataset_modified", stats.dataset_modified.to_rfc3339()),
        ("rows", stats.rows.to_string()),
        ("chunks", stats.chunks.to_string()),
        ("model", stats.model.clone()),
        ("dims", stats.dims.to_string()),
        ("built_at", stats.built_at.to_rfc3339()),
    ];
    for (key, value) in meta {
        sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    let verified = verify(&pool, location, index).await;
    pool.close().await;
    verified?;

    tracing::debug!(location = %location.display(), rows = index.len(), "index persisted");
    Ok(())
}

async fn verify(pool: &sqlx::SqlitePool, location: &Path, index: &VectorIndex) -> Result<()> {
    let stored = read_back(pool).await?;
    let expected = index.len() as i64;
    if stored.chunks != expected || stored.embeddings != expected {
        return Err(PipelineError::index(format!(
            "verification failed at {}: expected {} rows, found {} chunks and {} embeddings",
            location.display(),
            expected,
            stored.chunks,
            stored.embeddings
        )));
    }

    let rows = sqlx::query("SELECT position, dims, embedding FROM embeddings ORDER BY position")
        .fetch_all(pool)
        .await?;
    for ((chunk, vector), row) in index.entries().zip(rows.iter()) {
        let position: i64 = row.get("position");
        let dims: i64 = row.get("dims");
        let decoded = blob_to_vec(&row.get::<Vec<u8>, _>("embedding"));
        if position != chunk.position as i64 || decoded.len() as i64 != dims || decoded != vector {
            return Err(PipelineError::index(format!(
                "verification failed at {}: stored vector for chunk {} does not match",
                location.display(),
                chunk.position
            )));
        }
    }
    Ok(())
}

/// Read counts and metadata from a persisted location.
pub async fn inspect(location: &Path) -> Result<StoredIndex> {
    let path = location.join(INDEX_FILE);
    if !path.is_file() {
        return Err(PipelineError::index(format!(
            "no index at {}",
            location.display()
        )));
    }
    let pool = db::connect(&path).await?;
    let stored = read_back(&pool).await;
    pool.close().await;
    stored
}

/// The most recently modified build location under `root` holding an index file.
pub fn latest_location(root: &Path) -> Option<PathBuf> {
    std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.join(INDEX_FILE).is_file())
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max()
        .map(|(_, path)| path)
}

async fn read_back(pool: &sqlx::SqlitePool) -> Result<StoredIndex> {
    let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
        .fetch_one(pool)
        .await?;
    let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
        .fetch_one(pool)
        .await?;

    let rows = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?;
    let meta = rows
        .iter()
        .map(|row| (row.get::<String, _>("key"), row.get::<String, _>("value")))
        .collect();

    Ok(StoredIndex {
        chunks,
        embeddings,
        meta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use datamat_core::models::Chunk;
    use tempfile::TempDir;

    fn sample_index() -> VectorIndex {
        let chunks = (0..3)
            .map(|i| Chunk {
                position: i,
                unit_index: i,
                offset: 0,
                text: format!("row: {}", i),
                hash: format!("h{}", i),
            })
            .collect();
        VectorIndex::build(chunks, vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]]).unwrap()
    }

    fn sample_stats(location: &Path) -> IndexStats {
        IndexStats {
            dataset: PathBuf::from("datasets/a.csv"),
            dataset_modified: Utc::now(),
            rows: 3,
            chunks: 3,
            model: "test-model".to_string(),
            dims: 2,
            location: location.to_path_buf(),
            built_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_then_inspect() {
        let tmp = TempDir::new().unwrap();
        let location = tmp.path().join("build-1");
        let index = sample_index();
        persist(&location, &index, &sample_stats(&location))
            .await
            .unwrap();

        let stored = inspect(&location).await.unwrap();
        assert_eq!(stored.chunks, 3);
        assert_eq!(stored.embeddings, 3);
        assert_eq!(stored.meta.get("model").map(String::as_str), Some("test-model"));
        assert_eq!(stored.meta.get("dims").map(String::as_str), Some("2"));
    }

    #[tokio::test]
    async fn test_persist_into_used_location_fails() {
        let tmp = TempDir::new().unwrap();
        let location = tmp.path().join("build-1");
        let index = sample_index();
        let stats = sample_stats(&location);
        persist(&location, &index, &stats).await.unwrap();
        // Primary keys collide; a location is never written twice.
        assert!(persist(&location, &index, &stats).await.is_err());
        assert_eq!(inspect(&location).await.unwrap().chunks, 3);
    }

    #[tokio::test]
    async fn test_latest_location_skips_dirs_without_index() {
        let tmp = TempDir::new().unwrap();
        assert!(latest_location(tmp.path()).is_none());

        let location = tmp.path().join("build-a");
        persist(&location, &sample_index(), &sample_stats(&location))
            .await
            .unwrap();
        std::fs::create_dir_all(tmp.path().join("build-empty")).unwrap();
        assert_eq!(latest_location(tmp.path()), Some(location));
    }

    #[tokio::test]
    async fn test_persist_into_location_with_url_characters() {
        let tmp = TempDir::new().unwrap();
        for name in ["q?mark", "pct%41dir", "hash#dir"] {
            let location = tmp.path().join(name);
            persist(&location, &sample_index(), &sample_stats(&location))
                .await
                .unwrap_or_else(|e| panic!("persist into {} failed: {}", name, e));
            assert!(location.join(INDEX_FILE).is_file());
            assert_eq!(inspect(&location).await.unwrap().embeddings, 3);
        }
    }

    #[tokio::test]
    async fn test_stored_vectors_decode_to_originals() {
        let tmp = TempDir::new().unwrap();
        let location = tmp.path().join("build-1");
        let index = sample_index();
        persist(&location, &index, &sample_stats(&location))
            .await
            .unwrap();

        let pool = db::connect(&location.join(INDEX_FILE)).await.unwrap();
        let blobs: Vec<Vec<u8>> =
            sqlx::query_scalar("SELECT embedding FROM embeddings ORDER BY position")
                .fetch_all(&pool)
                .await
                .unwrap();
        pool.close().await;
        let decoded: Vec<Vec<f32>> = blobs.iter().map(|b| blob_to_vec(b)).collect();
        let original: Vec<Vec<f32>> = index.entries().map(|(_, v)| v.to_vec()).collect();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn test_inspect_missing_location() {
        let tmp = TempDir::new().unwrap();
        let err = inspect(&tmp.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, PipelineError::Index { .. }));
    }
}
