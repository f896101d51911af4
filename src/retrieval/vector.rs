//! Guideline corpus store: `SQLite` rows with embedded vector ranking.
//!
//! Passages live in a single table alongside their embedding BLOBs. Search
//! embeds the query with a deterministic hash-projection embedder and ranks
//! by cosine similarity. `rusqlite::Connection` is `!Send`, so every call
//! opens the database inside `spawn_blocking`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::{Value, json};
use unicode_segmentation::UnicodeSegmentation;

use super::{Health, RetrievalClient, ToolResult};
use crate::error::RetrievalError;

/// Embedding dimensionality of the hash projection.
const EMBED_DIM: usize = 256;

/// Default number of passages returned by a search.
const DEFAULT_TOP_K: usize = 5;

/// Minimum cosine similarity for a passage to be returned.
const SIMILARITY_THRESHOLD: f32 = 0.15;

/// A guideline passage to index.
#[derive(Debug, Clone)]
pub struct GuidelinePassage {
    /// Title of the guideline document.
    pub title: String,
    /// Section heading within the document.
    pub section: String,
    /// Passage text.
    pub content: String,
    /// Canonical URL of the document, if any.
    pub url: Option<String>,
}

/// `SQLite`-backed guideline store with embedded vector search.
pub struct GuidelineStore {
    path: PathBuf,
    deadline: Duration,
}

impl GuidelineStore {
    /// Creates a store over the database at `path`, initializing the schema
    /// if the file does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Transport`] if the database cannot be
    /// opened or the schema cannot be created.
    pub fn open(path: impl Into<PathBuf>, deadline: Duration) -> Result<Self, RetrievalError> {
        let path = path.into();
        let conn = open_connection(&path)?;
        init_schema(&conn)?;
        Ok(Self { path, deadline })
    }

    /// Inserts passages, embedding each one.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Transport`] on database failures.
    pub async fn insert(&self, passages: Vec<GuidelinePassage>) -> Result<(), RetrievalError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            for p in passages {
                let embedding = embed(&format!("{} {} {}", p.title, p.section, p.content));
                conn.execute(
                    "INSERT INTO guidelines (title, section, content, url, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![p.title, p.section, p.content, p.url, embedding_to_blob(&embedding)],
                )
                .map_err(|e| RetrievalError::Transport {
                    message: format!("guideline insert failed: {e}"),
                })?;
            }
            Ok(())
        })
        .await
        .map_err(|e| RetrievalError::Transport {
            message: format!("task join failed: {e}"),
        })?
    }

    /// Runs a similarity search on the blocking pool under the deadline.
    async fn search(&self, term: String, top_k: usize) -> Result<Vec<Value>, RetrievalError> {
        let path = self.path.clone();
        let work = tokio::task::spawn_blocking(move || search_blocking(&path, &term, top_k));

        match tokio::time::timeout(self.deadline, work).await {
            Ok(joined) => joined.map_err(|e| RetrievalError::Transport {
                message: format!("task join failed: {e}"),
            })?,
            Err(_) => Err(RetrievalError::Timeout),
        }
    }
}

impl std::fmt::Debug for GuidelineStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuidelineStore")
            .field("path", &self.path)
            .finish()
    }
}

#[async_trait]
impl RetrievalClient for GuidelineStore {
    fn name(&self) -> &'static str {
        "guideline"
    }

    async fn call_tool(&self, tool: &str, params: Value) -> ToolResult {
        if tool != "search" {
            return ToolResult::from_error(&RetrievalError::Rejected {
                message: format!("unknown guideline tool: {tool}"),
            });
        }

        let term = params
            .get("term")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if term.is_empty() {
            return ToolResult::from_error(&RetrievalError::Rejected {
                message: "guideline search requires a term".to_string(),
            });
        }
        let top_k = params
            .get("top_k")
            .and_then(Value::as_u64)
            .map_or(DEFAULT_TOP_K, |n| n as usize);

        match self.search(term, top_k).await {
            Ok(records) => ToolResult::from_records(records),
            Err(err) => {
                tracing::warn!(tool, error = %err, "guideline search failed");
                ToolResult::from_error(&err)
            }
        }
    }

    async fn health_check(&self) -> Health {
        let path = self.path.clone();
        let probe = tokio::task::spawn_blocking(move || {
            let conn = open_connection(&path)?;
            conn.query_row("SELECT COUNT(*) FROM guidelines", [], |row| {
                row.get::<_, i64>(0)
            })
            .map_err(|e| RetrievalError::Transport {
                message: e.to_string(),
            })
        })
        .await;

        match probe {
            Ok(Ok(_)) => Health::Available,
            Ok(Err(_)) | Err(_) => Health::Unavailable,
        }
    }
}

fn open_connection(path: &Path) -> Result<Connection, RetrievalError> {
    Connection::open(path).map_err(|e| RetrievalError::Transport {
        message: format!("failed to open guideline store: {e}"),
    })
}

fn init_schema(conn: &Connection) -> Result<(), RetrievalError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS guidelines (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            title     TEXT NOT NULL,
            section   TEXT NOT NULL,
            content   TEXT NOT NULL,
            url       TEXT,
            embedding BLOB NOT NULL
        );",
    )
    .map_err(|e| RetrievalError::Transport {
        message: format!("failed to create guideline schema: {e}"),
    })
}

fn search_blocking(path: &Path, term: &str, top_k: usize) -> Result<Vec<Value>, RetrievalError> {
    let conn = open_connection(path)?;
    let query_embedding = embed(term);

    let mut stmt = conn
        .prepare("SELECT id, title, section, content, url, embedding FROM guidelines")
        .map_err(|e| RetrievalError::Transport {
            message: format!("guideline query failed: {e}"),
        })?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Vec<u8>>(5)?,
            ))
        })
        .map_err(|e| RetrievalError::Transport {
            message: format!("guideline query failed: {e}"),
        })?;

    let mut scored: Vec<(f32, Value)> = Vec::new();
    for row in rows {
        let (id, title, section, content, url, blob) = row.map_err(|e| {
            RetrievalError::Transport {
                message: format!("guideline row failed: {e}"),
            }
        })?;
        let embedding = blob_to_embedding(&blob);
        let score = cosine(&query_embedding, &embedding);
        if score < SIMILARITY_THRESHOLD {
            continue;
        }
        scored.push((
            score,
            json!({
                "document_id": id.to_string(),
                "title": title,
                "section": section,
                "content": content,
                "url": url,
                "score": score,
            }),
        ));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    Ok(scored.into_iter().map(|(_, v)| v).collect())
}

/// Embeds text as a hash projection over lower-cased words.
///
/// Deterministic and vocabulary-free: each word hashes into one of
/// [`EMBED_DIM`] buckets with a sign derived from a second hash, and the
/// result is L2-normalized. Crude next to a learned model, but stable,
/// offline, and good enough to rank a few thousand passages.
fn embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBED_DIM];

    for word in text.unicode_words() {
        let token = word.to_lowercase();
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h % EMBED_DIM as u64) as usize;
        let sign = if (h >> 32) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    // Embeddings are already normalized, so the dot product is the cosine.
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::Diagnostic;

    async fn store_with(passages: Vec<GuidelinePassage>) -> (tempfile::TempDir, GuidelineStore) {
        let dir = tempfile::tempdir().unwrap_or_else(|_| unreachable!());
        let store = GuidelineStore::open(dir.path().join("guidelines.db"), Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!());
        store
            .insert(passages)
            .await
            .unwrap_or_else(|_| unreachable!());
        (dir, store)
    }

    fn passage(title: &str, content: &str) -> GuidelinePassage {
        GuidelinePassage {
            title: title.to_string(),
            section: "1".to_string(),
            content: content.to_string(),
            url: Some(format!("https://guidelines.example/{title}")),
        }
    }

    #[test]
    fn test_embed_deterministic_and_normalized() {
        let a = embed("hypertenze doporučené postupy");
        let b = embed("hypertenze doporučené postupy");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_embed_empty_is_zero() {
        let v = embed("");
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_blob_roundtrip() {
        let embedding = embed("test vector roundtrip");
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[tokio::test]
    async fn test_search_ranks_matching_passage_first() {
        let (_dir, store) = store_with(vec![
            passage("Hypertenze", "Doporučené postupy pro léčbu hypertenze u dospělých"),
            passage("Diabetes", "Screening diabetu druhého typu v primární péči"),
        ])
        .await;

        let result = store
            .call_tool("search", json!({"term": "léčba hypertenze", "top_k": 1}))
            .await;
        assert_eq!(result.diagnostic, Diagnostic::Ok);
        assert_eq!(result.records.len(), 1);
        assert_eq!(result.records[0]["title"], "Hypertenze");
    }

    #[tokio::test]
    async fn test_search_without_term_rejected() {
        let (_dir, store) = store_with(vec![]).await;
        let result = store.call_tool("search", json!({})).await;
        assert_eq!(result.diagnostic, Diagnostic::Permanent);
    }

    #[tokio::test]
    async fn test_health_available_after_open() {
        let (_dir, store) = store_with(vec![]).await;
        assert_eq!(store.health_check().await, Health::Available);
    }
}
