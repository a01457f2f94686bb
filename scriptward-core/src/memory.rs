//! Persisted note store with pluggable recall ranking.

use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use scriptward_config::RecallIndexKind;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::MemoryError;

const DEFAULT_CATEGORY: &str = "general";
const DEFAULT_SOURCE: &str = "local";
const HASHED_DIMENSIONS: usize = 256;

/// Where a record came from, when the writer said so.
///
/// Older or hand-edited files may carry anything in `meta`; those values are
/// kept verbatim as [`RecordMeta::Unrecognized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordMeta {
    Tagged {
        source: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    Unrecognized(serde_json::Value),
}

impl RecordMeta {
    fn missing() -> Self {
        Self::Unrecognized(serde_json::Value::Null)
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Tagged {
                conversation_id, ..
            } => conversation_id.as_deref(),
            Self::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for RecordMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tagged {
                source,
                role,
                conversation_id,
            } => {
                write!(f, "{source}/{}", role.as_deref().unwrap_or("?"))?;
                if let Some(conversation) = conversation_id {
                    write!(f, " in {conversation}")?;
                }
                Ok(())
            }
            Self::Unrecognized(_) => f.write_str("unknown/?"),
        }
    }
}

/// Writer-supplied provenance for [`MemoryStore::remember`].
///
/// Blank values count as absent; the source defaults to `local`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordOrigin {
    source: Option<String>,
    role: Option<String>,
    conversation: Option<String>,
}

impl RecordOrigin {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = non_blank(source.into());
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = non_blank(role.into());
        self
    }

    pub fn conversation(mut self, conversation: impl Into<String>) -> Self {
        self.conversation = non_blank(conversation.into());
        self
    }

    fn into_meta(self) -> RecordMeta {
        RecordMeta::Tagged {
            source: self.source.unwrap_or_else(|| DEFAULT_SOURCE.to_owned()),
            role: self.role,
            conversation_id: self.conversation,
        }
    }
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
    #[serde(default = "RecordMeta::missing")]
    pub meta: RecordMeta,
}

impl fmt::Display for MemoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}, {})",
            self.category,
            self.content,
            self.meta,
            self.created_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// A recalled record together with its relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f64,
}

/// Relevance of a stored text to a query. Zero means unrelated.
pub trait RecallIndex: Send + Sync {
    fn name(&self) -> &'static str;

    fn score(&self, query: &str, content: &str) -> f64;
}

/// Counts the distinct words shared by query and content.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordIndex;

impl RecallIndex for KeywordIndex {
    fn name(&self) -> &'static str {
        "keyword"
    }

    fn score(&self, query: &str, content: &str) -> f64 {
        let query_words: BTreeSet<String> = tokenize(query).collect();
        let content_words: BTreeSet<String> = tokenize(content).collect();
        let shared = query_words.intersection(&content_words).count();
        f64::from(u32::try_from(shared).unwrap_or(u32::MAX))
    }
}

/// Hashes words into a fixed-width signed vector and compares by cosine.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashedIndex;

impl HashedIndex {
    fn embed(text: &str) -> [f64; HASHED_DIMENSIONS] {
        let mut vector = [0.0_f64; HASHED_DIMENSIONS];
        for word in tokenize(text) {
            let digest = Sha256::digest(word.as_bytes());
            let mut bytes = digest.iter().copied();
            let (Some(bucket), Some(sign)) = (bytes.next(), bytes.next()) else {
                continue;
            };
            let weight = if sign & 1 == 0 { 1.0 } else { -1.0 };
            if let Some(slot) = vector.get_mut(usize::from(bucket)) {
                *slot += weight;
            }
        }
        vector
    }
}

impl RecallIndex for HashedIndex {
    fn name(&self) -> &'static str {
        "hashed"
    }

    fn score(&self, query: &str, content: &str) -> f64 {
        let left = Self::embed(query);
        let right = Self::embed(content);
        let dot: f64 = left.iter().zip(right.iter()).map(|(a, b)| a * b).sum();
        let norm_left = left.iter().map(|v| v * v).sum::<f64>().sqrt();
        let norm_right = right.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm_left == 0.0 || norm_right == 0.0 {
            return 0.0;
        }
        (dot / (norm_left * norm_right)).max(0.0)
    }
}

pub fn index_for(kind: RecallIndexKind) -> Box<dyn RecallIndex> {
    match kind {
        RecallIndexKind::Keyword => Box::new(KeywordIndex),
        RecallIndexKind::Hashed => Box::new(HashedIndex),
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
}

/// JSON-array store at `data/memory.json`.
pub struct MemoryStore {
    path: PathBuf,
    index: Box<dyn RecallIndex>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("path", &self.path)
            .field("index", &self.index.name())
            .finish()
    }
}

impl MemoryStore {
    pub fn new(path: impl Into<PathBuf>, index: Box<dyn RecallIndex>) -> Self {
        Self {
            path: path.into(),
            index,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index_name(&self) -> &'static str {
        self.index.name()
    }

    /// All stored records in insertion order. Unreadable state loads empty.
    pub fn load(&self) -> Vec<MemoryRecord> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Vec::new(),
            Err(error) => {
                warn!(path = %self.path.display(), %error, "memory store unreadable; starting empty");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(error) => {
                warn!(path = %self.path.display(), %error, "memory store corrupt; starting empty");
                Vec::new()
            }
        }
    }

    pub fn remember(
        &self,
        content: &str,
        category: &str,
        origin: RecordOrigin,
    ) -> Result<MemoryRecord, MemoryError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        let category = match category.trim() {
            "" => DEFAULT_CATEGORY,
            trimmed => trimmed,
        };

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut records = self.load();
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            content: content.to_owned(),
            category: category.to_owned(),
            created_at: Utc::now(),
            meta: origin.into_meta(),
        };
        records.push(record.clone());

        let serialized = serde_json::to_vec_pretty(&records)?;
        self.write_atomic(&serialized)
            .map_err(|source| MemoryError::Write {
                path: self.path.clone(),
                source,
            })?;
        info!(
            id = %record.id,
            category = %record.category,
            conversation = record.meta.conversation_id().unwrap_or_default(),
            total = records.len(),
            "stored memory"
        );
        Ok(record)
    }

    /// Best matches for `query`, most relevant first and newest first on ties.
    ///
    /// A query without words returns the newest records. With a
    /// `conversation`, only records written in that conversation are ranked.
    pub fn recall(
        &self,
        query: &str,
        limit: usize,
        conversation: Option<&str>,
    ) -> Vec<ScoredRecord> {
        let limit = limit.max(1);
        let records = self.load().into_iter().filter(|record| {
            conversation.is_none_or(|wanted| record.meta.conversation_id() == Some(wanted))
        });

        let mut scored: Vec<ScoredRecord> = if tokenize(query).next().is_none() {
            records
                .map(|record| ScoredRecord { record, score: 0.0 })
                .collect()
        } else {
            records
                .filter_map(|record| {
                    let score = self.index.score(query, &record.content);
                    (score > 0.0).then_some(ScoredRecord { record, score })
                })
                .collect()
        };

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b.record.created_at.cmp(&a.record.created_at))
        });
        scored.truncate(limit);
        debug!(index = self.index.name(), matches = scored.len(), "recalled memories");
        scored
    }

    fn write_atomic(&self, contents: &[u8]) -> io::Result<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| io::Error::other("memory store path has no parent directory"))?;
        std::fs::create_dir_all(parent)?;
        let mut temp_file = Builder::new().prefix("memory").tempfile_in(parent)?;
        temp_file.write_all(contents)?;
        temp_file.as_file_mut().sync_all()?;
        temp_file.persist(&self.path).map_err(|error| error.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::TempDir;
    use assert_fs::prelude::*;
    use pretty_assertions::assert_eq;

    fn store(temp: &TempDir, kind: RecallIndexKind) -> MemoryStore {
        MemoryStore::new(temp.path().join("data/memory.json"), index_for(kind))
    }

    #[test]
    fn remember_persists_records() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Keyword);

        let first = memory.remember("  prefers tabs over spaces ", "", RecordOrigin::local())?;
        memory.remember("deploys on fridays", "ops", RecordOrigin::local())?;

        assert_eq!(first.content, "prefers tabs over spaces");
        assert_eq!(first.category, "general");
        assert_eq!(first.meta.to_string(), "local/?");

        let reloaded = store(&temp, RecallIndexKind::Keyword).load();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.first(), Some(&first));
        Ok(())
    }

    #[test]
    fn empty_content_is_refused() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Keyword);
        assert!(matches!(
            memory.remember(" \n ", "notes", RecordOrigin::local()),
            Err(MemoryError::EmptyContent)
        ));
        assert!(!memory.path().exists());
        Ok(())
    }

    #[test]
    fn corrupt_file_loads_empty() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        temp.child("data/memory.json").write_str("{not json")?;
        let memory = store(&temp, RecallIndexKind::Keyword);

        assert!(memory.load().is_empty());
        memory.remember("recovered", "", RecordOrigin::local())?;
        assert_eq!(memory.load().len(), 1);
        Ok(())
    }

    #[test]
    fn unknown_meta_shapes_are_kept() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        temp.child("data/memory.json").write_str(
            r#"[
  {"id": "6f1c2d4e-8a9b-4c3d-9e2f-1a2b3c4d5e6f", "content": "a", "category": "x",
   "created_at": "2024-03-01T10:00:00Z", "meta": {"source": "import", "role": "user"}},
  {"id": "7f1c2d4e-8a9b-4c3d-9e2f-1a2b3c4d5e6f", "content": "b", "category": "x",
   "created_at": "2024-03-01T10:00:00Z", "meta": [1, 2]},
  {"id": "8f1c2d4e-8a9b-4c3d-9e2f-1a2b3c4d5e6f", "content": "c", "category": "x",
   "created_at": "2024-03-01T10:00:00Z"}
]"#,
        )?;
        let rendered: Vec<String> = store(&temp, RecallIndexKind::Keyword)
            .load()
            .iter()
            .map(|record| record.meta.to_string())
            .collect();
        assert_eq!(rendered, vec!["import/user", "unknown/?", "unknown/?"]);
        Ok(())
    }

    #[test]
    fn keyword_recall_ranks_by_overlap() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Keyword);
        memory.remember("the build uses cargo nextest", "dev", RecordOrigin::local())?;
        memory.remember("cargo build is slow on laptops", "dev", RecordOrigin::local())?;
        memory.remember("lunch is at noon", "life", RecordOrigin::local())?;

        let hits: Vec<String> = memory
            .recall("cargo build", 5, None)
            .into_iter()
            .map(|hit| hit.record.content)
            .collect();
        assert_eq!(
            hits,
            vec!["cargo build is slow on laptops", "the build uses cargo nextest"]
        );
        assert_eq!(memory.recall("cargo", 1, None).len(), 1);
        Ok(())
    }

    #[test]
    fn hashed_recall_prefers_similar_text() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Hashed);
        memory.remember("python sandbox timeout settings", "dev", RecordOrigin::local())?;
        memory.remember("grocery list eggs milk", "life", RecordOrigin::local())?;

        let best = memory.recall("sandbox timeout", 1, None);
        assert_eq!(
            best.first().map(|hit| hit.record.content.as_str()),
            Some("python sandbox timeout settings")
        );
        assert_eq!(memory.index_name(), "hashed");
        Ok(())
    }

    #[test]
    fn origin_is_recorded_and_filters_recall() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Keyword);
        let asked = memory.remember(
            "which port does staging use",
            "chat",
            RecordOrigin::local()
                .source("cli")
                .role("user")
                .conversation("deploy-42"),
        )?;
        memory.remember(
            "staging port is 8443",
            "chat",
            RecordOrigin::local().role(" ").conversation("other"),
        )?;

        assert_eq!(asked.meta.to_string(), "cli/user in deploy-42");
        assert_eq!(asked.meta.conversation_id(), Some("deploy-42"));

        let hits: Vec<String> = memory
            .recall("staging port", 5, Some("deploy-42"))
            .into_iter()
            .map(|hit| hit.record.content)
            .collect();
        assert_eq!(hits, vec!["which port does staging use"]);
        assert_eq!(memory.recall("staging port", 5, None).len(), 2);
        assert!(memory.recall("staging", 5, Some("missing")).is_empty());

        let reloaded = store(&temp, RecallIndexKind::Keyword).load();
        assert_eq!(
            reloaded.get(1).map(|record| record.meta.to_string()).as_deref(),
            Some("local/? in other")
        );
        Ok(())
    }

    #[test]
    fn hashed_score_is_cosine() {
        let index = HashedIndex;
        assert!((index.score("alpha beta", "alpha beta") - 1.0).abs() < 1e-9);
        assert_eq!(index.score("", "alpha"), 0.0);
    }

    #[test]
    fn empty_query_returns_newest() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let memory = store(&temp, RecallIndexKind::Keyword);
        memory.remember("older", "", RecordOrigin::local())?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        memory.remember("newer", "", RecordOrigin::local())?;

        let hits = memory.recall("  ", 1, None);
        assert_eq!(
            hits.first().map(|hit| hit.record.content.as_str()),
            Some("newer")
        );
        Ok(())
    }
}
