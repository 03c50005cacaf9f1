//! Persisted retrieval index.
//!
//! A [`VectorIndex`] holds the chunk nodes produced by `sqlchat index build`
//! and, when an embedding provider is configured, one vector per node.
//! It is stored in the index directory as three JSON files:
//!
//! | File | Contents |
//! |------|----------|
//! | `docstore.json` | nodes (chunk text + metadata) |
//! | `index_store.json` | [`IndexManifest`] |
//! | `default__vector_store.json` | node id → embedding |
//!
//! Search is brute-force cosine similarity when vectors are present and
//! keyword term overlap otherwise. Ties are broken by node id so results
//! are deterministic.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::embedding::cosine_similarity;

pub const DOCSTORE_FILE: &str = "docstore.json";
pub const INDEX_STORE_FILE: &str = "index_store.json";
pub const VECTOR_STORE_FILE: &str = "default__vector_store.json";

/// Files whose presence `/health` reports as `index_files_exist`.
pub const INDEX_FILES: [&str; 3] = [DOCSTORE_FILE, INDEX_STORE_FILE, VECTOR_STORE_FILE];

const INDEX_VERSION: u32 = 1;

/// Keyword terms shorter than this are ignored.
const MIN_TERM_LEN: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexNode {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub dims: usize,
    pub document_count: usize,
    pub node_count: usize,
    pub vector_count: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct DocStoreFile {
    nodes: Vec<IndexNode>,
}

#[derive(Serialize, Deserialize, Default)]
struct VectorStoreFile {
    embedding_dict: BTreeMap<String, Vec<f32>>,
}

/// A node with its retrieval score.
#[derive(Debug, Clone)]
pub struct ScoredNode<'a> {
    pub node: &'a IndexNode,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    manifest: IndexManifest,
    nodes: Vec<IndexNode>,
    vectors: BTreeMap<String, Vec<f32>>,
}

impl VectorIndex {
    /// Build an index. `vectors`, when given, must align with `nodes`.
    pub fn new(
        nodes: Vec<IndexNode>,
        vectors: Option<Vec<Vec<f32>>>,
        embedding_provider: &str,
        embedding_model: &str,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        let mut dims = 0;
        if let Some(vectors) = vectors {
            if vectors.len() != nodes.len() {
                bail!(
                    "Vector count {} does not match node count {}",
                    vectors.len(),
                    nodes.len()
                );
            }
            dims = vectors.first().map(Vec::len).unwrap_or(0);
            for (node, vector) in nodes.iter().zip(vectors) {
                map.insert(node.id.clone(), vector);
            }
        }

        let document_count = nodes
            .iter()
            .map(|n| n.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        Ok(Self {
            manifest: IndexManifest {
                version: INDEX_VERSION,
                embedding_provider: embedding_provider.to_string(),
                embedding_model: embedding_model.to_string(),
                dims,
                document_count,
                node_count: nodes.len(),
                vector_count: map.len(),
                built_at: Utc::now(),
            },
            nodes,
            vectors: map,
        })
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn nodes(&self) -> &[IndexNode] {
        &self.nodes
    }

    pub fn has_vectors(&self) -> bool {
        !self.vectors.is_empty()
    }

    /// True if all three index files exist in `dir`.
    pub fn files_exist(dir: &Path) -> bool {
        INDEX_FILES.iter().all(|f| dir.join(f).is_file())
    }

    /// Write the three index files, creating `dir` if needed.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;

        write_json(
            &dir.join(DOCSTORE_FILE),
            &DocStoreFile {
                nodes: self.nodes.clone(),
            },
        )?;
        write_json(
            &dir.join(VECTOR_STORE_FILE),
            &VectorStoreFile {
                embedding_dict: self.vectors.clone(),
            },
        )?;
        // Manifest last: its presence marks a complete build.
        write_json(&dir.join(INDEX_STORE_FILE), &self.manifest)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        if !Self::files_exist(dir) {
            bail!(
                "Index not found in {}. Run `sqlchat index build` first.",
                dir.display()
            );
        }
        let manifest: IndexManifest = read_json(&dir.join(INDEX_STORE_FILE))?;
        let docstore: DocStoreFile = read_json(&dir.join(DOCSTORE_FILE))?;
        let vectors: VectorStoreFile = read_json(&dir.join(VECTOR_STORE_FILE))?;
        Ok(Self {
            manifest,
            nodes: docstore.nodes,
            vectors: vectors.embedding_dict,
        })
    }

    /// Top `top_k` nodes by cosine similarity to `query`.
    pub fn search_vector(&self, query: &[f32], top_k: usize) -> Vec<ScoredNode<'_>> {
        let scored = self
            .nodes
            .iter()
            .filter_map(|node| {
                self.vectors.get(&node.id).map(|v| ScoredNode {
                    node,
                    score: cosine_similarity(query, v),
                })
            })
            .collect();
        rank(scored, top_k)
    }

    /// Top `top_k` nodes by the number of distinct query terms they contain.
    /// Nodes matching no term are not returned.
    pub fn search_keyword(&self, query: &str, top_k: usize) -> Vec<ScoredNode<'_>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Vec::new();
        }
        let scored = self
            .nodes
            .iter()
            .filter_map(|node| {
                let text_lower = node.text.to_lowercase();
                let matches = terms.iter().filter(|t| text_lower.contains(t.as_str())).count();
                (matches > 0).then_some(ScoredNode {
                    node,
                    score: matches as f32,
                })
            })
            .collect();
        rank(scored, top_k)
    }
}

fn rank(mut scored: Vec<ScoredNode<'_>>, top_k: usize) -> Vec<ScoredNode<'_>> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.node.id.cmp(&b.node.id))
    });
    scored.truncate(top_k);
    scored
}

/// Distinct lower-cased word terms of at least [`MIN_TERM_LEN`] chars.
fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    query
        .to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| t.chars().count() >= MIN_TERM_LEN)
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
