//! Retrieval-and-generation capability.
//!
//! [`Retriever::query`] takes the assembled context, retrieves the `top_k`
//! index nodes most relevant to the user's part of it, fills the text-QA template and returns the
//! generator's answer. [`RagEngine`] is the default implementation over a
//! persisted [`VectorIndex`].

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::EmbeddingConfig;
use crate::embedding;
use crate::index::{ScoredNode, VectorIndex};
use crate::llm::Generator;
use crate::prompt;

/// Retrieval-augmented generation: `query(text) -> text`.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query(&self, text: &str, top_k: usize) -> Result<String>;
}

pub struct RagEngine {
    index: VectorIndex,
    embedding: EmbeddingConfig,
    generator: Arc<dyn Generator>,
    preferred_tables: Vec<String>,
}

impl RagEngine {
    pub fn new(
        index: VectorIndex,
        embedding: EmbeddingConfig,
        generator: Arc<dyn Generator>,
        preferred_tables: Vec<String>,
    ) -> Self {
        Self {
            index,
            embedding,
            generator,
            preferred_tables,
        }
    }

    /// Vector search when the index has vectors and the query embeds;
    /// keyword scoring otherwise.
    async fn retrieve(&self, text: &str, top_k: usize) -> Vec<ScoredNode<'_>> {
        if self.index.has_vectors() && self.embedding.is_enabled() {
            match embedding::embed_query(&self.embedding, text).await {
                Ok(vector) => return self.index.search_vector(&vector, top_k),
                Err(e) => tracing::warn!("Query embedding failed, using keyword retrieval: {:#}", e),
            }
        }
        self.index.search_keyword(text, top_k)
    }
}

#[async_trait]
impl Retriever for RagEngine {
    async fn query(&self, text: &str, top_k: usize) -> Result<String> {
        let nodes = self.retrieve(prompt::retrieval_query(text), top_k).await;
        tracing::debug!(top_k, retrieved = nodes.len(), "retrieval");

        let context_str = nodes
            .iter()
            .map(|n| n.node.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = prompt::text_qa(&context_str, text, &self.preferred_tables);
        self.generator.complete(&prompt).await
    }
}
