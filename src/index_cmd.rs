//! `sqlchat index build` and `sqlchat index status`.

use anyhow::Result;

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::corpus::build_corpus;
use crate::embedding;
use crate::index::{IndexNode, VectorIndex, INDEX_FILES};
use crate::progress::{BuildProgressEvent, BuildProgressReporter};

/// Build the corpus, chunk it, embed the chunks when a provider is
/// configured, and persist the index to `corpus.index_dir`.
pub async fn run_index_build(config: &Config, progress: &dyn BuildProgressReporter) -> Result<()> {
    progress.report(BuildProgressEvent::Loading);
    let docs = build_corpus(&config.corpus)?;

    let total_docs = docs.len() as u64;
    let mut nodes = Vec::new();
    for (i, doc) in docs.iter().enumerate() {
        for chunk in chunk_text(
            &doc.id,
            &doc.text,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        ) {
            nodes.push(IndexNode {
                id: chunk.id,
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                hash: chunk.hash,
                metadata: doc.metadata.clone(),
            });
        }
        progress.report(BuildProgressEvent::Chunking {
            n: i as u64 + 1,
            total: total_docs,
        });
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let vectors = if config.embedding.is_enabled() {
        let total = nodes.len() as u64;
        let mut vectors = Vec::with_capacity(nodes.len());
        for batch in nodes.chunks(config.embedding.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|n| n.text.clone()).collect();
            vectors.extend(embedding::embed_texts(&config.embedding, &texts).await?);
            progress.report(BuildProgressEvent::Embedding {
                n: vectors.len() as u64,
                total,
            });
        }
        Some(vectors)
    } else {
        None
    };

    let index = VectorIndex::new(
        nodes,
        vectors,
        &config.embedding.provider,
        provider.model_name(),
    )?;

    progress.report(BuildProgressEvent::Writing);
    index.persist(&config.corpus.index_dir)?;

    let manifest = index.manifest();
    tracing::info!(
        documents = manifest.document_count,
        nodes = manifest.node_count,
        vectors = manifest.vector_count,
        "index built"
    );

    println!("index build");
    println!("  documents: {}", manifest.document_count);
    println!("  chunks: {}", manifest.node_count);
    println!("  embedded: {}", manifest.vector_count);
    println!("  embedding: {} ({})", manifest.embedding_provider, manifest.embedding_model);
    println!("  index dir: {}", config.corpus.index_dir.display());
    Ok(())
}

/// Print which index files exist and the manifest counts.
pub fn run_index_status(config: &Config) -> Result<()> {
    let dir = &config.corpus.index_dir;
    println!("index status");
    println!("  index dir: {}", dir.display());
    for file in INDEX_FILES {
        let state = if dir.join(file).is_file() { "present" } else { "missing" };
        println!("  {}: {}", file, state);
    }

    if !VectorIndex::files_exist(dir) {
        println!("  index not built (run `sqlchat index build`)");
        return Ok(());
    }

    let index = VectorIndex::load(dir)?;
    let manifest = index.manifest();
    println!("  documents: {}", manifest.document_count);
    println!("  chunks: {}", manifest.node_count);
    println!("  embedded: {}", manifest.vector_count);
    println!("  embedding: {} ({})", manifest.embedding_provider, manifest.embedding_model);
    if manifest.dims > 0 {
        println!("  dims: {}", manifest.dims);
    }
    println!("  built at: {}", manifest.built_at.to_rfc3339());
    Ok(())
}
