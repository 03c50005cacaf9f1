//! Paragraph-boundary text chunker.
//!
//! Splits corpus document text into [`Chunk`]s that respect a configurable
//! `max_tokens` limit. Splitting occurs on paragraph boundaries (`\n\n`) so
//! a table summary or a script statement stays in one piece where possible.
//! Consecutive chunks share up to `overlap_tokens` of trailing context.
//!
//! Chunk ids are derived from the document id and index, so rebuilding the
//! index from the same corpus yields the same ids.

use sha2::{Digest, Sha256};

use crate::models::Chunk;

/// Approximate chars-per-token ratio.
const CHARS_PER_TOKEN: usize = 4;

/// Split text into chunks on paragraph boundaries, respecting max_tokens.
/// Returns chunks with contiguous indices starting at 0.
pub fn chunk_text(
    document_id: &str,
    text: &str,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let max_chars = max_tokens.max(1) * CHARS_PER_TOKEN;
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars / 2);

    if text.trim().is_empty() {
        return vec![make_chunk(document_id, 0, text.trim())];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current_buf = String::new();

    for para in text.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if current_buf.is_empty() {
            trimmed.len()
        } else {
            current_buf.len() + 2 + trimmed.len()
        };

        if would_be > max_chars && !current_buf.is_empty() {
            pieces.push(std::mem::take(&mut current_buf));
        }

        if trimmed.len() > max_chars {
            // Hard split at max_chars, preferring a newline or space boundary
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let actual_split = if split_at < remaining.len() {
                    remaining[..split_at]
                        .rfind('\n')
                        .or_else(|| remaining[..split_at].rfind(' '))
                        .map(|pos| pos + 1)
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                let actual_split = if actual_split == 0 {
                    next_char_boundary(remaining, 1)
                } else {
                    actual_split
                };
                pieces.push(remaining[..actual_split].trim().to_string());
                remaining = &remaining[actual_split..];
            }
        } else {
            if !current_buf.is_empty() {
                current_buf.push_str("\n\n");
            }
            current_buf.push_str(trimmed);
        }
    }

    if !current_buf.is_empty() {
        pieces.push(current_buf);
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    let mut previous: Option<&str> = None;
    for (i, piece) in pieces.iter().enumerate() {
        let text = match previous {
            Some(prev) if overlap_chars > 0 => {
                let tail = overlap_tail(prev, overlap_chars);
                if tail.is_empty() {
                    piece.clone()
                } else {
                    format!("{}\n{}", tail, piece)
                }
            }
            _ => piece.clone(),
        };
        chunks.push(make_chunk(document_id, i as i64, &text));
        previous = Some(piece);
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(document_id, 0, text.trim()));
    }

    chunks
}

/// The last `max_chars` of `text`, starting at a word boundary.
fn overlap_tail(text: &str, max_chars: usize) -> &str {
    if text.len() <= max_chars {
        return text;
    }
    let start = next_char_boundary(text, text.len() - max_chars);
    let tail = &text[start..];
    match tail.find(char::is_whitespace) {
        Some(pos) => tail[pos..].trim_start(),
        None => tail,
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn next_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx < s.len() && !s.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}

fn make_chunk(document_id: &str, index: i64, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let mut id_hasher = Sha256::new();
    id_hasher.update(document_id.as_bytes());
    id_hasher.update(b":");
    id_hasher.update(index.to_string().as_bytes());
    let id = format!("{:x}", id_hasher.finalize())[..32].to_string();

    Chunk {
        id,
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "SELECT * FROM bills;", 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "SELECT * FROM bills;");
    }

    #[test]
    fn test_empty_text() {
        let chunks = chunk_text("doc1", "", 512, 50);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn test_multiple_paragraphs_under_limit() {
        let text = "Table: BILLS\n\nTable: FOLIOS\n\nTable: PAYMENTS";
        let chunks = chunk_text("doc1", text, 512, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("Table: BILLS"));
        assert!(chunks[0].text.contains("Table: PAYMENTS"));
    }

    #[test]
    fn test_chunk_indices_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("doc1", &text, 10, 2);
        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_overlap_carries_previous_tail() {
        // max_tokens=6 => 24 chars per chunk, overlap 2 tokens => 8 chars
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_text("doc1", text, 6, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, "alpha beta gamma delta");
        assert!(chunks[1].text.starts_with("delta\n"));
        assert!(chunks[1].text.ends_with("epsilon zeta eta theta"));
    }

    #[test]
    fn test_no_overlap_when_zero() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta";
        let chunks = chunk_text("doc1", text, 6, 0);
        assert_eq!(chunks[1].text, "epsilon zeta eta theta");
    }

    #[test]
    fn test_long_paragraph_hard_split_is_utf8_safe() {
        let text = "é".repeat(100);
        let chunks = chunk_text("doc1", &text, 5, 0);
        assert!(chunks.len() > 1);
        let joined: String = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_deterministic_ids_and_hashes() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let c1 = chunk_text("doc1", text, 2, 0);
        let c2 = chunk_text("doc1", text, 2, 0);
        assert_eq!(c1.len(), c2.len());
        for (a, b) in c1.iter().zip(c2.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.text, b.text);
            assert_eq!(a.hash, b.hash);
        }
        let other = chunk_text("doc2", text, 2, 0);
        assert_ne!(c1[0].id, other[0].id);
    }
}
