//! Page-level chunking with a token budget and sliding overlap.
//!
//! Pages are split by `semchunk-rs`, which prefers paragraph, sentence and word boundaries. The
//! budget is measured either in whitespace-separated words (the default) or in BPE tokens of the
//! embedding model through `tiktoken-rs`. After splitting, the tail of each chunk is carried
//! into the next one so context around a boundary stays retrievable.

use crate::config::TokenizerKind;
use anyhow::Error as TokenizerError;
use semchunk_rs::Chunker;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

use super::types::ChunkingError;

/// Shared token counting function.
pub(crate) type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Chunk text into overlapping segments with the supplied token counter.
///
/// - `chunk_size` is a hard upper bound on the token count per segment.
/// - `overlap` requests a sliding-window overlap between adjacent chunks; it is capped at
///   `chunk_size - 1` so every chunk still advances through the page.
///
/// Returns an empty vector when the input text is all whitespace.
pub(crate) fn chunk_text(
    text: &str,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Result<Vec<String>, ChunkingError> {
    if chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let counter_for_chunker = token_counter.clone();
    let chunker = Chunker::new(
        chunk_size,
        Box::new(move |segment: &str| counter_for_chunker.as_ref()(segment)),
    );
    let base_chunks: Vec<String> = chunker
        .chunk(text)
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();
    Ok(apply_overlap(base_chunks, chunk_size, overlap, token_counter))
}

/// Build the token counter selected by `TEXT_SPLITTER_TOKENIZER`.
///
/// `Tiktoken` resolves the encoding of the embedding model, falling back to `cl100k_base` for
/// unknown names; `Words` counts whitespace-separated words.
pub(crate) fn build_token_counter(
    kind: TokenizerKind,
    model: &str,
) -> Result<TokenCounter, ChunkingError> {
    match kind {
        TokenizerKind::Words => Ok(word_counter()),
        TokenizerKind::Tiktoken => build_tiktoken_counter(model),
    }
}

fn build_tiktoken_counter(model: &str) -> Result<TokenCounter, ChunkingError> {
    let normalized = model.trim();
    let target = if normalized.is_empty() {
        "cl100k_base"
    } else {
        normalized
    };
    let encoding = resolve_encoding(target).map_err(|source| ChunkingError::Tokenizer {
        model: target.to_string(),
        source,
    })?;
    let encoding = Arc::new(encoding);

    Ok(Arc::new(move |segment: &str| {
        encoding.encode_ordinary(segment).len()
    }))
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    match get_bpe_from_model(model) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            if let Some(candidate) = encoding_from_name(model) {
                candidate
            } else {
                tracing::warn!(
                    model,
                    "Falling back to 'cl100k_base' encoding for token counting"
                );
                cl100k_base()
            }
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}

/// Whitespace word counter; a non-empty segment without words still costs one token.
pub(crate) fn word_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn apply_overlap(
    chunks: Vec<String>,
    chunk_size: usize,
    overlap: usize,
    token_counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(chunk_size.saturating_sub(1));
    if effective_overlap == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut overlapped = Vec::with_capacity(chunks.len());
    let mut previous: Option<String> = None;

    for current in chunks {
        let next = match previous.as_deref() {
            Some(prev) => build_overlapped_chunk(
                prev,
                &current,
                effective_overlap,
                chunk_size,
                token_counter,
            ),
            None => current.clone(),
        };
        overlapped.push(next);
        previous = Some(current);
    }

    overlapped
}

fn build_overlapped_chunk(
    previous: &str,
    current: &str,
    overlap: usize,
    chunk_size: usize,
    token_counter: &TokenCounter,
) -> String {
    let tail = tail_with_token_limit(previous, overlap, token_counter);
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);

    if !tail.is_empty() {
        combined.push_str(tail);
        if !ends_with_whitespace(tail) && !starts_with_whitespace(current) {
            combined.push(' ');
        }
    }

    combined.push_str(current);
    trim_to_token_budget(&combined, chunk_size, token_counter)
}

/// Longest suffix of `text` whose token count fits `token_limit`, leading whitespace removed.
fn tail_with_token_limit<'a>(
    text: &'a str,
    token_limit: usize,
    token_counter: &TokenCounter,
) -> &'a str {
    longest_suffix_within(text, token_limit, token_counter).unwrap_or("")
}

fn trim_to_token_budget(text: &str, token_budget: usize, token_counter: &TokenCounter) -> String {
    longest_suffix_within(text, token_budget, token_counter)
        .unwrap_or_default()
        .to_string()
}

fn longest_suffix_within<'a>(
    text: &'a str,
    limit: usize,
    token_counter: &TokenCounter,
) -> Option<&'a str> {
    if limit == 0 {
        return None;
    }

    let trimmed = text.trim_start();
    if token_counter.as_ref()(trimmed) <= limit {
        return Some(trimmed);
    }

    text.char_indices()
        .skip(1)
        .map(|(offset, _)| text[offset..].trim_start())
        .find(|candidate| token_counter.as_ref()(candidate) <= limit)
}

fn starts_with_whitespace(text: &str) -> bool {
    text.chars().next().is_some_and(char::is_whitespace)
}

fn ends_with_whitespace(text: &str) -> bool {
    text.chars().next_back().is_some_and(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_text_respects_word_budget() {
        let text = "one two three four five";
        let chunks = chunk_text(text, 2, 0, &word_counter()).expect("chunks");
        assert_eq!(chunks, vec!["one two", "three four", "five"]);
    }

    #[test]
    fn chunk_text_drops_blank_pages() {
        let chunks = chunk_text("  \n\t ", 4, 1, &word_counter()).expect("chunks");
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunk_text_applies_overlap() {
        let text = "one two three four five";
        let counter = word_counter();
        let chunks = chunk_text(text, 3, 1, &counter).expect("chunks");
        assert_eq!(chunks, vec!["one two three", "three four five"]);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 3);
        }
    }

    #[test]
    fn overlap_is_capped_below_chunk_size() {
        let counter = word_counter();
        let chunks = chunk_text("a b c d e f", 2, 10, &counter).expect("chunks");
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 2);
        }
    }

    #[test]
    fn chunk_text_rejects_zero_chunk_size() {
        let error = chunk_text("hello", 0, 0, &word_counter()).unwrap_err();
        assert!(matches!(error, ChunkingError::InvalidChunkSize));
    }

    #[test]
    fn vietnamese_text_is_split_on_char_boundaries() {
        let text = "Phương trình bậc nhất một ẩn có dạng ax cộng b bằng không";
        let counter = word_counter();
        let chunks = chunk_text(text, 4, 1, &counter).expect("chunks");
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 4);
        }
    }

    #[test]
    fn tiktoken_counter_respects_budget() {
        let text = "The quick brown fox jumps over the lazy dog.";
        let counter =
            build_token_counter(TokenizerKind::Tiktoken, "text-embedding-ada-002").expect("bpe");
        let chunks = chunk_text(text, 5, 0, &counter).expect("chunking succeeded");
        for chunk in &chunks {
            assert!(counter.as_ref()(chunk) <= 5);
        }
        let chunk_words: Vec<&str> = chunks
            .iter()
            .flat_map(|chunk| chunk.split_whitespace())
            .collect();
        let original_words: Vec<&str> = text.split_whitespace().collect();
        assert_eq!(chunk_words, original_words);
    }

    #[test]
    fn unknown_model_falls_back_to_default_encoding() {
        let counter = build_token_counter(TokenizerKind::Tiktoken, "my-local-model").expect("bpe");
        assert!(counter.as_ref()("hello world") >= 2);
    }
}
