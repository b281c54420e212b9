//! `SemanticIndex`: turn-pair embedding context construction and budgeted
//! retrieval.

use crate::error::IndexError;
use crate::external::EmbeddingService;
use crate::store::TokenStore;
use crate::token::{ChunkTuple, Role};

/// One scored retrieval result.
#[derive(Debug, Clone)]
pub struct ScoredMatch {
    pub tuple: ChunkTuple,
    pub similarity: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SemanticIndex;

impl SemanticIndex {
    pub fn new() -> Self {
        Self
    }

    /// Build the deterministic embedding-context text for `target`.
    /// `max_context_tokens` truncates by priority order (`T` > cross-turn
    /// anchor > same-turn anchor), approximating "tokens" with
    /// whitespace-delimited words since the tokenizer is an opaque external
    /// service.
    pub fn context_text(&self, store: &TokenStore, target: &ChunkTuple, max_context_tokens: usize) -> String {
        if target.role == Role::System {
            let text = store.chunk_text(target).unwrap_or_default();
            return truncate_words(&text, max_context_tokens);
        }

        let same_turn_anchor = target.same_turn_anchor();
        let cross_turn_anchor = target.cross_turn_anchor();

        if target.role == Role::Assistant && *target == same_turn_anchor {
            // target is its own turn's anchor: context = cross-turn anchor + self.
            let u0_text = cross_turn_anchor
                .and_then(|u0| store.chunk_text(&u0))
                .unwrap_or_default();
            let self_text = store.chunk_text(target).unwrap_or_default();
            return truncate_words(&format!("{u0_text}{self_text}"), max_context_tokens);
        }

        if Some(*target) == cross_turn_anchor {
            // target is a user anchor being embedded as the cross-turn
            // anchor for some assistant chunk: pull in the paired
            // assistant's anchor if it already exists. Does not re-embed
            // later if the assistant anchor arrives after the fact.
            let assistant_anchor = ChunkTuple::new(target.turn_id + 1, 0, Role::Assistant);
            let self_text = store.chunk_text(target).unwrap_or_default();
            return match store.chunk_text(&assistant_anchor) {
                Some(assistant_text) => {
                    truncate_words(&format!("{self_text}{assistant_text}"), max_context_tokens)
                }
                None => truncate_words(&self_text, max_context_tokens),
            };
        }

        // mid-chunk: U0 + S0 + T, truncated by priority T > U0 > S0.
        let self_text = store.chunk_text(target).unwrap_or_default();
        let u0_text = cross_turn_anchor
            .and_then(|u0| store.chunk_text(&u0))
            .unwrap_or_default();
        let s0_text = store.chunk_text(&same_turn_anchor).unwrap_or_default();
        truncate_by_priority(max_context_tokens, &[&self_text, &u0_text, &s0_text])
    }

    /// Embed and upsert one newly-existent chunk tuple. On
    /// [`IndexError::EmbeddingUnavailable`], stores the entry with a `None`
    /// embedding so a later call can retry.
    pub async fn index_chunk(
        &self,
        store: &mut TokenStore,
        tuple: ChunkTuple,
        embed_svc: &dyn EmbeddingService,
        max_context_tokens: usize,
    ) -> Result<(), IndexError> {
        let text = self.context_text(store, &tuple, max_context_tokens);
        let token_count = store.chunk_token_count(&tuple);
        match embed_svc.embed(&text).await {
            Ok(embedding) => {
                store.upsert_semantic_entry(tuple, text, token_count, Some(embedding));
                Ok(())
            }
            Err(IndexError::EmbeddingUnavailable) => {
                store.upsert_semantic_entry(tuple, text, token_count, None);
                Err(IndexError::EmbeddingUnavailable)
            }
            Err(err) => Err(err),
        }
    }

    /// Query all entries with a non-null embedding, sorted desc by cosine
    /// similarity (dot product, since embeddings are unit-norm).
    pub async fn query(
        &self,
        store: &TokenStore,
        q: &str,
        embed_svc: &dyn EmbeddingService,
    ) -> Result<Vec<ScoredMatch>, IndexError> {
        let query_vec = embed_svc.embed(q).await?;
        let mut matches: Vec<ScoredMatch> = store
            .semantic_entries()
            .filter_map(|entry| {
                entry.embedding.as_ref().map(|v| ScoredMatch {
                    tuple: entry.tuple,
                    similarity: dot(&query_vec, v),
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        Ok(matches)
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn truncate_words(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Truncate the concatenation of `parts` (already in priority order) to
/// `max_words` total words, keeping whole parts and dropping lowest-priority
/// ones first.
fn truncate_by_priority(max_words: usize, parts: &[&str]) -> String {
    let mut budget = max_words;
    let mut kept = Vec::with_capacity(parts.len());
    for part in parts {
        let words: Vec<&str> = part.split_whitespace().collect();
        if words.len() <= budget {
            budget -= words.len();
            kept.push(words.join(" "));
        } else if budget > 0 {
            kept.push(words[..budget].join(" "));
            budget = 0;
        } else {
            kept.push(String::new());
        }
    }
    // kept is in priority order (T, U0, S0); reassemble in conversational
    // order (U0, S0, T). Priority only governs truncation, not final
    // ordering.
    let empty = String::new();
    let get = |i: usize| kept.get(i).unwrap_or(&empty);
    [get(1), get(2), get(0)]
        .iter()
        .filter(|s| !s.is_empty())
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
