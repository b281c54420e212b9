//! Interface-level contracts for out-of-scope collaborators: the tokenizer
//! service, the embedding service, and the inference server's streaming
//! generation events. None of these are implemented here; the engine is
//! generic over them rather than hardcoding a vendor.

use async_trait::async_trait;

use crate::error::{ControllerError, IndexError};

/// One piece returned by the tokenizer for a span of input text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedPiece {
    pub token_id: u32,
    pub text: String,
}

/// `tokenize(text) -> ordered list of {token_id, text}`.
#[async_trait]
pub trait Tokenizer: Send + Sync {
    async fn tokenize(&self, text: &str) -> Result<Vec<TokenizedPiece>, ControllerError>;
}

/// `embed(text) -> unit-norm float32 vector of dimension D`.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError>;

    /// The fixed embedding dimension `D` this service produces.
    fn dimension(&self) -> usize;
}

/// A per-step attention payload, as delivered alongside a token event.
#[derive(Debug, Clone)]
pub enum AttentionPayload {
    /// `[L, H, C]` float32 tensor, flattened row-major.
    Raw {
        tensor: Vec<f32>,
        layers: usize,
        heads: usize,
        context_len: usize,
    },
    /// Already reduced to a length-`C` vector.
    PreAggregated(Vec<f32>),
}

/// One event emitted by `generate_stream`.
#[derive(Debug, Clone)]
pub enum GenerationEvent {
    Token {
        token_id: u32,
        text: String,
        attention: AttentionPayload,
    },
    /// Terminal event; delivered exactly once, carries no payload the core
    /// uses.
    Done,
}
