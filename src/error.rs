//! Error taxonomy for the context-management engine.
//!
//! Mirrors the kind-not-type taxonomy of the source design: each seam gets
//! its own `thiserror` enum, and the top-level `ControllerError` unifies them
//! for callers of [`crate::controller::SessionController`].

use thiserror::Error;

use crate::token::ChunkTuple;

/// Errors from [`crate::aggregator::AttentionAggregator`].
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error(
        "attention tensor shape mismatch: {layers}x{heads}x{context_len} does not match buffer length {buffer_len}"
    )]
    InvalidAttentionShape {
        layers: usize,
        heads: usize,
        context_len: usize,
        buffer_len: usize,
    },

    #[error("active context is empty")]
    EmptyContext,
}

/// Errors from [`crate::store::TokenStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown chunk tuple {0:?}")]
    UnknownChunk(ChunkTuple),

    #[error("storage backend failure: {0}")]
    Storage(String),

    /// Indicates a broken store invariant, not a recoverable condition.
    /// [`crate::controller::SessionController`] panics on this variant at
    /// its boundary rather than propagating it.
    #[error("internal invariant violated: {0}")]
    Inconsistent(String),
}

/// Errors from [`crate::semantic_index::SemanticIndex`].
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("embedding service unavailable, deferring embedding")]
    EmbeddingUnavailable,

    #[error("semantic index storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Errors from [`crate::resurrector::Resurrector`].
#[derive(Debug, Error)]
pub enum ResurrectionError {
    #[error("resurrection aborted, store left unchanged: {0}")]
    Aborted(#[source] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Top-level error surface for [`crate::controller::SessionController`].
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("tokenizer timed out")]
    TokenizeTimeout,

    #[error("tokenizer failed: {0}")]
    TokenizeFailure(String),

    #[error(transparent)]
    Aggregator(#[from] AggregatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Resurrection(#[from] ResurrectionError),
}
