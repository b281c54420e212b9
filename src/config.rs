//! Configuration for the context-management engine.
//!
//! Every nominal constant (the B0 / B_cap fail-bright values, the
//! chunk-boundary floor, the active-token budget, the embedding dimension)
//! lives here instead of being scattered as magic numbers through the
//! engine, loadable from TOML with sane defaults.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Fail-bright / brightness-cap constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessConfig {
    /// Initial brightness assigned to every newly created token.
    pub b0: i64,
    /// Ceiling brightness reachable via magnitude voting.
    pub b_cap: i64,
}

impl Default for BrightnessConfig {
    fn default() -> Self {
        // Fixes the 255-vs-10000 ambiguity in favor of 10000, and pins
        // b_cap == b0 so tokens start at cap and can only decay.
        Self {
            b0: 10_000,
            b_cap: 10_000,
        }
    }
}

/// Chunk-boundary detection constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Minimum tokens a chunk must accumulate before a boundary is honored.
    pub min_chunk_tokens: usize,
    /// Size of the rolling text buffer used to detect boundary markers.
    pub rolling_buffer_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        // Fixes the 10-vs-64 ambiguity in favor of 64.
        Self {
            min_chunk_tokens: 64,
            rolling_buffer_chars: 10,
        }
    }
}

/// Pruner budget constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PruningConfig {
    /// Active-token budget enforced after every generation turn.
    pub max_active_tokens: usize,
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            max_active_tokens: 8192,
        }
    }
}

/// Semantic-index constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Fixed embedding dimension `D`.
    pub embedding_dim: usize,
    /// Context text truncation limit, in approximate tokens (whitespace
    /// words), used when assembling turn-pair embedding context.
    pub max_context_tokens: usize,
    /// Number of top matches considered by the resurrector per query.
    pub top_k: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 384,
            max_context_tokens: 256,
            top_k: 10,
        }
    }
}

/// Resurrection budget constants.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ResurrectionConfig {
    /// Tokens reserved for the model's own generation, subtracted out of
    /// the resurrection budget `R` alongside the active and estimated-user
    /// token counts.
    pub generation_reserve: usize,
}

impl Default for ResurrectionConfig {
    fn default() -> Self {
        Self {
            generation_reserve: 512,
        }
    }
}

/// Top-level engine configuration, loadable from `brightweave.toml`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightweaveConfig {
    pub brightness: BrightnessConfig,
    pub chunking: ChunkingConfig,
    pub pruning: PruningConfig,
    pub semantic: SemanticConfig,
    pub resurrection: ResurrectionConfig,
}

impl BrightweaveConfig {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// section the file omits.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}
