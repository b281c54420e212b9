//! `Resurrector`: moves a matched chunk, and its required paired chunks,
//! from dead to live within a token budget.

use std::collections::BTreeSet;

use tracing::info;

use crate::error::{IndexError, ResurrectionError};
use crate::external::EmbeddingService;
use crate::semantic_index::SemanticIndex;
use crate::store::{ResurrectionPolicy, TokenStore};
use crate::token::ChunkTuple;

#[derive(Debug, Default, Clone, Copy)]
pub struct Resurrector;

impl Resurrector {
    pub fn new() -> Self {
        Self
    }

    /// Query `index` for matches to `q`, then walk them in descending
    /// similarity, scheduling each match's dead members (itself, its
    /// cross-turn anchor, its same-turn anchor) for resurrection whenever
    /// they fit the remaining budget `r`. Issues the resurrection against
    /// `store`, each chunk tuple atomically, and returns the tuples that
    /// were actually resurrected.
    pub async fn run(
        &self,
        store: &mut TokenStore,
        index: &SemanticIndex,
        embed_svc: &dyn EmbeddingService,
        q: &str,
        r: usize,
        b0: i64,
        top_k: usize,
    ) -> Result<Vec<ChunkTuple>, ResurrectionError> {
        let matches = match index.query(store, q, embed_svc).await {
            Ok(m) => m,
            Err(IndexError::EmbeddingUnavailable) => {
                info!("resurrection skipped: embedding service unavailable");
                return Ok(Vec::new());
            }
            Err(err) => return Err(err.into()),
        };

        let mut remaining = r;
        let mut resurrected = Vec::new();

        for m in matches.into_iter().take(top_k) {
            let members = self.paired_members(&m.tuple);
            let dead_members: Vec<ChunkTuple> = members
                .into_iter()
                .filter(|t| !store.is_chunk_live(t) && store.chunk_token_count(t) > 0)
                .collect();

            let cost: usize = dead_members.iter().map(|t| store.chunk_token_count(t)).sum();
            if cost > remaining {
                continue;
            }

            for tuple in &dead_members {
                store
                    .resurrect_chunk(tuple, ResurrectionPolicy::Semantic { b0 })
                    .map_err(ResurrectionError::Aborted)?;
            }
            remaining -= cost;
            resurrected.extend(dead_members);
        }

        info!(
            query = q,
            resurrected_count = resurrected.len(),
            remaining,
            "resurrection pass complete"
        );
        Ok(resurrected)
    }

    /// `{M, U0, S0}`, deduplicated: if `M == U0 == S0` it counts once.
    fn paired_members(&self, m: &ChunkTuple) -> BTreeSet<ChunkTuple> {
        let mut set = BTreeSet::new();
        set.insert(*m);
        if let Some(u0) = m.cross_turn_anchor() {
            set.insert(u0);
        }
        set.insert(m.same_turn_anchor());
        set
    }
}
