//! `Pruner`: rank-based, anchor-pair-aware context-budget enforcement.

use tracing::info;

use crate::store::TokenStore;
use crate::token::ChunkTuple;

/// What the selection step decided to prune this iteration.
enum PruneAction {
    Single(ChunkTuple),
    Pair(ChunkTuple, ChunkTuple),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Pruner;

impl Pruner {
    pub fn new() -> Self {
        Self
    }

    /// Enforce `max_active_tokens` by deleting the lowest-ranked eligible
    /// chunks, excluding the turn that just completed, the system root, and
    /// pinned chunks. Never fails: if anchor protection blocks every
    /// remaining candidate, the context is left over budget.
    pub fn run(&self, store: &mut TokenStore, current_turn_id: u64, max_active_tokens: usize) {
        loop {
            if store.live_count() <= max_active_tokens {
                return;
            }

            let mut candidates: Vec<ChunkTuple> = store
                .live_chunk_tuples()
                .copied()
                .filter(|t| t.turn_id != current_turn_id && !t.is_system_root())
                .filter(|t| !store.chunk_summary(t).is_some_and(|s| s.pinned))
                .collect();

            if candidates.len() <= 1 {
                return;
            }

            candidates.sort_by(|a, b| {
                let pa = store.chunk_summary(a).map(|s| s.peak_brightness).unwrap_or(i64::MIN);
                let pb = store.chunk_summary(b).map(|s| s.peak_brightness).unwrap_or(i64::MIN);
                // tie-break lowest turn_id, then sentence_id, then role
                // ordering system<user<assistant, which is exactly
                // ChunkTuple's derived field order.
                pa.cmp(&pb).then_with(|| a.cmp(b))
            });

            let Some(action) = self.find_action(store, &candidates) else {
                info!(
                    current_turn_id,
                    live_count = store.live_count(),
                    max_active_tokens,
                    "pruner stalled: all remaining candidates are protected anchors"
                );
                return;
            };

            match action {
                PruneAction::Single(tuple) => {
                    let _ = store.prune_chunk(&tuple);
                }
                PruneAction::Pair(a, b) => {
                    let _ = store.prune_chunk(&a);
                    let _ = store.prune_chunk(&b);
                }
            }
        }
    }

    /// Walk the ranked candidates for one that can actually be pruned this
    /// iteration: the first non-anchor, or the first anchor pair that
    /// satisfies the atomic-prune condition.
    fn find_action(&self, store: &TokenStore, ranked: &[ChunkTuple]) -> Option<PruneAction> {
        for &tuple in ranked {
            if !tuple.is_anchor() {
                return Some(PruneAction::Single(tuple));
            }

            let Some(paired) = tuple.paired_anchor() else {
                continue;
            };
            if !store.is_chunk_live(&paired) {
                // paired anchor already gone; nothing to pair-prune with.
                continue;
            }

            let self_only = store.live_sentence_ids_for(tuple.turn_id, tuple.role) == vec![0];
            let paired_only = store.live_sentence_ids_for(paired.turn_id, paired.role) == vec![0];
            if self_only && paired_only {
                return Some(PruneAction::Pair(tuple, paired));
            }
            // anchor protected: this turn still has non-anchor content, or
            // its pair does. Skip and try the next candidate.
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Role, Token};

    fn tok(position: u64, turn_id: u64, sentence_id: u32, role: Role, brightness: i64) -> Token {
        Token {
            position,
            token_id: position as u32,
            text: "x".into(),
            turn_id,
            sentence_id,
            role,
            brightness,
            deleted: false,
            brightness_at_deletion: None,
            pinned: false,
        }
    }

    #[test]
    fn single_prunable_chunk_is_not_pruned() {
        let mut store = TokenStore::new();
        store.append_live(tok(0, 1, 0, Role::User, 100)).unwrap();
        Pruner::new().run(&mut store, 99, 0);
        assert!(store.is_chunk_live(&ChunkTuple::new(1, 0, Role::User)));
    }

    #[test]
    fn current_turn_and_system_root_are_immune() {
        let mut store = TokenStore::new();
        store.append_live(tok(0, 0, 0, Role::System, 100)).unwrap();
        store.append_live(tok(1, 2, 0, Role::User, 1)).unwrap();
        store.append_live(tok(2, 3, 0, Role::User, 1)).unwrap();
        // current turn is 3; only candidate eligible is turn 2's anchor, but
        // it is the sole live candidate so |P|<=1 blocks pruning anyway.
        Pruner::new().run(&mut store, 3, 0);
        assert!(store.is_chunk_live(&ChunkTuple::new(0, 0, Role::System)));
        assert!(store.is_chunk_live(&ChunkTuple::new(2, 0, Role::User)));
    }

    #[test]
    fn dimmest_non_anchor_chunk_is_pruned_first() {
        let mut store = TokenStore::new();
        store.append_live(tok(0, 1, 0, Role::User, 100)).unwrap();
        store.append_live(tok(1, 1, 1, Role::User, 1)).unwrap();
        store.append_live(tok(2, 1, 2, Role::User, 50)).unwrap();
        Pruner::new().run(&mut store, 99, 2);
        assert!(!store.is_chunk_live(&ChunkTuple::new(1, 1, Role::User)));
        assert!(store.is_chunk_live(&ChunkTuple::new(1, 0, Role::User)));
        assert!(store.is_chunk_live(&ChunkTuple::new(1, 2, Role::User)));
    }

    #[test]
    fn pinned_chunk_is_never_selected() {
        let mut store = TokenStore::new();
        store.append_live(tok(0, 1, 0, Role::User, 100)).unwrap();
        store.append_live(tok(1, 1, 1, Role::User, 1)).unwrap();
        store.set_pinned(&ChunkTuple::new(1, 1, Role::User), true).unwrap();
        store.append_live(tok(2, 1, 2, Role::User, 50)).unwrap();
        Pruner::new().run(&mut store, 99, 2);
        assert!(store.is_chunk_live(&ChunkTuple::new(1, 1, Role::User)));
        assert!(!store.is_chunk_live(&ChunkTuple::new(1, 2, Role::User)));
    }

    /// Scenario C — Anchor atomic prune.
    #[test]
    fn scenario_c_anchor_atomic_prune() {
        let mut store = TokenStore::new();
        // user turn 3: anchor(100) + two dim chunks
        store.append_live(tok(0, 3, 0, Role::User, 100)).unwrap();
        store.append_live(tok(1, 3, 1, Role::User, 5)).unwrap();
        store.append_live(tok(2, 3, 2, Role::User, 6)).unwrap();
        // assistant turn 4: anchor(100) + four dim chunks
        store.append_live(tok(3, 4, 0, Role::Assistant, 100)).unwrap();
        store.append_live(tok(4, 4, 1, Role::Assistant, 7)).unwrap();
        store.append_live(tok(5, 4, 2, Role::Assistant, 8)).unwrap();
        store.append_live(tok(6, 4, 3, Role::Assistant, 9)).unwrap();
        store.append_live(tok(7, 4, 4, Role::Assistant, 1)).unwrap();

        // budget of 0 forces pruning all the way down, including the final
        // anchor pair once each anchor is the sole survivor of its turn-role.
        Pruner::new().run(&mut store, 99, 0);

        assert!(!store.is_chunk_live(&ChunkTuple::new(3, 0, Role::User)));
        assert!(!store.is_chunk_live(&ChunkTuple::new(4, 0, Role::Assistant)));
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn anchor_protected_when_pair_still_has_content() {
        let mut store = TokenStore::new();
        // user turn 3 is already down to just its anchor.
        store.append_live(tok(0, 3, 0, Role::User, 100)).unwrap();
        // assistant turn 4's extra chunk is pinned, so it can never be
        // pruned away to let the pair collapse to solo anchors.
        store.append_live(tok(1, 4, 0, Role::Assistant, 100)).unwrap();
        store.append_live(tok(2, 4, 1, Role::Assistant, 50)).unwrap();
        store
            .set_pinned(&ChunkTuple::new(4, 1, Role::Assistant), true)
            .unwrap();

        Pruner::new().run(&mut store, 99, 0);
        // protection holds indefinitely: the pinned chunk keeps turn 4's
        // side from ever reducing to "only the anchor remains live".
        assert!(store.is_chunk_live(&ChunkTuple::new(3, 0, Role::User)));
        assert!(store.is_chunk_live(&ChunkTuple::new(4, 0, Role::Assistant)));
        assert!(store.is_chunk_live(&ChunkTuple::new(4, 1, Role::Assistant)));
    }
}
