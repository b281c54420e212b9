//! `TokenStore`: the persistent live/dead split store.
//!
//! In-memory `BTreeMap<position, Token>` partitions stand in for a durable
//! backend (four logical collections, primary key `position` / auto id,
//! secondary indices on chunk tuple and turn). Swapping in a real backing
//! store means replacing this module's internals; every other component
//! only talks to the `TokenStore` API.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunk::ChunkSummary;
use crate::error::StoreError;
use crate::token::{ChunkTuple, Role, Token};

/// Singleton bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub next_position: u64,
    pub next_turn: u64,
    pub current_sentence: u32,
    pub current_role: Option<Role>,
    pub last_modified: DateTime<Utc>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            next_position: 0,
            // turn 0 is reserved for role=system.
            next_turn: 1,
            current_sentence: 0,
            current_role: None,
            last_modified: Utc::now(),
        }
    }
}

/// One record in the append-only semantic vector index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticEntry {
    pub tuple: ChunkTuple,
    pub text: String,
    pub token_count: usize,
    /// `None` while the embedding service was unavailable at index time;
    /// such entries are skipped by queries.
    pub embedding: Option<Vec<f32>>,
    pub reference_count: u64,
}

/// Brightness policy applied on resurrection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResurrectionPolicy {
    /// New brightness = `brightness_at_deletion` if present, else `b0`. The
    /// chunk must re-prove itself; resurrection never inflates.
    Semantic { b0: i64 },
    /// New brightness = `b_cap`, and the chunk becomes pinned.
    Manual { b_cap: i64 },
}

/// Full persisted state, as produced by [`TokenStore::export`] and consumed
/// by [`TokenStore::import`]. Exporting then importing must reproduce the
/// original store exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedState {
    pub live: Vec<Token>,
    pub dead: Vec<Token>,
    pub semantic_entries: Vec<SemanticEntry>,
    pub metadata: Metadata,
}

/// Live/dead/entry/brightness aggregate stats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreStats {
    pub live_count: usize,
    pub dead_count: usize,
    pub entry_count: usize,
    pub live_brightness_min: Option<i64>,
    pub live_brightness_max: Option<i64>,
    pub live_brightness_mean: Option<f64>,
}

#[derive(Debug, Default)]
pub struct TokenStore {
    live: std::collections::BTreeMap<u64, Token>,
    dead: std::collections::BTreeMap<u64, Token>,
    live_by_tuple: HashMap<ChunkTuple, BTreeSet<u64>>,
    dead_by_tuple: HashMap<ChunkTuple, BTreeSet<u64>>,
    semantic_entries: HashMap<ChunkTuple, SemanticEntry>,
    metadata: Metadata,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- metadata / position and turn allocation ----------------------

    pub fn get_metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn save_metadata(&mut self) {
        self.metadata.last_modified = Utc::now();
    }

    /// Allocate the next absolute, never-reused position.
    pub fn allocate_position(&mut self) -> u64 {
        let position = self.metadata.next_position;
        self.metadata.next_position += 1;
        position
    }

    /// Allocate the next turn id.
    pub fn allocate_turn(&mut self) -> u64 {
        let turn = self.metadata.next_turn;
        self.metadata.next_turn += 1;
        turn
    }

    // ---- live partition -------------------------------------------------

    /// O(1) amortized write to live.
    pub fn append_live(&mut self, token: Token) -> Result<(), StoreError> {
        if self.live.contains_key(&token.position) || self.dead.contains_key(&token.position) {
            return Err(StoreError::Inconsistent(format!(
                "position {} already exists in store",
                token.position
            )));
        }
        if token.position >= self.metadata.next_position {
            self.metadata.next_position = token.position + 1;
        }
        let tuple = token.tuple();
        self.live_by_tuple.entry(tuple).or_default().insert(token.position);
        self.live.insert(token.position, token);
        Ok(())
    }

    /// O(k) scan of the live partition, ordered by `position` ascending —
    /// this order is the model's input sequence. Must not touch dead.
    pub fn get_all_live(&self) -> Vec<&Token> {
        self.live.values().collect()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Boolean existence probe against the live secondary index.
    pub fn is_chunk_live(&self, tuple: &ChunkTuple) -> bool {
        self.live_by_tuple
            .get(tuple)
            .is_some_and(|positions| !positions.is_empty())
    }

    /// Distinct chunk tuples with at least one live token, grouped by
    /// `(turn_id, role)`; used by the pruner's anchor-protection check.
    pub fn live_sentence_ids_for(&self, turn_id: u64, role: Role) -> Vec<u32> {
        self.live_by_tuple
            .keys()
            .filter(|t| t.turn_id == turn_id && t.role == role)
            .map(|t| t.sentence_id)
            .collect()
    }

    pub fn live_chunk_tuples(&self) -> impl Iterator<Item = &ChunkTuple> {
        self.live_by_tuple
            .iter()
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(tuple, _)| tuple)
    }

    // ---- dead partition --------------------------------------------------

    /// Indexed lookup returning all dead tokens of a chunk.
    pub fn get_dead_tokens_by_chunk(&self, tuple: &ChunkTuple) -> Vec<&Token> {
        self.dead_by_tuple
            .get(tuple)
            .into_iter()
            .flatten()
            .filter_map(|pos| self.dead.get(pos))
            .collect()
    }

    // ---- chunk-level derived metadata ------------------------------------

    pub fn chunk_token_count(&self, tuple: &ChunkTuple) -> usize {
        let live_n = self.live_by_tuple.get(tuple).map_or(0, |s| s.len());
        let dead_n = self.dead_by_tuple.get(tuple).map_or(0, |s| s.len());
        live_n + dead_n
    }

    /// Reconstruct a chunk's text from its tokens (live and dead), ordered
    /// by position. Used by the semantic index to embed and by the
    /// resurrector's cost accounting's text-length proxy.
    pub fn chunk_text(&self, tuple: &ChunkTuple) -> Option<String> {
        let mut positions: Vec<u64> = Vec::new();
        if let Some(s) = self.live_by_tuple.get(tuple) {
            positions.extend(s.iter().copied());
        }
        if let Some(s) = self.dead_by_tuple.get(tuple) {
            positions.extend(s.iter().copied());
        }
        if positions.is_empty() {
            return None;
        }
        positions.sort_unstable();
        let mut out = String::new();
        for pos in positions {
            if let Some(tok) = self.live.get(&pos).or_else(|| self.dead.get(&pos)) {
                out.push_str(&tok.text);
            }
        }
        Some(out)
    }

    pub fn chunk_summary(&self, tuple: &ChunkTuple) -> Option<ChunkSummary> {
        let live_positions = self.live_by_tuple.get(tuple);
        let dead_positions = self.dead_by_tuple.get(tuple);
        let token_count = live_positions.map_or(0, |s| s.len()) + dead_positions.map_or(0, |s| s.len());
        if token_count == 0 {
            return None;
        }

        let mut peak_brightness = i64::MIN;
        let mut pinned = false;
        if let Some(positions) = live_positions {
            for pos in positions {
                if let Some(tok) = self.live.get(pos) {
                    peak_brightness = peak_brightness.max(tok.brightness);
                    pinned |= tok.pinned;
                }
            }
        }

        let mut peak_brightness_at_deletion = None;
        if let Some(positions) = dead_positions {
            for pos in positions {
                if let Some(tok) = self.dead.get(pos) {
                    pinned |= tok.pinned;
                    if let Some(bad) = tok.brightness_at_deletion {
                        peak_brightness_at_deletion =
                            Some(peak_brightness_at_deletion.map_or(bad, |cur: i64| cur.max(bad)));
                    }
                }
            }
        }

        let fully_deleted = live_positions.is_none_or(|s| s.is_empty());

        Some(ChunkSummary {
            tuple: *tuple,
            token_count,
            peak_brightness,
            peak_brightness_at_deletion,
            pinned,
            fully_deleted,
        })
    }

    // ---- mutation: pruning / resurrection --------------------------------

    /// Atomic: every live token of `tuple` moves to dead, its `brightness`
    /// snapshotted into `brightness_at_deletion`.
    pub fn prune_chunk(&mut self, tuple: &ChunkTuple) -> Result<usize, StoreError> {
        let positions: Vec<u64> = match self.live_by_tuple.get(tuple) {
            Some(s) if !s.is_empty() => s.iter().copied().collect(),
            _ => return Err(StoreError::UnknownChunk(*tuple)),
        };

        for pos in &positions {
            let mut token = self
                .live
                .remove(pos)
                .ok_or_else(|| StoreError::Inconsistent(format!("dangling live index at {pos}")))?;
            token.brightness_at_deletion = Some(token.brightness);
            token.deleted = true;
            self.dead_by_tuple.entry(*tuple).or_default().insert(*pos);
            self.dead.insert(*pos, token);
        }
        self.live_by_tuple.remove(tuple);
        info!(?tuple, count = positions.len(), "pruned chunk");
        Ok(positions.len())
    }

    /// Atomic: every dead token of `tuple` moves to live, brightness set
    /// per `policy`.
    pub fn resurrect_chunk(
        &mut self,
        tuple: &ChunkTuple,
        policy: ResurrectionPolicy,
    ) -> Result<usize, StoreError> {
        let positions: Vec<u64> = match self.dead_by_tuple.get(tuple) {
            Some(s) if !s.is_empty() => s.iter().copied().collect(),
            _ => return Err(StoreError::UnknownChunk(*tuple)),
        };

        for pos in &positions {
            let mut token = self
                .dead
                .remove(pos)
                .ok_or_else(|| StoreError::Inconsistent(format!("dangling dead index at {pos}")))?;
            token.deleted = false;
            token.brightness = match policy {
                ResurrectionPolicy::Semantic { b0 } => token.brightness_at_deletion.unwrap_or(b0),
                ResurrectionPolicy::Manual { b_cap } => {
                    token.pinned = true;
                    b_cap
                }
            };
            self.live_by_tuple.entry(*tuple).or_default().insert(*pos);
            self.live.insert(*pos, token);
        }
        self.dead_by_tuple.remove(tuple);

        if let Some(entry) = self.semantic_entries.get_mut(tuple) {
            entry.reference_count += 1;
        }

        info!(?tuple, count = positions.len(), ?policy, "resurrected chunk");
        Ok(positions.len())
    }

    /// Bulk in-place update, live partition only.
    pub fn update_brightness_batch(&mut self, updates: &[(u64, i64)]) -> Result<(), StoreError> {
        for &(position, value) in updates {
            match self.live.get_mut(&position) {
                Some(tok) => tok.brightness = value,
                None => {
                    warn!(position, "brightness update for non-live position ignored");
                }
            }
        }
        Ok(())
    }

    /// Toggle `pinned` on every token of a chunk.
    pub fn set_pinned(&mut self, tuple: &ChunkTuple, pinned: bool) -> Result<(), StoreError> {
        let mut touched = false;
        if let Some(positions) = self.live_by_tuple.get(tuple) {
            for pos in positions {
                if let Some(tok) = self.live.get_mut(pos) {
                    tok.pinned = pinned;
                    touched = true;
                }
            }
        }
        if let Some(positions) = self.dead_by_tuple.get(tuple) {
            for pos in positions {
                if let Some(tok) = self.dead.get_mut(pos) {
                    tok.pinned = pinned;
                    touched = true;
                }
            }
        }
        if touched {
            Ok(())
        } else {
            Err(StoreError::UnknownChunk(*tuple))
        }
    }

    // ---- semantic entries -------------------------------------------------

    /// Unique on tuple: replaces embedding/text/token_count if it exists,
    /// preserves identity and `reference_count`.
    pub fn upsert_semantic_entry(
        &mut self,
        tuple: ChunkTuple,
        text: String,
        token_count: usize,
        embedding: Option<Vec<f32>>,
    ) {
        self.semantic_entries
            .entry(tuple)
            .and_modify(|e| {
                e.text = text.clone();
                e.token_count = token_count;
                e.embedding = embedding.clone();
            })
            .or_insert(SemanticEntry {
                tuple,
                text,
                token_count,
                embedding,
                reference_count: 0,
            });
    }

    pub fn semantic_entry(&self, tuple: &ChunkTuple) -> Option<&SemanticEntry> {
        self.semantic_entries.get(tuple)
    }

    pub fn semantic_entries(&self) -> impl Iterator<Item = &SemanticEntry> {
        self.semantic_entries.values()
    }

    // ---- stats / export / import ------------------------------------------

    pub fn stats(&self) -> StoreStats {
        let brightness: Vec<i64> = self.live.values().map(|t| t.brightness).collect();
        let (min, max, mean) = if brightness.is_empty() {
            (None, None, None)
        } else {
            let min = *brightness.iter().min().unwrap();
            let max = *brightness.iter().max().unwrap();
            let mean = brightness.iter().sum::<i64>() as f64 / brightness.len() as f64;
            (Some(min), Some(max), Some(mean))
        };
        StoreStats {
            live_count: self.live.len(),
            dead_count: self.dead.len(),
            entry_count: self.semantic_entries.len(),
            live_brightness_min: min,
            live_brightness_max: max,
            live_brightness_mean: mean,
        }
    }

    pub fn export(&self) -> ExportedState {
        ExportedState {
            live: self.live.values().cloned().collect(),
            dead: self.dead.values().cloned().collect(),
            semantic_entries: self.semantic_entries.values().cloned().collect(),
            metadata: self.metadata.clone(),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn import(&mut self, state: ExportedState) -> Result<(), StoreError> {
        self.clear();
        for token in state.live {
            let tuple = token.tuple();
            self.live_by_tuple.entry(tuple).or_default().insert(token.position);
            self.live.insert(token.position, token);
        }
        for token in state.dead {
            let tuple = token.tuple();
            self.dead_by_tuple.entry(tuple).or_default().insert(token.position);
            self.dead.insert(token.position, token);
        }
        for entry in state.semantic_entries {
            self.semantic_entries.insert(entry.tuple, entry);
        }
        self.metadata = state.metadata;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Role;

    fn tok(position: u64, turn_id: u64, sentence_id: u32, role: Role, brightness: i64) -> Token {
        Token {
            position,
            token_id: position as u32,
            text: format!("t{position}"),
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
    fn append_and_read_back_in_position_order() {
        let mut store = TokenStore::new();
        store.append_live(tok(2, 1, 0, Role::User, 100)).unwrap();
        store.append_live(tok(0, 1, 0, Role::User, 100)).unwrap();
        store.append_live(tok(1, 1, 0, Role::User, 100)).unwrap();
        let positions: Vec<u64> = store.get_all_live().iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn prune_then_resurrect_restores_same_positions_and_brightness() {
        let mut store = TokenStore::new();
        let tuple = ChunkTuple::new(1, 0, Role::User);
        store.append_live(tok(0, 1, 0, Role::User, 7321)).unwrap();
        store.append_live(tok(1, 1, 0, Role::User, 7000)).unwrap();

        store.prune_chunk(&tuple).unwrap();
        assert!(!store.is_chunk_live(&tuple));
        assert_eq!(store.get_dead_tokens_by_chunk(&tuple).len(), 2);

        store
            .resurrect_chunk(&tuple, ResurrectionPolicy::Semantic { b0: 10_000 })
            .unwrap();
        assert!(store.is_chunk_live(&tuple));
        let live_positions: BTreeSet<u64> = store.get_all_live().iter().map(|t| t.position).collect();
        assert_eq!(live_positions, BTreeSet::from([0, 1]));

        let restored: HashMap<u64, i64> = store
            .get_all_live()
            .into_iter()
            .map(|t| (t.position, t.brightness))
            .collect();
        assert_eq!(restored[&0], 7321);
        assert_eq!(restored[&1], 7000);
    }

    #[test]
    fn manual_resurrection_pins_and_caps() {
        let mut store = TokenStore::new();
        let tuple = ChunkTuple::new(1, 0, Role::User);
        store.append_live(tok(0, 1, 0, Role::User, 5000)).unwrap();
        store.prune_chunk(&tuple).unwrap();
        store
            .resurrect_chunk(&tuple, ResurrectionPolicy::Manual { b_cap: 10_000 })
            .unwrap();
        let token = store.get_all_live().into_iter().next().unwrap();
        assert_eq!(token.brightness, 10_000);
        assert!(token.pinned);
    }

    #[test]
    fn export_import_round_trip() {
        let mut store = TokenStore::new();
        store.append_live(tok(0, 0, 0, Role::System, 10_000)).unwrap();
        store.append_live(tok(1, 1, 0, Role::User, 10_000)).unwrap();
        let tuple = ChunkTuple::new(1, 0, Role::User);
        store.prune_chunk(&tuple).unwrap();
        store.upsert_semantic_entry(tuple, "hi".into(), 1, Some(vec![0.1, 0.2]));
        store.allocate_position();
        store.allocate_turn();

        let exported = store.export();
        let mut restored = TokenStore::new();
        restored.import(exported).unwrap();

        assert_eq!(restored.stats().live_count, store.stats().live_count);
        assert_eq!(restored.stats().dead_count, store.stats().dead_count);
        assert_eq!(restored.stats().entry_count, store.stats().entry_count);
        assert_eq!(
            restored.get_metadata().next_position,
            store.get_metadata().next_position
        );
    }

    #[test]
    fn chunk_text_reconstructs_in_position_order_across_partitions() {
        let mut store = TokenStore::new();
        let tuple = ChunkTuple::new(1, 0, Role::User);
        store.append_live(tok(0, 1, 0, Role::User, 100)).unwrap();
        store.append_live(tok(1, 1, 0, Role::User, 100)).unwrap();
        store.prune_chunk(&ChunkTuple::new(1, 0, Role::User)).unwrap();
        store.append_live(tok(2, 1, 0, Role::User, 100)).unwrap();
        // position 2 re-adds to the same tuple after the rest was pruned;
        // chunk_text must still read both partitions in position order.
        assert_eq!(store.chunk_text(&tuple).unwrap(), "t0t1t2");
    }
}
