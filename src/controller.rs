//! `SessionController`: orchestrates the per-turn state machine.
//!
//! resurrect -> ingest user -> stream generate -> score -> prune -> index,
//! the way a single-threaded cooperative task would drive it: blocking I/O
//! yields at well-defined points, and prune/resurrect never overlap
//! streaming.

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, info};

use crate::aggregator::AttentionAggregator;
use crate::chunk::ChunkBoundaryTracker;
use crate::config::BrightweaveConfig;
use crate::error::{ControllerError, StoreError};
use crate::external::{EmbeddingService, GenerationEvent, Tokenizer};
use crate::pruner::Pruner;
use crate::resurrector::Resurrector;
use crate::scorer::{BrightnessScorer, LiveTokenView};
use crate::semantic_index::SemanticIndex;
use crate::store::{ResurrectionPolicy, StoreStats, TokenStore};
use crate::token::{ChunkTuple, Role, Token};

/// Boundary between the store's internal error taxonomy and this engine's
/// public surface. `StoreError::Inconsistent` indicates a broken invariant
/// rather than a recoverable condition, so it never reaches a caller as a
/// `Result::Err` — it panics here instead.
fn store_ok<T>(result: Result<T, StoreError>) -> Result<T, ControllerError> {
    match result {
        Err(StoreError::Inconsistent(msg)) => panic!("token store invariant violated: {msg}"),
        other => Ok(other?),
    }
}

/// The five states of the per-turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Ingesting,
    Streaming,
    Finalizing,
}

/// Orchestrates one user turn end to end.
pub struct SessionController {
    config: BrightweaveConfig,
    store: TokenStore,
    aggregator: AttentionAggregator,
    scorer: BrightnessScorer,
    pruner: Pruner,
    index: SemanticIndex,
    resurrector: Resurrector,
    state: ControllerState,
    /// Turn id currently being written to (user ingest, then assistant
    /// stream); immune to scoring/pruning while active.
    current_turn_id: u64,
    tracker: ChunkBoundaryTracker,
    /// Chunk tuples that newly closed out during this turn and have not yet
    /// been indexed.
    pending_index: Vec<ChunkTuple>,
}

impl SessionController {
    pub fn new(config: BrightweaveConfig) -> Self {
        let mut store = TokenStore::new();
        // turn 0 is reserved for the system root; seed next_turn past it so
        // the first user turn is turn 1.
        if store.get_metadata().next_turn == 0 {
            store.allocate_turn();
        }
        Self {
            config,
            store,
            aggregator: AttentionAggregator::new(),
            scorer: BrightnessScorer::new(),
            pruner: Pruner::new(),
            index: SemanticIndex::new(),
            resurrector: Resurrector::new(),
            state: ControllerState::Idle,
            current_turn_id: 0,
            tracker: ChunkBoundaryTracker::new(64, 10, 0, Role::System),
            pending_index: Vec::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Seed the system prompt as turn 0. Must be called at most once, before
    /// the first user turn.
    pub async fn seed_system_prompt(
        &mut self,
        text: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<(), ControllerError> {
        let pieces = tokenizer.tokenize(text).await?;
        let mut tracker = ChunkBoundaryTracker::new(
            self.config.chunking.min_chunk_tokens,
            self.config.chunking.rolling_buffer_chars,
            0,
            Role::System,
        );
        for piece in pieces {
            let outcome = tracker.feed(&piece.text);
            let position = self.store.allocate_position();
            let token = Token::new(position, piece.token_id, piece.text, 0, outcome.sentence_id, Role::System, self.config.brightness.b0);
            store_ok(self.store.append_live(token))?;
        }
        Ok(())
    }

    /// `Idle --send(user_text)--> Ingesting`: compute the resurrection
    /// budget `R` and run the resurrector.
    pub async fn begin_turn(
        &mut self,
        user_text_estimate_tokens: usize,
        query_for_resurrection: &str,
        embed_svc: &dyn EmbeddingService,
    ) -> Result<Vec<ChunkTuple>, ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Idle);

        let max_context = self.config.pruning.max_active_tokens;
        let r = max_context
            .saturating_sub(self.store.live_count())
            .saturating_sub(user_text_estimate_tokens)
            .saturating_sub(self.config.resurrection.generation_reserve);

        let resurrected = self
            .resurrector
            .run(
                &mut self.store,
                &self.index,
                embed_svc,
                query_for_resurrection,
                r,
                self.config.brightness.b0,
                self.config.semantic.top_k,
            )
            .await?;

        self.state = ControllerState::Ingesting;
        info!(r, resurrected_count = resurrected.len(), "turn begun");
        Ok(resurrected)
    }

    /// `Ingesting`: tokenize user_text, append live tokens, advance
    /// `turn_id` so the assistant's stream lands in the following turn:
    /// user turn N, assistant turn N+1.
    pub async fn ingest_user_message(
        &mut self,
        user_text: &str,
        tokenizer: &dyn Tokenizer,
    ) -> Result<(), ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Ingesting);

        let user_turn = self.store.allocate_turn();
        self.tracker.reset_for(user_turn, Role::User);
        let pieces = tokenizer.tokenize(user_text).await?;
        for piece in pieces {
            let outcome = self.tracker.feed(&piece.text);
            if outcome.boundary_crossed {
                self.pending_index
                    .push(ChunkTuple::new(user_turn, outcome.sentence_id, Role::User));
            }
            let position = self.store.allocate_position();
            let token = Token::new(
                position,
                piece.token_id,
                piece.text,
                user_turn,
                outcome.sentence_id,
                Role::User,
                self.config.brightness.b0,
            );
            store_ok(self.store.append_live(token))?;
        }

        self.pending_index
            .push(ChunkTuple::new(user_turn, self.tracker.current_sentence_id(), Role::User));

        let assistant_turn = self.store.allocate_turn();
        self.current_turn_id = assistant_turn;
        self.tracker.reset_for(assistant_turn, Role::Assistant);
        self.state = ControllerState::Streaming;
        Ok(())
    }

    /// `Streaming`: consume the generation stream. Each token event appends
    /// a live token, aggregates attention, and scores synchronously before
    /// the next event is processed. A stream that ends early (aborted) is
    /// treated as a normal `done` for state-machine purposes.
    pub async fn stream_generation(
        &mut self,
        mut events: impl Stream<Item = GenerationEvent> + Unpin,
    ) -> Result<(), ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Streaming);

        while let Some(event) = events.next().await {
            match event {
                GenerationEvent::Token {
                    token_id,
                    text,
                    attention,
                } => {
                    let outcome = self.tracker.feed(&text);
                    if outcome.boundary_crossed {
                        self.pending_index.push(ChunkTuple::new(
                            self.current_turn_id,
                            outcome.sentence_id,
                            Role::Assistant,
                        ));
                    }
                    let position = self.store.allocate_position();
                    let token = Token::new(
                        position,
                        token_id,
                        text,
                        self.current_turn_id,
                        outcome.sentence_id,
                        Role::Assistant,
                        self.config.brightness.b0,
                    );
                    store_ok(self.store.append_live(token))?;

                    let a = self.aggregator.aggregate(&attention)?;
                    let live: Vec<LiveTokenView> = self
                        .store
                        .get_all_live()
                        .into_iter()
                        .map(|t| LiveTokenView {
                            position: t.position,
                            turn_id: t.turn_id,
                            brightness: t.brightness,
                        })
                        .collect();
                    let updates =
                        self.scorer
                            .compute_updates(&a, &live, self.current_turn_id, self.config.brightness.b_cap);
                    // fire-and-forget during streaming: a real backend would
                    // enqueue this rather than block on it. The mandatory
                    // flush happens at finalize().
                    store_ok(self.store.update_brightness_batch(&updates))?;
                }
                GenerationEvent::Done => break,
            }
        }

        self.current_turn_id = self.store.allocate_turn();
        self.state = ControllerState::Finalizing;
        Ok(())
    }

    /// `Finalizing`: index newly-closed chunks, flush brightness (no-op in
    /// this in-memory store beyond the metadata timestamp touch), then run
    /// the pruner.
    pub async fn finalize_turn(&mut self, embed_svc: &dyn EmbeddingService) -> Result<(), ControllerError> {
        debug_assert_eq!(self.state, ControllerState::Finalizing);

        let completed_turn = self.current_turn_id.saturating_sub(1);
        // the active assistant chunk (still open when streaming ended) is
        // also a newly-existent tuple worth indexing once the turn closes.
        self.pending_index
            .push(ChunkTuple::new(completed_turn, self.tracker.current_sentence_id(), Role::Assistant));
        self.pending_index.sort_unstable();
        self.pending_index.dedup();

        for tuple in std::mem::take(&mut self.pending_index) {
            if self.store.chunk_token_count(&tuple) == 0 {
                continue;
            }
            match self
                .index
                .index_chunk(&mut self.store, tuple, embed_svc, self.config.semantic.max_context_tokens)
                .await
            {
                Ok(()) => {}
                Err(err) => debug!(?tuple, %err, "deferring embedding for this turn"),
            }
        }

        self.store.save_metadata();
        self.pruner.run(&mut self.store, completed_turn, self.config.pruning.max_active_tokens);

        self.state = ControllerState::Idle;
        Ok(())
    }

    pub fn pin(&mut self, tuple: ChunkTuple) -> Result<(), ControllerError> {
        store_ok(self.store.set_pinned(&tuple, true))?;
        Ok(())
    }

    pub fn unpin(&mut self, tuple: ChunkTuple) -> Result<(), ControllerError> {
        store_ok(self.store.set_pinned(&tuple, false))?;
        Ok(())
    }

    /// Manual resurrection via the control surface: brightness set to cap
    /// and the chunk pinned, unlike the semantic path.
    pub fn resurrect_manual(&mut self, tuple: ChunkTuple) -> Result<(), ControllerError> {
        store_ok(self.store.resurrect_chunk(
            &tuple,
            ResurrectionPolicy::Manual {
                b_cap: self.config.brightness.b_cap,
            },
        ))?;
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn export(&self) -> crate::store::ExportedState {
        self.store.export()
    }

    pub fn import(&mut self, state: crate::store::ExportedState) -> Result<(), ControllerError> {
        store_ok(self.store.import(state))?;
        self.state = ControllerState::Idle;
        Ok(())
    }

    /// Full backup serialization of `export()`, as JSON.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.export())
    }

    /// Restore from a JSON backup produced by [`Self::export_json`].
    pub fn import_json(&mut self, json: &str) -> Result<(), ControllerError> {
        let state: crate::store::ExportedState =
            serde_json::from_str(json).map_err(|e| ControllerError::Store(StoreError::Storage(e.to_string())))?;
        self.import(state)
    }
}
