//! Integration tests reproducing cross-module scenarios: semantic vs.
//! manual resurrection brightness, full persistence round-trips, and
//! system-root pruning immunity.

use brightweave::store::{ExportedState, ResurrectionPolicy, TokenStore};
use brightweave::token::{ChunkTuple, Role, Token};
use pretty_assertions::assert_eq;

fn tok(position: u64, turn_id: u64, sentence_id: u32, role: Role, brightness: i64) -> Token {
    Token {
        position,
        token_id: position as u32,
        text: format!("word{position} "),
        turn_id,
        sentence_id,
        role,
        brightness,
        deleted: false,
        brightness_at_deletion: None,
        pinned: false,
    }
}

/// Scenario E — Semantic vs manual resurrection brightness.
#[test]
fn scenario_e_semantic_vs_manual_resurrection_brightness() {
    let tuple = ChunkTuple::new(1, 0, Role::User);

    let mut semantic_store = TokenStore::new();
    semantic_store.append_live(tok(0, 1, 0, Role::User, 7321)).unwrap();
    semantic_store.prune_chunk(&tuple).unwrap();
    semantic_store
        .resurrect_chunk(&tuple, ResurrectionPolicy::Semantic { b0: 10_000 })
        .unwrap();
    let restored = semantic_store.get_all_live().into_iter().next().unwrap();
    assert_eq!(restored.brightness, 7321);
    assert!(!restored.pinned);

    let mut manual_store = TokenStore::new();
    manual_store.append_live(tok(0, 1, 0, Role::User, 7321)).unwrap();
    manual_store.prune_chunk(&tuple).unwrap();
    manual_store
        .resurrect_chunk(&tuple, ResurrectionPolicy::Manual { b_cap: 10_000 })
        .unwrap();
    let restored = manual_store.get_all_live().into_iter().next().unwrap();
    assert_eq!(restored.brightness, 10_000);
    assert!(restored.pinned);
}

/// Scenario F — Persistence round-trip.
#[test]
fn scenario_f_persistence_round_trip() {
    let mut store = TokenStore::new();
    let mut position = 0u64;

    // 5 turns: system root, then two user/assistant pairs.
    for turn_id in [0u64, 1, 2, 3, 4] {
        let role = if turn_id == 0 {
            Role::System
        } else if turn_id % 2 == 1 {
            Role::User
        } else {
            Role::Assistant
        };
        store.append_live(tok(position, turn_id, 0, role, 10_000)).unwrap();
        position += 1;
    }

    store.prune_chunk(&ChunkTuple::new(1, 0, Role::User)).unwrap();
    store.prune_chunk(&ChunkTuple::new(2, 0, Role::Assistant)).unwrap();

    for (turn_id, role) in [(3, Role::User), (4, Role::Assistant), (0, Role::System)] {
        let tuple = ChunkTuple::new(turn_id, 0, role);
        let text = store.chunk_text(&tuple).unwrap();
        let count = store.chunk_token_count(&tuple);
        store.upsert_semantic_entry(tuple, text, count, Some(vec![0.1, 0.2, 0.3]));
    }

    let live_positions_before: Vec<u64> = store.get_all_live().iter().map(|t| t.position).collect();
    let dead_positions_before: Vec<u64> = store
        .get_dead_tokens_by_chunk(&ChunkTuple::new(1, 0, Role::User))
        .iter()
        .chain(store.get_dead_tokens_by_chunk(&ChunkTuple::new(2, 0, Role::Assistant)).iter())
        .map(|t| t.position)
        .collect();
    let next_position_before = store.get_metadata().next_position;

    // "shut down" — serialize, then rebuild a fresh store from the backup.
    let exported: ExportedState = store.export();
    let json = serde_json::to_string(&exported).expect("serialize exported state");

    let mut reopened = TokenStore::new();
    let restored_state: ExportedState = serde_json::from_str(&json).expect("deserialize exported state");
    reopened.import(restored_state).unwrap();

    let live_positions_after: Vec<u64> = reopened.get_all_live().iter().map(|t| t.position).collect();
    assert_eq!(live_positions_after, live_positions_before);

    let dead_positions_after: Vec<u64> = reopened
        .get_dead_tokens_by_chunk(&ChunkTuple::new(1, 0, Role::User))
        .iter()
        .chain(
            reopened
                .get_dead_tokens_by_chunk(&ChunkTuple::new(2, 0, Role::Assistant))
                .iter(),
        )
        .map(|t| t.position)
        .collect();
    assert_eq!(dead_positions_after, dead_positions_before);

    assert_eq!(reopened.get_metadata().next_position, next_position_before);
    assert_eq!(reopened.stats().entry_count, 3);
    assert_eq!(reopened.stats().live_count, store.stats().live_count);
    assert_eq!(reopened.stats().dead_count, store.stats().dead_count);
}

/// Invariant 8 — the system root is never automatically prunable, enforced
/// end to end across prune + resurrect cycles.
#[test]
fn system_root_survives_aggressive_pruning() {
    use brightweave::pruner::Pruner;

    let mut store = TokenStore::new();
    store.append_live(tok(0, 0, 0, Role::System, 1)).unwrap();
    store.append_live(tok(1, 5, 0, Role::User, 2)).unwrap();
    Pruner::new().run(&mut store, 99, 0);

    assert!(store.is_chunk_live(&ChunkTuple::new(0, 0, Role::System)));
}

/// A user turn's anchor chunk must be indexed once its turn closes, the
/// same as the assistant's — a short message that never crosses an
/// internal boundary only has its anchor sentence to index.
#[tokio::test]
async fn user_anchor_is_indexed_once_turn_completes() {
    use async_trait::async_trait;
    use brightweave::config::BrightweaveConfig;
    use brightweave::controller::SessionController;
    use brightweave::error::{ControllerError, IndexError};
    use brightweave::external::{
        AttentionPayload, EmbeddingService, GenerationEvent, TokenizedPiece, Tokenizer,
    };

    struct WhitespaceTokenizer;
    #[async_trait]
    impl Tokenizer for WhitespaceTokenizer {
        async fn tokenize(&self, text: &str) -> Result<Vec<TokenizedPiece>, ControllerError> {
            Ok(text
                .split_inclusive(' ')
                .enumerate()
                .map(|(i, piece)| TokenizedPiece {
                    token_id: i as u32,
                    text: piece.to_string(),
                })
                .collect())
        }
    }

    struct FakeEmbedding;
    #[async_trait]
    impl EmbeddingService for FakeEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
            Ok(vec![1.0, 0.0])
        }
        fn dimension(&self) -> usize {
            2
        }
    }

    let tokenizer = WhitespaceTokenizer;
    let embedder = FakeEmbedding;
    let mut controller = SessionController::new(BrightweaveConfig::default());

    controller
        .seed_system_prompt("be terse", &tokenizer)
        .await
        .unwrap();
    controller.begin_turn(2, "hi there", &embedder).await.unwrap();
    controller.ingest_user_message("hi there", &tokenizer).await.unwrap();

    let events = tokio_stream::iter(vec![
        GenerationEvent::Token {
            token_id: 0,
            text: "hey ".to_string(),
            attention: AttentionPayload::PreAggregated(vec![0.5, 0.5]),
        },
        GenerationEvent::Done,
    ]);
    controller.stream_generation(events).await.unwrap();
    controller.finalize_turn(&embedder).await.unwrap();

    let user_anchor = ChunkTuple::new(1, 0, Role::User);
    assert!(controller.store().semantic_entry(&user_anchor).is_some());
}
