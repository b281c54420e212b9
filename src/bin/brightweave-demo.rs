//! Thin demonstration binary: drives [`brightweave::SessionController`]
//! against synthetic tokenizer/embedding stubs so the engine's turn cycle
//! can be exercised from the command line.

use anyhow::Result;
use async_trait::async_trait;
use brightweave::config::BrightweaveConfig;
use brightweave::controller::SessionController;
use brightweave::error::{ControllerError, IndexError};
use brightweave::external::{EmbeddingService, TokenizedPiece, Tokenizer};
use clap::Parser;
use tracing_subscriber::{EnvFilter, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "brightweave-demo", about = "Exercise the brightweave context engine with a synthetic turn")]
struct Cli {
    /// Text of the user message to run through one turn.
    #[arg(default_value = "hello there, tell me about rust ownership")]
    user_text: String,

    /// Config file to load (falls back to defaults if absent).
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

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

/// Deterministic bag-of-characters embedding, purely for local
/// demonstration; never use this for anything beyond exercising the engine.
struct HashEmbedding {
    dim: usize,
}

#[async_trait]
impl EmbeddingService for HashEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let mut v = vec![0.0f32; self.dim];
        for (i, byte) in text.bytes().enumerate() {
            v[i % self.dim] += byte as f32;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::from_default_env();
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let _ = tracing_subscriber::registry().with(env_filter).with(fmt_layer).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BrightweaveConfig::load(path)?,
        None => BrightweaveConfig::default(),
    };

    let tokenizer = WhitespaceTokenizer;
    let embedder = HashEmbedding {
        dim: config.semantic.embedding_dim,
    };

    let mut controller = SessionController::new(config);
    controller
        .seed_system_prompt("you are a careful, terse assistant.", &tokenizer)
        .await?;

    let estimate = cli.user_text.split_whitespace().count();
    controller.begin_turn(estimate, &cli.user_text, &embedder).await?;
    controller.ingest_user_message(&cli.user_text, &tokenizer).await?;

    let reply = "ownership means every value has one owner, and it is freed when that owner goes out of scope.\n\n";
    let events = brightweave_demo_events(reply);
    controller.stream_generation(events).await?;
    controller.finalize_turn(&embedder).await?;

    let stats = controller.stats();
    println!("{stats:#?}");
    Ok(())
}

/// Builds a synthetic, fully pre-aggregated attention stream for `text`,
/// one token per whitespace-delimited word, so the demo needs no real
/// inference server.
fn brightweave_demo_events(
    text: &str,
) -> impl tokio_stream::Stream<Item = brightweave::external::GenerationEvent> + Unpin {
    use brightweave::external::{AttentionPayload, GenerationEvent};

    let words: Vec<String> = text.split_inclusive(' ').map(|s| s.to_string()).collect();
    let events: Vec<GenerationEvent> = words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            let c = i + 2; // BOS + prior assistant tokens so far
            let mut attention = vec![1.0 / c as f32; c];
            attention[0] = 0.5;
            GenerationEvent::Token {
                token_id: i as u32,
                text: word,
                attention: AttentionPayload::PreAggregated(attention),
            }
        })
        .chain(std::iter::once(GenerationEvent::Done))
        .collect();
    tokio_stream::iter(events)
}
