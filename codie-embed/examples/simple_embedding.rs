//! Embed a few texts through the batching client.
//!
//! Uses the OpenAI-compatible endpoint when `OPENAI_API_KEY` is set, and the
//! deterministic mock provider otherwise.

use codie_embed::{EmbedConfig, EmbeddingClient, MockProvider, RateLimiter};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
    let config = EmbedConfig::new(api_key).with_batch_size(2);

    let client = if config.has_credential() {
        EmbeddingClient::from_config(&config)?
    } else {
        println!("OPENAI_API_KEY not set, using the mock provider");
        EmbeddingClient::new(
            Arc::new(MockProvider::new(8)),
            Arc::new(RateLimiter::new(config.rate_limit)),
            &config,
        )
    };

    println!("Client: {client:?}");

    let embedding = client.embed_one("fn main() { println!(\"hi\"); }").await?;
    println!("Single embedding dimension: {}", embedding.len());

    let texts = vec![
        "Rust is a systems programming language.".to_string(),
        "   ".to_string(),
        "Embeddings map text to vectors.".to_string(),
    ];
    let batch = client.embed_batch(&texts, client.batch_size()).await?;
    println!(
        "Embedded {} of {} texts ({} skipped, {} lost)",
        batch.embedded(),
        texts.len(),
        batch.skipped,
        batch.lost
    );

    for (text, vector) in texts.iter().zip(&batch.vectors) {
        match vector {
            Some(v) => println!("  {:?}: first values {:?}", text, &v[..3.min(v.len())]),
            None => println!("  {:?}: no embedding", text),
        }
    }

    Ok(())
}
