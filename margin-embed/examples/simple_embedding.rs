//! Generate embeddings with the local FastEmbed model and compare them

use margin_embed::{EmbedConfig, Embedder, FastEmbedProvider};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = EmbedConfig::default().with_show_download_progress(true);
    println!("Loading model {} ...", config.model_name());

    let provider = FastEmbedProvider::create(config).await?;
    println!(
        "Provider {} ready, dimension {}",
        provider.provider_name(),
        provider.dimension()
    );

    let query = provider.embed("query: when is the budget review?").await?;

    let passages = vec![
        "passage: The quarterly budget review is on Thursday.".to_string(),
        "passage: Remember to water the plants.".to_string(),
        "passage: Finance wants the spending report before the review.".to_string(),
    ];
    let result = provider.embed_batch(&passages).await?;

    for (text, embedding) in passages.iter().zip(result.embeddings.iter()) {
        let similarity: f32 = query
            .iter()
            .zip(embedding.iter())
            .map(|(a, b)| a.to_f32() * b.to_f32())
            .sum();
        println!("{similarity:.3}  {text}");
    }

    Ok(())
}
