use clap::Parser;
use clip_search::{server, Clip, ImageFetcher, SearchEngine, Settings};
use color_eyre::eyre::{Result, WrapErr};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::parse();

    let model_id = settings.model.clone();
    let model_dir = settings.model_dir.clone();
    let threads = settings.threads;
    let clip = tokio::task::spawn_blocking(move || {
        Clip::from_model_id(&model_id, model_dir.as_deref(), threads)
    })
    .await?
    .wrap_err_with(|| format!("Failed to load CLIP model '{}'", settings.model))?;

    let engine = SearchEngine::new(
        Box::new(clip),
        ImageFetcher::new(settings.fetch_config())?,
        settings.text_cache_size,
        settings.max_search_files,
    );
    tracing::info!(
        "CLIP model '{}' loaded on {}, {} download workers",
        settings.model,
        engine.device(),
        settings.download_workers
    );

    server::serve(Arc::new(engine), &settings.bind_addr()).await?;
    Ok(())
}
