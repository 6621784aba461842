use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetch::FetchConfig;

/// Runtime settings, taken from the command line with environment fallbacks.
#[derive(Parser, Debug, Clone)]
#[command(name = "clip-search", about = "Semantic image search over HTTP")]
pub struct Settings {
    /// Model id, used as the cache sub folder and Hugging Face repository.
    #[arg(long, env = "CLIP_MODEL", default_value = "timm/vit_base_patch32_clip_224.openai")]
    pub model: String,
    /// Directory with an exported model, skips cache lookup and download.
    #[arg(long, env = "CLIP_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    pub port: u16,
    /// ONNX Runtime intra-op threads, defaults to the number of CPUs.
    #[arg(long, env = "CLIP_THREADS")]
    pub threads: Option<usize>,
    #[arg(long, env = "DOWNLOAD_WORKERS", default_value_t = 5)]
    pub download_workers: usize,
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 15)]
    pub fetch_timeout_secs: u64,
    /// Downloaded images larger than this on either side are downscaled.
    #[arg(long, env = "MAX_IMAGE_SIZE", default_value_t = 512)]
    pub max_image_size: u32,
    #[arg(long, env = "TEXT_CACHE_SIZE", default_value_t = 1024)]
    pub text_cache_size: usize,
    #[arg(long, env = "MAX_SEARCH_FILES", default_value_t = 30)]
    pub max_search_files: usize,
}

impl Settings {
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig {
            workers: self.download_workers.max(1),
            timeout: Duration::from_secs(self.fetch_timeout_secs),
            max_dimension: self.max_image_size,
            ..FetchConfig::default()
        }
    }
}
