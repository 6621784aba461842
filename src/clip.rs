use crate::config::ModelConfig;
use crate::error::Result;
use crate::model_manager::{get_default_base_folder, resolve_model_dir};
use crate::onnx::OnnxSession;
use crate::text::TextEmbedder;
use crate::vision::VisionEmbedder;
use image::DynamicImage;
use ndarray::{Array1, Array2, Array3, Array4};
use std::path::Path;

/// An opaque vision-language model: anything that can turn images and text
/// into embeddings living in the same space.
pub trait Embedder: Send + Sync {
    /// Convert one decoded image into the model's `[3, S, S]` input.
    fn preprocess(&self, image: &DynamicImage) -> Result<Array3<f32>>;

    /// Raw `[N, D]` embeddings for a preprocessed `[N, 3, S, S]` batch.
    fn encode_images(&mut self, batch: Array4<f32>) -> Result<Array2<f32>>;

    /// Raw `[D]` embedding for one text.
    fn encode_text(&mut self, text: &str) -> Result<Array1<f32>>;

    /// Where inference runs, e.g. `cpu` or `cuda`.
    fn device(&self) -> &str;
}

/// A convenience wrapper that holds both a `VisionEmbedder` and a `TextEmbedder`.
pub struct Clip {
    pub vision: VisionEmbedder,
    pub text: TextEmbedder,
}

impl Clip {
    /// Load both embedders from an exported model directory.
    pub fn new(model_dir: &Path, threads: Option<usize>) -> Result<Self> {
        let config = ModelConfig::from_file(model_dir.join("model_config.json"))?;
        let vision = VisionEmbedder::new(model_dir, config.clone(), threads)?;
        let text = TextEmbedder::new(model_dir, config, threads)?;
        Ok(Self { vision, text })
    }

    /// Resolve `model_id` (explicit dir, local cache, then the Hub) and load it.
    pub fn from_model_id(
        model_id: &str,
        model_dir: Option<&Path>,
        threads: Option<usize>,
    ) -> Result<Self> {
        let dir = resolve_model_dir(model_id, model_dir, &get_default_base_folder())?;
        tracing::info!("Loading model '{model_id}' from {}", dir.display());
        Self::new(&dir, threads)
    }
}

impl Embedder for Clip {
    fn preprocess(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        self.vision.preprocess(image)
    }

    fn encode_images(&mut self, batch: Array4<f32>) -> Result<Array2<f32>> {
        self.vision.embed_batch(batch)
    }

    fn encode_text(&mut self, text: &str) -> Result<Array1<f32>> {
        self.text.embed_text(text)
    }

    fn device(&self) -> &str {
        OnnxSession::device()
    }
}
