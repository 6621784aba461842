use crate::error::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

const OPENAI_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const OPENAI_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Describes how an exported model expects its inputs, read from `model_config.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub embed_dim: usize,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
    #[serde(default = "default_context_length")]
    pub context_length: usize,
    #[serde(default = "default_mean")]
    pub mean: [f32; 3],
    #[serde(default = "default_std")]
    pub std: [f32; 3],
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
    /// `squash` resizes straight to the target square, anything else resizes
    /// the shortest edge and center crops.
    #[serde(default = "default_resize_mode")]
    pub resize_mode: String,
    #[serde(default)]
    pub pad_id: Option<u32>,
    #[serde(default)]
    pub tokenizer_needs_lowercase: bool,
}

const fn default_image_size() -> u32 {
    224
}

const fn default_context_length() -> usize {
    77
}

const fn default_mean() -> [f32; 3] {
    OPENAI_MEAN
}

const fn default_std() -> [f32; 3] {
    OPENAI_STD
}

fn default_interpolation() -> String {
    "bicubic".to_owned()
}

fn default_resize_mode() -> String {
    "shortest".to_owned()
}

impl ModelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }
}
