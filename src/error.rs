use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ONNX error: {0}")]
    Onnx(#[from] ort::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
    #[error("Tokenization error: {0}")]
    Tokenizer(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Inference error: {0}")]
    Inference(String),
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("Hugging Face Hub error: {0}")]
    HfHub(String),
    #[error("Model folder not found: {0}")]
    ModelFolderNotFound(PathBuf),
    #[error("Model folder {model_dir} is missing {file}")]
    MissingModelFile { model_dir: PathBuf, file: String },
}

pub type Result<T> = std::result::Result<T, SearchError>;
