#![allow(clippy::missing_errors_doc)]
pub mod cache;
pub mod clip;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model_manager;
pub mod onnx;
pub mod scorer;
pub mod search;
pub mod server;
pub mod settings;
pub mod text;
pub mod utils;
pub mod vision;

pub use clip::{Clip, Embedder};
pub use engine::{SearchEngine, SearchOutcome};
pub use error::{Result, SearchError};
pub use fetch::{FetchConfig, ImageFetcher};
pub use scorer::Similarity;
pub use settings::Settings;
