use crate::clip::Embedder;
use crate::error::{Result, SearchError};
use crate::utils::{l2_normalize_rows, truncate_url};
use image::DynamicImage;
use ndarray::{Array1, Array3, ArrayView3, Axis};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

/// How well one image matched the query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Similarity {
    pub matches: bool,
    pub similarity: f32,
}

impl Similarity {
    #[must_use]
    pub fn new(similarity: f32, threshold: f32) -> Self {
        Self {
            matches: similarity >= threshold,
            similarity,
        }
    }
}

/// Preprocess every image in parallel into the model's input tensor.
///
/// Images that fail are logged and left out.
pub fn preprocess_images<'a>(
    model: &dyn Embedder,
    images: &'a [(String, DynamicImage)],
) -> Vec<(&'a str, Array3<f32>)> {
    images
        .par_iter()
        .filter_map(|(url, image)| match model.preprocess(image) {
            Ok(tensor) => Some((url.as_str(), tensor)),
            Err(e) => {
                tracing::warn!("Error preprocessing {}...: {e}", truncate_url(url));
                None
            }
        })
        .collect()
}

/// Embed preprocessed images in a single forward pass and score them against
/// one normalized text embedding. The model is not called for an empty batch.
pub fn score_preprocessed(
    model: &mut dyn Embedder,
    preprocessed: &[(&str, Array3<f32>)],
    text_embedding: &Array1<f32>,
    threshold: f32,
) -> Result<HashMap<String, Similarity>> {
    if preprocessed.is_empty() {
        return Ok(HashMap::new());
    }

    let views: Vec<ArrayView3<f32>> = preprocessed.iter().map(|(_, t)| t.view()).collect();
    let batch = ndarray::stack(Axis(0), &views)?;
    let embeddings = l2_normalize_rows(model.encode_images(batch)?);

    if embeddings.nrows() != preprocessed.len() {
        return Err(SearchError::Inference(format!(
            "Model returned {} embeddings for {} images",
            embeddings.nrows(),
            preprocessed.len()
        )));
    }
    if embeddings.ncols() != text_embedding.len() {
        return Err(SearchError::Inference(format!(
            "Image embedding dimension {} does not match text dimension {}",
            embeddings.ncols(),
            text_embedding.len()
        )));
    }

    let similarities = embeddings.dot(text_embedding);
    Ok(preprocessed
        .iter()
        .zip(similarities.iter())
        .map(|((url, _), &sim)| {
            let sim = sim.clamp(-1.0, 1.0);
            ((*url).to_owned(), Similarity::new(sim, threshold))
        })
        .collect())
}

/// Preprocess and score decoded images in one go.
pub fn score_batch(
    model: &mut dyn Embedder,
    images: &[(String, DynamicImage)],
    text_embedding: &Array1<f32>,
    threshold: f32,
) -> Result<HashMap<String, Similarity>> {
    let preprocessed = preprocess_images(&*model, images);
    score_preprocessed(model, &preprocessed, text_embedding, threshold)
}
