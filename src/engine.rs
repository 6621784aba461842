use crate::cache::TextEmbeddingCache;
use crate::clip::Embedder;
use crate::error::Result;
use crate::fetch::ImageFetcher;
use crate::scorer::{preprocess_images, score_preprocessed, Similarity};
use crate::search::{
    prepare_files, sort_by_similarity, threshold_for_query, MatchedFile, SearchFile,
    DEFAULT_THRESHOLD,
};
use ndarray::Array1;
use std::collections::HashMap;
use image::DynamicImage;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

/// Result of scoring a list of gallery files.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub files: Vec<MatchedFile>,
    /// Seconds, rounded to two decimals.
    pub processing_time: f64,
    /// `None` when nothing was worth scoring.
    pub threshold_used: Option<f32>,
}

impl SearchOutcome {
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            files: Vec::new(),
            processing_time: 0.0,
            threshold_used: None,
        }
    }
}

/// Everything a request needs: the model, the query cache and the downloader.
///
/// Preprocessing shares the model behind a read lock. Forward passes take the
/// write lock, so inference is serialized across requests.
pub struct SearchEngine {
    model: RwLock<Box<dyn Embedder>>,
    device: String,
    text_cache: TextEmbeddingCache,
    fetcher: ImageFetcher,
    max_search_files: usize,
}

impl SearchEngine {
    pub fn new(
        model: Box<dyn Embedder>,
        fetcher: ImageFetcher,
        text_cache_size: usize,
        max_search_files: usize,
    ) -> Self {
        let device = model.device().to_owned();
        Self {
            model: RwLock::new(model),
            device,
            text_cache: TextEmbeddingCache::new(text_cache_size),
            fetcher,
            max_search_files,
        }
    }

    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    #[must_use]
    pub const fn model_loaded(&self) -> bool {
        true
    }

    #[must_use]
    pub const fn text_cache(&self) -> &TextEmbeddingCache {
        &self.text_cache
    }

    // A panicking request must not take the model down with it. The model
    // holds no state that a failed call can leave half-written.
    fn model(&self) -> RwLockReadGuard<'_, Box<dyn Embedder>> {
        self.model.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn model_mut(&self) -> RwLockWriteGuard<'_, Box<dyn Embedder>> {
        self.model.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Normalized embedding for `query`, served from the cache when possible.
    pub fn text_embedding(&self, query: &str) -> Result<Arc<Array1<f32>>> {
        self.text_cache
            .get_or_insert_with(query, |q| self.model_mut().encode_text(q))
    }

    /// Score already decoded images against `query`.
    ///
    /// Images that fail to preprocess are missing from the result.
    pub fn score_images(
        &self,
        images: &[(String, DynamicImage)],
        query: &str,
        threshold: f32,
    ) -> Result<HashMap<String, Similarity>> {
        if images.is_empty() {
            return Ok(HashMap::new());
        }
        let text_embedding = self.text_embedding(query)?;
        let preprocessed = preprocess_images(&**self.model(), images);
        score_preprocessed(
            &mut **self.model_mut(),
            &preprocessed,
            &text_embedding,
            threshold,
        )
    }

    /// Download `urls` and score each against `query`.
    ///
    /// URLs that fail to download or preprocess are missing from the result.
    pub fn analyze_batch(
        &self,
        urls: &[String],
        query: &str,
        threshold: f32,
    ) -> Result<HashMap<String, Similarity>> {
        let start = Instant::now();
        tracing::info!("Downloading {} images in parallel...", urls.len());
        let images = self.fetcher.fetch_all(urls);
        if images.is_empty() {
            return Ok(HashMap::new());
        }
        tracing::info!(
            "Downloaded {}/{} images in {:.2?}",
            images.len(),
            urls.len(),
            start.elapsed()
        );

        let results = self.score_images(&images, query, threshold)?;
        tracing::info!(
            "Batch analyzed {} images in {:.2?} total",
            results.len(),
            start.elapsed()
        );
        Ok(results)
    }

    /// Score one URL with the default threshold. An image that could not be
    /// fetched scores `(false, 0.0)`.
    pub fn analyze(&self, url: &str, query: &str) -> Result<Similarity> {
        let url = url.to_owned();
        let results = self.analyze_batch(std::slice::from_ref(&url), query, DEFAULT_THRESHOLD)?;
        Ok(results.get(&url).copied().unwrap_or(Similarity {
            matches: false,
            similarity: 0.0,
        }))
    }

    /// Score gallery files against `query`, returning the matches best first.
    pub fn search(&self, files: &[SearchFile], query: &str) -> Result<SearchOutcome> {
        let start = Instant::now();
        let query = query.trim().to_lowercase();

        let prepared = prepare_files(files, self.max_search_files);
        if prepared.is_empty() {
            return Ok(SearchOutcome::empty());
        }
        tracing::info!("Searching {} files for query: '{query}'", prepared.len());

        let threshold = threshold_for_query(&query);
        let mut url_to_file: HashMap<&str, &SearchFile> = HashMap::new();
        let mut urls = Vec::with_capacity(prepared.len());
        for (url, file) in &prepared {
            url_to_file.insert(url.as_str(), *file);
            urls.push(url.clone());
        }

        let results = self.analyze_batch(&urls, &query, threshold)?;
        let mut matched: Vec<MatchedFile> = results
            .iter()
            .filter(|(_, result)| result.matches)
            .filter_map(|(url, result)| {
                url_to_file.get(url.as_str()).map(|file| MatchedFile {
                    file: (*file).clone(),
                    similarity: result.similarity,
                })
            })
            .collect();
        sort_by_similarity(&mut matched);

        let elapsed = start.elapsed().as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let per_image = elapsed / prepared.len() as f64;
        tracing::info!(
            "Found {} matching files in {elapsed:.2}s (avg {per_image:.3}s per image)",
            matched.len()
        );

        Ok(SearchOutcome {
            files: matched,
            processing_time: (elapsed * 100.0).round() / 100.0,
            threshold_used: Some(threshold),
        })
    }
}
