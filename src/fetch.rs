use crate::error::{Result, SearchError};
use crate::utils::truncate_url;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::borrow::Cow;
use std::collections::HashSet;
use std::io::Read;
use std::time::Duration;

/// Cloudinary transformation that asks for a small, auto-format rendition.
pub const CLOUDINARY_TRANSFORM: &str = "w_512,h_512,c_limit,f_auto,q_auto/";
const UPLOAD_SEGMENT: &str = "/upload/";

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Size of the download pool.
    pub workers: usize,
    pub timeout: Duration,
    /// Images larger than this on either side are downscaled to fit.
    pub max_dimension: u32,
    /// Responses larger than this are rejected.
    pub max_bytes: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            timeout: Duration::from_secs(15),
            max_dimension: 512,
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Insert the Cloudinary resize transformation after `/upload/`.
#[must_use]
pub fn insert_cloudinary_transform(url: &str) -> Option<String> {
    url.contains(UPLOAD_SEGMENT).then(|| {
        url.replacen(
            UPLOAD_SEGMENT,
            &format!("{UPLOAD_SEGMENT}{CLOUDINARY_TRANSFORM}"),
            1,
        )
    })
}

/// Ask known image providers for a smaller rendition.
///
/// Only untransformed Cloudinary URLs are rewritten.
#[must_use]
pub fn optimize_url(url: &str) -> Cow<'_, str> {
    let transformed = ["w_", "h_", "c_"].iter().any(|p| url.contains(p));
    if url.contains("res.cloudinary.com") && !transformed {
        if let Some(rewritten) = insert_cloudinary_transform(url) {
            return Cow::Owned(rewritten);
        }
    }
    Cow::Borrowed(url)
}

/// Convert to RGB8 and downscale to fit `max_dimension`, keeping the aspect ratio.
#[must_use]
pub fn normalize_image(image: DynamicImage, max_dimension: u32) -> DynamicImage {
    let image = match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    };
    let (width, height) = image.dimensions();
    if width.max(height) > max_dimension {
        image.resize(max_dimension, max_dimension, FilterType::Lanczos3)
    } else {
        image
    }
}

/// Downloads images over HTTP on a bounded pool of blocking workers.
pub struct ImageFetcher {
    agent: ureq::Agent,
    pool: ThreadPool,
    config: FetchConfig,
}

impl ImageFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.workers.max(1))
            .thread_name(|i| format!("image-fetch-{i}"))
            .build()
            .map_err(|e| SearchError::Config(format!("Could not build download pool: {e}")))?;

        Ok(Self {
            agent,
            pool,
            config,
        })
    }

    /// Download, decode and normalize one image.
    pub fn fetch(&self, url: &str) -> Result<DynamicImage> {
        let target = optimize_url(url);
        let fetch_err = |reason: String| SearchError::Fetch {
            url: url.to_owned(),
            reason,
        };

        let response = self
            .agent
            .get(&target)
            .call()
            .map_err(|e| fetch_err(e.to_string()))?;

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(self.config.max_bytes + 1)
            .read_to_end(&mut bytes)?;
        if bytes.len() as u64 > self.config.max_bytes {
            return Err(fetch_err(format!(
                "response exceeds {} bytes",
                self.config.max_bytes
            )));
        }

        let image = image::load_from_memory(&bytes)?;
        Ok(normalize_image(image, self.config.max_dimension))
    }

    /// Fetch every distinct URL in parallel.
    ///
    /// Only successful downloads are returned, in input order. Failures are
    /// logged and skipped.
    #[must_use]
    pub fn fetch_all(&self, urls: &[String]) -> Vec<(String, DynamicImage)> {
        let mut seen = HashSet::new();
        let unique: Vec<&String> = urls.iter().filter(|u| seen.insert(u.as_str())).collect();

        self.pool.install(|| {
            unique
                .par_iter()
                .filter_map(|url| match self.fetch(url) {
                    Ok(image) => Some(((*url).clone(), image)),
                    Err(e) => {
                        tracing::warn!("Error downloading image from {}...: {e}", truncate_url(url));
                        None
                    }
                })
                .collect()
        })
    }
}
