use crate::fetch::insert_cloudinary_transform;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

/// Similarity needed for a match when a single URL is analyzed.
pub const DEFAULT_THRESHOLD: f32 = 0.20;

/// A file as sent by the gallery, kept as raw JSON so every field is echoed
/// back and malformed entries are skipped instead of failing the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchFile(pub Value);

impl SearchFile {
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.0.get("url").and_then(Value::as_str)
    }

    /// A missing type means `image`. `null` or a non-string gives `None`.
    #[must_use]
    pub fn resource_type(&self) -> Option<&str> {
        match self.0.get("resource_type") {
            None => Some("image"),
            Some(value) => value.as_str(),
        }
    }
}

impl From<Value> for SearchFile {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// A matching file with its score attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedFile {
    pub file: SearchFile,
    pub similarity: f32,
}

impl Serialize for MatchedFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (key, value) in self.file.0.as_object().into_iter().flatten() {
            if key != "similarity" {
                map.serialize_entry(key, value)?;
            }
        }
        map.serialize_entry("similarity", &self.similarity)?;
        map.end()
    }
}

/// Shorter queries are vaguer, so they get a lower bar.
#[must_use]
pub fn threshold_for_query(query: &str) -> f32 {
    match query.split_whitespace().count() {
        0 | 1 => 0.18,
        2 | 3 => 0.20,
        _ => 0.22,
    }
}

/// URL of a still frame for a video: a resized rendition with a `.jpg` extension.
#[must_use]
pub fn thumbnail_url(url: &str) -> String {
    let Some(rewritten) = insert_cloudinary_transform(url) else {
        return url.to_owned();
    };

    let (path, query) = rewritten.split_at(rewritten.find(['?', '#']).unwrap_or(rewritten.len()));
    let last_segment = path.rfind('/').map_or(0, |i| i + 1);
    match path[last_segment..].rfind('.') {
        Some(dot) => format!("{}.jpg{query}", &path[..last_segment + dot]),
        None => rewritten.clone(),
    }
}

/// Pick the files worth scoring and the URL to fetch for each.
///
/// Only the first `max_files` entries are considered. Entries without a URL or
/// with a resource type other than the strings `image` or `video` are dropped.
#[must_use]
pub fn prepare_files(files: &[SearchFile], max_files: usize) -> Vec<(String, &SearchFile)> {
    files
        .iter()
        .take(max_files)
        .filter_map(|file| {
            let url = file.url().filter(|u| !u.is_empty())?;
            match file.resource_type()? {
                "image" => Some((url.to_owned(), file)),
                "video" => Some((thumbnail_url(url), file)),
                _ => None,
            }
        })
        .collect()
}

/// Sort matches best first.
pub fn sort_by_similarity(matches: &mut [MatchedFile]) {
    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
}
