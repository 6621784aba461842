use crate::error::{Result, SearchError};
use std::env;
use std::path::{Path, PathBuf};

/// Files an exported model directory must contain.
pub const MODEL_FILES: &[&str] = &[
    "model_config.json",
    "tokenizer.json",
    "text.onnx",
    "visual.onnx",
];

/// Default base folder for exported models.
#[must_use]
pub fn get_default_base_folder() -> PathBuf {
    env::home_dir().map_or_else(
        || Path::new(".clip_search_cache").to_owned(),
        |p| p.join(".cache/clip_search"),
    )
}

/// Verify that a model directory is valid, and contains the right files.
pub fn verify_model_dir(model_dir: &Path) -> Result<()> {
    if !model_dir.exists() {
        return Err(SearchError::ModelFolderNotFound(model_dir.to_owned()));
    }

    for file in MODEL_FILES {
        if !model_dir.join(file).is_file() {
            return Err(SearchError::MissingModelFile {
                model_dir: model_dir.to_owned(),
                file: (*file).to_string(),
            });
        }
    }

    Ok(())
}

/// Find the model directory to load.
///
/// An explicit directory wins. Otherwise the local cache under `base` is
/// checked, and with the `hf-hub` feature the files are fetched from the
/// Hugging Face Hub as a last resort.
pub fn resolve_model_dir(
    model_id: &str,
    explicit: Option<&Path>,
    base: &Path,
) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        verify_model_dir(dir)?;
        return Ok(dir.to_owned());
    }

    let local_dir = base.join(model_id);
    match verify_model_dir(&local_dir) {
        Ok(()) => Ok(local_dir),
        #[cfg(feature = "hf-hub")]
        Err(e) => {
            tracing::info!("{e}, downloading '{model_id}' from the Hugging Face Hub");
            let dir = get_hf_model(model_id)?;
            verify_model_dir(&dir)?;
            Ok(dir)
        }
        #[cfg(not(feature = "hf-hub"))]
        Err(e) => Err(e),
    }
}

/// Download the model files from the Hugging Face Hub, returning their folder.
#[cfg(feature = "hf-hub")]
pub fn get_hf_model(model_id: &str) -> Result<PathBuf> {
    let api = hf_hub::api::sync::Api::new().map_err(|e| SearchError::HfHub(e.to_string()))?;
    let repo = api.model(model_id.to_string());

    let mut model_dir = None;
    for file in MODEL_FILES {
        let path = repo.get(file).map_err(|e| {
            SearchError::HfHub(format!("Failed to download required file '{file}': {e}"))
        })?;
        if model_dir.is_none() {
            model_dir = path.parent().map(ToOwned::to_owned);
        }
    }

    model_dir.ok_or_else(|| {
        SearchError::HfHub(format!(
            "Could not determine model directory for '{model_id}'"
        ))
    })
}
