use crate::config::ModelConfig;
use crate::error::{Result, SearchError};
use crate::onnx::OnnxSession;
use ndarray::{Array1, Array2};
use ort::value::Value;
use std::path::Path;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

pub struct TextEmbedder {
    pub session: OnnxSession,
    pub config: ModelConfig,
    tokenizer: Tokenizer,
    id_name: String,
    mask_name: Option<String>,
}

impl TextEmbedder {
    pub fn new(model_dir: &Path, config: ModelConfig, threads: Option<usize>) -> Result<Self> {
        let session = OnnxSession::new(model_dir.join("text.onnx"), threads)?;
        let tokenizer = Tokenizer::from_file(model_dir.join("tokenizer.json"))
            .map_err(|e| SearchError::Tokenizer(e.to_string()))?;
        let tokenizer = configure_tokenizer(tokenizer, &config)?;

        let id_name = session
            .find_input(&["input_ids", "text", "input"])
            .ok_or_else(|| SearchError::Config("Could not find text input node".into()))?;
        let mask_name = session.find_input(&["attention_mask"]);

        Ok(Self {
            session,
            config,
            tokenizer,
            id_name,
            mask_name,
        })
    }

    /// Tokenize into fixed-length `[1, context_length]` id and mask arrays.
    pub fn tokenize(&self, text: &str) -> Result<(Array2<i64>, Array2<i64>)> {
        tokenize(&self.tokenizer, &self.config, text)
    }

    /// Raw (unnormalized) embedding of a single text.
    pub fn embed_text(&mut self, text: &str) -> Result<Array1<f32>> {
        let (ids_tensor, mask_tensor) = self.tokenize(text)?;

        let ort_ids = Value::from_array(ids_tensor)?;
        let outputs = if let Some(m_name) = &self.mask_name {
            let ort_mask = Value::from_array(mask_tensor)?;
            self.session
                .session
                .run(ort::inputs![&self.id_name => ort_ids, m_name => ort_mask])?
        } else {
            self.session
                .session
                .run(ort::inputs![&self.id_name => ort_ids])?
        };

        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;
        if data.is_empty() {
            return Err(SearchError::Inference("Text model returned no data".into()));
        }
        Ok(Array1::from(data.to_vec()))
    }
}

fn configure_tokenizer(mut tokenizer: Tokenizer, config: &ModelConfig) -> Result<Tokenizer> {
    let pad_id = config
        .pad_id
        .or_else(|| {
            let vocab = tokenizer.get_vocab(true);
            vocab
                .get("<pad>")
                .or_else(|| vocab.get("<|endoftext|>"))
                .copied()
        })
        .ok_or_else(|| SearchError::Config("No pad token found in tokenizer".into()))?;
    let ctx_len = config.context_length;

    tokenizer
        .with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::Fixed(ctx_len),
            pad_id,
            ..Default::default()
        }))
        .with_truncation(Some(TruncationParams {
            max_length: ctx_len,
            ..Default::default()
        }))
        .map_err(|e| SearchError::Tokenizer(e.to_string()))?;

    Ok(tokenizer)
}

fn tokenize(
    tokenizer: &Tokenizer,
    config: &ModelConfig,
    text: &str,
) -> Result<(Array2<i64>, Array2<i64>)> {
    let encoding = if config.tokenizer_needs_lowercase {
        tokenizer.encode(text.to_lowercase(), true)
    } else {
        tokenizer.encode(text, true)
    }
    .map_err(|e| SearchError::Tokenizer(e.to_string()))?;

    let seq_len = config.context_length;
    let ids: Vec<i64> = encoding.get_ids().iter().map(|&x| i64::from(x)).collect();
    let mask: Vec<i64> = encoding
        .get_attention_mask()
        .iter()
        .map(|&x| i64::from(x))
        .collect();

    let ids_array = Array2::from_shape_vec((1, seq_len), ids)?;
    let mask_array = Array2::from_shape_vec((1, seq_len), mask)?;
    Ok((ids_array, mask_array))
}
