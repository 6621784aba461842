use crate::config::ModelConfig;
use crate::error::{Result, SearchError};
use crate::onnx::OnnxSession;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{Array2, Array3, Array4, ArrayView, Axis, IxDyn};
use ort::value::Value;
use std::path::Path;

pub struct VisionEmbedder {
    pub session: OnnxSession,
    pub config: ModelConfig,
    pub input_name: String,
}

impl VisionEmbedder {
    pub fn new(model_dir: &Path, config: ModelConfig, threads: Option<usize>) -> Result<Self> {
        let session = OnnxSession::new(model_dir.join("visual.onnx"), threads)?;
        let input_name = session
            .find_input(&["pixel_values", "input", "image"])
            .ok_or_else(|| SearchError::Config("Could not find vision input node".to_string()))?;

        Ok(Self {
            session,
            config,
            input_name,
        })
    }

    /// Preprocess a single image into a `[3, S, S]` tensor.
    pub fn preprocess(&self, image: &DynamicImage) -> Result<Array3<f32>> {
        preprocess_image(&self.config, image)
    }

    /// Run the visual model on a `[N, 3, S, S]` batch, returning raw `[N, D]` embeddings.
    pub fn embed_batch(&mut self, batch: Array4<f32>) -> Result<Array2<f32>> {
        let input_tensor = Value::from_array(batch)?;
        let outputs = self
            .session
            .session
            .run(ort::inputs![&self.input_name => input_tensor])?;

        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let shape_usize: Vec<usize> = shape.iter().map(|&x| x as usize).collect();
        let view = ArrayView::from_shape(IxDyn(&shape_usize), data)?;

        Ok(view.into_dimensionality::<ndarray::Ix2>()?.to_owned())
    }
}

fn filter_for(interpolation: &str) -> FilterType {
    match interpolation {
        "bicubic" => FilterType::CatmullRom,
        "bilinear" => FilterType::Triangle,
        "lanczos" => FilterType::Lanczos3,
        _ => FilterType::Nearest,
    }
}

/// Resize, crop and normalize an image the way `config` describes.
pub fn preprocess_image(config: &ModelConfig, image: &DynamicImage) -> Result<Array3<f32>> {
    let size = config.image_size;
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SearchError::Inference("Image has no pixels".to_string()));
    }
    let interp = filter_for(&config.interpolation);

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let resized = if config.resize_mode == "squash" {
        image.resize_exact(size, size, interp)
    } else {
        let scale = size as f32 / width.min(height) as f32;
        let scaled_width = ((width as f32 * scale).round() as u32).max(size);
        let scaled_height = ((height as f32 * scale).round() as u32).max(size);
        let resized = image.resize_exact(scaled_width, scaled_height, interp);
        let x = (scaled_width - size) / 2;
        let y = (scaled_height - size) / 2;
        resized.crop_imm(x, y, size, size)
    };

    let rgb = resized.to_rgb8();
    let pixels = rgb.as_raw();
    let side = size as usize;
    let channel_len = side * side;
    let (mean, std) = (config.mean, config.std);

    let mut out = Array3::<f32>::zeros((3, side, side));
    for (c, mut channel) in out.axis_iter_mut(Axis(0)).enumerate() {
        let flat = channel
            .as_slice_mut()
            .ok_or_else(|| SearchError::Inference("Layout mismatch".into()))?;
        for (i, value) in flat.iter_mut().enumerate().take(channel_len) {
            let val = f32::from(pixels[i * 3 + c]) / 255.0;
            *value = (val - mean[c]) / std[c];
        }
    }

    Ok(out)
}
