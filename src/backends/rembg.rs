use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, Luma};
use rten::Model;
use rten_tensor::NdTensor;
use rten_tensor::prelude::*;

use super::{BackendOptions, TransformBackend, resolve_device};

pub const BACKEND_ID: &str = "rembg";
pub const DEFAULT_VARIANT: &str = "u2net";

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Square input size expected by each supported salient-object model
fn input_size(variant: &str) -> Option<u32> {
    match variant {
        "u2net" | "u2netp" | "u2net_human_seg" | "silueta" => Some(320),
        "isnet-general-use" => Some(1024),
        _ => None,
    }
}

/// rembg-family salient object segmentation run through rten.
///
/// The model file is looked up at `options.model_path`, falling back to
/// `~/.cache/cutout/<variant>.rten`.
pub struct RembgBackend {
    variant: String,
    device: String,
    model_path: PathBuf,
    size: u32,
    model: Option<Model>,
}

impl RembgBackend {
    pub fn new(options: &BackendOptions) -> Result<Self> {
        let variant = options
            .variant
            .clone()
            .unwrap_or_else(|| DEFAULT_VARIANT.to_string());
        let Some(size) = input_size(&variant) else {
            bail!("unsupported rembg model '{}'", variant);
        };

        let mut device = resolve_device(&options.device);
        if device != "cpu" {
            tracing::warn!("{} backend runs on the CPU only, ignoring device '{}'", BACKEND_ID, device);
            device = "cpu".to_string();
        }

        let model_path = match options.option_str("model_path") {
            Some(path) => PathBuf::from(path),
            None => default_model_dir()?.join(format!("{}.rten", variant)),
        };

        Ok(Self {
            variant,
            device,
            model_path,
            size,
            model: None,
        })
    }

    pub fn variant(&self) -> &str {
        &self.variant
    }

    fn to_input_tensor(&self, image: &DynamicImage) -> NdTensor<f32, 4> {
        let size = self.size;
        let resized = image
            .resize_exact(size, size, FilterType::Lanczos3)
            .to_rgb8();

        let max = resized.as_raw().iter().copied().max().unwrap_or(0).max(1) as f32;

        let mut input = NdTensor::zeros([1, 3, size as usize, size as usize]);
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                let value = pixel[c] as f32 / max;
                input[[0, c, y as usize, x as usize]] = (value - MEAN[c]) / STD[c];
            }
        }
        input
    }
}

fn default_model_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .context("cannot determine home directory for model cache")?;
    Ok(PathBuf::from(home).join(".cache/cutout"))
}

impl TransformBackend for RembgBackend {
    fn initialize(&mut self) -> Result<()> {
        if self.model.is_some() {
            return Ok(());
        }

        if !self.model_path.exists() {
            bail!(
                "{} model not found at {}. Convert the ONNX model with rten-convert and place it there.",
                self.variant,
                self.model_path.display()
            );
        }

        tracing::info!("Initializing rembg model ({}) on {}", self.variant, self.device);
        let model = Model::load_file(&self.model_path)
            .with_context(|| format!("failed to load {}", self.model_path.display()))?;
        self.model = Some(model);
        tracing::info!("Rembg model ({}) initialized successfully", self.variant);

        Ok(())
    }

    fn transform(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let Some(model) = self.model.as_ref() else {
            bail!("{} backend used before initialization", BACKEND_ID);
        };

        let input = self.to_input_tensor(image);
        let output: NdTensor<f32, 4> = model.run_one(input.view().into(), None)?.try_into()?;

        let [_, _, out_h, out_w] = output.shape();
        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for y in 0..out_h {
            for x in 0..out_w {
                let v = output[[0, 0, y, x]];
                min = min.min(v);
                max = max.max(v);
            }
        }
        let range = (max - min).max(f32::EPSILON);

        let mask = GrayImage::from_fn(out_w as u32, out_h as u32, |x, y| {
            let v = (output[[0, 0, y as usize, x as usize]] - min) / range;
            Luma([(v * 255.0).round().clamp(0.0, 255.0) as u8])
        });
        let mask = image::imageops::resize(&mask, image.width(), image.height(), FilterType::Lanczos3);

        let mut rgba = image.to_rgba8();
        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            pixel[3] = mask.get_pixel(x, y)[0];
        }

        Ok(DynamicImage::ImageRgba8(rgba))
    }

    fn release(&mut self) {
        if self.model.take().is_some() {
            tracing::debug!("Rembg model cleaned up");
        }
    }

    fn name(&self) -> &str {
        BACKEND_ID
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn is_initialized(&self) -> bool {
        self.model.is_some()
    }
}
