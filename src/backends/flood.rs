use std::collections::VecDeque;

use anyhow::{Result, bail};
use image::{DynamicImage, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::open;

use super::{BackendOptions, TransformBackend, resolve_device};

pub const BACKEND_ID: &str = "flood";

/// Model-free background removal for product-style shots.
///
/// The background colour is estimated from the image border, every
/// background-coloured pixel connected to the border is keyed out, and the
/// resulting mask is cleaned up and feathered before becoming the alpha
/// channel.
#[derive(Debug)]
pub struct FloodFillBackend {
    device: String,
    tolerance: f32,
    cleanup_radius: u8,
    feather_sigma: f32,
    initialized: bool,
}

struct QualityPreset {
    tolerance: f32,
    cleanup_radius: u8,
    feather_sigma: f32,
}

fn quality_preset(quality: &str) -> Result<QualityPreset> {
    let preset = match quality {
        "low" => QualityPreset {
            tolerance: 48.0,
            cleanup_radius: 0,
            feather_sigma: 0.0,
        },
        "medium" | "default" => QualityPreset {
            tolerance: 32.0,
            cleanup_radius: 1,
            feather_sigma: 1.0,
        },
        "high" => QualityPreset {
            tolerance: 24.0,
            cleanup_radius: 2,
            feather_sigma: 1.5,
        },
        other => bail!("unsupported quality '{}' (expected low, medium or high)", other),
    };
    Ok(preset)
}

impl FloodFillBackend {
    pub fn new(options: &BackendOptions) -> Result<Self> {
        let mut device = resolve_device(&options.device);
        if device != "cpu" {
            tracing::warn!("{} backend runs on the CPU only, ignoring device '{}'", BACKEND_ID, device);
            device = "cpu".to_string();
        }

        let preset = quality_preset(options.quality.as_deref().unwrap_or("default"))?;
        let tolerance = options.option_f32("tolerance").unwrap_or(preset.tolerance);
        if !(0.0..=442.0).contains(&tolerance) {
            bail!("tolerance must be between 0 and 442, got {}", tolerance);
        }

        Ok(Self {
            device,
            tolerance,
            cleanup_radius: preset.cleanup_radius,
            feather_sigma: preset.feather_sigma,
            initialized: false,
        })
    }
}

impl TransformBackend for FloodFillBackend {
    fn initialize(&mut self) -> Result<()> {
        if !self.initialized {
            tracing::info!(
                "Initializing {} backend (tolerance {:.0}) on {}",
                BACKEND_ID,
                self.tolerance,
                self.device
            );
            self.initialized = true;
        }
        Ok(())
    }

    fn transform(&self, image: &DynamicImage) -> Result<DynamicImage> {
        if !self.initialized {
            bail!("{} backend used before initialization", BACKEND_ID);
        }

        let mut rgba = image.to_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Ok(DynamicImage::ImageRgba8(rgba));
        }

        let background = border_color(&rgba);
        let mut mask = foreground_mask(&rgba, background, self.tolerance);

        if self.cleanup_radius > 0 {
            mask = open(&mask, Norm::LInf, self.cleanup_radius);
        }
        if self.feather_sigma > 0.0 {
            mask = gaussian_blur_f32(&mask, self.feather_sigma);
        }

        for (x, y, pixel) in rgba.enumerate_pixels_mut() {
            let keep = mask.get_pixel(x, y)[0] as u16;
            pixel[3] = ((pixel[3] as u16 * keep) / 255) as u8;
        }

        Ok(DynamicImage::ImageRgba8(rgba))
    }

    fn release(&mut self) {
        if self.initialized {
            tracing::debug!("{} backend released", BACKEND_ID);
        }
        self.initialized = false;
    }

    fn name(&self) -> &str {
        BACKEND_ID
    }

    fn device(&self) -> &str {
        &self.device
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

/// Per-channel median of the border pixels
fn border_color(img: &RgbaImage) -> [u8; 3] {
    let (width, height) = img.dimensions();
    let mut channels: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];

    let mut push = |p: &Rgba<u8>| {
        for c in 0..3 {
            channels[c].push(p[c]);
        }
    };
    for x in 0..width {
        push(img.get_pixel(x, 0));
        push(img.get_pixel(x, height - 1));
    }
    for y in 1..height.saturating_sub(1) {
        push(img.get_pixel(0, y));
        push(img.get_pixel(width - 1, y));
    }

    let mut color = [0u8; 3];
    for (c, values) in channels.iter_mut().enumerate() {
        values.sort_unstable();
        color[c] = values[values.len() / 2];
    }
    color
}

fn color_distance(p: &Rgba<u8>, color: [u8; 3]) -> f32 {
    let dr = p[0] as f32 - color[0] as f32;
    let dg = p[1] as f32 - color[1] as f32;
    let db = p[2] as f32 - color[2] as f32;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// 255 for foreground, 0 for background reachable from the border
fn foreground_mask(img: &RgbaImage, background: [u8; 3], tolerance: f32) -> GrayImage {
    let (width, height) = img.dimensions();
    let mut mask = GrayImage::from_pixel(width, height, Luma([255u8]));
    let mut visited = vec![false; (width as usize) * (height as usize)];
    let mut queue = VecDeque::new();

    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;

    let seed = |x: u32, y: u32, queue: &mut VecDeque<(u32, u32)>, visited: &mut [bool]| {
        let i = index(x, y);
        if !visited[i] && color_distance(img.get_pixel(x, y), background) <= tolerance {
            visited[i] = true;
            queue.push_back((x, y));
        }
    };

    for x in 0..width {
        seed(x, 0, &mut queue, &mut visited);
        seed(x, height - 1, &mut queue, &mut visited);
    }
    for y in 0..height {
        seed(0, y, &mut queue, &mut visited);
        seed(width - 1, y, &mut queue, &mut visited);
    }

    while let Some((x, y)) = queue.pop_front() {
        mask.put_pixel(x, y, Luma([0u8]));

        if x > 0 {
            seed(x - 1, y, &mut queue, &mut visited);
        }
        if x + 1 < width {
            seed(x + 1, y, &mut queue, &mut visited);
        }
        if y > 0 {
            seed(x, y - 1, &mut queue, &mut visited);
        }
        if y + 1 < height {
            seed(x, y + 1, &mut queue, &mut visited);
        }
    }

    mask
}
