use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use cutout::config::BackendConfig;
use cutout::{BackendRegistry, Config, ProcessingParameters, TransformBackend};
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use tempfile::TempDir;

pub const STUB_ID: &str = "stub";

/// Call counters shared between a test and the stub backends it creates
#[derive(Debug, Default)]
pub struct StubCounters {
    pub created: AtomicUsize,
    pub initialized: AtomicUsize,
    pub released: AtomicUsize,
    pub transformed: AtomicUsize,
}

impl StubCounters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Backend that returns its input as RGBA and succeeds unless told otherwise
pub struct StubBackend {
    counters: Arc<StubCounters>,
    fail_init: bool,
    fail_transform: bool,
    delay: Duration,
    reentrant: bool,
    panic_first: bool,
    delete_on_transform: Option<PathBuf>,
    initialized: bool,
}

impl StubBackend {
    pub fn new(counters: Arc<StubCounters>) -> Self {
        counters.created.fetch_add(1, Ordering::SeqCst);
        Self {
            counters,
            fail_init: false,
            fail_transform: false,
            delay: Duration::ZERO,
            reentrant: true,
            panic_first: false,
            delete_on_transform: None,
            initialized: false,
        }
    }

    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    pub fn failing_transform(mut self) -> Self {
        self.fail_transform = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn non_reentrant(mut self) -> Self {
        self.reentrant = false;
        self
    }

    /// Panic inside the first transform call made through these counters
    pub fn panicking_first(mut self) -> Self {
        self.panic_first = true;
        self
    }

    /// Remove `path` from disk while transforming
    pub fn deleting(mut self, path: impl Into<PathBuf>) -> Self {
        self.delete_on_transform = Some(path.into());
        self
    }
}

impl TransformBackend for StubBackend {
    fn initialize(&mut self) -> anyhow::Result<()> {
        if self.fail_init {
            bail!("stub weights missing");
        }
        if !self.initialized {
            self.counters.initialized.fetch_add(1, Ordering::SeqCst);
            self.initialized = true;
        }
        Ok(())
    }

    fn transform(&self, image: &DynamicImage) -> anyhow::Result<DynamicImage> {
        if !self.initialized {
            bail!("stub used before initialization");
        }
        let previous = self.counters.transformed.fetch_add(1, Ordering::SeqCst);
        if self.panic_first && previous == 0 {
            panic!("stub transform exploded");
        }
        if let Some(path) = &self.delete_on_transform {
            std::fs::remove_file(path)?;
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.fail_transform {
            bail!("stub transform failure");
        }
        Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
    }

    fn release(&mut self) {
        if self.initialized {
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
        self.initialized = false;
    }

    fn name(&self) -> &str {
        STUB_ID
    }

    fn device(&self) -> &str {
        "cpu"
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn is_reentrant(&self) -> bool {
        self.reentrant
    }
}

/// Registry whose only backend is a [`StubBackend`] reporting into `counters`
pub fn stub_registry(counters: Arc<StubCounters>) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry.register(STUB_ID, move |_opts| {
        Ok(Box::new(StubBackend::new(Arc::clone(&counters))) as Box<dyn TransformBackend>)
    });
    registry
}

/// Temporary input/output/processed layout
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        for sub in ["input", "output", "processed"] {
            std::fs::create_dir_all(dir.path().join(sub))?;
        }
        Ok(Self { dir })
    }

    pub fn input(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    pub fn output(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    pub fn processed(&self) -> PathBuf {
        self.dir.path().join("processed")
    }

    /// Parameters for the stub backend with a short stability wait
    pub fn params(&self) -> ProcessingParameters {
        ProcessingParameters {
            backend_id: STUB_ID.to_string(),
            variant: None,
            quality: "default".to_string(),
            device: "cpu".to_string(),
            overwrite_existing: false,
            preserve_original: false,
            concurrency: 1,
            extensions: vec![".jpg".to_string(), ".png".to_string()],
            stability_timeout: Duration::from_millis(10),
            output_dir: self.output(),
            processed_dir: self.processed(),
        }
    }

    /// Configuration pointing at this workspace and the stub backend
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.processing.input_folder = self.input();
        config.processing.output_folder = self.output();
        config.processing.processed_folder = self.processed();
        config.processing.model = STUB_ID.to_string();
        config.processing.file_extensions = vec![".jpg".to_string(), ".png".to_string()];
        config.processing.file_stability_timeout = 0.01;
        config.processing.preserve_original = false;
        config.models.insert(
            STUB_ID.to_string(),
            BackendConfig {
                enabled: true,
                ..Default::default()
            },
        );
        config.monitoring.debounce_seconds = 0.2;
        config.logging.file = None;
        config
    }

    /// Output files currently present, sorted by name
    pub fn outputs(&self) -> anyhow::Result<Vec<String>> {
        file_names(&self.output())
    }
}

pub fn file_names(dir: &Path) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        names.push(entry?.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

/// 32x32 image: white background with a red square in the middle
pub fn product_shot() -> RgbImage {
    ImageBuffer::from_fn(32, 32, |x, y| {
        if (8..24).contains(&x) && (8..24).contains(&y) {
            Rgb([200u8, 30, 30])
        } else {
            Rgb([255u8, 255, 255])
        }
    })
}

pub fn write_png(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    product_shot().save_with_format(&path, image::ImageFormat::Png)?;
    Ok(path)
}

pub fn write_jpeg(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(name);
    product_shot().save_with_format(&path, image::ImageFormat::Jpeg)?;
    Ok(path)
}
