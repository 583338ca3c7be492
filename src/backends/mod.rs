pub mod flood;
pub mod rembg;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;

use crate::error::PipelineError;

pub use flood::FloodFillBackend;
pub use rembg::RembgBackend;

/// Capability every background removal backend provides.
///
/// One initialized instance is shared by all workers of a batch, so
/// `transform` takes `&self` and must tolerate overlapping calls. A backend
/// that cannot must report `is_reentrant() == false`; the orchestrator then
/// runs its batches sequentially.
pub trait TransformBackend: Send + Sync {
    /// Load weights or other state. Calling it again on an initialized backend is a no-op.
    fn initialize(&mut self) -> Result<()>;

    /// Remove the background of one image
    fn transform(&self, image: &DynamicImage) -> Result<DynamicImage>;

    /// Drop loaded state. Idempotent and infallible.
    fn release(&mut self);

    /// Registry id of this backend
    fn name(&self) -> &str;

    /// Device the backend runs on, already resolved (never "auto")
    fn device(&self) -> &str;

    fn is_initialized(&self) -> bool;

    fn is_reentrant(&self) -> bool {
        true
    }
}

/// Construction parameters handed to a backend constructor
#[derive(Debug, Clone, Default)]
pub struct BackendOptions {
    /// Requested device: "auto", "cpu" or an accelerator name
    pub device: String,
    pub quality: Option<String>,
    /// Sub-model, e.g. "u2net" for rembg
    pub variant: Option<String>,
    pub mode: Option<String>,
    /// Backend specific options, opaque to the pipeline
    pub options: BTreeMap<String, toml::Value>,
}

impl BackendOptions {
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn option_f32(&self, key: &str) -> Option<f32> {
        match self.options.get(key)? {
            toml::Value::Float(f) => Some(*f as f32),
            toml::Value::Integer(i) => Some(*i as f32),
            _ => None,
        }
    }
}

/// Resolve a device hint. All built-in backends execute on the CPU, so "auto" means "cpu".
pub fn resolve_device(requested: &str) -> String {
    match requested.trim() {
        "" | "auto" => "cpu".to_string(),
        other => other.to_string(),
    }
}

pub type BackendConstructor =
    Arc<dyn Fn(&BackendOptions) -> Result<Box<dyn TransformBackend>> + Send + Sync>;

/// Maps backend ids to constructors
#[derive(Clone)]
pub struct BackendRegistry {
    constructors: BTreeMap<String, BackendConstructor>,
}

impl BackendRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Registry with the built-in backends
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(flood::BACKEND_ID, |opts| {
            Ok(Box::new(FloodFillBackend::new(opts)?) as Box<dyn TransformBackend>)
        });
        registry.register(rembg::BACKEND_ID, |opts| {
            Ok(Box::new(RembgBackend::new(opts)?) as Box<dyn TransformBackend>)
        });
        registry
    }

    /// Register (or replace) a backend constructor
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&BackendOptions) -> Result<Box<dyn TransformBackend>> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!("Registered backend: {}", name);
        self.constructors.insert(name, Arc::new(constructor));
    }

    pub fn available(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn create(
        &self,
        name: &str,
        options: &BackendOptions,
    ) -> Result<Box<dyn TransformBackend>, PipelineError> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            PipelineError::Config(format!(
                "unknown backend '{}', available: {}",
                name,
                self.available().join(", ")
            ))
        })?;

        tracing::info!("Creating backend: {}", name);
        constructor(options).map_err(|e| PipelineError::Init {
            backend: name.to_string(),
            reason: format!("{:#}", e),
        })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.available())
            .finish()
    }
}
