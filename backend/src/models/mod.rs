pub mod histogram;
pub mod remote;
#[cfg(feature = "torch")]
pub mod torch;

use async_trait::async_trait;
use image::DynamicImage;
use shared::BoundingBox;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{EmbedderConfig, InferenceConfig};
use histogram::HistogramEmbedder;
use remote::RemoteInference;

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Inference request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Inference server returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[cfg(feature = "torch")]
    #[error("Torch error: {0}")]
    Torch(#[from] tch::TchError),
    #[error("Model unavailable: {0}")]
    Unavailable(String),
}

/// One box proposed by a [`Detector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    pub confidence: f32,
}

/// Open-vocabulary object detection.
///
/// Returns boxes in `image` pixel coordinates, already filtered to
/// `confidence >= threshold`, in the detector's own order.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(
        &self,
        image: &DynamicImage,
        text_query: &str,
        threshold: f32,
    ) -> Result<Vec<Detection>, CollaboratorError>;
}

/// Image region to unit-length feature vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError>;
}

#[async_trait]
pub trait Captioner: Send + Sync {
    async fn caption(&self, image: &DynamicImage) -> Result<String, CollaboratorError>;
}

/// The model-backed capabilities a server needs, constructed once at startup.
#[derive(Clone)]
pub struct Collaborators {
    pub detector: Arc<dyn Detector>,
    pub embedder: Arc<dyn Embedder>,
    pub captioner: Arc<dyn Captioner>,
}

impl Collaborators {
    pub fn from_config(config: &InferenceConfig) -> Result<Self, CollaboratorError> {
        let remote = Arc::new(RemoteInference::new(
            &config.base_url,
            Duration::from_secs(config.timeout_secs),
        )?);
        log::info!("Using inference server at {}", config.base_url);

        let embedder: Arc<dyn Embedder> = match &config.embedder {
            EmbedderConfig::Remote => remote.clone(),
            EmbedderConfig::Histogram { bins } => {
                log::info!("Using local colour-histogram embedder with {} bins", bins);
                Arc::new(HistogramEmbedder::new(*bins))
            }
            EmbedderConfig::Torch { model_path, input_size } => {
                load_torch_embedder(model_path, *input_size)?
            }
        };

        Ok(Self {
            detector: remote.clone(),
            embedder,
            captioner: remote,
        })
    }
}

#[cfg(feature = "torch")]
fn load_torch_embedder(
    model_path: &std::path::Path,
    input_size: u32,
) -> Result<Arc<dyn Embedder>, CollaboratorError> {
    log::info!("Loading TorchScript embedder from {}", model_path.display());
    Ok(Arc::new(torch::TorchEmbedder::load(model_path, input_size)?))
}

#[cfg(not(feature = "torch"))]
fn load_torch_embedder(
    model_path: &std::path::Path,
    _input_size: u32,
) -> Result<Arc<dyn Embedder>, CollaboratorError> {
    Err(CollaboratorError::Unavailable(format!(
        "{} requires building with the `torch` feature",
        model_path.display()
    )))
}
