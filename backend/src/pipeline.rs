//! Staged visual search for one task.
//!
//! A run walks announce -> detect -> announce candidates -> score -> finalize
//! and pushes a [`StreamEvent`] onto a channel as each stage completes.
//! Candidate indices follow the detector's return order; every later score
//! update refers back to that index, in ascending order.

use image::DynamicImage;
use shared::{CandidateThumbnail, StreamEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::{AnnounceMode, PipelineConfig};
use crate::imaging;
use crate::models::{Captioner, CollaboratorError, Collaborators, Detector, Embedder};
use crate::similarity::{SimilarityError, cosine_similarity, round_score};
use crate::store::Task;

pub const NO_CANDIDATES_MESSAGE: &str = "No candidates found.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Could not read {what}: {source}")]
    Image {
        what: &'static str,
        source: image::ImageError,
    },
    #[error("Detection failed: {0}")]
    Detector(CollaboratorError),
    #[error("Embedding failed: {0}")]
    Embedder(CollaboratorError),
    #[error("Captioning failed: {0}")]
    Captioner(CollaboratorError),
    #[error("Scoring failed: {0}")]
    Similarity(#[from] SimilarityError),
    #[error("Image worker failed: {0}")]
    Worker(String),
    #[error("Client disconnected")]
    Disconnected,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { candidates: usize },
    Failed(String),
    Disconnected,
}

/// Result of the detection stage.
enum DetectionOutcome {
    Found(Vec<Candidate>),
    Empty,
}

/// A detector-proposed region of the target image.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub index: usize,
    pub thumbnail: DynamicImage,
}

struct PreparedImages {
    query_region: DynamicImage,
    target: DynamicImage,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub announce: AnnounceMode,
    pub update_interval: Duration,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            announce: config.announce,
            update_interval: Duration::from_millis(config.update_interval_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

#[derive(Clone)]
pub struct PipelineRunner {
    detector: Arc<dyn Detector>,
    embedder: Arc<dyn Embedder>,
    captioner: Arc<dyn Captioner>,
    settings: PipelineSettings,
}

impl PipelineRunner {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            detector: collaborators.detector,
            embedder: collaborators.embedder,
            captioner: collaborators.captioner,
            settings,
        }
    }

    /// Runs every stage for `task`, sending events to `events`.
    ///
    /// Ends with exactly one `done` or `error` event unless the receiver is
    /// dropped, in which case the run stops at the next send.
    pub async fn run(&self, task: Task, events: &mpsc::Sender<StreamEvent>) -> RunOutcome {
        let task_id = task.id;
        log::info!(
            "TASK {}: Streaming started (detection threshold {}, similarity threshold {})",
            task_id,
            task.detection_threshold,
            task.similarity_threshold
        );

        let outcome = match self.execute(&task, events).await {
            Ok(candidates) => match send(events, StreamEvent::Done).await {
                Ok(()) => RunOutcome::Completed { candidates },
                Err(_) => RunOutcome::Disconnected,
            },
            Err(PipelineError::Disconnected) => RunOutcome::Disconnected,
            Err(e) => {
                log::error!("TASK {}: {}", task_id, e);
                let message = e.to_string();
                match send(events, StreamEvent::Error { message: message.clone() }).await {
                    Ok(()) => RunOutcome::Failed(message),
                    Err(_) => RunOutcome::Disconnected,
                }
            }
        };

        match &outcome {
            RunOutcome::Disconnected => {
                log::warn!("TASK {}: Client disconnected, run aborted", task_id)
            }
            _ => log::info!("TASK {}: Cleaned up ({:?})", task_id, outcome),
        }
        outcome
    }

    async fn execute(
        &self,
        task: &Task,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<usize, PipelineError> {
        let query_text = match self.settings.announce {
            AnnounceMode::QueryText => {
                send(events, StreamEvent::Caption { caption: task.query_text.clone() }).await?;
                let images = self.prepare_images(task).await?;
                if task.query_text.trim().is_empty() {
                    return Err(PipelineError::InvalidInput("query text is empty".into()));
                }
                return self.search(task, &task.query_text, images, events).await;
            }
            AnnounceMode::GeneratedCaption => task.query_text.trim().to_string(),
        };

        let images = self.prepare_images(task).await?;
        let caption = self
            .captioner
            .caption(&images.query_region)
            .await
            .map_err(PipelineError::Captioner)?;
        send(events, StreamEvent::Caption { caption: caption.clone() }).await?;

        let query = if query_text.is_empty() { caption } else { query_text };
        if query.trim().is_empty() {
            return Err(PipelineError::InvalidInput("no query text or caption available".into()));
        }
        self.search(task, &query, images, events).await
    }

    async fn search(
        &self,
        task: &Task,
        query: &str,
        images: PreparedImages,
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<usize, PipelineError> {
        let candidates = match self.detect(task, query, &images.target).await? {
            DetectionOutcome::Found(candidates) => candidates,
            DetectionOutcome::Empty => {
                send(events, StreamEvent::Status { message: NO_CANDIDATES_MESSAGE.into() })
                    .await?;
                return Ok(0);
            }
        };

        let thumbnails = encode_thumbnails(&candidates).await?;
        send(events, StreamEvent::Candidates { candidates: thumbnails }).await?;

        self.score(&images.query_region, &candidates, events).await?;
        Ok(candidates.len())
    }

    async fn prepare_images(&self, task: &Task) -> Result<PreparedImages, PipelineError> {
        let query_bytes = task.query_image.clone();
        let target_bytes = task.target_image.clone();
        let roi = task.region_of_interest;
        blocking(move || {
            let query = imaging::decode_rgb(&query_bytes).map_err(|source| PipelineError::Image {
                what: "query image",
                source,
            })?;
            let target =
                imaging::decode_rgb(&target_bytes).map_err(|source| PipelineError::Image {
                    what: "target image",
                    source,
                })?;
            Ok(PreparedImages {
                query_region: imaging::crop_region(&query, &roi),
                target,
            })
        })
        .await
    }

    async fn detect(
        &self,
        task: &Task,
        query: &str,
        target: &DynamicImage,
    ) -> Result<DetectionOutcome, PipelineError> {
        let boxes = self
            .detector
            .detect(target, query, task.detection_threshold)
            .await
            .map_err(PipelineError::Detector)?;
        log::info!(
            "TASK {}: Found {} candidates using text: '{}'",
            task.id,
            boxes.len(),
            query
        );
        if boxes.is_empty() {
            return Ok(DetectionOutcome::Empty);
        }

        let target = target.clone();
        blocking(move || {
            let candidates = boxes
                .into_iter()
                .enumerate()
                .map(|(index, detection)| Candidate {
                    index,
                    thumbnail: imaging::crop_box(&target, &detection.bounding_box),
                })
                .collect();
            Ok(DetectionOutcome::Found(candidates))
        })
        .await
    }

    async fn score(
        &self,
        query_region: &DynamicImage,
        candidates: &[Candidate],
        events: &mpsc::Sender<StreamEvent>,
    ) -> Result<(), PipelineError> {
        let query_features = self
            .embedder
            .embed(query_region)
            .await
            .map_err(PipelineError::Embedder)?;

        for (position, candidate) in candidates.iter().enumerate() {
            if position > 0 && !self.settings.update_interval.is_zero() {
                tokio::time::sleep(self.settings.update_interval).await;
            }
            let features = self
                .embedder
                .embed(&candidate.thumbnail)
                .await
                .map_err(PipelineError::Embedder)?;
            let score = round_score(cosine_similarity(&query_features, &features)?);
            send(events, StreamEvent::Update { id: candidate.index, score }).await?;
        }
        Ok(())
    }
}

async fn send(events: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<(), PipelineError> {
    log::debug!("Emitting {} event", event.kind());
    events.send(event).await.map_err(|_| PipelineError::Disconnected)
}

async fn encode_thumbnails(
    candidates: &[Candidate],
) -> Result<Vec<CandidateThumbnail>, PipelineError> {
    let crops: Vec<(usize, DynamicImage)> = candidates
        .iter()
        .map(|c| (c.index, c.thumbnail.clone()))
        .collect();
    blocking(move || {
        crops
            .iter()
            .map(|(index, crop)| {
                imaging::encode_png_base64(crop)
                    .map(|thumbnail| CandidateThumbnail { id: *index, thumbnail })
                    .map_err(|source| PipelineError::Image {
                        what: "candidate thumbnail",
                        source,
                    })
            })
            .collect()
    })
    .await
}

/// Runs CPU-bound image work off the async worker.
async fn blocking<F, T>(f: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::Worker(e.to_string()))?
}
