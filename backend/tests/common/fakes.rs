use async_trait::async_trait;
use image::DynamicImage;
use shared::BoundingBox;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use visual_search::models::histogram::HistogramEmbedder;
use visual_search::models::{
    Captioner, CollaboratorError, Collaborators, Detection, Detector, Embedder,
};

/// Returns a fixed list of boxes and remembers every query it was given.
#[derive(Default)]
pub struct FakeDetector {
    boxes: Vec<BoundingBox>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl FakeDetector {
    pub fn with_boxes(boxes: Vec<BoundingBox>) -> Self {
        Self {
            boxes,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl Detector for FakeDetector {
    async fn detect(
        &self,
        _image: &DynamicImage,
        text_query: &str,
        _threshold: f32,
    ) -> Result<Vec<Detection>, CollaboratorError> {
        self.queries.lock().unwrap().push(text_query.to_string());
        if self.fail {
            return Err(CollaboratorError::Unavailable("detector offline".into()));
        }
        Ok(self
            .boxes
            .iter()
            .map(|b| Detection {
                bounding_box: *b,
                confidence: 0.9,
            })
            .collect())
    }
}

/// Colour-histogram embedder that can be told to fail on its n-th call
/// (0-based; call 0 embeds the query region).
pub struct FlakyEmbedder {
    inner: HistogramEmbedder,
    fail_on_call: Option<usize>,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn reliable() -> Self {
        Self {
            inner: HistogramEmbedder::new(8),
            fail_on_call: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_on_call(call: usize) -> Self {
        Self {
            fail_on_call: Some(call),
            ..Self::reliable()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    async fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(CollaboratorError::Unavailable("embedder crashed".into()));
        }
        self.inner.embed(image).await
    }
}

pub struct FakeCaptioner {
    pub caption: String,
}

impl FakeCaptioner {
    pub fn new(caption: &str) -> Self {
        Self {
            caption: caption.to_string(),
        }
    }
}

#[async_trait]
impl Captioner for FakeCaptioner {
    async fn caption(&self, _image: &DynamicImage) -> Result<String, CollaboratorError> {
        Ok(self.caption.clone())
    }
}

pub fn collaborators(
    detector: Arc<FakeDetector>,
    embedder: Arc<FlakyEmbedder>,
    captioner: Arc<FakeCaptioner>,
) -> Collaborators {
    Collaborators {
        detector,
        embedder,
        captioner,
    }
}

pub fn fake_collaborators(boxes: Vec<BoundingBox>) -> Collaborators {
    collaborators(
        Arc::new(FakeDetector::with_boxes(boxes)),
        Arc::new(FlakyEmbedder::reliable()),
        Arc::new(FakeCaptioner::new("a red square on a grey background")),
    )
}
