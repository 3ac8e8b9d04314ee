use async_trait::async_trait;
use image::DynamicImage;
use ndarray::Array1;

use super::{CollaboratorError, Embedder};
use crate::similarity::l2_normalize;

/// Joint RGB colour histogram, L2-normalized.
///
/// Cheap and deterministic; useful without a model server and for
/// comparing near-identical crops.
#[derive(Debug, Clone)]
pub struct HistogramEmbedder {
    bins: u32,
}

impl HistogramEmbedder {
    pub fn new(bins: u32) -> Self {
        Self { bins: bins.clamp(1, 64) }
    }

    pub fn dimensions(&self) -> usize {
        (self.bins as usize).pow(3)
    }

    pub fn features(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        let rgb = image.to_rgb8();
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(CollaboratorError::InvalidResponse("empty image region".into()));
        }
        let bins = self.bins as usize;
        let bucket = |v: u8| v as usize * bins / 256;

        let mut histogram = Array1::<f32>::zeros(self.dimensions());
        for pixel in rgb.pixels() {
            let [r, g, b] = pixel.0;
            histogram[(bucket(r) * bins + bucket(g)) * bins + bucket(b)] += 1.0;
        }

        let mut features = histogram.to_vec();
        l2_normalize(&mut features).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;
        Ok(features)
    }
}

#[async_trait]
impl Embedder for HistogramEmbedder {
    async fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        self.features(image)
    }
}
