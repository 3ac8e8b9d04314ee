use async_trait::async_trait;
use image::DynamicImage;
use image::imageops::FilterType;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::nn::ModuleT;
use tch::{CModule, Device, Kind, Tensor};

use super::{CollaboratorError, Embedder};
use crate::similarity::l2_normalize;

const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// TorchScript image encoder, e.g. an exported CLIP vision tower.
#[derive(Clone)]
pub struct TorchEmbedder {
    model: Arc<Mutex<CModule>>,
    device: Device,
    input_size: u32,
}

impl TorchEmbedder {
    pub fn load(model_path: &Path, input_size: u32) -> Result<Self, CollaboratorError> {
        let device = Device::cuda_if_available();
        let model = CModule::load_on_device(model_path, device)?;
        log::info!("TorchScript embedder loaded on {:?}", device);
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            device,
            input_size,
        })
    }

    fn preprocess(&self, image: &DynamicImage) -> Tensor {
        let size = self.input_size;
        let resized = image
            .resize_exact(size, size, FilterType::CatmullRom)
            .to_rgb8();
        let plane = (size * size) as usize;
        let mut data = vec![0.0f32; 3 * plane];
        for (i, pixel) in resized.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (pixel.0[c] as f32 / 255.0 - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
        Tensor::from_slice(&data)
            .view([1, 3, size as i64, size as i64])
            .to_device(self.device)
    }

    fn forward(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        let input = self.preprocess(image);
        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| CollaboratorError::Unavailable("embedder lock poisoned".into()))?;
            model.forward_t(&input, false)
        };
        let output_flat = output
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .view([-1]);
        let num_elements = output_flat.size()[0] as usize;
        let mut features = vec![0.0f32; num_elements];
        output_flat.copy_data(&mut features, num_elements);
        l2_normalize(&mut features).map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))?;
        Ok(features)
    }
}

#[async_trait]
impl Embedder for TorchEmbedder {
    async fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        let this = self.clone();
        let image = image.clone();
        tokio::task::spawn_blocking(move || this.forward(&image))
            .await
            .map_err(|e| CollaboratorError::Unavailable(e.to_string()))?
    }
}
