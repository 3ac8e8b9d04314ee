use async_trait::async_trait;
use image::DynamicImage;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared::BoundingBox;
use std::time::Duration;

use super::{Captioner, CollaboratorError, Detection, Detector, Embedder};
use crate::imaging::encode_png_base64;

#[derive(Serialize)]
struct DetectRequest<'a> {
    image: String,
    text: &'a str,
    threshold: f32,
}

#[derive(Deserialize)]
struct DetectResponse {
    detections: Vec<RemoteDetection>,
}

#[derive(Deserialize)]
struct RemoteDetection {
    #[serde(rename = "box")]
    bounding_box: BoundingBox,
    score: f32,
}

#[derive(Serialize)]
struct ImageRequest {
    image: String,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct CaptionResponse {
    caption: String,
}

/// JSON client for a model server hosting detection, embedding and captioning.
#[derive(Clone)]
pub struct RemoteInference {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteInference {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CollaboratorError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(path);
        log::debug!("POST {}", url);
        let resp = self.client.post(&url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::error!("Inference server error from {}: {} {}", url, status, body);
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Resp>()
            .await
            .map_err(|e| CollaboratorError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Detector for RemoteInference {
    async fn detect(
        &self,
        image: &DynamicImage,
        text_query: &str,
        threshold: f32,
    ) -> Result<Vec<Detection>, CollaboratorError> {
        let request = DetectRequest {
            image: encode_png_base64(image)?,
            text: text_query,
            threshold,
        };
        let response: DetectResponse = self.post("detect", &request).await?;
        Ok(response
            .detections
            .into_iter()
            .map(|d| Detection {
                bounding_box: d.bounding_box,
                confidence: d.score,
            })
            .collect())
    }
}

#[async_trait]
impl Embedder for RemoteInference {
    async fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>, CollaboratorError> {
        let request = ImageRequest {
            image: encode_png_base64(image)?,
        };
        let response: EmbedResponse = self.post("embed", &request).await?;
        if response.embedding.is_empty() {
            return Err(CollaboratorError::InvalidResponse("empty embedding".into()));
        }
        Ok(response.embedding)
    }
}

#[async_trait]
impl Captioner for RemoteInference {
    async fn caption(&self, image: &DynamicImage) -> Result<String, CollaboratorError> {
        let request = ImageRequest {
            image: encode_png_base64(image)?,
        };
        let response: CaptionResponse = self.post("caption", &request).await?;
        Ok(response.caption.trim().to_string())
    }
}
