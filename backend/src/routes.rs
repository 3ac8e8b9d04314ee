use actix_files::Files;
use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use futures::{StreamExt, TryStreamExt};
use image::DynamicImage;
use log::info;
use shared::{
    CaptionResponse, DetectedRegion, DetectionResponse, RegionOfInterest, TaskCreated,
};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::imaging;
use crate::models::Collaborators;
use crate::pipeline::PipelineRunner;
use crate::store::{NewTask, TaskStore};
use crate::stream;

/// Request-handling knobs taken from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub max_upload_bytes: usize,
    pub default_detection_threshold: f32,
    pub default_similarity_threshold: f32,
    pub channel_capacity: usize,
}

impl From<&AppConfig> for ApiSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_upload_bytes: config.server.max_upload_bytes,
            default_detection_threshold: config.pipeline.default_detection_threshold,
            default_similarity_threshold: config.pipeline.default_similarity_threshold,
            channel_capacity: config.pipeline.channel_capacity,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig, static_dir: Option<PathBuf>) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/start_detection").route(web::post().to(start_detection)))
        .service(web::resource("/stream/{task_id}").route(web::get().to(stream_task)))
        .service(web::resource("/generate_caption").route(web::post().to(generate_caption)))
        .service(web::resource("/detect").route(web::post().to(detect)));

    if let Some(dir) = static_dir {
        info!("Serving static files from {}", dir.display());
        cfg.service(Files::new("/", dir).index_file("index.html"));
    }
}

/// Named parts of a multipart upload.
#[derive(Debug, Default)]
struct FormFields {
    parts: HashMap<String, Vec<u8>>,
}

impl FormFields {
    async fn read(mut payload: Multipart, limit: usize) -> Result<Self, ApiError> {
        let mut parts = HashMap::new();
        let mut total = 0usize;

        while let Some(mut field) = payload.try_next().await? {
            let name = field
                .content_disposition()
                .and_then(|cd| cd.get_name())
                .map(str::to_string);
            let mut data = Vec::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk?;
                total += chunk.len();
                if total > limit {
                    return Err(ApiError::PayloadTooLarge(limit));
                }
                data.extend_from_slice(&chunk);
            }
            if let Some(name) = name {
                parts.insert(name, data);
            }
        }
        Ok(Self { parts })
    }

    fn take_image(&mut self, name: &'static str) -> Result<Vec<u8>, ApiError> {
        match self.parts.remove(name) {
            Some(bytes) if !bytes.is_empty() => Ok(bytes),
            _ => Err(ApiError::MissingField(name)),
        }
    }

    fn text(&self, name: &str) -> Result<Option<String>, ApiError> {
        self.parts
            .get(name)
            .map(|bytes| {
                String::from_utf8(bytes.clone()).map_err(|_| ApiError::InvalidField {
                    field: name.to_string(),
                    value: String::from_utf8_lossy(bytes).into_owned(),
                })
            })
            .transpose()
    }

    fn number(&self, names: &[&str]) -> Result<Option<f64>, ApiError> {
        for name in names {
            if let Some(raw) = self.text(name)? {
                let value = raw.trim().parse::<f64>().ok().filter(|v| v.is_finite());
                return value.map(Some).ok_or_else(|| ApiError::InvalidField {
                    field: name.to_string(),
                    value: raw,
                });
            }
        }
        Ok(None)
    }

    /// Pixel coordinates arrive as floats and are truncated toward zero.
    fn pixel(&self, name: &str) -> Result<u32, ApiError> {
        match self.number(&[name])? {
            None => Ok(0),
            Some(v) if v >= 0.0 && v <= u32::MAX as f64 => Ok(v.trunc() as u32),
            Some(v) => Err(ApiError::InvalidField {
                field: name.to_string(),
                value: v.to_string(),
            }),
        }
    }

    fn region_of_interest(&self) -> Result<RegionOfInterest, ApiError> {
        Ok(RegionOfInterest::new(
            self.pixel("roi_x")?,
            self.pixel("roi_y")?,
            self.pixel("roi_width")?,
            self.pixel("roi_height")?,
        ))
    }

    fn threshold(&self, names: &[&str], default: f32) -> Result<f32, ApiError> {
        Ok(self.number(names)?.map(|v| v as f32).unwrap_or(default))
    }
}

fn check_image(field: &'static str, bytes: &[u8]) -> Result<(), ApiError> {
    imaging::sniff_format(bytes)
        .map(|_| ())
        .map_err(|source| ApiError::Image { field, source })
}

async fn decode_image(field: &'static str, bytes: Vec<u8>) -> Result<DynamicImage, ApiError> {
    web::block(move || imaging::decode_rgb(&bytes))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|source| ApiError::Image { field, source })
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

async fn start_detection(
    payload: Multipart,
    store: web::Data<TaskStore>,
    settings: web::Data<ApiSettings>,
) -> Result<HttpResponse, ApiError> {
    let mut form = FormFields::read(payload, settings.max_upload_bytes).await?;

    let target_image = form.take_image("target_image")?;
    let query_image = form.take_image("query_image")?;
    let query_text = form.text("query_text")?.ok_or(ApiError::MissingField("query_text"))?;
    check_image("target_image", &target_image)?;
    check_image("query_image", &query_image)?;

    let inputs = NewTask {
        query_image,
        target_image,
        query_text,
        region_of_interest: form.region_of_interest()?,
        detection_threshold: form.threshold(
            &["detection_threshold", "owl_threshold"],
            settings.default_detection_threshold,
        )?,
        similarity_threshold: form.threshold(
            &["similarity_threshold", "clip_threshold"],
            settings.default_similarity_threshold,
        )?,
    };

    let task_id = store.create(inputs);
    Ok(HttpResponse::Ok().json(TaskCreated { task_id }))
}

async fn stream_task(
    path: web::Path<String>,
    store: web::Data<TaskStore>,
    runner: web::Data<PipelineRunner>,
    settings: web::Data<ApiSettings>,
) -> HttpResponse {
    let task_id = path.into_inner();
    stream::open(&task_id, &store, &runner, settings.channel_capacity)
}

async fn generate_caption(
    payload: Multipart,
    collaborators: web::Data<Collaborators>,
    settings: web::Data<ApiSettings>,
) -> Result<HttpResponse, ApiError> {
    let mut form = FormFields::read(payload, settings.max_upload_bytes).await?;
    let query_image = form.take_image("query_image")?;
    let roi = form.region_of_interest()?;

    let image = decode_image("query_image", query_image).await?;
    let region = imaging::crop_region(&image, &roi);
    let caption = collaborators.captioner.caption(&region).await?;
    info!("Generated caption: '{}'", caption);

    Ok(HttpResponse::Ok().json(CaptionResponse { caption }))
}

/// Single-shot detection without a task: boxes plus an annotated preview.
async fn detect(
    payload: Multipart,
    collaborators: web::Data<Collaborators>,
    settings: web::Data<ApiSettings>,
) -> Result<HttpResponse, ApiError> {
    let mut form = FormFields::read(payload, settings.max_upload_bytes).await?;
    let target_image = form.take_image("target_image")?;
    let query_text = form.text("query_text")?.ok_or(ApiError::MissingField("query_text"))?;
    if query_text.trim().is_empty() {
        return Err(ApiError::InvalidField {
            field: "query_text".into(),
            value: query_text,
        });
    }
    let threshold = form.threshold(
        &["detection_threshold", "owl_threshold"],
        settings.default_detection_threshold,
    )?;

    let target = decode_image("target_image", target_image).await?;
    let detections = collaborators
        .detector
        .detect(&target, &query_text, threshold)
        .await?;
    info!("Static detection found {} boxes for '{}'", detections.len(), query_text);

    let boxes: Vec<_> = detections.iter().map(|d| d.bounding_box).collect();
    let annotated_image = web::block(move || {
        imaging::encode_png_base64(&DynamicImage::ImageRgb8(imaging::annotate(&target, &boxes)))
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?
    .map_err(|e| ApiError::Internal(e.to_string()))?;

    let detections = detections
        .into_iter()
        .enumerate()
        .map(|(id, d)| DetectedRegion {
            id,
            bounding_box: d.bounding_box,
            score: d.confidence,
        })
        .collect();

    Ok(HttpResponse::Ok().json(DetectionResponse {
        detections,
        annotated_image,
    }))
}
