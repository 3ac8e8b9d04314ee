use actix_web::http::header::CONTENT_TYPE;
use actix_web::test::TestRequest;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use shared::{BoundingBox, RegionOfInterest, StreamEvent};
use std::io::Cursor;
use tokio::sync::mpsc;
use visual_search::config::AnnounceMode;
use visual_search::models::Collaborators;
use visual_search::pipeline::{PipelineRunner, PipelineSettings, RunOutcome};
use visual_search::store::{NewTask, TaskStore};

pub const GREY: Rgb<u8> = Rgb([128, 128, 128]);
pub const RED: Rgb<u8> = Rgb([220, 20, 20]);
pub const BLUE: Rgb<u8> = Rgb([20, 20, 220]);

/// Red square at (20, 20)..(60, 60).
pub const RED_BOX: BoundingBox = BoundingBox {
    x_min: 20.0,
    y_min: 20.0,
    x_max: 60.0,
    y_max: 60.0,
};
/// Blue square at (70, 70)..(90, 90).
pub const BLUE_BOX: BoundingBox = BoundingBox {
    x_min: 70.0,
    y_min: 70.0,
    x_max: 90.0,
    y_max: 90.0,
};
/// Plain background.
pub const GREY_BOX: BoundingBox = BoundingBox {
    x_min: 0.0,
    y_min: 0.0,
    x_max: 15.0,
    y_max: 15.0,
};

/// 100x100 grey scene with a red and a blue square.
pub fn scene() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(100, 100, |x, y| {
        if (20..60).contains(&x) && (20..60).contains(&y) {
            RED
        } else if (70..90).contains(&x) && (70..90).contains(&y) {
            BLUE
        } else {
            GREY
        }
    }))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buffered = Cursor::new(Vec::new());
    image.write_to(&mut buffered, ImageFormat::Png).unwrap();
    buffered.into_inner()
}

pub fn red_roi() -> RegionOfInterest {
    RegionOfInterest::new(20, 20, 40, 40)
}

pub fn new_task(query_text: &str, roi: RegionOfInterest) -> NewTask {
    let bytes = png_bytes(&scene());
    NewTask {
        query_image: bytes.clone(),
        target_image: bytes,
        query_text: query_text.to_string(),
        region_of_interest: roi,
        detection_threshold: 0.1,
        similarity_threshold: 0.2,
    }
}

pub fn quiet_settings(announce: AnnounceMode) -> PipelineSettings {
    PipelineSettings {
        announce,
        update_interval: std::time::Duration::ZERO,
    }
}

/// Runs one task to completion and returns everything it emitted.
pub async fn run_collecting(
    collaborators: Collaborators,
    settings: PipelineSettings,
    inputs: NewTask,
) -> (RunOutcome, Vec<StreamEvent>) {
    let store = TaskStore::new();
    let id = store.create(inputs);
    let task = store.take(&id.to_string()).unwrap();
    assert!(store.is_empty());

    let runner = PipelineRunner::new(collaborators, settings);
    let (tx, mut rx) = mpsc::channel(64);
    let outcome = runner.run(task, &tx).await;
    drop(tx);

    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    (outcome, events)
}

pub fn kinds(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.kind()).collect()
}

pub const BOUNDARY: &str = "visual-search-test-boundary";

pub enum Part {
    File(&'static str, Vec<u8>),
    Text(&'static str, String),
}

pub fn multipart_body(parts: &[Part]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            Part::File(name, bytes) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}.png\"\r\nContent-Type: image/png\r\n\r\n",
                        name, name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(bytes);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn multipart_request(uri: &str, parts: &[Part]) -> TestRequest {
    TestRequest::post()
        .uri(uri)
        .insert_header((
            CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        ))
        .set_payload(multipart_body(parts))
}

/// Parses a server-sent-events body into JSON values, one per `data:` line.
pub fn parse_sse(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}
