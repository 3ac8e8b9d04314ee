use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageResult, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use shared::{BoundingBox, RegionOfInterest};
use std::io::Cursor;

const OUTLINE: Rgb<u8> = Rgb([255, 0, 0]);
const OUTLINE_WIDTH: u32 = 3;

/// Decodes any supported format and converts it to 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> ImageResult<DynamicImage> {
    let image = image::load_from_memory(bytes)?;
    Ok(DynamicImage::ImageRgb8(image.to_rgb8()))
}

/// Sniffs the container format without decoding pixel data.
pub fn sniff_format(bytes: &[u8]) -> ImageResult<ImageFormat> {
    image::guess_format(bytes)
}

/// Resolves a region of interest against concrete image dimensions.
///
/// A zero width or height selects the whole image. The result is clamped to
/// the image bounds and is never smaller than 1x1.
pub fn resolve_region(roi: &RegionOfInterest, width: u32, height: u32) -> (u32, u32, u32, u32) {
    if roi.is_full_image() {
        return (0, 0, width, height);
    }
    let x = roi.x.min(width.saturating_sub(1));
    let y = roi.y.min(height.saturating_sub(1));
    let w = roi.width.min(width - x).max(1);
    let h = roi.height.min(height - y).max(1);
    (x, y, w, h)
}

pub fn crop_region(image: &DynamicImage, roi: &RegionOfInterest) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = resolve_region(roi, width, height);
    image.crop_imm(x, y, w, h)
}

/// Pixel rectangle covered by a detector box. Fractional edges are widened
/// to whole pixels, then clamped like any other region.
fn box_region(bbox: &BoundingBox, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let x0 = bbox.x_min.floor().max(0.0) as u32;
    let y0 = bbox.y_min.floor().max(0.0) as u32;
    let x1 = bbox.x_max.ceil().max(0.0) as u32;
    let y1 = bbox.y_max.ceil().max(0.0) as u32;
    let roi = RegionOfInterest::new(
        x0,
        y0,
        x1.saturating_sub(x0).max(1),
        y1.saturating_sub(y0).max(1),
    );
    resolve_region(&roi, width, height)
}

/// Crops a detector box.
pub fn crop_box(image: &DynamicImage, bbox: &BoundingBox) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (x, y, w, h) = box_region(bbox, width, height);
    image.crop_imm(x, y, w, h)
}

pub fn encode_png(image: &DynamicImage) -> ImageResult<Vec<u8>> {
    let mut buffered = Cursor::new(Vec::new());
    image.write_to(&mut buffered, ImageFormat::Png)?;
    Ok(buffered.into_inner())
}

pub fn encode_png_base64(image: &DynamicImage) -> ImageResult<String> {
    Ok(STANDARD.encode(encode_png(image)?))
}

/// Draws a red outline around every box.
pub fn annotate(image: &DynamicImage, boxes: &[BoundingBox]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();
    for bbox in boxes {
        let (x, y, w, h) = box_region(bbox, width, height);
        for inset in 0..OUTLINE_WIDTH {
            if w <= 2 * inset || h <= 2 * inset {
                break;
            }
            let rect = Rect::at((x + inset) as i32, (y + inset) as i32)
                .of_size(w - 2 * inset, h - 2 * inset);
            draw_hollow_rect_mut(&mut canvas, rect, OUTLINE);
        }
    }
    canvas
}
