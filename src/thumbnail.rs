use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::model::ThumbnailSize;
use crate::source::HttpFetch;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::path::Path;
use tracing::{debug, warn};

/// Where to cut from the source image and where to place it on the output canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub src_x: u32,
    pub src_y: u32,
    pub width: u32,
    pub height: u32,
    pub dest_x: u32,
    pub dest_y: u32,
    pub canvas_width: u32,
    pub canvas_height: u32,
}

/// Computes the crop for an image of `actual_w` x `actual_h`.
///
/// `AutoSquare` keeps the largest centered square. An exact size clamps each
/// dimension to the image and centers the clamped region on a canvas of the
/// requested size.
pub fn crop_region(actual_w: u32, actual_h: u32, size: ThumbnailSize) -> CropRegion {
    match size {
        ThumbnailSize::AutoSquare => {
            let side = actual_w.min(actual_h);
            CropRegion {
                src_x: (actual_w - side) / 2,
                src_y: (actual_h - side) / 2,
                width: side,
                height: side,
                dest_x: 0,
                dest_y: 0,
                canvas_width: side,
                canvas_height: side,
            }
        }
        ThumbnailSize::Exact { width, height } => {
            let clamped_w = width.min(actual_w);
            let clamped_h = height.min(actual_h);
            CropRegion {
                src_x: (actual_w - clamped_w) / 2,
                src_y: (actual_h - clamped_h) / 2,
                width: clamped_w,
                height: clamped_h,
                dest_x: if width > clamped_w { (width - clamped_w) / 2 } else { 0 },
                dest_y: if height > clamped_h { (height - clamped_h) / 2 } else { 0 },
                canvas_width: width,
                canvas_height: height,
            }
        }
    }
}

/// Max-resolution URL first, standard-definition fallback second.
pub fn thumbnail_urls(config: &EngineConfig, video_id: &str) -> [String; 2] {
    let host = config.thumbnail_host.trim_end_matches('/');
    [
        format!("{}/{}/maxresdefault.jpg", host, video_id),
        format!("{}/{}/sddefault.jpg", host, video_id),
    ]
}

/// Downloads and decodes the best available thumbnail.
pub fn fetch_thumbnail(
    fetcher: &dyn HttpFetch,
    config: &EngineConfig,
    video_id: &str,
) -> Result<DynamicImage> {
    for url in thumbnail_urls(config, video_id) {
        let decoded = fetcher
            .fetch_bytes(&url)
            .and_then(|bytes| image::load_from_memory(&bytes).map_err(EngineError::from));
        match decoded {
            Ok(img) => {
                debug!("Fetched thumbnail {} ({}x{})", url, img.width(), img.height());
                return Ok(img);
            }
            Err(e) => warn!("Thumbnail {} unavailable: {}", url, e),
        }
    }
    Err(EngineError::ThumbnailUnavailable(video_id.to_string()))
}

/// Applies the crop geometry to a decoded image.
pub fn render(img: &DynamicImage, size: ThumbnailSize) -> RgbaImage {
    let region = crop_region(img.width(), img.height(), size);
    let cropped = img
        .crop_imm(region.src_x, region.src_y, region.width, region.height)
        .to_rgba8();
    if region.canvas_width == region.width && region.canvas_height == region.height {
        return cropped;
    }
    let mut canvas = RgbaImage::new(region.canvas_width, region.canvas_height);
    image::imageops::overlay(
        &mut canvas,
        &cropped,
        i64::from(region.dest_x),
        i64::from(region.dest_y),
    );
    canvas
}

/// Fetches, crops and writes the thumbnail as PNG to `output`.
pub fn download_thumbnail(
    fetcher: &dyn HttpFetch,
    config: &EngineConfig,
    video_id: &str,
    size: ThumbnailSize,
    output: &Path,
) -> Result<()> {
    let img = fetch_thumbnail(fetcher, config, video_id)?;
    render(&img, size).save_with_format(output, ImageFormat::Png)?;
    debug!("Thumbnail written to {:?}", output);
    Ok(())
}
