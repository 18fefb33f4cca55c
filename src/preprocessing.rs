// src/preprocessing.rs

use crate::error::{PipelineError, Result};
use opencv::{
    core::{self, Mat},
    imgproc,
    prelude::*,
};

const PAD_VALUE: f64 = 114.0;

/// Maps network-input coordinates back to region coordinates after a letterbox.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn for_region(src_w: usize, src_h: usize, target: usize) -> Self {
        let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
        let scaled_w = ((src_w as f32 * scale).round() as usize).clamp(1, target);
        let scaled_h = ((src_h as f32 * scale).round() as usize).clamp(1, target);
        Self {
            scale,
            pad_x: ((target - scaled_w) / 2) as f32,
            pad_y: ((target - scaled_h) / 2) as f32,
        }
    }

    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Aspect-preserving resize into a `target`-sided square with gray padding,
/// packed as normalized RGB CHW.
pub fn letterbox(region: &Mat, target: usize) -> Result<(Vec<f32>, Letterbox)> {
    let src_w = region.cols() as usize;
    let src_h = region.rows() as usize;
    let lb = Letterbox::for_region(src_w, src_h, target);

    let scaled_w = ((src_w as f32 * lb.scale).round() as usize).clamp(1, target);
    let scaled_h = ((src_h as f32 * lb.scale).round() as usize).clamp(1, target);

    let mut resized = Mat::default();
    imgproc::resize(
        region,
        &mut resized,
        core::Size::new(scaled_w as i32, scaled_h as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(|e| cv_error("letterbox resize", e))?;

    let left = lb.pad_x as i32;
    let top = lb.pad_y as i32;
    let right = target as i32 - scaled_w as i32 - left;
    let bottom = target as i32 - scaled_h as i32 - top;

    let mut canvas = Mat::default();
    core::copy_make_border(
        &resized,
        &mut canvas,
        top,
        bottom,
        left,
        right,
        core::BORDER_CONSTANT,
        core::Scalar::all(PAD_VALUE),
    )
    .map_err(|e| cv_error("letterbox padding", e))?;

    Ok((bgr_to_chw(&canvas, target)?, lb))
}

/// Resize ignoring aspect ratio, packed as normalized RGB CHW.
pub fn stretch(region: &Mat, target: usize) -> Result<Vec<f32>> {
    let mut resized = Mat::default();
    imgproc::resize(
        region,
        &mut resized,
        core::Size::new(target as i32, target as i32),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .map_err(|e| cv_error("stretch resize", e))?;

    bgr_to_chw(&resized, target)
}

/// BGR HWC bytes -> RGB CHW floats in [0, 1].
fn bgr_to_chw(mat: &Mat, size: usize) -> Result<Vec<f32>> {
    let bytes = mat.data_bytes().map_err(|e| cv_error("tensor packing", e))?;
    let plane = size * size;
    if bytes.len() != plane * 3 {
        return Err(PipelineError::Inference(format!(
            "expected {} bytes for a {}x{} BGR image, got {}",
            plane * 3,
            size,
            size,
            bytes.len()
        )));
    }

    let mut output = vec![0.0f32; 3 * plane];
    for (i, px) in bytes.chunks_exact(3).enumerate() {
        output[i] = px[2] as f32 / 255.0;
        output[plane + i] = px[1] as f32 / 255.0;
        output[2 * plane + i] = px[0] as f32 / 255.0;
    }
    Ok(output)
}

fn cv_error(stage: &str, err: opencv::Error) -> PipelineError {
    PipelineError::Inference(format!("{stage}: {err}"))
}
