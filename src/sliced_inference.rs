// src/sliced_inference.rs
//
// Runs the detector over every tile of a frame, lifts tile-local boxes into
// frame coordinates and suppresses the duplicates that overlapping tiles
// produce for the same object.

use crate::error::{PipelineError, Result};
use crate::person_detection::{non_max_suppression, Detection, Detector};
use crate::tiling::{Tile, TileGrid};
use crate::types::SlicingConfig;
use opencv::{core::Mat, prelude::*};
use std::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub tiles: u64,
    pub raw_detections: u64,
    pub merged_detections: u64,
    pub inference_us: u64,
}

pub struct SlicedInferenceEngine {
    merge_iou_threshold: f32,
    class_agnostic: bool,
    full_frame_pass: bool,
}

impl SlicedInferenceEngine {
    pub fn new(slicing: &SlicingConfig) -> Self {
        Self {
            merge_iou_threshold: slicing.merge_iou_threshold,
            class_agnostic: slicing.class_agnostic_merge,
            full_frame_pass: slicing.full_frame_pass,
        }
    }

    pub fn process_frame<D: Detector + ?Sized>(
        &self,
        frame: &Mat,
        grid: &TileGrid,
        detector: &mut D,
    ) -> Result<Vec<Detection>> {
        self.process_frame_with_stats(frame, grid, detector)
            .map(|(detections, _)| detections)
    }

    pub fn process_frame_with_stats<D: Detector + ?Sized>(
        &self,
        frame: &Mat,
        grid: &TileGrid,
        detector: &mut D,
    ) -> Result<(Vec<Detection>, FrameStats)> {
        assert!(!grid.is_empty(), "tile grid must contain at least one tile");
        debug_assert_eq!(
            grid.frame_size(),
            (frame.cols() as u32, frame.rows() as u32),
            "tile grid computed for a different frame size"
        );

        let started = Instant::now();
        let mut stats = FrameStats::default();

        // Collected strictly in grid order: NMS breaks exact ties by position.
        let mut candidates = Vec::new();
        for tile in grid.tiles() {
            let local = infer_tile(frame, tile, detector)?;
            stats.tiles += 1;
            candidates.extend(remap_to_frame(&local, tile));
        }

        if self.full_frame_pass && grid.len() > 1 {
            candidates.extend(detector.infer(frame)?);
        }

        stats.raw_detections = candidates.len() as u64;
        let merged = self.merge(candidates);
        stats.merged_detections = merged.len() as u64;
        stats.inference_us = started.elapsed().as_micros() as u64;

        debug!(
            "Sliced inference: {} tiles, {} raw -> {} merged detections",
            stats.tiles, stats.raw_detections, stats.merged_detections
        );

        Ok((merged, stats))
    }

    /// Cross-tile duplicate suppression.
    pub fn merge(&self, detections: Vec<Detection>) -> Vec<Detection> {
        non_max_suppression(detections, self.merge_iou_threshold, self.class_agnostic)
    }
}

fn infer_tile<D: Detector + ?Sized>(
    frame: &Mat,
    tile: &Tile,
    detector: &mut D,
) -> Result<Vec<Detection>> {
    let region = Mat::roi(frame, tile.rect()).map_err(|e| {
        PipelineError::Inference(format!("failed to extract tile {:?}: {}", tile, e))
    })?;
    detector.infer(&region)
}

/// Tile-local boxes -> frame-global boxes.
pub fn remap_to_frame(local: &[Detection], tile: &Tile) -> Vec<Detection> {
    local
        .iter()
        .map(|d| d.translated(tile.x as f32, tile.y as f32))
        .collect()
}
