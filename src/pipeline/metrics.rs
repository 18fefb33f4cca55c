// src/pipeline/metrics.rs
//
// Per-run counters. Atomics so a caller that hands a clone to
// `InferencePipeline::run_to` can poll progress from another thread while
// the run is streaming.

use crate::sliced_inference::FrameStats;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_read: Arc<AtomicU64>,
    pub frames_written: Arc<AtomicU64>,
    pub tiles_processed: Arc<AtomicU64>,
    pub raw_detections: Arc<AtomicU64>,
    pub merged_detections: Arc<AtomicU64>,
    pub target_detections: Arc<AtomicU64>,
    pub inference_time_us: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_read: Arc::new(AtomicU64::new(0)),
            frames_written: Arc::new(AtomicU64::new(0)),
            tiles_processed: Arc::new(AtomicU64::new(0)),
            raw_detections: Arc::new(AtomicU64::new(0)),
            merged_detections: Arc::new(AtomicU64::new(0)),
            target_detections: Arc::new(AtomicU64::new(0)),
            inference_time_us: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    pub fn record_frame(&self, stats: &FrameStats, drawn: usize) {
        self.add(&self.tiles_processed, stats.tiles);
        self.add(&self.raw_detections, stats.raw_detections);
        self.add(&self.merged_detections, stats.merged_detections);
        self.add(&self.inference_time_us, stats.inference_us);
        self.add(&self.target_detections, drawn as u64);
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_written.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let frames_read = self.frames_read.load(Ordering::Relaxed);
        let inference_us = self.inference_time_us.load(Ordering::Relaxed);
        MetricsSummary {
            frames_read,
            frames_written: self.frames_written.load(Ordering::Relaxed),
            tiles_processed: self.tiles_processed.load(Ordering::Relaxed),
            raw_detections: self.raw_detections.load(Ordering::Relaxed),
            merged_detections: self.merged_detections.load(Ordering::Relaxed),
            target_detections: self.target_detections.load(Ordering::Relaxed),
            avg_inference_us: inference_us.checked_div(frames_read).unwrap_or(0),
            fps: self.fps(),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_read: u64,
    pub frames_written: u64,
    pub tiles_processed: u64,
    pub raw_detections: u64,
    pub merged_detections: u64,
    pub target_detections: u64,
    pub avg_inference_us: u64,
    pub fps: f64,
    pub elapsed_secs: f64,
}
