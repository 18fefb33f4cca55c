use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub detection: DetectionConfig,
    pub slicing: SlicingConfig,
    pub annotation: AnnotationConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Directory holding `<model identifier>.onnx` weights.
    pub models_dir: String,
    pub device: Device,
    pub num_threads: usize,
    /// Side of the square network input.
    pub input_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cpu,
    Cuda,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence_threshold: f32,
    /// Per-tile NMS for models without built-in suppression.
    pub nms_iou_threshold: f32,
    pub target_class_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicingConfig {
    pub slice_width: u32,
    pub slice_height: u32,
    pub overlap_width_ratio: f32,
    pub overlap_height_ratio: f32,
    /// IoU above which detections from different tiles are duplicates.
    pub merge_iou_threshold: f32,
    pub class_agnostic_merge: bool,
    /// Also run the detector once over the whole frame.
    pub full_frame_pass: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    /// BGR
    pub color: [u8; 3],
    pub thickness: i32,
    pub font_scale: f64,
    /// Gap in pixels between the label baseline and the box top.
    pub label_offset: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub output_dir: String,
    pub fourcc: String,
    pub progress_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Static properties of an opened video. Every field is positive once
/// constructed through [`VideoMetadata::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub total_frames: u64,
}

impl VideoMetadata {
    pub fn new(fps: i64, width: i64, height: i64, total_frames: i64) -> Option<Self> {
        if fps <= 0 || width <= 0 || height <= 0 || total_frames <= 0 {
            return None;
        }
        Some(Self {
            fps: u32::try_from(fps).ok()?,
            width: u32::try_from(width).ok()?,
            height: u32::try_from(height).ok()?,
            total_frames: u64::try_from(total_frames).ok()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_rejects_non_positive_fields() {
        assert!(VideoMetadata::new(0, 1280, 720, 10).is_none());
        assert!(VideoMetadata::new(30, 0, 720, 10).is_none());
        assert!(VideoMetadata::new(30, 1280, -1, 10).is_none());
        assert!(VideoMetadata::new(30, 1280, 720, 0).is_none());

        let meta = VideoMetadata::new(30, 1280, 720, 10).unwrap();
        assert_eq!(meta.width, 1280);
        assert_eq!(meta.total_frames, 10);
    }
}
