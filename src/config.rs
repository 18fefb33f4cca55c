use crate::error::{PipelineError, Result};
use crate::person_detection::PERSON_CLASS_ID;
use crate::types::{
    AnnotationConfig, Config, DetectionConfig, Device, LoggingConfig, ModelConfig, SlicingConfig,
    VideoConfig,
};
use std::fs;
use std::path::Path;

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.slicing;
        if s.slice_width == 0 || s.slice_height == 0 {
            return invalid(format!(
                "slice size must be positive, got {}x{}",
                s.slice_width, s.slice_height
            ));
        }
        for (name, ratio) in [
            ("overlap_width_ratio", s.overlap_width_ratio),
            ("overlap_height_ratio", s.overlap_height_ratio),
        ] {
            if !(0.0..1.0).contains(&ratio) {
                return invalid(format!("{name} must be in [0, 1), got {ratio}"));
            }
        }

        for (name, value) in [
            ("confidence_threshold", self.detection.confidence_threshold),
            ("nms_iou_threshold", self.detection.nms_iou_threshold),
            ("merge_iou_threshold", s.merge_iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return invalid(format!("{name} must be in [0, 1], got {value}"));
            }
        }

        if self.model.input_size == 0 {
            return invalid("model input_size must be positive".to_string());
        }
        if self.annotation.thickness <= 0 || self.annotation.font_scale <= 0.0 {
            return invalid(format!(
                "annotation thickness and font_scale must be positive, got {} and {}",
                self.annotation.thickness, self.annotation.font_scale
            ));
        }
        if self.video.fourcc.chars().count() != 4 {
            return invalid(format!(
                "fourcc must be four characters, got {:?}",
                self.video.fourcc
            ));
        }
        Ok(())
    }
}

fn invalid(message: String) -> Result<()> {
    Err(PipelineError::InvalidConfig(message))
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            models_dir: "models".to_string(),
            device: Device::Auto,
            num_threads: 4,
            input_size: 640,
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            nms_iou_threshold: 0.45,
            target_class_id: PERSON_CLASS_ID,
        }
    }
}

impl Default for SlicingConfig {
    fn default() -> Self {
        Self {
            slice_width: 640,
            slice_height: 640,
            overlap_width_ratio: 0.2,
            overlap_height_ratio: 0.2,
            merge_iou_threshold: 0.5,
            class_agnostic_merge: false,
            full_frame_pass: false,
        }
    }
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            color: [0, 255, 0],
            thickness: 2,
            font_scale: 0.6,
            label_offset: 10,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_dir: "outputs".to_string(),
            fourcc: "mp4v".to_string(),
            progress_interval: 50,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_settings() {
        let config = Config::default();
        assert_eq!(config.slicing.slice_width, 640);
        assert_eq!(config.slicing.slice_height, 640);
        assert_eq!(config.slicing.overlap_width_ratio, 0.2);
        assert_eq!(config.slicing.overlap_height_ratio, 0.2);
        assert_eq!(config.detection.confidence_threshold, 0.3);
        assert_eq!(config.detection.target_class_id, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let yaml = "slicing:\n  slice_width: 512\nmodel:\n  device: cpu\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.slicing.slice_width, 512);
        assert_eq!(config.slicing.slice_height, 640);
        assert_eq!(config.model.device, Device::Cpu);
        assert_eq!(config.video.fourcc, "mp4v");
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.slicing.overlap_width_ratio = 1.0;
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));

        let mut config = Config::default();
        config.slicing.slice_height = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.annotation.thickness = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.video.fourcc = "h264x".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "detection:\n  confidence_threshold: 0.5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.detection.confidence_threshold, 0.5);
    }
}
