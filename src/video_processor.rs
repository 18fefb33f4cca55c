// src/video_processor.rs

use crate::error::{PipelineError, Result};
use crate::types::VideoMetadata;
use opencv::{
    core::{self, Mat},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst, VideoWriter},
};
use std::fs::File;
use std::io::Read;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const VIDEO_EXTENSIONS: [&str; 14] = [
    "mp4", "avi", "mov", "mkv", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp", "mxf", "mts",
    "vob",
];

const SNIFF_LEN: usize = 512;

/// Recursively collects files with a supported video extension.
pub fn find_video_files(input_dir: &Path) -> Vec<PathBuf> {
    let mut videos: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_video_extension(e.path()))
        .map(|e| e.into_path())
        .collect();
    videos.sort();

    info!("Found {} video files in {}", videos.len(), input_dir.display());
    videos
}

fn has_video_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Existence, size, extension and content checks, in that order. Opens no
/// decoder.
pub fn validate_video_file(path: &Path) -> Result<()> {
    let metadata = match std::fs::metadata(path) {
        Ok(m) if m.is_file() => m,
        _ => return Err(PipelineError::NotFound(path.to_path_buf())),
    };
    if metadata.len() == 0 {
        return Err(PipelineError::EmptyFile(path.to_path_buf()));
    }

    if !has_video_extension(path) {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        return Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!("extension {:?} is not a supported video extension", ext),
        });
    }

    let mut header = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)?;

    match sniff_mime(&header) {
        Some(mime) if mime.starts_with("video/") => {
            debug!("{} sniffed as {}", path.display(), mime);
            Ok(())
        }
        other => Err(PipelineError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: format!(
                "content is not identified as video (sniffed {})",
                other.unwrap_or("nothing")
            ),
        }),
    }
}

/// MIME type from container magic bytes.
pub fn sniff_mime(header: &[u8]) -> Option<&'static str> {
    let starts = |magic: &[u8]| header.starts_with(magic);

    if header.len() >= 12 && &header[4..8] == b"ftyp" {
        // HEIF/AVIF stills share the ISO-BMFF box layout.
        match &header[8..12] {
            b"avif" | b"avis" => return Some("image/avif"),
            b"heic" | b"heix" | b"heim" | b"heis" | b"hevc" | b"hevx" | b"mif1" | b"msf1" => {
                return Some("image/heic")
            }
            _ => {}
        }
        return Some(match &header[8..11] {
            b"qt " => "video/quicktime",
            b"3gp" | b"3g2" => "video/3gpp",
            b"M4V" => "video/x-m4v",
            _ => "video/mp4",
        });
    }
    if header.len() >= 12 && starts(b"RIFF") && &header[8..12] == b"AVI " {
        return Some("video/x-msvideo");
    }
    if starts(&[0x1A, 0x45, 0xDF, 0xA3]) {
        let is_webm = header.windows(4).any(|w| w == b"webm");
        return Some(if is_webm { "video/webm" } else { "video/x-matroska" });
    }
    if starts(b"FLV\x01") {
        return Some("video/x-flv");
    }
    if starts(&[0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11]) {
        return Some("video/x-ms-wmv");
    }
    if starts(&[0x00, 0x00, 0x01, 0xBA]) || starts(&[0x00, 0x00, 0x01, 0xB3]) {
        return Some("video/mpeg");
    }
    if starts(&[0x06, 0x0E, 0x2B, 0x34]) {
        return Some("application/mxf");
    }
    if header.len() > 188 && header[0] == 0x47 && header[188] == 0x47 {
        return Some("video/mp2t");
    }
    if header.len() > 196 && header[4] == 0x47 && header[196] == 0x47 {
        return Some("video/mp2t");
    }
    if starts(b"%PDF") {
        return Some("application/pdf");
    }
    if starts(&[0x89, b'P', b'N', b'G']) {
        return Some("image/png");
    }
    if starts(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    None
}

/// Pull side of a video stream.
pub trait FrameSource {
    fn metadata(&self) -> VideoMetadata;

    /// `Ok(None)` signals end of stream.
    fn read_frame(&mut self) -> Result<Option<Mat>>;

    /// Idempotent.
    fn close(&mut self);
}

/// Push side of a video stream.
pub trait FrameSink {
    fn write_frame(&mut self, frame: &Mat) -> Result<()>;

    /// Idempotent.
    fn close(&mut self);
}

/// Lazy, non-restartable frame sequence over a [`FrameSource`]. Yields at
/// most `total_frames` items, stops quietly at end of stream and ends right
/// after the first `Err`.
pub struct Frames<'a, S: FrameSource + ?Sized> {
    source: &'a mut S,
    remaining: u64,
    finished: bool,
}

impl<'a, S: FrameSource + ?Sized> Frames<'a, S> {
    pub fn new(source: &'a mut S) -> Self {
        let remaining = source.metadata().total_frames;
        Self {
            source,
            remaining,
            finished: false,
        }
    }
}

impl<S: FrameSource + ?Sized> Iterator for Frames<'_, S> {
    type Item = Result<Mat>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished || self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        match self.source.read_frame() {
            Ok(Some(frame)) => Some(Ok(frame)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<S: FrameSource + ?Sized> FusedIterator for Frames<'_, S> {}

/// Container frame rate rounded to the nearest whole frame; 29.97 plays
/// back as 30. Rates below 0.5 and non-finite values come out as 0.
fn whole_fps(raw: f64) -> i64 {
    if raw.is_finite() {
        raw.round() as i64
    } else {
        0
    }
}

pub struct VideoReader {
    cap: VideoCapture,
    path: PathBuf,
    metadata: VideoMetadata,
    frames_read: u64,
    closed: bool,
}

impl VideoReader {
    /// Validate, open the decoder and read container metadata. The decoder
    /// is released before returning on any failure.
    pub fn open(path: &Path) -> Result<Self> {
        validate_video_file(path)?;
        info!("Opening video: {}", path.display());

        let decode_open = |reason: String| PipelineError::DecodeOpen {
            path: path.to_path_buf(),
            reason,
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| decode_open("path is not valid UTF-8".to_string()))?;
        let mut cap = VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|e| decode_open(e.to_string()))?;

        if !cap.is_opened().unwrap_or(false) {
            let _ = cap.release();
            return Err(decode_open("decoder could not open the container".to_string()));
        }

        let prop = |cap: &VideoCapture, id: i32| VideoCaptureTraitConst::get(cap, id).unwrap_or(0.0);
        let fps = prop(&cap, videoio::CAP_PROP_FPS);
        let width = prop(&cap, videoio::CAP_PROP_FRAME_WIDTH);
        let height = prop(&cap, videoio::CAP_PROP_FRAME_HEIGHT);
        let total_frames = prop(&cap, videoio::CAP_PROP_FRAME_COUNT);

        let Some(metadata) = VideoMetadata::new(
            whole_fps(fps),
            width as i64,
            height as i64,
            total_frames as i64,
        ) else {
            let _ = cap.release();
            return Err(PipelineError::InvalidMetadata(format!(
                "{}: fps={:.2} size={}x{} frames={}",
                path.display(),
                fps,
                width,
                height,
                total_frames
            )));
        };

        info!(
            "Video properties: {}x{} @ {} FPS, {} frames",
            metadata.width, metadata.height, metadata.fps, metadata.total_frames
        );

        Ok(Self {
            cap,
            path: path.to_path_buf(),
            metadata,
            frames_read: 0,
            closed: false,
        })
    }
}

impl FrameSource for VideoReader {
    fn metadata(&self) -> VideoMetadata {
        self.metadata
    }

    fn read_frame(&mut self) -> Result<Option<Mat>> {
        use opencv::videoio::VideoCaptureTrait;

        if self.closed {
            return Ok(None);
        }

        let mut mat = Mat::default();
        let grabbed = VideoCaptureTrait::read(&mut self.cap, &mut mat).map_err(|e| {
            PipelineError::DecodeFrame {
                frame_index: self.frames_read,
                reason: e.to_string(),
            }
        })?;

        if !grabbed || mat.empty() {
            debug!("End of stream after {} frames", self.frames_read);
            return Ok(None);
        }

        self.frames_read += 1;
        Ok(Some(mat))
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.cap.release() {
            warn!("Failed to release decoder for {}: {}", self.path.display(), e);
        }
        debug!("Closed input {}", self.path.display());
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        self.close();
    }
}

pub struct VideoWriterStream {
    writer: VideoWriter,
    path: PathBuf,
    size: core::Size,
    frames_written: u64,
    closed: bool,
}

impl VideoWriterStream {
    pub fn create(path: &Path, metadata: &VideoMetadata, fourcc: &str) -> Result<Self> {
        let encode_open = |reason: String| PipelineError::EncodeOpen {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| encode_open(e.to_string()))?;
        }

        let code: Vec<char> = fourcc.chars().collect();
        let &[a, b, c, d] = code.as_slice() else {
            return Err(encode_open(format!("fourcc {:?} is not four characters", fourcc)));
        };
        let fourcc = VideoWriter::fourcc(a, b, c, d).map_err(|e| encode_open(e.to_string()))?;

        let path_str = path
            .to_str()
            .ok_or_else(|| encode_open("path is not valid UTF-8".to_string()))?;
        let size = core::Size::new(metadata.width as i32, metadata.height as i32);

        let mut writer = VideoWriter::new(path_str, fourcc, metadata.fps as f64, size, true)
            .map_err(|e| encode_open(e.to_string()))?;

        if !writer.is_opened().unwrap_or(false) {
            let _ = writer.release();
            return Err(encode_open("encoder could not be opened".to_string()));
        }

        info!("Output video: {}", path.display());

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            size,
            frames_written: 0,
            closed: false,
        })
    }
}

impl FrameSink for VideoWriterStream {
    /// # Panics
    /// If the frame size differs from the size the stream was created with.
    fn write_frame(&mut self, frame: &Mat) -> Result<()> {
        assert_eq!(
            (frame.cols(), frame.rows()),
            (self.size.width, self.size.height),
            "frame size does not match the output stream"
        );

        use opencv::videoio::VideoWriterTrait;
        VideoWriterTrait::write(&mut self.writer, frame).map_err(|e| {
            PipelineError::EncodeFrame {
                frame_index: self.frames_written,
                reason: e.to_string(),
            }
        })?;
        self.frames_written += 1;
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.release() {
            warn!("Failed to finalize {}: {}", self.path.display(), e);
        }
        debug!(
            "Closed output {} ({} frames)",
            self.path.display(),
            self.frames_written
        );
    }
}

impl Drop for VideoWriterStream {
    fn drop(&mut self) {
        self.close();
    }
}
