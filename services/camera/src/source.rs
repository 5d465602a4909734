//! Video sources for the camera server.
//!
//! A source yields decoded frames on demand. File sources are finite and can
//! be rewound for infinite replay; live devices produce frames until they
//! stop. Source selection happens once per client connection: an explicitly
//! configured path wins, otherwise the first file in the videos directory in
//! lexical order, otherwise the live capture device.

use image::{ImageFormat, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::SourceConfig;

/// Errors that can occur while opening or reading a video source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to open video source {path}: {message}")]
    OpenFailed { path: String, message: String },

    #[error("no frames found in {0}")]
    Empty(String),

    #[error("no video source available")]
    NoSource,

    #[error("capture read failed: {0}")]
    ReadFailed(String),
}

/// A camera-like supplier of raw frames.
pub trait VideoSource: Send {
    /// Read the next frame. `Ok(None)` means the source is exhausted.
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Whether the source is finite and can be replayed via [`rewind`](Self::rewind).
    fn is_finite(&self) -> bool;

    /// Seek back to the first frame. Fails for live sources.
    fn rewind(&mut self) -> Result<(), SourceError>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

/// Select a video source for a new session.
pub fn select(config: &SourceConfig) -> Result<Box<dyn VideoSource>, SourceError> {
    if let Some(path) = config.video_path.as_deref().filter(|p| !p.is_empty()) {
        if Path::new(path).is_file() {
            return Ok(Box::new(MjpegFileSource::open(Path::new(path))?));
        }
        warn!(path = %path, "configured video path not found, falling back to discovery");
    }

    if let Some(path) = first_video_file(Path::new(&config.videos_dir)) {
        return Ok(Box::new(MjpegFileSource::open(&path)?));
    }

    #[cfg(feature = "capture-v4l2")]
    {
        Ok(Box::new(crate::v4l2::V4l2Source::open(&config.device)?))
    }
    #[cfg(not(feature = "capture-v4l2"))]
    {
        debug!(device = %config.device, "live capture not compiled in (capture-v4l2)");
        Err(SourceError::NoSource)
    }
}

/// First regular file in the directory, in lexical order.
fn first_video_file(dir: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(dir).ok()?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files.into_iter().next()
}

/// Finite file source over a stream of concatenated JPEG images.
///
/// Covers `.mjpeg`/`.mjpg` files as well as single still JPEGs (a one-frame
/// stream). The whole file is held in memory and indexed once at open time.
pub struct MjpegFileSource {
    path: PathBuf,
    data: Vec<u8>,
    frames: Vec<(usize, usize)>,
    cursor: usize,
}

impl MjpegFileSource {
    /// Open and index a file. Fails if it contains no JPEG images.
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let data = fs::read(path).map_err(|e| SourceError::OpenFailed {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let frames = scan_jpeg_segments(&data);
        if frames.is_empty() {
            return Err(SourceError::Empty(path.display().to_string()));
        }

        debug!(path = %path.display(), frames = frames.len(), "indexed video file");

        Ok(Self {
            path: path.to_path_buf(),
            data,
            frames,
            cursor: 0,
        })
    }

    /// Number of frames indexed in the file.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

impl VideoSource for MjpegFileSource {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        while let Some(&(start, end)) = self.frames.get(self.cursor) {
            self.cursor += 1;
            match image::load_from_memory_with_format(&self.data[start..end], ImageFormat::Jpeg) {
                Ok(img) => return Ok(Some(img.to_rgb8())),
                Err(e) => {
                    // Corrupt segment, try the next one.
                    warn!(path = %self.path.display(), error = %e, "skipping undecodable frame");
                }
            }
        }
        Ok(None)
    }

    fn is_finite(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        self.cursor = 0;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{} ({} frames)", self.path.display(), self.frames.len())
    }
}

/// Index `(start, end)` byte ranges of JPEG images in a byte stream.
///
/// Entropy-coded JPEG data escapes 0xFF bytes, so a bare SOI/EOI marker pair
/// delimits one image.
fn scan_jpeg_segments(data: &[u8]) -> Vec<(usize, usize)> {
    let mut segments = Vec::new();
    let mut start = None;
    let mut i = 0;

    while i + 1 < data.len() {
        match (data[i], data[i + 1]) {
            (0xFF, 0xD8) if start.is_none() => {
                start = Some(i);
                i += 2;
            }
            (0xFF, 0xD9) if start.is_some() => {
                if let Some(s) = start.take() {
                    segments.push((s, i + 2));
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::jpeg::JpegEncoder;
    use std::io::Write;

    fn tiny_jpeg(shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, image::Rgb([shade, shade, shade]));
        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, 80);
        encoder
            .encode(img.as_raw(), 4, 4, image::ExtendedColorType::Rgb8)
            .unwrap();
        buf
    }

    fn write_mjpeg(dir: &Path, name: &str, frames: usize) -> PathBuf {
        let path = dir.join(name);
        let mut file = fs::File::create(&path).unwrap();
        for i in 0..frames {
            file.write_all(&tiny_jpeg((i * 40) as u8)).unwrap();
        }
        path
    }

    #[test]
    fn test_scan_segments() {
        let mut data = tiny_jpeg(0);
        data.extend_from_slice(&tiny_jpeg(128));
        data.extend_from_slice(&tiny_jpeg(255));
        assert_eq!(scan_jpeg_segments(&data).len(), 3);
    }

    #[test]
    fn test_file_source_reads_and_rewinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_mjpeg(dir.path(), "clip.mjpeg", 3);

        let mut source = MjpegFileSource::open(&path).unwrap();
        assert_eq!(source.frame_count(), 3);
        assert!(source.is_finite());

        for _ in 0..3 {
            assert!(source.read_frame().unwrap().is_some());
        }
        assert!(source.read_frame().unwrap().is_none());

        source.rewind().unwrap();
        assert!(source.read_frame().unwrap().is_some());
    }

    #[test]
    fn test_empty_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mjpeg");
        fs::write(&path, b"no jpeg here").unwrap();

        assert!(matches!(
            MjpegFileSource::open(&path),
            Err(SourceError::Empty(_))
        ));
    }

    #[test]
    fn test_discovery_picks_first_lexical() {
        let dir = tempfile::tempdir().unwrap();
        write_mjpeg(dir.path(), "b.mjpeg", 1);
        let first = write_mjpeg(dir.path(), "a.mjpeg", 1);

        assert_eq!(first_video_file(dir.path()), Some(first));
    }

    #[test]
    fn test_discovery_missing_dir() {
        assert_eq!(first_video_file(Path::new("/nonexistent/videos")), None);
    }

    #[test]
    fn test_select_explicit_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_mjpeg(dir.path(), "a.mjpeg", 1);
        let explicit = write_mjpeg(dir.path(), "z.mjpeg", 2);

        let config = SourceConfig {
            video_path: Some(explicit.display().to_string()),
            videos_dir: dir.path().display().to_string(),
            device: "/dev/video0".to_string(),
        };

        let source = select(&config).unwrap();
        assert!(source.describe().contains("z.mjpeg"));
    }

    #[test]
    fn test_select_no_source() {
        let config = SourceConfig {
            video_path: None,
            videos_dir: "/nonexistent/videos".to_string(),
            device: "/dev/video0".to_string(),
        };

        #[cfg(not(feature = "capture-v4l2"))]
        assert!(matches!(select(&config), Err(SourceError::NoSource)));
    }
}
