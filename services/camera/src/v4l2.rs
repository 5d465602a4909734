//! V4L2 live capture source (feature `capture-v4l2`).
//!
//! Captures MJPG buffers from a local device node and decodes them with the
//! same JPEG codec the file source uses. Live sources cannot rewind; when
//! the device stops producing frames the serving session ends.

use image::{ImageFormat, RgbImage};
use ouroboros::self_referencing;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::source::{SourceError, VideoSource};

const CAPTURE_BUFFERS: u32 = 4;

// The mmap stream borrows the device it was created from.
#[self_referencing]
struct CaptureHandle {
    device: Device,
    #[borrows(device)]
    #[covariant]
    stream: Stream<'this>,
}

/// Live V4L2 capture source.
pub struct V4l2Source {
    handle: CaptureHandle,
    device_path: String,
}

impl V4l2Source {
    /// Open the device node and start an MJPG capture stream.
    pub fn open(device_path: &str) -> Result<Self, SourceError> {
        let open_failed = |message: String| SourceError::OpenFailed {
            path: device_path.to_string(),
            message,
        };

        let device = Device::with_path(device_path).map_err(|e| open_failed(e.to_string()))?;

        let mut format = device.format().map_err(|e| open_failed(e.to_string()))?;
        format.fourcc = FourCC::new(b"MJPG");
        let format = device
            .set_format(&format)
            .map_err(|e| open_failed(e.to_string()))?;
        if format.fourcc != FourCC::new(b"MJPG") {
            return Err(open_failed(format!(
                "device does not support MJPG capture (got {})",
                format.fourcc
            )));
        }

        let handle = CaptureHandleTryBuilder {
            device,
            stream_builder: |device| {
                Stream::with_buffers(device, Type::VideoCapture, CAPTURE_BUFFERS)
                    .map_err(|e| open_failed(e.to_string()))
            },
        }
        .try_build()?;

        Ok(Self {
            handle,
            device_path: device_path.to_string(),
        })
    }
}

impl VideoSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let jpeg = self
            .handle
            .with_stream_mut(|stream| stream.next().map(|(buf, _meta)| buf.to_vec()))
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;

        let img = image::load_from_memory_with_format(&jpeg, ImageFormat::Jpeg)
            .map_err(|e| SourceError::ReadFailed(e.to_string()))?;

        Ok(Some(img.to_rgb8()))
    }

    fn is_finite(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> Result<(), SourceError> {
        Err(SourceError::ReadFailed(
            "live capture devices cannot rewind".to_string(),
        ))
    }

    fn describe(&self) -> String {
        format!("v4l2:{}", self.device_path)
    }
}
