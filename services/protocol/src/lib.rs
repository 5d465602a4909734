//! Wire protocol for camera frame records.
//!
//! The camera server and the stream consumer exchange frames as
//! newline-terminated JSON objects over a plain TCP byte stream. Each line
//! carries exactly four fields:
//!
//! ```json
//! {"camera_id": "cam01", "frame_id": 0, "ts": 1718000000.25, "jpg_b64": "..."}
//! ```
//!
//! The image payload is base64-encoded JPEG bytes, which guarantees the
//! serialized record contains no embedded line terminators. There is no
//! length prefix or framing beyond the trailing line feed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur while decoding a wire record.
///
/// Decode errors are non-fatal to the caller: the consumer counts them as
/// per-record failures and keeps going.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The line is not a parseable JSON object.
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// A required field is absent or has the wrong type.
    #[error("missing or invalid field: {0}")]
    MissingField(&'static str),
}

/// One unit of transported video data plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    /// Identifier of the producing camera, constant per producer session.
    pub camera_id: String,

    /// Monotonically increasing per `camera_id` within a session. Gaps may
    /// appear across reconnects; consumers must not assume density.
    pub frame_id: u64,

    /// Wall-clock seconds at encode time. Not monotonic across reconnects.
    pub timestamp: f64,

    /// JPEG-compressed image bytes (base64-encoded on the wire).
    pub image_payload: Vec<u8>,
}

impl FrameRecord {
    /// Serialize this record as a single newline-terminated line.
    pub fn encode(&self) -> String {
        let mut line = json!({
            "camera_id": self.camera_id,
            "frame_id": self.frame_id,
            "ts": self.timestamp,
            "jpg_b64": BASE64.encode(&self.image_payload),
        })
        .to_string();
        line.push('\n');
        line
    }

    /// Parse a single line back into a record.
    ///
    /// Returns [`DecodeError::MalformedRecord`] when the line is not a JSON
    /// object, and [`DecodeError::MissingField`] when any of the four
    /// required fields is absent or of the wrong type. An image payload that
    /// is not valid base64 counts as a wrong-typed `jpg_b64`.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line.trim_end_matches(['\r', '\n']))
            .map_err(|e| DecodeError::MalformedRecord(e.to_string()))?;

        let obj = value
            .as_object()
            .ok_or_else(|| DecodeError::MalformedRecord("not a JSON object".to_string()))?;

        let camera_id = obj
            .get("camera_id")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("camera_id"))?
            .to_string();

        let frame_id = obj
            .get("frame_id")
            .and_then(Value::as_u64)
            .ok_or(DecodeError::MissingField("frame_id"))?;

        let timestamp = obj
            .get("ts")
            .and_then(Value::as_f64)
            .ok_or(DecodeError::MissingField("ts"))?;

        let image_payload = obj
            .get("jpg_b64")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingField("jpg_b64"))
            .and_then(|b64| {
                BASE64
                    .decode(b64)
                    .map_err(|_| DecodeError::MissingField("jpg_b64"))
            })?;

        Ok(Self {
            camera_id,
            frame_id,
            timestamp,
            image_payload,
        })
    }
}
