//! Foreground/background matting transform.
//!
//! The frame processor treats the transformation as an opaque, injected
//! contract: a pure function from one pixel buffer to another that may fail.
//! The shipped implementation is a self-contained separator: it estimates
//! the background reference color from the frame border, classifies each
//! pixel against a color-distance threshold, and paints foreground pixels
//! with a configured flat fill. Its parameters load from a small JSON asset
//! file; a missing or invalid asset is a fatal startup error, surfaced
//! before any stream is opened.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised by a transform while processing one frame.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transform failed: {0}")]
    Failed(String),
}

/// Errors loading the transform asset at startup.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read transform asset {path}: {message}")]
    Unreadable { path: String, message: String },

    #[error("invalid transform asset {path}: {message}")]
    Invalid { path: String, message: String },
}

/// Per-frame image transformation injected into the frame processor.
///
/// Pure with respect to the pipeline: no side effects visible to the caller.
pub trait FrameTransform: Send + Sync {
    fn apply(&self, frame: &RgbImage) -> Result<RgbImage, TransformError>;
}

/// Matting parameters, loaded from a JSON asset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatteAsset {
    /// Color distance from the background reference above which a pixel
    /// counts as foreground.
    pub threshold: f32,

    /// Flat fill painted over foreground pixels.
    pub fill: [u8; 3],
}

impl Default for MatteAsset {
    fn default() -> Self {
        Self {
            threshold: 60.0,
            fill: [192, 192, 192],
        }
    }
}

/// Border-reference background matte.
pub struct BackgroundMatte {
    asset: MatteAsset,
}

impl BackgroundMatte {
    /// Create a matte from already-validated parameters.
    pub fn new(asset: MatteAsset) -> Self {
        Self { asset }
    }

    /// Load and validate the asset file.
    pub fn from_asset_path(path: &Path) -> Result<Self, AssetError> {
        let bytes = fs::read(path).map_err(|e| AssetError::Unreadable {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        let asset: MatteAsset =
            serde_json::from_slice(&bytes).map_err(|e| AssetError::Invalid {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        if asset.threshold <= 0.0 || !asset.threshold.is_finite() {
            return Err(AssetError::Invalid {
                path: path.display().to_string(),
                message: "threshold must be a positive number".to_string(),
            });
        }

        Ok(Self::new(asset))
    }

    /// Mean color of the frame's border pixels.
    fn reference_color(frame: &RgbImage) -> [f32; 3] {
        let (w, h) = frame.dimensions();
        let mut sum = [0f64; 3];
        let mut count = 0f64;

        for (x, y, px) in frame.enumerate_pixels() {
            if x == 0 || y == 0 || x == w - 1 || y == h - 1 {
                sum[0] += px[0] as f64;
                sum[1] += px[1] as f64;
                sum[2] += px[2] as f64;
                count += 1.0;
            }
        }

        [
            (sum[0] / count) as f32,
            (sum[1] / count) as f32,
            (sum[2] / count) as f32,
        ]
    }
}

impl FrameTransform for BackgroundMatte {
    fn apply(&self, frame: &RgbImage) -> Result<RgbImage, TransformError> {
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(TransformError::Failed("empty frame".to_string()));
        }

        let reference = Self::reference_color(frame);
        let threshold_sq = self.asset.threshold * self.asset.threshold;

        let mut out = frame.clone();
        for px in out.pixels_mut() {
            let mut dist_sq = 0f32;
            for c in 0..3 {
                let d = px[c] as f32 - reference[c];
                dist_sq += d * d;
            }
            if dist_sq > threshold_sq {
                px.0 = self.asset.fill;
            }
        }

        Ok(out)
    }
}
