use std::path::PathBuf;

use snafu::prelude::*;

/// SharedVision's error type
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read config at {}", path.display()))]
    FailedToReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Invalid config: {source}"))]
    InvalidConfig { source: toml::de::Error },
    #[snafu(display("Failed to serialize config: {source}"))]
    FailedToSerializeConfig { source: toml::ser::Error },
    #[snafu(display("Failed to write config to {}", path.display()))]
    FailedToWriteConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to read model at {}", path.display()))]
    FailedToReadModel {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to load model: {reason}"))]
    FailedToLoadModel { reason: String },
    #[snafu(display("Inference failed: {reason}"))]
    InferenceFailed { reason: String },
    #[snafu(display("Input tensor holds {actual} values, model expects {expected}"))]
    TensorSizeMismatch { expected: usize, actual: usize },
    #[snafu(display("Unsupported tensor type: {kind}"))]
    UnsupportedTensorKind { kind: String },
    #[snafu(display("No predictions"))]
    NoPredictions,

    #[snafu(display("Unsupported pixel format: {format}"))]
    UnsupportedFormat { format: String },
    #[snafu(display("Invalid frame dimensions {width}x{height}"))]
    InvalidDimensions { width: u32, height: u32 },
    #[snafu(display("Frame plane {plane} too small: need {expected} bytes, got {actual}"))]
    BufferTooSmall {
        plane: usize,
        expected: usize,
        actual: usize,
    },
    #[snafu(display("Frame plane {plane} has unusable pixel stride {pixel_stride}"))]
    InvalidPixelStride { plane: usize, pixel_stride: usize },
    #[snafu(display("Failed to decode frame: {source}"))]
    FailedToDecode { source: image::ImageError },
    #[snafu(display("Failed to encode frame: {source}"))]
    FailedToEncode { source: image::ImageError },
    #[snafu(display("Failed to save image to {}", path.display()))]
    FailedToSaveImage {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to resize frame: {reason}"))]
    FailedToResize { reason: String },

    #[snafu(display("Failed to read frame from {}", path.display()))]
    FailedToReadFrame {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("No frames found in {}", path.display()))]
    NoFrames { path: PathBuf },
    #[snafu(display("Failed to start capture thread: {source}"))]
    FailedToSpawnCapture { source: std::io::Error },

    #[snafu(display("Speech synthesis failed: {reason}"))]
    SpeechFailed { reason: String },
    #[snafu(display("Text recognition failed: {reason}"))]
    RecognitionFailed { reason: String },
}
