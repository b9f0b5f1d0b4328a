// Error types for f1-replay

use snafu::Snafu;
use std::io;

use crate::telemetry::DriverNumber;

#[derive(Debug, Snafu)]
pub enum ReplayError {
    // Raw telemetry data-quality errors. These abort session setup.
    #[snafu(display("Driver {driver} has {count} telemetry samples, at least 2 are required"))]
    InsufficientSamples { driver: DriverNumber, count: usize },
    #[snafu(display(
        "Driver {driver} has a non-increasing telemetry timestamp at sample {index}"
    ))]
    NonMonotonicTimestamps { driver: DriverNumber, index: usize },
    #[snafu(display("Session has no drivers with telemetry"))]
    EmptySession,
    #[snafu(display("Frame synthesis was cancelled"))]
    SynthesisCancelled,
    #[snafu(display("Reference line needs at least 2 distinct points, got {points}"))]
    ReferenceLineTooShort { points: usize },

    // Raw sample source errors
    #[snafu(display("Error reading telemetry source"))]
    SampleSourceError { source: io::Error },
    #[snafu(display("Invalid telemetry record on line {line}: {reason}"))]
    SampleParseError { line: usize, reason: String },

    // Frame cache errors. Always recoverable.
    #[snafu(display("Frame cache miss: {reason}"))]
    CacheMiss { reason: String },
    #[snafu(display("Frame cache write failed: {reason}"))]
    CacheWriteFailure { reason: String },

    // Playback errors. Local to the controller, state is left unchanged.
    #[snafu(display("Driver {driver} is not part of the current frame"))]
    UnknownDriver { driver: DriverNumber },
    #[snafu(display("Unsupported playback speed {value}, expected one of 0.5, 1, 2, 4"))]
    InvalidSpeed { value: f64 },

    // Config management errors
    #[snafu(display("Invalid configuration: {reason}"))]
    InvalidConfig { reason: String },
    #[snafu(display("Could not find application data directory"))]
    NoConfigDir,
    #[snafu(display("Error accessing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },
}

impl ReplayError {
    /// Whether the error came from a cache lookup that the caller should
    /// answer by re-running the pipeline.
    pub fn is_cache_miss(&self) -> bool {
        matches!(self, ReplayError::CacheMiss { .. })
    }
}
