//! # Error Module
//!
//! Only initialization-time faults reach callers as `Err`. Steady-state
//! conditions (overruns, skipped steps, dropped events) are counters, and the
//! producer boundary reports through the small `Copy` type `FrameError` so that
//! rejecting a frame never allocates.

use thiserror::Error;

use crate::config::MAX_POLYPHONY;

/// A field of `PipelineConfig` that cannot be honoured.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unsupported sample rate {0} Hz (only 48000 Hz is accepted)")]
    UnsupportedSampleRate(u32),
    #[error("frame size must be {expected} samples, got {actual}")]
    FrameSize { expected: usize, actual: usize },
    #[error("analysis window must be {expected} samples, got {actual}")]
    WindowSize { expected: usize, actual: usize },
    #[error(
        "ring capacity {capacity} must hold a full window ({window}) and be a multiple of the frame size ({frame})"
    )]
    RingCapacity {
        capacity: usize,
        window: usize,
        frame: usize,
    },
    #[error("analysis length {length} must be between 1 and the window size {window}")]
    AnalysisLength { length: usize, window: usize },
    #[error("transform length {fft_size} must be even and at least the analysis length {length}")]
    FftSize { fft_size: usize, length: usize },
    #[error("frequency range {min}..{max} Hz is empty or above Nyquist ({nyquist} Hz)")]
    FrequencyRange { min: f32, max: f32, nyquist: f32 },
    #[error("max notes {0} outside 1..={max}", max = MAX_POLYPHONY)]
    MaxNotes(usize),
    #[error("MIDI channel {0} outside 0..=15")]
    MidiChannel(u8),
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f32 },
    #[error("{name} must be in 0..1, got {value}")]
    Fraction { name: &'static str, value: f32 },
    #[error("transient lookback of {lookback} steps does not cover the {settle}-step onset settle period")]
    Lookback { lookback: u32, settle: u32 },
    #[error("{name} must be at least 1")]
    Zero { name: &'static str },
}

/// Why the ring buffer refused a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("malformed frame: expected {expected} samples, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("the session has stopped accepting audio")]
    Closed,
}

/// Failures opening the capture device.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("input device offers no mono f32 stream at {0} Hz")]
    NoSuitableConfig(u32),
    #[error(transparent)]
    DeviceName(#[from] cpal::DeviceNameError),
    #[error(transparent)]
    SupportedConfigs(#[from] cpal::SupportedStreamConfigsError),
    #[error(transparent)]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error(transparent)]
    PlayStream(#[from] cpal::PlayStreamError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration fault: {0}")]
    Config(#[from] ConfigError),
    #[error("audio driver fault: {0}")]
    Audio(#[from] AudioError),
    #[error("failed to spawn the processing thread: {0}")]
    Spawn(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
