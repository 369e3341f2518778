//! # Configuration Module
//!
//! The read-only settings struct consumed by every stage of the pipeline.
//! Loading it from disk is the host's job; the core only validates it once,
//! before any real-time context starts, and never mutates it afterwards.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// The only sample rate the core accepts. No resampling is performed.
pub const SAMPLE_RATE: u32 = 48_000;

/// Samples delivered by the driver per callback, and the analysis step size.
pub const FRAME_SIZE: usize = 128;

/// Length of every analysis window handed to the spectral stage.
pub const WINDOW_SIZE: usize = 2048;

/// Upper bound on simultaneously resolved notes (eight-string guitars included).
pub const MAX_POLYPHONY: usize = 8;

/// Tunables for the whole pipeline.
///
/// Magnitude thresholds (`noise_floor`) are expressed in whitened units, i.e.
/// as a ratio over the adaptive per-bin floor estimate. `relative_floor` is a
/// fraction of the loudest in-range peak of the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub window_size: usize,
    /// Physical size of the sample ring. At least one window.
    pub ring_capacity: usize,
    /// How many of the most recent window samples are analysed. Shorter means
    /// better time resolution and coarser frequency resolution.
    pub analysis_length: usize,
    /// Zero-padded transform length.
    pub fft_size: usize,

    pub min_frequency_hz: f32,
    pub max_frequency_hz: f32,

    pub noise_floor: f32,
    /// Peaks quieter than this fraction of the loudest peak are not notes.
    pub relative_floor: f32,
    pub harmonic_tolerance_cents: f32,
    pub max_harmonics: usize,
    /// Scale of the `magnitude / h` amount removed at harmonic `h`.
    pub harmonic_gain: f32,
    /// Residual peaks inside a subtracted harmonic at or below this fraction of
    /// the subtracted amount are treated as leftovers, not notes.
    pub ghost_ratio: f32,
    pub max_notes: usize,

    pub note_off_debounce: u32,
    /// Steps new notes are held back after an attack, after silence, or after
    /// an unknown candidate first shows up. Zero disables the hold.
    pub onset_settle_steps: u32,
    pub transient_flux_threshold: f32,
    pub transient_min_rms: f32,
    /// Time constant of the level an attack has to rise above.
    pub transient_release_secs: f32,
    /// How old a transient may be and still date a new note. At least
    /// `onset_settle_steps`.
    pub transient_lookback_steps: u32,
    pub silence_rms: f32,

    pub whitening_floor: f32,
    /// Half-width, in padded bins, of the band averaged into each floor
    /// estimate. Wider than a main lobe so a peak keeps its shape.
    pub whitening_smoothing_bins: usize,
    pub whitening_rise_secs: f32,
    pub whitening_fall_secs: f32,

    pub velocity_floor_db: f32,
    pub velocity_range_db: f32,

    pub midi_channel: u8,
    pub event_queue_capacity: usize,
    pub diagnostics_queue_capacity: usize,
    pub poll_interval_micros: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            frame_size: FRAME_SIZE,
            window_size: WINDOW_SIZE,
            ring_capacity: WINDOW_SIZE,
            analysis_length: WINDOW_SIZE,
            fft_size: 8192,
            min_frequency_hz: 60.0,
            max_frequency_hz: 1400.0,
            noise_floor: 8.0,
            relative_floor: 0.15,
            harmonic_tolerance_cents: 50.0,
            max_harmonics: 12,
            harmonic_gain: 1.0,
            ghost_ratio: 0.25,
            max_notes: 6,
            note_off_debounce: 2,
            onset_settle_steps: 12,
            transient_flux_threshold: 0.02,
            transient_min_rms: 0.01,
            transient_release_secs: 1.0,
            transient_lookback_steps: 16,
            silence_rms: 1e-4,
            whitening_floor: 1e-3,
            whitening_smoothing_bins: 32,
            whitening_rise_secs: 60.0,
            whitening_fall_secs: 1.0,
            velocity_floor_db: -48.0,
            velocity_range_db: 48.0,
            midi_channel: 0,
            event_queue_capacity: 1024,
            diagnostics_queue_capacity: 64,
            poll_interval_micros: 250,
        }
    }
}

impl PipelineConfig {
    /// Checks every field. Called by `Pipeline::new` and `Session::start`, so a
    /// bad configuration never reaches the real-time contexts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate != SAMPLE_RATE {
            return Err(ConfigError::UnsupportedSampleRate(self.sample_rate));
        }
        if self.frame_size != FRAME_SIZE {
            return Err(ConfigError::FrameSize {
                expected: FRAME_SIZE,
                actual: self.frame_size,
            });
        }
        if self.window_size != WINDOW_SIZE {
            return Err(ConfigError::WindowSize {
                expected: WINDOW_SIZE,
                actual: self.window_size,
            });
        }
        if self.ring_capacity < self.window_size || self.ring_capacity % self.frame_size != 0 {
            return Err(ConfigError::RingCapacity {
                capacity: self.ring_capacity,
                window: self.window_size,
                frame: self.frame_size,
            });
        }
        if self.analysis_length == 0 || self.analysis_length > self.window_size {
            return Err(ConfigError::AnalysisLength {
                length: self.analysis_length,
                window: self.window_size,
            });
        }
        if self.fft_size < self.analysis_length || self.fft_size % 2 != 0 {
            return Err(ConfigError::FftSize {
                fft_size: self.fft_size,
                length: self.analysis_length,
            });
        }

        let nyquist = self.nyquist();
        if !(self.min_frequency_hz > 0.0)
            || !(self.max_frequency_hz > self.min_frequency_hz)
            || self.max_frequency_hz > nyquist
        {
            return Err(ConfigError::FrequencyRange {
                min: self.min_frequency_hz,
                max: self.max_frequency_hz,
                nyquist,
            });
        }
        if self.max_notes == 0 || self.max_notes > MAX_POLYPHONY {
            return Err(ConfigError::MaxNotes(self.max_notes));
        }
        if self.max_harmonics == 0 {
            return Err(ConfigError::Zero { name: "max_harmonics" });
        }
        if self.transient_lookback_steps < self.onset_settle_steps {
            return Err(ConfigError::Lookback {
                lookback: self.transient_lookback_steps,
                settle: self.onset_settle_steps,
            });
        }
        if !(self.relative_floor >= 0.0 && self.relative_floor < 1.0) {
            return Err(ConfigError::Fraction {
                name: "relative_floor",
                value: self.relative_floor,
            });
        }
        if self.midi_channel > 15 {
            return Err(ConfigError::MidiChannel(self.midi_channel));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "event_queue_capacity" });
        }
        if self.diagnostics_queue_capacity == 0 {
            return Err(ConfigError::Zero { name: "diagnostics_queue_capacity" });
        }

        let positive = [
            ("noise_floor", self.noise_floor),
            ("harmonic_tolerance_cents", self.harmonic_tolerance_cents),
            ("harmonic_gain", self.harmonic_gain),
            ("ghost_ratio", self.ghost_ratio),
            ("transient_flux_threshold", self.transient_flux_threshold),
            ("transient_min_rms", self.transient_min_rms),
            ("transient_release_secs", self.transient_release_secs),
            ("silence_rms", self.silence_rms),
            ("whitening_floor", self.whitening_floor),
            ("whitening_rise_secs", self.whitening_rise_secs),
            ("whitening_fall_secs", self.whitening_fall_secs),
            ("velocity_range_db", self.velocity_range_db),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if !self.velocity_floor_db.is_finite() {
            return Err(ConfigError::NonPositive {
                name: "velocity_floor_db",
                value: self.velocity_floor_db,
            });
        }

        Ok(())
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    /// Duration of one analysis step in seconds.
    pub fn step_seconds(&self) -> f32 {
        self.frame_size as f32 / self.sample_rate as f32
    }

    /// Width of one bin of the padded transform.
    pub fn bin_hz(&self) -> f32 {
        self.sample_rate as f32 / self.fft_size as f32
    }

    /// Converts an absolute sample position into microseconds since session start.
    pub fn micros_at(&self, sample_position: u64) -> u64 {
        sample_position * 1_000_000 / self.sample_rate as u64
    }
}
