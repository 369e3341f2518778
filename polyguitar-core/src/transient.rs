//! # Transient Detection Module
//!
//! Flags pick attacks from the energy of the newest frame. Detection is
//! independent of pitch resolution; the note state machine uses it to backdate
//! onsets, to pick a velocity, and to hold new notes while the attack settles
//! into the analysis window.

use crate::config::PipelineConfig;

/// Root mean square of a block of samples. Zero for an empty block.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy = samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32;
    energy.sqrt()
}

/// Outcome of one detection step.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransientEvent {
    pub detected: bool,
    /// RMS of the newest frame.
    pub magnitude_estimate: f32,
    /// RMS increase over the held reference level.
    pub flux: f32,
}

/// Compares the RMS of each frame with a peak-held level of the frames before it.
///
/// A 128-sample frame is shorter than one period of the low strings, so its
/// RMS ripples with the waveform's phase. The reference jumps up to every new
/// frame level and decays with `transient_release_secs`, which keeps that
/// ripple from reading as an attack.
#[derive(Debug, Clone)]
pub struct TransientDetector {
    reference: f32,
    release: f32,
    flux_threshold: f32,
    min_rms: f32,
}

impl TransientDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            reference: 0.0,
            release: (-config.step_seconds() / config.transient_release_secs).exp(),
            flux_threshold: config.transient_flux_threshold,
            min_rms: config.transient_min_rms,
        }
    }

    /// Fires when the RMS rose by more than the flux threshold above the held
    /// level and the frame is loud enough to be a real attack.
    pub fn process(&mut self, frame: &[f32]) -> TransientEvent {
        let level = rms(frame);
        let level = if level.is_finite() { level } else { 0.0 };
        let flux = level - self.reference;
        self.reference = level.max(self.reference * self.release);

        TransientEvent {
            detected: flux > self.flux_threshold && level >= self.min_rms,
            magnitude_estimate: level,
            flux,
        }
    }
}
