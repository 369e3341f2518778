//! # Spectral Analysis Module
//!
//! This module turns an analysis window into a whitened magnitude spectrum
//! suitable for harmonic subtraction.
//!
//! ## Features
//! - Real-input FFT via RealFFT, planned once at startup
//! - DC offset removal before windowing
//! - 4-term Blackman-Harris window (about -92 dB sidelobes)
//! - Zero padding for finer bin spacing
//! - Adaptive per-bin whitening: each bin is divided by a slowly moving
//!   average of its neighbourhood, with asymmetric rise/fall time constants
//! - Positive spectral flux between consecutive frames
//! - Main-lobe profile of the window for lobe-shaped subtraction
//!
//! Every buffer is allocated in `SpectralAnalyzer::new`; `analyze` reuses them.

use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;

use crate::config::PipelineConfig;

/// 4-term Blackman-Harris coefficients.
const BLACKMAN_HARRIS: [f32; 4] = [0.35875, 0.48829, 0.14128, 0.01168];

/// Builds a symmetric Blackman-Harris window of `size` samples.
pub fn blackman_harris_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    let [a0, a1, a2, a3] = BLACKMAN_HARRIS;
    let n_minus_1 = (size - 1) as f32;
    (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * i as f32 / n_minus_1;
            a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos() - a3 * (3.0 * phase).cos()
        })
        .collect()
}

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// A local maximum in a spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub frequency_hz: f32,
    pub magnitude: f32,
}

/// Magnitude spectrum of one analysis step, bins `0..=N/2`.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralFrame {
    magnitudes: Vec<f32>,
    bin_hz: f32,
    spectral_flux: f32,
}

impl SpectralFrame {
    /// Wraps precomputed magnitudes. Mostly useful for synthetic spectra.
    pub fn new(magnitudes: Vec<f32>, bin_hz: f32) -> Self {
        Self {
            magnitudes,
            bin_hz,
            spectral_flux: 0.0,
        }
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn bin_hz(&self) -> f32 {
        self.bin_hz
    }

    /// Highest representable frequency (the last bin).
    pub fn nyquist(&self) -> f32 {
        self.magnitudes.len().saturating_sub(1) as f32 * self.bin_hz
    }

    /// Sum of positive magnitude increases over the previous frame.
    pub fn spectral_flux(&self) -> f32 {
        self.spectral_flux
    }

    pub fn frequency_of(&self, bin: f32) -> f32 {
        bin * self.bin_hz
    }

    /// Inclusive bin range covering `min_hz..=max_hz`, clipped to the spectrum.
    /// Bin 0 (DC) is never included.
    pub fn bin_range(&self, min_hz: f32, max_hz: f32) -> Option<(usize, usize)> {
        let last = self.magnitudes.len().checked_sub(1)?;
        let lo = ((min_hz / self.bin_hz).ceil() as usize).max(1);
        let hi = ((max_hz / self.bin_hz).floor() as usize).min(last);
        (lo <= hi).then_some((lo, hi))
    }
}

/// Normalized magnitude of the window's main lobe, sampled at padded-bin offsets.
///
/// `weight(0.0)` is 1 and the profile falls to 0 past its last sample. The
/// chord solver scales it by a peak's magnitude to remove the whole lobe
/// instead of a single bin.
#[derive(Debug, Clone, PartialEq)]
pub struct LobeProfile {
    values: Vec<f32>,
}

impl LobeProfile {
    /// Uses `values[d]` as the weight at a distance of `d` bins.
    pub fn new(values: Vec<f32>) -> Self {
        if values.is_empty() {
            return Self { values: vec![1.0] };
        }
        Self { values }
    }

    /// Measures the main lobe of `window` zero-padded to `fft_size`.
    ///
    /// The profile is the transform magnitude around DC, normalized to the DC
    /// value and truncated at the first local minimum.
    pub fn from_window(window: &[f32], fft_size: usize) -> Self {
        if window.is_empty() || window.len() > fft_size {
            return Self::new(vec![1.0]);
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);
        let mut input = fft.make_input_vec();
        input[..window.len()].copy_from_slice(window);
        let mut output = fft.make_output_vec();
        if fft.process(&mut input, &mut output).is_err() {
            return Self::new(vec![1.0]);
        }

        let peak = output[0].norm();
        if !(peak > 0.0) {
            return Self::new(vec![1.0]);
        }

        let mut values = Vec::new();
        let mut previous = f32::INFINITY;
        for bin in &output {
            let value = bin.norm() / peak;
            if value > previous || value < 1e-6 {
                break;
            }
            values.push(value);
            previous = value;
        }
        Self::new(values)
    }

    /// Number of sampled offsets; the lobe is zero at and beyond this distance.
    pub fn half_width(&self) -> usize {
        self.values.len()
    }

    /// Linearly interpolated weight at a fractional bin offset.
    pub fn weight(&self, offset: f32) -> f32 {
        let distance = offset.abs();
        if !distance.is_finite() {
            return 0.0;
        }
        let index = distance.floor() as usize;
        let Some(&near) = self.values.get(index) else {
            return 0.0;
        };
        let far = self.values.get(index + 1).copied().unwrap_or(0.0);
        near + (far - near) * (distance - index as f32)
    }
}

/// Runs the transform and whitening for one analysis window per step.
pub struct SpectralAnalyzer {
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    padded: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    raw: Vec<f32>,
    /// Running sums of `raw`, one longer than it.
    prefix: Vec<f32>,
    floor: Vec<f32>,
    frame: SpectralFrame,
    magnitude_scale: f32,
    whitening_floor: f32,
    smoothing: usize,
    rise: f32,
    fall: f32,
    primed: bool,
}

impl SpectralAnalyzer {
    /// Plans the transform and allocates every buffer the analyzer will need.
    ///
    /// # Arguments
    /// * `config` - A validated pipeline configuration
    pub fn new(config: &PipelineConfig) -> Self {
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let window = blackman_harris_window(config.analysis_length);

        let window_sum: f32 = window.iter().sum();
        let magnitude_scale = if window_sum > 0.0 { 2.0 / window_sum } else { 1.0 };

        let step = config.step_seconds();
        let bins = config.fft_size / 2 + 1;

        Self {
            padded: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            raw: vec![0.0; bins],
            prefix: vec![0.0; bins + 1],
            floor: vec![config.whitening_floor; bins],
            frame: SpectralFrame::new(vec![0.0; bins], config.bin_hz()),
            magnitude_scale,
            whitening_floor: config.whitening_floor,
            smoothing: config.whitening_smoothing_bins,
            rise: (-step / config.whitening_rise_secs).exp(),
            fall: (-step / config.whitening_fall_secs).exp(),
            primed: false,
            window,
            fft,
        }
    }

    /// Main-lobe profile of this analyzer's window at its padded length.
    pub fn lobe_profile(&self) -> LobeProfile {
        LobeProfile::from_window(&self.window, self.padded.len())
    }

    /// Transforms the newest `analysis_length` samples of `samples`.
    ///
    /// Steps:
    /// 1. DC offset removal over the analysed segment
    /// 2. Blackman-Harris windowing and zero padding
    /// 3. Forward real FFT
    /// 4. Per-bin floor update toward the local band average, then division
    ///    by the floor
    ///
    /// A failed transform yields an all-zero frame rather than an error.
    pub fn analyze(&mut self, samples: &[f32]) -> &SpectralFrame {
        let length = self.window.len();
        let recent = &samples[samples.len().saturating_sub(length)..];
        let lead = length - recent.len();

        let (segment, padding) = self.padded.split_at_mut(length);
        segment[..lead].fill(0.0);
        segment[lead..].copy_from_slice(recent);
        remove_dc_offset(segment);
        for (sample, weight) in segment.iter_mut().zip(&self.window) {
            *sample *= weight;
        }
        padding.fill(0.0);

        if self
            .fft
            .process_with_scratch(&mut self.padded, &mut self.spectrum, &mut self.scratch)
            .is_err()
        {
            self.frame.magnitudes.fill(0.0);
            self.frame.spectral_flux = 0.0;
            return &self.frame;
        }

        let mut running = 0.0;
        for ((bin, raw), prefix) in self
            .spectrum
            .iter()
            .zip(self.raw.iter_mut())
            .zip(self.prefix[1..].iter_mut())
        {
            let magnitude = bin.norm() * self.magnitude_scale;
            *raw = if magnitude.is_finite() { magnitude } else { 0.0 };
            running += *raw;
            *prefix = running;
        }

        let last = self.raw.len() - 1;
        let mut flux = 0.0;
        for (k, ((&magnitude, floor), whitened)) in self
            .raw
            .iter()
            .zip(self.floor.iter_mut())
            .zip(self.frame.magnitudes.iter_mut())
            .enumerate()
        {
            let lo = k.saturating_sub(self.smoothing);
            let hi = (k + self.smoothing).min(last);
            let band = ((self.prefix[hi + 1] - self.prefix[lo]) / (hi - lo + 1) as f32).max(0.0);

            let rate = if band > *floor { self.rise } else { self.fall };
            *floor = (rate * *floor + (1.0 - rate) * band).max(self.whitening_floor);

            let value = magnitude / *floor;
            flux += (value - *whitened).max(0.0);
            *whitened = value;
        }
        self.frame.spectral_flux = if self.primed { flux } else { 0.0 };
        self.primed = true;

        &self.frame
    }

    /// Lets the whitening floor fall for one step without a transform.
    ///
    /// Called for silent steps, which skip `analyze`. The floor decays toward
    /// the minimum at the fall rate, as it would over a silent spectrum, and
    /// the frame reads as silence for the next flux computation.
    pub fn relax(&mut self) {
        for floor in self.floor.iter_mut() {
            *floor = (self.fall * *floor).max(self.whitening_floor);
        }
        self.frame.magnitudes.fill(0.0);
        self.frame.spectral_flux = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blackman_harris_is_symmetric_and_tapered() {
        let window = blackman_harris_window(2048);
        assert!(window[0] < 1e-4);
        assert!(window[2047] < 1e-4);
        assert!((window[10] - window[2037]).abs() < 1e-6);
        let centre = window[1023].max(window[1024]);
        assert!((centre - 1.0).abs() < 1e-3);
    }

    #[test]
    fn lobe_profile_interpolates_and_ends() {
        let profile = LobeProfile::new(vec![1.0, 0.5]);
        assert_eq!(profile.weight(0.0), 1.0);
        assert_eq!(profile.weight(-1.0), 0.5);
        assert!((profile.weight(1.5) - 0.25).abs() < 1e-6);
        assert_eq!(profile.weight(2.0), 0.0);
        assert_eq!(profile.half_width(), 2);
    }

    #[test]
    fn measured_lobe_is_monotonic() {
        let window = blackman_harris_window(2048);
        let profile = LobeProfile::from_window(&window, 8192);
        // Four padded bins per natural bin and a four-bin main lobe.
        assert!(profile.half_width() >= 12 && profile.half_width() <= 20);
        assert!((profile.weight(0.0) - 1.0).abs() < 1e-6);
        for d in 1..profile.half_width() {
            assert!(profile.weight(d as f32) <= profile.weight((d - 1) as f32));
        }
    }

    #[test]
    fn bin_range_excludes_dc() {
        let frame = SpectralFrame::new(vec![0.0; 4097], 5.859375);
        assert_eq!(frame.bin_range(0.0, 20.0), Some((1, 3)));
        assert_eq!(frame.bin_range(60.0, 1400.0), Some((11, 238)));
        assert_eq!(frame.bin_range(30_000.0, 40_000.0), None);
    }

    #[test]
    fn silence_stays_silent() {
        let mut analyzer = SpectralAnalyzer::new(&PipelineConfig::default());
        let frame = analyzer.analyze(&[0.0; 2048]);
        assert!(frame.magnitudes().iter().all(|&m| m == 0.0));
        assert_eq!(frame.spectral_flux(), 0.0);
    }
}
