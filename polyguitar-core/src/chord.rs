//! # Chord Solver Module
//!
//! Resolves a whitened spectrum into a set of simultaneous fundamentals by
//! iterative harmonic subtraction.
//!
//! ## Algorithm
//! 1. Pick the loudest bin within the playable range.
//! 2. Stop when it is at or below the noise floor or a fixed fraction of the
//!    loudest peak, or when enough notes are found.
//! 3. Skip it if it is only the leftover of a harmonic that was already subtracted.
//! 4. Otherwise accept it as a fundamental, then remove its harmonic series
//!    (`magnitude * gain / h` at harmonic `h`) from a working copy. Each
//!    harmonic is removed over the window's main lobe and a tolerance band in
//!    cents, never driving a bin below zero.
//!
//! Candidates come out in descending magnitude order. The input frame is not
//! modified and the working copy is preallocated.

use crate::config::PipelineConfig;
use crate::pitch;
use crate::spectral::{LobeProfile, SpectralFrame};
use crate::tuning;

/// A resolved fundamental.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteCandidate {
    pub frequency_hz: f32,
    pub note: u8,
    /// Whitened magnitude of the peak when it was picked.
    pub magnitude: f32,
}

/// Bins touched by one subtracted harmonic.
#[derive(Debug, Clone, Copy)]
struct HarmonicSlot {
    first_bin: usize,
    last_bin: usize,
    amount: f32,
}

pub struct ChordSolver {
    work: Vec<f32>,
    slots: Vec<HarmonicSlot>,
    lobe: LobeProfile,
    noise_floor: f32,
    relative_floor: f32,
    /// `2^(cents / 1200) - 1`, the relative half-width of the tolerance band.
    tolerance_ratio: f32,
    max_notes: usize,
    max_harmonics: usize,
    harmonic_gain: f32,
    ghost_ratio: f32,
    min_frequency_hz: f32,
    max_frequency_hz: f32,
}

impl ChordSolver {
    /// # Arguments
    /// * `config` - A validated pipeline configuration
    /// * `lobe` - Main-lobe shape of the analysis window
    pub fn new(config: &PipelineConfig, lobe: LobeProfile) -> Self {
        Self {
            work: Vec::with_capacity(config.fft_size / 2 + 1),
            slots: Vec::with_capacity(config.max_notes * config.max_harmonics),
            lobe,
            noise_floor: config.noise_floor,
            relative_floor: config.relative_floor,
            tolerance_ratio: tuning::cents_to_ratio(config.harmonic_tolerance_cents) - 1.0,
            max_notes: config.max_notes,
            max_harmonics: config.max_harmonics,
            harmonic_gain: config.harmonic_gain,
            ghost_ratio: config.ghost_ratio,
            min_frequency_hz: config.min_frequency_hz,
            max_frequency_hz: config.max_frequency_hz,
        }
    }

    /// Replaces the contents of `out` with the fundamentals found in `frame`.
    pub fn solve(&mut self, frame: &SpectralFrame, out: &mut Vec<NoteCandidate>) {
        out.clear();
        self.slots.clear();
        self.work.clear();
        self.work.extend_from_slice(frame.magnitudes());

        let Some((lo, hi)) = frame.bin_range(self.min_frequency_hz, self.max_frequency_hz) else {
            return;
        };
        let bin_hz = frame.bin_hz();
        let nyquist = frame.nyquist();
        let Some((_, loudest)) = pitch::loudest_bin(&self.work, lo, hi) else {
            return;
        };
        let threshold = self.noise_floor.max(self.relative_floor * loudest);

        // Every pass either emits a note or zeroes one bin of the band.
        let max_passes = hi - lo + 1 + self.max_notes;
        for _ in 0..max_passes {
            if out.len() >= self.max_notes {
                break;
            }
            let Some((bin, magnitude)) = pitch::loudest_bin(&self.work, lo, hi) else {
                break;
            };
            if magnitude <= threshold {
                break;
            }
            if self.is_ghost(bin, magnitude) {
                self.work[bin] = 0.0;
                continue;
            }

            let frequency = pitch::interpolate_peak(&self.work, bin) * bin_hz;
            let Some(note) = tuning::frequency_to_midi(frequency) else {
                self.work[bin] = 0.0;
                continue;
            };

            out.push(NoteCandidate {
                frequency_hz: frequency,
                note,
                magnitude,
            });
            self.subtract_series(frequency, magnitude, bin_hz, nyquist);
        }
    }

    /// A peak inside an already subtracted harmonic that is small relative to
    /// what was removed there.
    fn is_ghost(&self, bin: usize, magnitude: f32) -> bool {
        self.slots.iter().any(|slot| {
            (slot.first_bin..=slot.last_bin).contains(&bin)
                && magnitude <= self.ghost_ratio * slot.amount
        })
    }

    fn subtract_series(&mut self, fundamental: f32, magnitude: f32, bin_hz: f32, nyquist: f32) {
        let Some(last_index) = self.work.len().checked_sub(1) else {
            return;
        };
        let reach = self.lobe.half_width() as f32;

        for h in 1..=self.max_harmonics {
            let target = fundamental * h as f32;
            if target > nyquist {
                break;
            }
            let amount = magnitude * self.harmonic_gain / h as f32;
            let tolerance_hz = target * self.tolerance_ratio;
            let centre = target / bin_hz;
            let radius = reach.max(tolerance_hz / bin_hz);

            let first = (centre - radius).ceil().max(0.0) as usize;
            let last = ((centre + radius).floor() as usize).min(last_index);
            let mut touched: Option<(usize, usize)> = None;

            for k in first..=last {
                let offset = k as f32 - centre;
                let weight = if (offset * bin_hz).abs() <= tolerance_hz {
                    1.0
                } else {
                    self.lobe.weight(offset)
                };
                if weight <= 0.0 {
                    continue;
                }
                let cell = &mut self.work[k];
                *cell = (*cell - amount * weight).max(0.0);
                touched = Some(match touched {
                    Some((from, _)) => (from, k),
                    None => (k, k),
                });
            }

            if let Some((first_bin, last_bin)) = touched {
                if self.slots.len() < self.slots.capacity() {
                    self.slots.push(HarmonicSlot {
                        first_bin,
                        last_bin,
                        amount,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solver_config() -> PipelineConfig {
        PipelineConfig {
            noise_floor: 0.05,
            ..PipelineConfig::default()
        }
    }

    fn single_peak(bin: usize, magnitude: f32) -> SpectralFrame {
        let mut magnitudes = vec![0.0; 4097];
        magnitudes[bin] = magnitude;
        SpectralFrame::new(magnitudes, 5.859375)
    }

    #[test]
    fn empty_spectrum_yields_nothing() {
        let mut solver = ChordSolver::new(&solver_config(), LobeProfile::new(vec![1.0, 0.5]));
        let mut out = Vec::new();
        solver.solve(&SpectralFrame::new(vec![0.0; 4097], 5.859375), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn peak_at_noise_floor_is_rejected() {
        let mut solver = ChordSolver::new(&solver_config(), LobeProfile::new(vec![1.0, 0.5]));
        let mut out = Vec::new();
        solver.solve(&single_peak(75, 0.05), &mut out);
        assert!(out.is_empty());
        solver.solve(&single_peak(75, 0.06), &mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].note, tuning::frequency_to_midi(75.0 * 5.859375).unwrap());
    }

    #[test]
    fn input_frame_is_untouched() {
        let mut solver = ChordSolver::new(&solver_config(), LobeProfile::new(vec![1.0, 0.5]));
        let frame = single_peak(75, 2.0);
        let before = frame.clone();
        let mut out = Vec::new();
        solver.solve(&frame, &mut out);
        assert_eq!(frame, before);
    }

    #[test]
    fn quiet_peak_next_to_a_loud_one_is_dropped() {
        let mut solver = ChordSolver::new(&solver_config(), LobeProfile::new(vec![1.0, 0.5]));
        let mut magnitudes = vec![0.0; 4097];
        magnitudes[15] = 10.0;
        magnitudes[40] = 1.0;
        magnitudes[50] = 2.0;
        let mut out = Vec::new();
        solver.solve(&SpectralFrame::new(magnitudes, 5.859375), &mut out);
        let notes: Vec<u8> = out.iter().map(|c| c.note).collect();
        assert_eq!(
            notes,
            vec![
                tuning::frequency_to_midi(15.0 * 5.859375).unwrap(),
                tuning::frequency_to_midi(50.0 * 5.859375).unwrap(),
            ]
        );
    }

    #[test]
    fn respects_max_notes() {
        let config = PipelineConfig {
            max_notes: 2,
            ..solver_config()
        };
        let mut magnitudes = vec![0.0; 4097];
        // Three unrelated peaks well apart from each other's harmonics.
        magnitudes[15] = 1.0;
        magnitudes[21] = 0.9;
        magnitudes[26] = 0.8;
        let mut solver = ChordSolver::new(&config, LobeProfile::new(vec![1.0, 0.5]));
        let mut out = Vec::new();
        solver.solve(&SpectralFrame::new(magnitudes, 5.859375), &mut out);
        assert_eq!(out.len(), 2);
        assert!(out[0].magnitude >= out[1].magnitude);
    }
}
