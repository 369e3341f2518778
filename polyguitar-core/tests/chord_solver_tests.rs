//! Chord solver validation on synthetic whitened spectra.

use polyguitar_core::chord::{ChordSolver, NoteCandidate};
use polyguitar_core::config::PipelineConfig;
use polyguitar_core::spectral::{LobeProfile, SpectralAnalyzer, SpectralFrame};

const BIN_HZ: f32 = 48_000.0 / 8192.0;
const BINS: usize = 8192 / 2 + 1;

/// Adds a plucked-string-like note: fundamental plus three harmonics decaying
/// by 0.4 per partial, each spread over its bin and half-height neighbours.
fn add_note(magnitudes: &mut [f32], frequency: f32, magnitude: f32) {
    for h in 1..=4 {
        let partial = magnitude * 0.4_f32.powi(h - 1);
        let bin = (frequency * h as f32 / BIN_HZ).round() as usize;
        magnitudes[bin] += partial;
        magnitudes[bin - 1] += 0.5 * partial;
        magnitudes[bin + 1] += 0.5 * partial;
    }
}

fn spectrum(notes: &[(f32, f32)]) -> SpectralFrame {
    let mut magnitudes = vec![0.0; BINS];
    for &(frequency, magnitude) in notes {
        add_note(&mut magnitudes, frequency, magnitude);
    }
    SpectralFrame::new(magnitudes, BIN_HZ)
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        noise_floor: 0.05,
        ..PipelineConfig::default()
    }
}

fn solve(frame: &SpectralFrame) -> Vec<NoteCandidate> {
    let mut solver = ChordSolver::new(&test_config(), LobeProfile::new(vec![1.0, 0.5]));
    let mut out = Vec::new();
    solver.solve(frame, &mut out);
    out
}

/// One analysis window of steady strings, each given as fundamental and
/// partial amplitudes.
fn strings(notes: &[(f32, &[f32])]) -> Vec<f32> {
    (0..2048)
        .map(|n| {
            let t = n as f32 / 48_000.0;
            notes
                .iter()
                .flat_map(|(fundamental, partials)| {
                    partials.iter().enumerate().map(move |(i, a)| {
                        a * (2.0 * std::f32::consts::PI * fundamental * (i + 1) as f32 * t).sin()
                    })
                })
                .sum::<f32>()
        })
        .collect()
}

/// Runs `samples` through a fresh analyzer and solves with the analyzer's own
/// lobe at the default thresholds.
fn solve_analyzed(samples: &[f32]) -> Vec<u8> {
    let config = PipelineConfig::default();
    let mut analyzer = SpectralAnalyzer::new(&config);
    let mut solver = ChordSolver::new(&config, analyzer.lobe_profile());
    let mut out = Vec::new();
    solver.solve(analyzer.analyze(samples), &mut out);
    let mut notes: Vec<u8> = out.iter().map(|c| c.note).collect();
    notes.sort_unstable();
    notes
}

fn within_percent(actual: f32, expected: f32, percent: f32) -> bool {
    (actual - expected).abs() <= expected * percent / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_fundamentals_in_descending_order() {
        let frame = spectrum(&[(82.4, 1.0), (110.0, 0.8), (146.8, 0.6)]);
        let found = solve(&frame);

        assert_eq!(found.len(), 3, "found {found:?}");
        let notes: Vec<u8> = found.iter().map(|c| c.note).collect();
        assert_eq!(notes, vec![40, 45, 50]);
        for (candidate, expected) in found.iter().zip([82.4, 110.0, 146.8]) {
            assert!(within_percent(candidate.frequency_hz, expected, 3.0));
        }
        assert!(found.windows(2).all(|w| w[0].magnitude >= w[1].magnitude));
    }

    #[test]
    fn e_major_voicing_resolves_all_six_strings() {
        let voicing = [
            (82.41, 1.0),
            (123.47, 0.9),
            (164.81, 0.85),
            (207.65, 0.8),
            (246.94, 0.75),
            (329.63, 0.7),
        ];
        let found = solve(&spectrum(&voicing));

        assert_eq!(found.len(), 6, "found {found:?}");
        let mut notes: Vec<u8> = found.iter().map(|c| c.note).collect();
        notes.sort_unstable();
        assert_eq!(notes, vec![40, 47, 52, 56, 59, 64]);

        for (expected, _) in voicing {
            assert!(
                found
                    .iter()
                    .any(|c| within_percent(c.frequency_hz, expected, 3.0)),
                "{expected} Hz missing from {found:?}"
            );
        }
    }

    #[test]
    fn weak_residual_harmonic_is_not_a_note() {
        // E2 with a second harmonic slightly stronger than the series predicts.
        let mut magnitudes = vec![0.0; BINS];
        magnitudes[13] = 0.5;
        magnitudes[14] = 1.0;
        magnitudes[15] = 0.5;
        magnitudes[27] = 0.3;
        magnitudes[28] = 0.6;
        magnitudes[29] = 0.3;
        let found = solve(&SpectralFrame::new(magnitudes, BIN_HZ));

        assert_eq!(found.len(), 1, "found {found:?}");
        assert_eq!(found[0].note, 40);
    }

    #[test]
    fn strong_octave_survives_subtraction() {
        // A2 plus a much louder A3: the octave is a real note, not a harmonic.
        let frame = spectrum(&[(110.0, 0.5), (220.0, 1.0)]);
        let mut notes: Vec<u8> = solve(&frame).iter().map(|c| c.note).collect();
        notes.sort_unstable();
        assert_eq!(notes, vec![45, 57]);
    }

    #[test]
    fn magnitudes_never_go_negative_and_iterations_are_bounded() {
        let config = PipelineConfig {
            noise_floor: 0.05,
            max_notes: 8,
            ..PipelineConfig::default()
        };
        let mut solver = ChordSolver::new(&config, LobeProfile::new(vec![1.0, 0.5]));
        // Dense comb of equal peaks: the cap must stop the solver.
        let mut magnitudes = vec![0.0; BINS];
        for bin in (12..230).step_by(3) {
            magnitudes[bin] = 1.0;
        }
        let frame = SpectralFrame::new(magnitudes, BIN_HZ);
        let mut out = Vec::new();
        solver.solve(&frame, &mut out);
        assert!(out.len() <= 8);
        assert!(!out.is_empty());
        assert!(out.iter().all(|c| c.magnitude > 0.0));
    }

    #[test]
    fn out_of_range_peaks_are_ignored() {
        let mut magnitudes = vec![0.0; BINS];
        // 35 Hz and 2 kHz, both outside the 60..1400 Hz band.
        magnitudes[6] = 5.0;
        magnitudes[341] = 5.0;
        assert!(solve(&SpectralFrame::new(magnitudes, BIN_HZ)).is_empty());
    }

    #[test]
    fn analyzed_low_string_is_one_note() {
        let wound = [0.3, 0.15, 0.1, 0.075, 0.06, 0.05];
        assert_eq!(solve_analyzed(&strings(&[(82.41, &wound[..])])), vec![40]);
        assert_eq!(solve_analyzed(&strings(&[(110.0, &wound[..])])), vec![45]);
    }

    #[test]
    fn analyzed_dyad_resolves_both_strings() {
        let wound = [0.3, 0.15, 0.1, 0.075, 0.06, 0.05];
        let plain = [0.2, 0.08];
        let samples = strings(&[(82.41, &wound[..]), (783.99, &plain[..])]);
        assert_eq!(solve_analyzed(&samples), vec![40, 79]);
    }
}
