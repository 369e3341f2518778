//! # Musical Tuning Module
//!
//! Conversions between frequencies, MIDI note numbers, and note names, in
//! 12-tone equal temperament with A4 = 440 Hz (MIDI 69).
//!
//! ## Features
//! - Full 128-entry MIDI note table (C-1 to G9)
//! - Frequency to nearest MIDI note, rounding to the closest semitone
//! - Cent deviation calculations for diagnostics

use once_cell::sync::Lazy;

/// Reference pitch for A4.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI note number of A4.
pub const A4_MIDI: u8 = 69;

/// Statically computed names of all 128 MIDI notes (e.g. "A4", "C#3").
static NOTE_NAMES: Lazy<Vec<String>> = Lazy::new(|| {
    const PITCH_CLASSES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];
    (0..128usize)
        .map(|midi| {
            // MIDI 0 is C-1; the octave number changes at C.
            let octave = midi as i32 / 12 - 1;
            format!("{}{}", PITCH_CLASSES[midi % 12], octave)
        })
        .collect()
});

/// Equal-temperament frequency of a MIDI note.
pub fn midi_to_frequency(note: u8) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((note as f32 - A4_MIDI as f32) / 12.0)
}

/// Fractional MIDI pitch of a frequency (69.0 for 440 Hz).
pub fn frequency_to_pitch(freq: f32) -> f32 {
    A4_MIDI as f32 + 12.0 * (freq / A4_FREQUENCY).log2()
}

/// Nearest MIDI note to `freq`.
///
/// # Returns
/// * `Some(note)` - Rounded note number in `0..=127`
/// * `None` - Non-positive, non-finite, or out-of-range frequency
pub fn frequency_to_midi(freq: f32) -> Option<u8> {
    if !(freq.is_finite() && freq > 0.0) {
        return None;
    }
    let pitch = frequency_to_pitch(freq).round();
    (0.0..=127.0).contains(&pitch).then_some(pitch as u8)
}

/// Name of a MIDI note such as `"E2"` or `"C#4"`.
///
/// Numbers above 127 are clamped to G9.
pub fn note_name(note: u8) -> &'static str {
    NOTE_NAMES[(note as usize).min(127)].as_str()
}

/// Calculates the deviation from a target frequency in cents.
///
/// Cents are a logarithmic unit of pitch measurement where:
/// - 100 cents = 1 semitone
/// - 1200 cents = 1 octave
/// - Positive values indicate sharpness, negative values indicate flatness
///
/// # Arguments
/// * `freq` - Measured frequency in Hz
/// * `target_freq` - Target frequency in Hz
///
/// # Returns
/// * Cent deviation (positive = sharp, negative = flat)
pub fn calculate_cents_deviation(freq: f32, target_freq: f32) -> f32 {
    1200.0 * (freq / target_freq).log2()
}

/// Frequency ratio spanned by `cents`.
pub fn cents_to_ratio(cents: f32) -> f32 {
    2.0_f32.powf(cents / 1200.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a4_is_midi_69() {
        assert_eq!(frequency_to_midi(440.0), Some(69));
        assert!((midi_to_frequency(69) - 440.0).abs() < 1e-3);
        assert_eq!(note_name(69), "A4");
    }

    #[test]
    fn guitar_open_strings() {
        let expected = [
            (82.41, 40, "E2"),
            (110.0, 45, "A2"),
            (146.83, 50, "D3"),
            (196.0, 55, "G3"),
            (246.94, 59, "B3"),
            (329.63, 64, "E4"),
        ];
        for (freq, midi, name) in expected {
            assert_eq!(frequency_to_midi(freq), Some(midi));
            assert_eq!(note_name(midi), name);
            let nominal = midi_to_frequency(midi);
            assert!(calculate_cents_deviation(freq, nominal).abs() < 1.0, "{name}");
        }
    }

    #[test]
    fn rounds_to_nearest_semitone() {
        // 40 cents sharp of A4 still rounds to A4, 60 cents sharp does not.
        assert_eq!(frequency_to_midi(440.0 * cents_to_ratio(40.0)), Some(69));
        assert_eq!(frequency_to_midi(440.0 * cents_to_ratio(60.0)), Some(70));
    }

    #[test]
    fn rejects_invalid_frequencies() {
        assert_eq!(frequency_to_midi(0.0), None);
        assert_eq!(frequency_to_midi(-10.0), None);
        assert_eq!(frequency_to_midi(f32::NAN), None);
        assert_eq!(frequency_to_midi(40_000.0), None);
    }

    #[test]
    fn table_edges() {
        assert_eq!(note_name(0), "C-1");
        assert_eq!(note_name(127), "G9");
        assert_eq!(note_name(200), "G9");
    }

    #[test]
    fn cents_deviation() {
        assert!((calculate_cents_deviation(880.0, 440.0) - 1200.0).abs() < 1e-3);
        assert!(calculate_cents_deviation(439.0, 440.0) < 0.0);
    }
}
