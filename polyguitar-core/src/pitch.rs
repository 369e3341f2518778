//! # Pitch Estimation Module
//!
//! Peak picking on magnitude spectra.
//!
//! ## Features
//! - Loudest-bin search within a frequency band, lower bin wins ties
//! - Log-parabolic interpolation for sub-bin accuracy
//! - Dominant-frequency estimate for diagnostics

use crate::spectral::{Peak, SpectralFrame};

/// Finds the loudest bin in `lo..=hi`.
///
/// Ties resolve to the lower bin. Non-finite values are ignored.
///
/// # Returns
/// * `Some((bin, magnitude))` - The loudest bin and its value
/// * `None` - Empty or out-of-range band
pub fn loudest_bin(magnitudes: &[f32], lo: usize, hi: usize) -> Option<(usize, f32)> {
    let band = magnitudes.get(lo..=hi)?;
    let mut best: Option<(usize, f32)> = None;
    for (offset, &value) in band.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        match best {
            Some((_, top)) if value <= top => {}
            _ => best = Some((lo + offset, value)),
        }
    }
    best
}

/// Refines a peak position using its neighbours.
///
/// Fits a parabola through the log magnitudes of `bin - 1`, `bin`, `bin + 1`.
/// Falls back to the integer bin at the spectrum edges or when a neighbour is
/// zero.
///
/// # Arguments
/// * `magnitudes` - Magnitude spectrum
/// * `bin` - Index of a local maximum
///
/// # Returns
/// * Fractional bin position of the peak
pub fn interpolate_peak(magnitudes: &[f32], bin: usize) -> f32 {
    if bin == 0 || bin + 1 >= magnitudes.len() {
        return bin as f32;
    }

    let y1 = magnitudes[bin - 1].ln();
    let y2 = magnitudes[bin].ln();
    let y3 = magnitudes[bin + 1].ln();
    if !y1.is_finite() || !y2.is_finite() || !y3.is_finite() {
        return bin as f32;
    }

    let denominator = 2.0 * y2 - y1 - y3;
    if denominator.abs() < 1e-6 {
        return bin as f32;
    }

    let shift = (y3 - y1) / (2.0 * denominator);
    if shift.is_finite() && shift.abs() <= 0.5 {
        bin as f32 + shift
    } else {
        bin as f32
    }
}

/// The strongest spectral peak between `min_hz` and `max_hz`, interpolated.
pub fn dominant_peak(frame: &SpectralFrame, min_hz: f32, max_hz: f32) -> Option<Peak> {
    let (lo, hi) = frame.bin_range(min_hz, max_hz)?;
    let (bin, magnitude) = loudest_bin(frame.magnitudes(), lo, hi)?;
    if magnitude <= 0.0 {
        return None;
    }
    let position = interpolate_peak(frame.magnitudes(), bin);
    Some(Peak {
        frequency_hz: frame.frequency_of(position),
        magnitude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ties_resolve_to_lower_bin() {
        let magnitudes = [0.0, 1.0, 3.0, 2.0, 3.0, 1.0];
        assert_eq!(loudest_bin(&magnitudes, 1, 5), Some((2, 3.0)));
        assert_eq!(loudest_bin(&magnitudes, 3, 5), Some((4, 3.0)));
        assert_eq!(loudest_bin(&magnitudes, 4, 9), None);
    }

    #[test]
    fn symmetric_neighbours_do_not_shift() {
        let magnitudes = [0.0, 0.5, 1.0, 0.5, 0.0];
        assert_eq!(interpolate_peak(&magnitudes, 2), 2.0);
    }

    #[test]
    fn heavier_right_neighbour_shifts_right() {
        let magnitudes = [0.0, 0.4, 1.0, 0.8, 0.0];
        let position = interpolate_peak(&magnitudes, 2);
        assert!(position > 2.0 && position < 2.5);
    }

    #[test]
    fn zero_neighbour_falls_back_to_bin() {
        let magnitudes = [0.0, 0.0, 1.0, 0.5];
        assert_eq!(interpolate_peak(&magnitudes, 2), 2.0);
    }

    #[test]
    fn dominant_peak_in_band() {
        let mut magnitudes = vec![0.0; 64];
        magnitudes[5] = 9.0;
        magnitudes[20] = 4.0;
        let frame = SpectralFrame::new(magnitudes, 10.0);
        let peak = dominant_peak(&frame, 100.0, 600.0).unwrap();
        assert_eq!(peak.frequency_hz, 200.0);
        assert_eq!(peak.magnitude, 4.0);
    }
}
