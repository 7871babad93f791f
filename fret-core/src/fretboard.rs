//! # Fretboard Position Inference
//!
//! Maps a detected frequency onto the most plausible string/fret position
//! in standard tuning. Among every candidate that matches within the
//! tolerance band, the lowest fret wins, which biases toward the open,
//! low-position fingerings a beginner would actually use.

use once_cell::sync::Lazy;
use serde::Serialize;

/// One open string: its note, octave and fundamental frequency.
#[derive(Debug, Clone)]
pub struct StringTuning {
    pub note: &'static str,
    pub octave: i32,
    pub freq: f32,
}

/// Standard EADGBE tuning, low E first. Built once at startup and shared
/// read-only by every resolver call.
pub static GUITAR_STRINGS: Lazy<Vec<StringTuning>> = Lazy::new(|| {
    vec![
        StringTuning { note: "E", octave: 2, freq: 82.41 },
        StringTuning { note: "A", octave: 2, freq: 110.00 },
        StringTuning { note: "D", octave: 3, freq: 146.83 },
        StringTuning { note: "G", octave: 3, freq: 196.00 },
        StringTuning { note: "B", octave: 3, freq: 246.94 },
        StringTuning { note: "E", octave: 4, freq: 329.63 },
    ]
});

/// Highest fret considered when resolving positions.
pub const MAX_FRET: i32 = 15;

/// Tolerance band in semitones for live detection.
pub const STRICT_TOLERANCE: f32 = 0.4;

/// Permissive band for recorded material, which is often slightly
/// detuned; wide enough that rounding to the fret grid always snaps.
pub const SNAP_TOLERANCE: f32 = 0.5;

/// A fretted (or open) position on the neck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FretPosition {
    /// String index, 0 = low E through 5 = high E.
    pub string_index: usize,
    /// Fret number, 0 = open string.
    pub fret: i32,
}

/// Resolves a frequency to a fretboard position with the live-detection
/// tolerance band.
pub fn resolve_position(freq: f32) -> Option<FretPosition> {
    resolve_position_with_tolerance(freq, STRICT_TOLERANCE)
}

/// Resolves a frequency to the lowest-fret position within `tolerance`.
///
/// For each string the continuous fret is `12 * log2(freq / open)`; the
/// rounded fret is a candidate when it lies in [0, 15] and its exact
/// pitch is within `tolerance` semitones of the input. The candidate
/// with the lowest fret wins; ties go to the string checked first, so an
/// open string always beats an equivalent fretted voicing.
///
/// # Returns
/// * `Some(position)` - Best matching position
/// * `None` - No string/fret combination within tolerance
pub fn resolve_position_with_tolerance(freq: f32, tolerance: f32) -> Option<FretPosition> {
    if !freq.is_finite() || freq <= 0.0 {
        return None;
    }

    let mut candidates = Vec::new();
    for (string_index, string) in GUITAR_STRINGS.iter().enumerate() {
        let fret = (12.0 * (freq / string.freq).log2()).round() as i32;
        if !(0..=MAX_FRET).contains(&fret) {
            continue;
        }
        let expected = string.freq * 2.0_f32.powf(fret as f32 / 12.0);
        if (12.0 * (freq / expected).log2()).abs() < tolerance {
            candidates.push(FretPosition { string_index, fret });
        }
    }

    candidates.into_iter().min_by_key(|c| c.fret)
}
