//! # Chroma Analysis
//!
//! Collapses a magnitude spectrum into a 12-bin pitch-class energy
//! vector, used to check which chord tones are sounding regardless of
//! octave. Each frame's vector is recomputed from scratch and normalized
//! to its own maximum, so chroma carries no cross-frame state.

use crate::note;

/// Guitar-relevant band in Hz; bins outside are ignored.
const MIN_FREQ: f32 = 80.0;
const MAX_FREQ: f32 = 1000.0;

/// Bins below this fraction of the bin count are treated as noise.
/// A full-scale Hann-windowed sine peaks near half the bin count in the
/// magnitudes [`crate::fft::perform_fft`] produces, so the floor scales
/// with the window rather than being an absolute level.
const NOISE_FLOOR_RATIO: f32 = 0.02;

/// Computes the pitch-class energy vector for one magnitude spectrum.
///
/// Bins are mapped to pitch classes through the same semitone formula the
/// note mapper uses. Bins outside the 80-1000 Hz band or under the noise
/// floor contribute nothing; if no bin survives, the vector stays all
/// zero rather than dividing by zero.
///
/// # Arguments
/// * `magnitudes` - Spectrum magnitudes from DC to Nyquist
/// * `sample_rate` - Capture rate in Hz
///
/// # Returns
/// * Twelve energies in [0, 1], index 0 = C through 11 = B
pub fn compute_chroma(magnitudes: &[f32], sample_rate: u32) -> [f32; 12] {
    let mut chroma = [0.0_f32; 12];
    if magnitudes.is_empty() {
        return chroma;
    }

    let bin_size = sample_rate as f32 / (magnitudes.len() as f32 * 2.0);
    let floor = NOISE_FLOOR_RATIO * magnitudes.len() as f32;

    for (i, &magnitude) in magnitudes.iter().enumerate() {
        let freq = i as f32 * bin_size;
        if freq < MIN_FREQ || freq > MAX_FREQ {
            continue;
        }
        if magnitude < floor {
            continue;
        }
        if let Some(class) = note::pitch_class(freq) {
            chroma[class] += magnitude;
        }
    }

    let max = chroma.iter().cloned().fold(0.0_f32, f32::max);
    if max > 0.0 {
        for value in chroma.iter_mut() {
            *value /= max;
        }
    }
    chroma
}
