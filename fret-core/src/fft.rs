//! # Fast Fourier Transform (FFT) Module
//!
//! Frequency-domain transformation for the chroma and spectrum paths.
//! Windows are DC-centered and Hann-tapered before the transform so the
//! narrow-band guitar partials stay sharp in the magnitude spectrum.

use rustfft::{FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by centering it around zero.
///
/// A DC component leaks a large 0 Hz term into the spectrum and biases
/// the magnitude floor the chroma analysis thresholds against.
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

/// Applies a Hann window to taper the signal to zero at the edges,
/// reducing spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Performs a forward FFT on a window and returns the complex spectrum.
///
/// The input passes through DC-offset removal and Hann windowing first.
/// Any window length is accepted; both engines analyze 4096-sample
/// windows, tests use shorter ones.
pub fn perform_fft(signal: &[f32]) -> Vec<Complex<f32>> {
    if signal.is_empty() {
        return Vec::new();
    }

    let mut processed_signal = signal.to_vec();
    remove_dc_offset(&mut processed_signal);
    apply_hann_window(&mut processed_signal);

    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(processed_signal.len());

    let mut buffer: Vec<Complex<f32>> = processed_signal
        .into_iter()
        .map(|sample| Complex { re: sample, im: 0.0 })
        .collect();

    fft.process(&mut buffer);
    buffer
}

/// Calculates the magnitude vector from a complex spectrum.
///
/// Only the first half of the spectrum carries information below the
/// Nyquist frequency, so the rest is dropped.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}
