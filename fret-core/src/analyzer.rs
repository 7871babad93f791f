//! # Shared Analysis Pipeline
//!
//! One `FrameAnalyzer` turns a window of samples into a complete
//! [`AnalysisFrame`]. Both capture shells consume it: the live engine
//! feeds it microphone windows, the song path feeds it buffer slices, so
//! the detection logic exists exactly once.

use serde::{Deserialize, Serialize};

use crate::note::NoteLabel;
use crate::stability::PitchSmoother;
use crate::{AnalysisFrame, chroma, fft, fretboard, pitch};

/// Samples per analysis window. 4096 at 44.1 kHz gives the lag
/// resolution needed to separate notes around the low E string.
pub const WINDOW_SIZE: usize = 4096;

/// Tunable thresholds for one analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// Minimum window RMS before pitch detection runs.
    pub silence_floor: f32,
    /// Estimates outside this band are discarded as correlation
    /// artifacts before they can reach the smoothing history.
    pub min_frequency: f32,
    pub max_frequency: f32,
    /// Semitone band accepted when snapping a pitch to a fret.
    pub fret_tolerance: f32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            silence_floor: 0.01,
            min_frequency: 60.0,
            max_frequency: 1500.0,
            fret_tolerance: fretboard::STRICT_TOLERANCE,
        }
    }
}

impl AnalyzerConfig {
    /// Thresholds for decoded song buffers: a much lower silence floor
    /// (mastered audio is quiet next to a close mic) and permissive fret
    /// snapping for slightly detuned recordings.
    pub fn for_song() -> Self {
        Self {
            silence_floor: 0.001,
            fret_tolerance: fretboard::SNAP_TOLERANCE,
            ..Self::default()
        }
    }
}

/// One analysis pipeline instance: configuration plus the smoothing
/// state that carries across frames.
#[derive(Debug)]
pub struct FrameAnalyzer {
    config: AnalyzerConfig,
    smoother: PitchSmoother,
}

impl FrameAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            smoother: PitchSmoother::new(),
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Clears smoothing history (seeks, session restarts).
    pub fn reset(&mut self) {
        self.smoother.reset();
    }

    /// Runs the full pipeline on one window of samples.
    ///
    /// Raw samples become RMS, spectrum and chroma; the pitch estimate
    /// is range-gated, median-smoothed and then mapped to a note label
    /// and a fretboard position. Silence yields a frame whose pitch,
    /// note and position are all absent, never an error.
    pub fn analyze(&mut self, samples: &[f32], sample_rate: u32) -> AnalysisFrame {
        let rms = pitch::calculate_rms(samples);

        let spectrum = fft::perform_fft(samples);
        let magnitudes = fft::spectrum_to_magnitudes(&spectrum);
        let chroma = chroma::compute_chroma(&magnitudes, sample_rate);

        let raw = pitch::detect_pitch(samples, sample_rate, self.config.silence_floor)
            .filter(|f| (self.config.min_frequency..=self.config.max_frequency).contains(f));
        let smoothed = self.smoother.smooth(raw);

        let note = smoothed.and_then(NoteLabel::from_frequency);
        let position = smoothed
            .and_then(|f| fretboard::resolve_position_with_tolerance(f, self.config.fret_tolerance));

        AnalysisFrame {
            rms,
            pitch: smoothed,
            note,
            chroma,
            position,
        }
    }
}
