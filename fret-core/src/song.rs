//! # Song Buffer Analysis
//!
//! The offline sibling of the live engine. Windows come from a fully
//! decoded in-memory buffer at a caller-supplied playback time instead
//! of a microphone callback, which lets a consumer analyze "the song" at
//! exactly the moment matching its playback position. The detection
//! logic itself is the shared pipeline; only the window sourcing
//! differs.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::info;

use crate::analyzer::{AnalyzerConfig, WINDOW_SIZE};
use crate::fretboard::{self, FretPosition};
use crate::note::NoteLabel;
use crate::{fft, pitch};

/// A fully decoded, in-memory song: mono PCM plus its sample rate.
#[derive(Debug, Clone)]
pub struct SongBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SongBuffer {
    /// Wraps already-decoded PCM. Decoding is external; only float
    /// samples and a rate ever reach analysis.
    pub fn from_raw(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(anyhow!("sample rate must be non-zero"));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Loads a WAV file, keeping the first channel only.
    ///
    /// Undecodable input is rejected here as a failed load; a partial
    /// or corrupt buffer never reaches the analysis functions.
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("could not open {}", path.display()))?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .step_by(channels)
                .collect::<std::result::Result<_, _>>()
                .context("corrupt float sample data")?,
            hound::SampleFormat::Int => {
                let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .step_by(channels)
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .context("corrupt integer sample data")?
            }
        };

        info!(
            "loaded {}: {} samples at {} Hz",
            path.display(),
            samples.len(),
            spec.sample_rate
        );
        Self::from_raw(samples, spec.sample_rate)
    }

    /// Song length in seconds.
    pub fn duration(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// What the song sounds like at one playback position.
#[derive(Debug, Clone, Serialize)]
pub struct SongPitch {
    /// Detected fundamental in Hz.
    pub pitch: f32,
    /// Nearest equal-tempered note.
    pub note: NoteLabel,
    /// Suggested fretboard position, snapped permissively.
    pub position: Option<FretPosition>,
}

/// Spectral summary of one window: dominant peak and average level.
#[derive(Debug, Clone, Serialize)]
pub struct SpectrumSummary {
    /// Frequency of the strongest bin in Hz.
    pub peak_frequency: f32,
    /// Mean magnitude over all bins, normalized by the peak, in [0, 1].
    pub level: f32,
}

/// Pitch analysis over a song buffer at arbitrary playback positions.
///
/// Random access means no cross-window smoothing: a seek would make a
/// median over "recent" windows meaningless, so every call stands alone.
#[derive(Debug)]
pub struct SongAnalyzer {
    buffer: SongBuffer,
    config: AnalyzerConfig,
}

impl SongAnalyzer {
    pub fn new(buffer: SongBuffer) -> Self {
        Self {
            buffer,
            config: AnalyzerConfig::for_song(),
        }
    }

    pub fn buffer(&self) -> &SongBuffer {
        &self.buffer
    }

    /// Detects the pitch sounding at `time` seconds into the song.
    ///
    /// Returns `None` past the end of the buffer, when the remaining
    /// tail is shorter than one window, or when the window holds no
    /// detectable fundamental.
    pub fn pitch_at(&self, time: f32) -> Option<SongPitch> {
        let window = self.window_at(time)?;
        let freq = pitch::detect_pitch(window, self.buffer.sample_rate, self.config.silence_floor)
            .filter(|f| (self.config.min_frequency..=self.config.max_frequency).contains(f))?;
        let note = NoteLabel::from_frequency(freq)?;
        let position = fretboard::resolve_position_with_tolerance(freq, self.config.fret_tolerance);
        Some(SongPitch {
            pitch: freq,
            note,
            position,
        })
    }

    /// Spectral summary at `time`, for playback visualization.
    pub fn spectrum_at(&self, time: f32) -> Option<SpectrumSummary> {
        let window = self.window_at(time)?;
        let magnitudes = fft::spectrum_to_magnitudes(&fft::perform_fft(window));

        let (peak_bin, peak) = magnitudes
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
        let nyquist = self.buffer.sample_rate as f32 / 2.0;
        let peak_frequency = peak_bin as f32 * (nyquist / magnitudes.len() as f32);

        let mean = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
        let level = if *peak > 0.0 { mean / peak } else { 0.0 };

        Some(SpectrumSummary {
            peak_frequency,
            level,
        })
    }

    fn window_at(&self, time: f32) -> Option<&[f32]> {
        if !time.is_finite() || time < 0.0 {
            return None;
        }
        let start = (time * self.buffer.sample_rate as f32).floor() as usize;
        let end = start.checked_add(WINDOW_SIZE)?;
        if end > self.buffer.samples.len() {
            return None;
        }
        Some(&self.buffer.samples[start..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_buffer(freq: f32, sample_rate: u32, seconds: f32) -> SongBuffer {
        let len = (sample_rate as f32 * seconds) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.4 * (2.0 * std::f32::consts::PI * freq * t).sin()
            })
            .collect();
        SongBuffer::from_raw(samples, sample_rate).unwrap()
    }

    #[test]
    fn rejects_zero_sample_rate() {
        assert!(SongBuffer::from_raw(vec![0.0; 16], 0).is_err());
    }

    #[test]
    fn duration_matches_sample_count() {
        let buffer = SongBuffer::from_raw(vec![0.0; 44_100], 44_100).unwrap();
        assert!((buffer.duration() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn detects_open_a_mid_song() {
        let analyzer = SongAnalyzer::new(sine_buffer(110.0, 44_100, 2.0));
        let hit = analyzer.pitch_at(0.5).unwrap();
        assert!((hit.pitch - 110.0).abs() / 110.0 < 0.01);
        assert_eq!(hit.note.name, "A");
        assert_eq!(hit.note.octave, 2);
        let position = hit.position.unwrap();
        assert_eq!(position.string_index, 1);
        assert_eq!(position.fret, 0);
    }

    #[test]
    fn past_end_of_buffer_returns_none() {
        let analyzer = SongAnalyzer::new(sine_buffer(110.0, 44_100, 1.0));
        assert!(analyzer.pitch_at(5.0).is_none());
        assert!(analyzer.pitch_at(-1.0).is_none());
        // The tail shorter than one window is unusable too.
        assert!(analyzer.pitch_at(0.95).is_none());
    }

    #[test]
    fn silent_window_returns_none() {
        let buffer = SongBuffer::from_raw(vec![0.0; 44_100], 44_100).unwrap();
        let analyzer = SongAnalyzer::new(buffer);
        assert!(analyzer.pitch_at(0.0).is_none());
    }

    #[test]
    fn spectrum_peak_tracks_the_tone() {
        let analyzer = SongAnalyzer::new(sine_buffer(440.0, 44_100, 1.0));
        let summary = analyzer.spectrum_at(0.2).unwrap();
        assert!((summary.peak_frequency - 440.0).abs() < 15.0);
        assert!(summary.level > 0.0 && summary.level <= 1.0);
    }

    #[test]
    fn wav_round_trip_preserves_the_tone() {
        let dir = std::env::temp_dir().join("fret-core-song-tests");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("open_d.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..44_100 {
            let t = i as f32 / 44_100.0;
            let sample = 0.4 * (2.0 * std::f32::consts::PI * 146.83 * t).sin();
            writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
        }
        writer.finalize().unwrap();

        let analyzer = SongAnalyzer::new(SongBuffer::from_wav(&path).unwrap());
        let hit = analyzer.pitch_at(0.25).unwrap();
        assert_eq!(hit.note.name, "D");
        assert_eq!(hit.note.octave, 3);
    }

    #[test]
    fn missing_file_is_a_rejected_load() {
        let path = Path::new("/nonexistent/definitely-not-a-song.wav");
        assert!(SongBuffer::from_wav(path).is_err());
    }
}
