//! End-to-end properties of the analysis pipeline on synthetic signals.

use fret_core::analyzer::{AnalyzerConfig, FrameAnalyzer, WINDOW_SIZE};
use fret_core::chroma::compute_chroma;
use fret_core::fretboard::{FretPosition, GUITAR_STRINGS, resolve_position};
use fret_core::note::NoteLabel;
use fret_core::pitch::detect_pitch;

const SAMPLE_RATE: u32 = 44_100;

fn sine(freq: f32, len: usize, amplitude: f32) -> Vec<f32> {
    (0..len)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * freq * t).sin()
        })
        .collect()
}

#[test]
fn detector_tracks_pure_tones_across_the_guitar_band() {
    // Open strings, a few fretted pitches and the band edges.
    let frequencies = [
        82.41, 96.0, 110.0, 123.47, 146.83, 196.0, 246.94, 329.63, 440.0, 587.33, 783.99, 1000.0,
    ];
    for &freq in &frequencies {
        let samples = sine(freq, WINDOW_SIZE, 0.5);
        let detected = detect_pitch(&samples, SAMPLE_RATE, 0.01)
            .unwrap_or_else(|| panic!("no pitch for {freq} Hz"));
        let relative_error = (detected - freq).abs() / freq;
        assert!(
            relative_error < 0.01,
            "{freq} Hz detected as {detected} Hz"
        );
    }
}

#[test]
fn note_mapping_is_exact_on_reference_pitches() {
    let a4 = NoteLabel::from_frequency(440.0).unwrap();
    assert_eq!((a4.name, a4.octave, a4.cents), ("A", 4, 0));

    let a3 = NoteLabel::from_frequency(220.0).unwrap();
    assert_eq!((a3.name, a3.octave, a3.cents), ("A", 3, 0));
}

#[test]
fn note_mapping_round_trips_within_reported_cents() {
    // Reconstructing the label's equal-tempered frequency and shifting
    // it by the reported cents must land back on the input.
    for freq in [82.41, 93.7, 110.0, 147.5, 200.0, 310.0, 441.3, 515.0, 987.77] {
        let label = NoteLabel::from_frequency(freq).unwrap();
        let tempered = label.frequency();
        let actual_cents = 1200.0 * (freq / tempered).log2();
        // cents is floored, so the true deviation sits within one cent
        // above the reported value.
        assert!(
            actual_cents >= label.cents as f32 - 0.01 && actual_cents < label.cents as f32 + 1.0,
            "{freq} Hz: reported {} cents, actual {actual_cents}",
            label.cents
        );
    }
}

#[test]
fn open_strings_resolve_without_fretting() {
    let position = resolve_position(82.41).unwrap();
    assert_eq!(position, FretPosition { string_index: 0, fret: 0 });

    // 110 Hz is also low E fret 5, but the open A wins on fret number.
    let position = resolve_position(110.0).unwrap();
    assert_eq!(position, FretPosition { string_index: 1, fret: 0 });
}

#[test]
fn resolver_always_returns_the_globally_lowest_fret() {
    // Every reachable pitch on every string: the resolved fret can
    // never exceed the fret that produced the pitch.
    for string in GUITAR_STRINGS.iter() {
        for fret in 0..=15 {
            let freq = string.freq * 2.0_f32.powf(fret as f32 / 12.0);
            let position = resolve_position(freq)
                .unwrap_or_else(|| panic!("{freq} Hz did not resolve"));
            assert!(
                position.fret <= fret,
                "{freq} Hz resolved to fret {} instead of <= {fret}",
                position.fret
            );
        }
    }
}

#[test]
fn chroma_of_silence_is_all_zero() {
    let magnitudes = vec![0.0_f32; WINDOW_SIZE / 2];
    assert_eq!(compute_chroma(&magnitudes, SAMPLE_RATE), [0.0; 12]);
}

#[test]
fn chroma_peak_lands_on_the_sounding_pitch_class() {
    let bins = WINDOW_SIZE / 2;
    let bin_size = SAMPLE_RATE as f32 / (bins as f32 * 2.0);
    let mut magnitudes = vec![0.0_f32; bins];
    magnitudes[(440.0 / bin_size).round() as usize] = 1000.0;

    let chroma = compute_chroma(&magnitudes, SAMPLE_RATE);
    assert_eq!(chroma[9], 1.0, "A is pitch class 9");
    for (class, &energy) in chroma.iter().enumerate() {
        if class != 9 {
            assert!(energy < 1.0);
        }
    }
}

#[test]
fn pipeline_converges_on_an_open_d_within_ten_frames() {
    // Two seconds of a clean open D string at 44.1 kHz.
    let samples = sine(146.83, SAMPLE_RATE as usize * 2, 0.4);
    let mut analyzer = FrameAnalyzer::new(AnalyzerConfig::default());

    let mut converged_at = None;
    let frames: Vec<_> = samples
        .chunks_exact(WINDOW_SIZE)
        .map(|window| analyzer.analyze(window, SAMPLE_RATE))
        .collect();

    for (index, frame) in frames.iter().enumerate() {
        let on_target = frame.rms > 0.01
            && frame.note.as_ref().is_some_and(|n| n.name == "D" && n.octave == 3)
            && frame.position
                == Some(FretPosition {
                    string_index: 2,
                    fret: 0,
                });
        if on_target {
            converged_at = Some(index);
            break;
        }
    }

    let first = converged_at.expect("pipeline never converged on D3");
    assert!(first < 10, "converged only at frame {first}");

    // Once locked, the tail of the take stays locked.
    for frame in &frames[first..] {
        assert_eq!(frame.note.as_ref().unwrap().name, "D");
        assert_eq!(
            frame.position,
            Some(FretPosition {
                string_index: 2,
                fret: 0
            })
        );
    }
}

#[test]
fn dropouts_do_not_reset_the_smoothed_pitch() {
    let mut analyzer = FrameAnalyzer::new(AnalyzerConfig::default());
    let tone = sine(196.0, WINDOW_SIZE, 0.5);
    let silence = vec![0.0_f32; WINDOW_SIZE];

    for _ in 0..3 {
        analyzer.analyze(&tone, SAMPLE_RATE);
    }
    let silent_frame = analyzer.analyze(&silence, SAMPLE_RATE);
    assert!(silent_frame.pitch.is_none());

    // The first tone frame after the dropout is already smoothed by the
    // surviving history.
    let frame = analyzer.analyze(&tone, SAMPLE_RATE);
    let pitch = frame.pitch.unwrap();
    assert!((pitch - 196.0).abs() / 196.0 < 0.01);
}
