//! # Practice Session
//!
//! Fuses the audio analysis frames with two external collaborators: a
//! hand-landmark tracker (posture) and a remote chord judge (pass/fail
//! critique). Both stay behind narrow traits; their internals are not
//! this crate's business.
//!
//! The decision cascade per frame: silence or no hand means keep
//! listening; a posture fault earns an instant local correction; a
//! clean, stable note goes to the judge, but only when the cooldown
//! allows and no review is already in flight.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::AnalysisFrame;
use crate::stability::NoteStabilityTracker;

/// RMS below this is treated as silence between notes.
const SESSION_SILENCE_FLOOR: f32 = 0.02;

/// Stability scores above this read as a clean sustained note.
const CLEAN_STABILITY_THRESHOLD: f32 = 0.4;

/// Index-finger curvature (degrees) above this is a flat finger that
/// needs correcting; ~180 is fully straight.
const MAX_INDEX_CURVATURE: f32 = 170.0;

/// Minimum gap between judge submissions.
const JUDGE_COOLDOWN: Duration = Duration::from_secs(3);

/// How long an outstanding review may stay unanswered before the
/// session gives up on it.
const JUDGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-frame audio read for the session: silence gate plus stability.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioRead {
    Silent,
    Playing {
        note: String,
        volume: f32,
        stability: f32,
        is_clean: bool,
    },
}

/// Silence-gated stability scoring over the frame stream.
#[derive(Debug, Default)]
pub struct SpectralGate {
    tracker: NoteStabilityTracker,
}

impl SpectralGate {
    pub fn new() -> Self {
        Self {
            tracker: NoteStabilityTracker::new(),
        }
    }

    /// Classifies one frame. Frames without enough energy, or without a
    /// note label, count as silence and leave the stability window
    /// untouched.
    pub fn read(&mut self, frame: &AnalysisFrame) -> AudioRead {
        if frame.rms < SESSION_SILENCE_FLOOR {
            return AudioRead::Silent;
        }
        let Some(note) = &frame.note else {
            return AudioRead::Silent;
        };

        let stability = self.tracker.push(note.name);
        AudioRead::Playing {
            note: note.name.to_string(),
            volume: frame.rms,
            stability,
            is_clean: stability > CLEAN_STABILITY_THRESHOLD,
        }
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }
}

/// A single observed hand: landmarks plus derived posture metrics.
#[derive(Debug, Clone)]
pub struct HandObservation {
    /// Landmark coordinates as produced by the tracker.
    pub landmarks: Vec<[f32; 3]>,
    /// Straightness of the index finger in degrees.
    pub index_curvature: f32,
}

/// Hand-landmark tracking, consumed as an opaque presence and posture
/// source.
pub trait HandTracker {
    /// Latest observation, or `None` when no hand is in frame.
    fn observe(&mut self) -> Option<HandObservation>;
}

/// Outcome of a remote chord review.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub passed: bool,
    pub feedback: String,
}

/// A captured moment handed to the judge for review.
#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub lesson: String,
    pub note: Option<String>,
    pub stability: f32,
}

/// Remote critique service, consumed as an opaque pass/fail judge.
///
/// Submissions must not block; the verdict arrives on a later `poll`.
pub trait ChordJudge {
    fn submit(&mut self, request: JudgeRequest) -> anyhow::Result<()>;
    fn poll(&mut self) -> Option<Verdict>;
}

/// Rate limit on judge submissions: a minimum interval between calls
/// and at most one review in flight per session.
#[derive(Debug)]
pub struct JudgeCooldown {
    interval: Duration,
    last_submit: Option<Instant>,
    in_flight: bool,
}

impl JudgeCooldown {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_submit: None,
            in_flight: false,
        }
    }

    /// Whether a new submission may go out now.
    pub fn ready(&self, now: Instant) -> bool {
        if self.in_flight {
            return false;
        }
        match self.last_submit {
            Some(at) => now.duration_since(at) >= self.interval,
            None => true,
        }
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    fn mark_submitted(&mut self, now: Instant) {
        self.last_submit = Some(now);
        self.in_flight = true;
    }

    fn mark_resolved(&mut self) {
        self.in_flight = false;
    }
}

/// What the session wants the surrounding shell to show.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    /// Waiting for a note; nothing to correct.
    Listening,
    /// A local correction the player can apply immediately.
    Correcting { feedback: String },
    /// A review is out with the judge.
    Judging,
    /// The judge confirmed the attempt.
    Success { feedback: String },
}

/// One practice attempt against one lesson.
pub struct PracticeSession<J: ChordJudge, H: HandTracker> {
    lesson: String,
    gate: SpectralGate,
    judge: J,
    hands: H,
    cooldown: JudgeCooldown,
    submitted_at: Option<Instant>,
}

impl<J: ChordJudge, H: HandTracker> PracticeSession<J, H> {
    pub fn new(lesson: impl Into<String>, judge: J, hands: H) -> Self {
        Self {
            lesson: lesson.into(),
            gate: SpectralGate::new(),
            judge,
            hands,
            cooldown: JudgeCooldown::new(JUDGE_COOLDOWN),
            submitted_at: None,
        }
    }

    /// Advances the session by one analysis frame.
    ///
    /// `now` is passed in rather than read here so the cascade is
    /// deterministic under test.
    pub fn step(&mut self, frame: &AnalysisFrame, now: Instant) -> SessionStatus {
        // Resolve or expire any outstanding review first.
        if self.cooldown.in_flight() {
            if let Some(verdict) = self.judge.poll() {
                self.cooldown.mark_resolved();
                self.submitted_at = None;
                return if verdict.passed {
                    SessionStatus::Success {
                        feedback: verdict.feedback,
                    }
                } else {
                    SessionStatus::Correcting {
                        feedback: verdict.feedback,
                    }
                };
            }
            match self.submitted_at {
                Some(at) if now.duration_since(at) > JUDGE_TIMEOUT => {
                    warn!("judge review timed out");
                    self.cooldown.mark_resolved();
                    self.submitted_at = None;
                }
                _ => return SessionStatus::Judging,
            }
        }

        let AudioRead::Playing {
            note,
            stability,
            is_clean,
            ..
        } = self.gate.read(frame)
        else {
            return SessionStatus::Listening;
        };

        let Some(hand) = self.hands.observe() else {
            return SessionStatus::Listening;
        };
        if hand.index_curvature > MAX_INDEX_CURVATURE {
            return SessionStatus::Correcting {
                feedback: "Curve your index finger".to_string(),
            };
        }
        if !is_clean {
            return SessionStatus::Correcting {
                feedback: "Buzzing detected, press harder".to_string(),
            };
        }

        if self.cooldown.ready(now) {
            let request = JudgeRequest {
                lesson: self.lesson.clone(),
                note: Some(note),
                stability,
            };
            match self.judge.submit(request) {
                Ok(()) => {
                    self.cooldown.mark_submitted(now);
                    self.submitted_at = Some(now);
                    return SessionStatus::Judging;
                }
                Err(e) => warn!("judge submission failed: {e}"),
            }
        }
        SessionStatus::Listening
    }
}
