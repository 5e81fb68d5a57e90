//! Active + passive liveness evaluation across consecutive frames.
//!
//! Two cheap spoof vectors are covered:
//!
//! - **Printed photo:** no blink and no natural descriptor drift.
//! - **Static digital photo held to the camera:** no blink.
//!
//! A blink (a sharp EAR drop below an absolute ceiling) must be observed
//! inside a window of at least `min_samples` frames before the subject is
//! reported live. Inter-frame descriptor motion never asserts liveness on
//! its own; it only raises the confidence of a blink-backed verdict, since
//! a shaken photo moves too.
//!
//! # Threat Coverage
//!
//! - **Does not block:** video replay containing blinks, 3D masks,
//!   adversarial displays.

use std::collections::VecDeque;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry;
use crate::types::{DescriptorSample, FaceObservation};

/// Confidence contributed by an observed blink.
const BLINK_CONFIDENCE: f32 = 0.6;
/// Confidence contributed when every sample in the window moved naturally.
const MOTION_CONFIDENCE: f32 = 0.4;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("policy file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("policy file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid liveness policy: {0}")]
    Invalid(String),
}

/// Tunable liveness thresholds.
///
/// The defaults are empirical values for a frontal webcam at arm's length
/// under indoor lighting. They are policy, not biometric constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessPolicy {
    /// Smallest accepted face-box/frame area ratio (inclusive).
    pub min_face_ratio: f32,
    /// Largest accepted face-box/frame area ratio (inclusive).
    pub max_face_ratio: f32,
    /// EAR must fall by more than this from the previous frame to count as a blink.
    pub blink_ear_drop: f32,
    /// EAR must also be below this absolute value to count as a blink.
    pub blink_ear_ceiling: f32,
    /// Descriptor displacement at or below this is treated as a static image.
    pub min_motion: f32,
    /// Descriptor displacement at or above this is treated as a different face or artifact.
    pub max_motion: f32,
    /// Previous samples older than this do not produce a motion signal.
    pub max_sample_age_ms: u64,
    /// Frames required in the window before a verdict is reached.
    pub min_samples: usize,
    /// Blink history capacity; oldest samples are evicted first.
    pub history_capacity: usize,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            min_face_ratio: 0.03,
            max_face_ratio: 0.70,
            blink_ear_drop: 0.05,
            blink_ear_ceiling: 0.21,
            min_motion: 0.01,
            max_motion: 0.6,
            max_sample_age_ms: 2000,
            min_samples: 20,
            history_capacity: 30,
        }
    }
}

impl LivenessPolicy {
    /// Parse a policy from TOML. Missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, PolicyError> {
        let policy: Self = toml::from_str(src)?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a TOML file.
    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let src = std::fs::read_to_string(path)?;
        Self::from_toml_str(&src)
    }

    /// Reject inconsistent thresholds.
    ///
    /// `min_samples` must be at least 2: the very first observation is never live.
    pub fn validate(&self) -> Result<(), PolicyError> {
        if !(self.min_face_ratio > 0.0 && self.min_face_ratio < self.max_face_ratio) {
            return Err(PolicyError::Invalid(format!(
                "face ratio band [{}, {}] is empty",
                self.min_face_ratio, self.max_face_ratio
            )));
        }
        if self.max_face_ratio > 1.0 {
            return Err(PolicyError::Invalid(format!(
                "max_face_ratio {} exceeds 1.0",
                self.max_face_ratio
            )));
        }
        if self.min_motion >= self.max_motion {
            return Err(PolicyError::Invalid(format!(
                "motion band ({}, {}) is empty",
                self.min_motion, self.max_motion
            )));
        }
        if self.min_samples < 2 {
            return Err(PolicyError::Invalid(format!(
                "min_samples must be at least 2, got {}",
                self.min_samples
            )));
        }
        if self.history_capacity < self.min_samples {
            return Err(PolicyError::Invalid(format!(
                "history_capacity {} is smaller than min_samples {}",
                self.history_capacity, self.min_samples
            )));
        }
        Ok(())
    }
}

/// Inter-frame descriptor displacement, classified.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionSignal {
    /// No previous sample to compare against.
    Unavailable,
    /// Previous sample too old (or from the future).
    Stale,
    /// Displacement at or below `min_motion`: looks like a still image.
    Static(f32),
    /// Displacement inside the open band: natural micro-movement.
    Natural(f32),
    /// Displacement at or above `max_motion`, or mismatched dimensions.
    Erratic(f32),
}

impl MotionSignal {
    pub fn is_natural(&self) -> bool {
        matches!(self, MotionSignal::Natural(_))
    }

    /// True when the current frame cannot be the same subject as the previous one.
    pub fn breaks_continuity(&self) -> bool {
        matches!(self, MotionSignal::Stale | MotionSignal::Erratic(_))
    }
}

/// Why a face was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TooFar,
    TooClose,
    BadGeometry,
    NoBlink,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LivenessVerdict {
    NoFace,
    Rejected(RejectReason),
    /// Still accumulating evidence; keep polling.
    Verifying { samples: usize, required: usize },
    /// Live, with a confidence in [0, 1].
    Live { confidence: f32 },
}

/// Result of one evaluation.
#[derive(Debug, Clone)]
pub struct LivenessOutcome {
    pub verdict: LivenessVerdict,
    /// Current descriptor+timestamp, populated on every path that saw a face.
    pub sample: Option<DescriptorSample>,
    pub message: String,
    pub motion: MotionSignal,
}

impl LivenessOutcome {
    pub fn is_live(&self) -> bool {
        matches!(self.verdict, LivenessVerdict::Live { .. })
    }

    /// Liveness confidence, zero unless live.
    pub fn confidence(&self) -> f32 {
        match self.verdict {
            LivenessVerdict::Live { confidence } => confidence,
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FrameSample {
    blink: bool,
    natural_motion: bool,
}

/// Per-session liveness state. Owned by exactly one session.
#[derive(Debug, Clone)]
pub struct LivenessState {
    history: VecDeque<FrameSample>,
    capacity: usize,
    last_ear: Option<f32>,
    previous: Option<DescriptorSample>,
}

impl LivenessState {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            last_ear: None,
            previous: None,
        }
    }

    /// Blink flags in the window, oldest first.
    pub fn blink_history(&self) -> impl Iterator<Item = bool> + '_ {
        self.history.iter().map(|s| s.blink)
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn last_ear(&self) -> Option<f32> {
        self.last_ear
    }

    pub fn previous(&self) -> Option<&DescriptorSample> {
        self.previous.as_ref()
    }

    /// Store the sample the next evaluation measures motion against.
    pub fn set_previous(&mut self, sample: Option<DescriptorSample>) {
        self.previous = sample;
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_ear = None;
        self.previous = None;
    }

    fn push(&mut self, sample: FrameSample) {
        while self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    fn has_blink(&self) -> bool {
        self.history.iter().any(|s| s.blink)
    }

    fn natural_motion_fraction(&self) -> f32 {
        if self.history.is_empty() {
            return 0.0;
        }
        let natural = self.history.iter().filter(|s| s.natural_motion).count();
        natural as f32 / self.history.len() as f32
    }
}

/// Stateless evaluator; all mutable state lives in [`LivenessState`].
#[derive(Debug, Clone, Default)]
pub struct LivenessEvaluator {
    policy: LivenessPolicy,
}

impl LivenessEvaluator {
    pub fn new(policy: LivenessPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LivenessPolicy {
        &self.policy
    }

    /// Fresh state sized for this evaluator's policy.
    pub fn new_state(&self) -> LivenessState {
        LivenessState::new(self.policy.history_capacity)
    }

    /// Evaluate one frame. Never fails.
    ///
    /// Does not overwrite `state.previous`; the caller stores the returned
    /// sample via [`LivenessState::set_previous`]. Evidence is cleared when the
    /// face disappears, jumps to a different descriptor, or the previous
    /// sample is stale, so one subject's blink never vouches for the next.
    pub fn evaluate(
        &self,
        state: &mut LivenessState,
        observation: Option<&FaceObservation>,
    ) -> LivenessOutcome {
        let Some(obs) = observation else {
            state.reset();
            return LivenessOutcome {
                verdict: LivenessVerdict::NoFace,
                sample: None,
                message: "No face detected - look at the camera".into(),
                motion: MotionSignal::Unavailable,
            };
        };

        let sample = DescriptorSample {
            descriptor: obs.descriptor.clone(),
            captured_at: obs.captured_at,
        };
        let motion = self.motion_signal(state.previous(), &sample);
        if motion.breaks_continuity() {
            tracing::debug!(?motion, "face continuity lost; liveness evidence cleared");
            state.reset();
        }

        let reject = |reason: RejectReason, message: &str| LivenessOutcome {
            verdict: LivenessVerdict::Rejected(reason),
            sample: Some(sample.clone()),
            message: message.into(),
            motion,
        };

        let Some(ratio) = geometry::face_size_ratio(&obs.face, &obs.frame) else {
            return reject(RejectReason::BadGeometry, "Position your face in the frame");
        };
        if ratio < self.policy.min_face_ratio {
            tracing::debug!(ratio, min = self.policy.min_face_ratio, "face too small");
            return reject(RejectReason::TooFar, "Move closer to the camera");
        }
        if ratio > self.policy.max_face_ratio {
            tracing::debug!(ratio, max = self.policy.max_face_ratio, "face too large");
            return reject(RejectReason::TooClose, "Move back a little");
        }

        let ear = obs.eyes.as_ref().and_then(geometry::average_ear);
        let blink = match (state.last_ear, ear) {
            (Some(last), Some(ear)) => {
                last - ear > self.policy.blink_ear_drop && ear < self.policy.blink_ear_ceiling
            }
            _ => false,
        };
        if ear.is_some() {
            state.last_ear = ear;
        }
        state.push(FrameSample {
            blink,
            natural_motion: motion.is_natural(),
        });

        tracing::trace!(?ear, blink, ?motion, samples = state.len(), "liveness sample");

        let samples = state.len();
        let required = self.policy.min_samples;

        let verdict = if samples < required {
            LivenessVerdict::Verifying { samples, required }
        } else if !state.has_blink() {
            LivenessVerdict::Rejected(RejectReason::NoBlink)
        } else {
            let confidence =
                BLINK_CONFIDENCE + MOTION_CONFIDENCE * state.natural_motion_fraction();
            LivenessVerdict::Live {
                confidence: confidence.clamp(0.0, 1.0),
            }
        };

        let message = match verdict {
            LivenessVerdict::Verifying { samples, required } => {
                format!("Verifying liveness - blink naturally ({samples}/{required})")
            }
            LivenessVerdict::Rejected(_) => "Please blink naturally".to_string(),
            _ => "Face detected - ready to capture!".to_string(),
        };

        LivenessOutcome {
            verdict,
            sample: Some(sample),
            message,
            motion,
        }
    }

    fn motion_signal(
        &self,
        previous: Option<&DescriptorSample>,
        current: &DescriptorSample,
    ) -> MotionSignal {
        let Some(prev) = previous else {
            return MotionSignal::Unavailable;
        };

        let age = current.captured_at.signed_duration_since(prev.captured_at);
        let max_age = Duration::milliseconds(self.policy.max_sample_age_ms as i64);
        if age < Duration::zero() || age >= max_age {
            return MotionSignal::Stale;
        }

        match current.descriptor.euclidean_distance(&prev.descriptor) {
            None => MotionSignal::Erratic(f32::INFINITY),
            Some(d) if !d.is_finite() || d >= self.policy.max_motion => MotionSignal::Erratic(d),
            Some(d) if d <= self.policy.min_motion => MotionSignal::Static(d),
            Some(d) => MotionSignal::Natural(d),
        }
    }
}
