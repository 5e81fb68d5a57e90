//! presence-core: Liveness-gated face attendance engine.
//!
//! Consumes detector output (face box, eye landmarks, descriptor), decides
//! whether the face is a live subject, matches it against enrolled
//! identities and records one attendance event per identity per day.

pub mod cooldown;
pub mod geometry;
pub mod liveness;
pub mod matcher;
pub mod session;
pub mod types;

pub use cooldown::CooldownMap;
pub use liveness::{
    LivenessEvaluator, LivenessOutcome, LivenessPolicy, LivenessState, LivenessVerdict,
    MotionSignal, PolicyError, RejectReason,
};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use session::{
    local_day, AttendanceLedger, AttendanceSession, Clock, DetectorError, EnrollmentStore,
    FaceDetector, SessionConfig, SessionEvent, SessionHandle, SessionPhase, StatusLevel,
    SystemClock,
};
pub use types::{
    AttendanceRecord, Descriptor, DescriptorSample, EnrolledIdentity, EyeLandmarks, FaceBox,
    FaceObservation, FrameSize, NewAttendance, Point,
};
