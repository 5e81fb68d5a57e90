//! Attendance session controller.
//!
//! One session owns one liveness state, one cooldown map and the
//! collaborators it polls. Ticks are strictly ordered: a tick still
//! awaiting the detector or a store blocks the next one, and ticks that
//! fire meanwhile are dropped rather than queued.
//!
//! ```text
//! Idle ──start──▶ Scanning ──accepted──▶ Confirming ──deadline──▶ Scanning
//!                    │
//!                    └────────────── stop ──────────────▶ Stopped
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cooldown::{CooldownMap, DEFAULT_COOLDOWN_SECS};
use crate::liveness::{LivenessEvaluator, LivenessPolicy, LivenessState, LivenessVerdict};
use crate::matcher::{EuclideanMatcher, MatchResult, Matcher, DEFAULT_MATCH_THRESHOLD};
use crate::types::{AttendanceRecord, EnrolledIdentity, FaceObservation, NewAttendance};

/// Capacity of the event channel handed out by [`AttendanceSession::spawn`].
const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("malformed detection: {0}")]
    Malformed(String),
}

/// Face detection + embedding capability. One call per tick.
pub trait FaceDetector: Send {
    fn detect(
        &mut self,
    ) -> impl Future<Output = Result<Option<FaceObservation>, DetectorError>> + Send;
}

/// Read-only view of enrolled identities, in a stable order.
pub trait EnrollmentStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    fn list_identities(
        &self,
    ) -> impl Future<Output = Result<Vec<EnrolledIdentity>, Self::Error>> + Send;
}

/// Daily-dedup query plus the attendance event sink.
pub trait AttendanceLedger: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// True if `identity_id` already has an event on local calendar day `day`.
    fn has_recorded_on(
        &self,
        identity_id: &str,
        day: NaiveDate,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Persist one attendance event.
    fn record(
        &self,
        attendance: NewAttendance,
    ) -> impl Future<Output = Result<AttendanceRecord, Self::Error>> + Send;
}

/// Time source. Injected so tests can advance a manual clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Local calendar day an instant falls on; the unit of daily dedup.
pub fn local_day(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub tick_interval: std::time::Duration,
    /// Euclidean distance threshold for a positive match (strict).
    pub match_threshold: f32,
    pub cooldown: chrono::Duration,
    /// How long the confirmation is shown; matching is suppressed meanwhile.
    pub confirmation: chrono::Duration,
    pub policy: LivenessPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_secs(1),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            cooldown: chrono::Duration::seconds(DEFAULT_COOLDOWN_SECS),
            confirmation: chrono::Duration::seconds(3),
            policy: LivenessPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionPhase {
    Idle,
    Scanning,
    Confirming {
        identity_id: String,
        until: DateTime<Utc>,
    },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// What one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    NoFace {
        message: String,
    },
    NotLive {
        verdict: LivenessVerdict,
        message: String,
    },
    Unrecognized {
        message: String,
    },
    /// Matched, but the identity is inside its cooldown window.
    CoolingDown {
        identity_id: String,
    },
    AlreadyMarked {
        identity_id: String,
        message: String,
    },
    Marked {
        record: AttendanceRecord,
        distance: f32,
    },
    /// The ledger refused the event. Downstream problem, not a biometric one.
    SinkFailed {
        identity_id: String,
        error: String,
    },
    /// The enrollment set or dedup state could not be read.
    StoreUnavailable {
        error: String,
    },
}

impl SessionEvent {
    pub fn level(&self) -> StatusLevel {
        match self {
            SessionEvent::NoFace { .. } | SessionEvent::CoolingDown { .. } => StatusLevel::Info,
            SessionEvent::NotLive { .. } | SessionEvent::AlreadyMarked { .. } => {
                StatusLevel::Warning
            }
            SessionEvent::Marked { .. } => StatusLevel::Success,
            SessionEvent::Unrecognized { .. }
            | SessionEvent::SinkFailed { .. }
            | SessionEvent::StoreUnavailable { .. } => StatusLevel::Error,
        }
    }

    /// Human-readable status line.
    pub fn message(&self) -> String {
        match self {
            SessionEvent::NoFace { message }
            | SessionEvent::NotLive { message, .. }
            | SessionEvent::Unrecognized { message }
            | SessionEvent::AlreadyMarked { message, .. } => message.clone(),
            SessionEvent::CoolingDown { .. } => "Already processing...".to_string(),
            SessionEvent::Marked { record, .. } => {
                format!("Attendance marked for {}", record.display_name)
            }
            SessionEvent::SinkFailed { error, .. } => {
                format!("Could not save attendance ({error}) - retrying")
            }
            SessionEvent::StoreUnavailable { error } => {
                format!("Attendance store unavailable: {error}")
            }
        }
    }
}

/// Held for the duration of one tick; released on drop, including when the
/// tick future is cancelled mid-await.
struct InFlightGuard(Arc<AtomicBool>);

impl InFlightGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct AttendanceSession<D, E, L, C> {
    config: SessionConfig,
    detector: D,
    enrollment: E,
    ledger: L,
    clock: C,
    evaluator: LivenessEvaluator,
    liveness: LivenessState,
    cooldown: CooldownMap,
    phase: SessionPhase,
    in_flight: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl<D, E, L, C> AttendanceSession<D, E, L, C>
where
    D: FaceDetector,
    E: EnrollmentStore,
    L: AttendanceLedger,
    C: Clock,
{
    pub fn new(config: SessionConfig, detector: D, enrollment: E, ledger: L, clock: C) -> Self {
        let evaluator = LivenessEvaluator::new(config.policy.clone());
        let liveness = evaluator.new_state();
        let cooldown = CooldownMap::new(config.cooldown);
        Self {
            config,
            detector,
            enrollment,
            ledger,
            clock,
            evaluator,
            liveness,
            cooldown,
            phase: SessionPhase::Idle,
            in_flight: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn liveness(&self) -> &LivenessState {
        &self.liveness
    }

    pub fn cooldown(&self) -> &CooldownMap {
        &self.cooldown
    }

    /// Idle → Scanning. No effect once stopped.
    pub fn start(&mut self) {
        if self.phase == SessionPhase::Idle {
            tracing::info!("session scanning");
            self.phase = SessionPhase::Scanning;
        }
    }

    /// Stop the session. In-flight work observes this after its next await
    /// and returns without mutating state.
    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
        self.phase = SessionPhase::Stopped;
        self.liveness.reset();
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Run one tick. Returns `None` when the tick was skipped (not scanning,
    /// confirmation still showing, another tick in flight, or stopped).
    pub async fn tick(&mut self) -> Option<SessionEvent> {
        let _guard = InFlightGuard::acquire(&self.in_flight)?;
        if !self.is_alive() {
            return None;
        }

        let now = self.clock.now();
        match &self.phase {
            SessionPhase::Scanning => {}
            SessionPhase::Confirming { identity_id, until } => {
                if now < *until {
                    return None;
                }
                tracing::debug!(identity = %identity_id, "confirmation cleared");
                self.phase = SessionPhase::Scanning;
            }
            SessionPhase::Idle | SessionPhase::Stopped => return None,
        }

        let observation = match self.detector.detect().await {
            Ok(obs) => obs,
            Err(e) => {
                tracing::warn!(error = %e, "detector failed; treating as no face");
                None
            }
        };
        if !self.is_alive() {
            return None;
        }

        let outcome = self.evaluator.evaluate(&mut self.liveness, observation.as_ref());
        self.liveness.set_previous(outcome.sample.clone());

        let Some(sample) = outcome.sample.as_ref() else {
            return Some(SessionEvent::NoFace {
                message: "Position your face in the frame".into(),
            });
        };
        if !outcome.is_live() {
            return Some(SessionEvent::NotLive {
                verdict: outcome.verdict,
                message: outcome.message.clone(),
            });
        }

        let identities = match self.enrollment.list_identities().await {
            Ok(identities) => identities,
            Err(e) => {
                tracing::error!(error = %e, "failed to list enrolled identities");
                return Some(SessionEvent::StoreUnavailable {
                    error: e.to_string(),
                });
            }
        };
        if !self.is_alive() {
            return None;
        }

        let matcher = EuclideanMatcher;
        let (identity, distance) =
            match matcher.find(&sample.descriptor, &identities, self.config.match_threshold) {
                MatchResult::Matched { identity, distance } => (identity.clone(), distance),
                MatchResult::NoMatch => {
                    tracing::debug!(enrolled = identities.len(), "live face not recognized");
                    return Some(SessionEvent::Unrecognized {
                        message: "Face not recognized. Please register first.".into(),
                    });
                }
            };

        if self.cooldown.is_cooling(&identity.id, now) {
            tracing::debug!(identity = %identity.id, "match suppressed by cooldown");
            return Some(SessionEvent::CoolingDown {
                identity_id: identity.id,
            });
        }

        let already = self
            .ledger
            .has_recorded_on(&identity.id, local_day(now))
            .await;
        if !self.is_alive() {
            return None;
        }
        match already {
            Ok(false) => {}
            Ok(true) => {
                return Some(SessionEvent::AlreadyMarked {
                    message: format!("{} - Already marked today", identity.display_name),
                    identity_id: identity.id,
                });
            }
            Err(e) => {
                tracing::error!(error = %e, identity = %identity.id, "daily dedup check failed");
                return Some(SessionEvent::StoreUnavailable {
                    error: e.to_string(),
                });
            }
        }

        let attendance = NewAttendance {
            identity_id: identity.id.clone(),
            display_name: identity.display_name.clone(),
            marked_at: now,
            liveness_score: outcome.confidence(),
        };

        match self.ledger.record(attendance).await {
            Ok(record) => {
                if !self.is_alive() {
                    return None;
                }
                self.cooldown.start(&identity.id, now);
                // Evidence is spent; the next subject has to prove liveness afresh.
                self.liveness.reset();
                self.phase = SessionPhase::Confirming {
                    identity_id: identity.id.clone(),
                    until: now + self.config.confirmation,
                };
                tracing::info!(
                    identity = %identity.id,
                    name = %identity.display_name,
                    distance,
                    liveness = record.liveness_score,
                    "attendance marked"
                );
                Some(SessionEvent::Marked { record, distance })
            }
            Err(e) => {
                // No cooldown: the next tick may retry.
                tracing::error!(error = %e, identity = %identity.id, "attendance sink failed");
                Some(SessionEvent::SinkFailed {
                    identity_id: identity.id,
                    error: e.to_string(),
                })
            }
        }
    }
}

impl<D, E, L, C> AttendanceSession<D, E, L, C>
where
    D: FaceDetector + 'static,
    E: EnrollmentStore + 'static,
    L: AttendanceLedger + 'static,
    C: Clock + 'static,
{
    /// Start scanning on a tokio task driven by a fixed-cadence interval.
    ///
    /// Events that the receiver cannot keep up with are dropped.
    pub fn spawn(mut self) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (stop_tx, stop_rx) = watch::channel(false);
        let alive = Arc::clone(&self.alive);
        let in_flight = Arc::clone(&self.in_flight);

        self.start();
        let task = tokio::spawn(self.run(stop_rx, events_tx));

        (
            SessionHandle {
                alive,
                in_flight,
                stop_tx,
                task,
            },
            events_rx,
        )
    }

    async fn run(mut self, mut stop: watch::Receiver<bool>, events: mpsc::Sender<SessionEvent>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => {}
            }

            let event = tokio::select! {
                _ = stop.changed() => break,
                event = self.tick() => event,
            };

            if let Some(event) = event {
                match events.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(dropped)) => {
                        tracing::debug!(?dropped, "event receiver lagging; dropping event");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!("event receiver closed");
                        break;
                    }
                }
            }
        }

        self.stop();
        tracing::info!("session stopped");
    }
}

/// Handle to a spawned session. Dropping it stops the session.
pub struct SessionHandle {
    alive: Arc<AtomicBool>,
    in_flight: Arc<AtomicBool>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Signal the session to stop. Idempotent.
    pub fn stop(&self) {
        self.alive.store(false, Ordering::Release);
        let _ = self.stop_tx.send(true);
    }

    pub fn is_running(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// True while a tick is awaiting the detector or a store.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Stop and wait for the session task to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "session task panicked");
        }
    }
}
