//! Per-identity suppression window after an accepted attendance event.
//!
//! Keeps the same person from re-firing on consecutive ticks while they are
//! still in front of the camera. Independent of the once-per-day ledger check.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

/// Default window (seconds) after an accepted event during which the identity cannot re-fire.
pub const DEFAULT_COOLDOWN_SECS: i64 = 5;

/// Per-identity cooldown: identity key → expiry instant.
///
/// Time is always passed in by the caller, so tests drive it with a manual
/// clock. Expired entries are pruned on every query; there are no timers.
pub struct CooldownMap {
    window: Duration,
    entries: HashMap<String, DateTime<Utc>>,
}

impl CooldownMap {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Return true if `identity` is still inside its window at `now`.
    pub fn is_cooling(&mut self, identity: &str, now: DateTime<Utc>) -> bool {
        self.prune(now);
        self.entries.contains_key(identity)
    }

    /// Start (or restart) the window for `identity` at `now`.
    pub fn start(&mut self, identity: &str, now: DateTime<Utc>) {
        let expires_at = now + self.window;
        tracing::debug!(identity, %expires_at, "cooldown started");
        self.entries.insert(identity.to_string(), expires_at);
    }

    /// Expiry instant for `identity`, if one is recorded.
    pub fn expires_at(&self, identity: &str) -> Option<DateTime<Utc>> {
        self.entries.get(identity).copied()
    }

    /// Drop every entry whose expiry is at or before `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        self.entries.retain(|_, expires_at| *expires_at > now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CooldownMap {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_cooling_inside_window() {
        let mut cd = CooldownMap::default();
        cd.start("alice", t0());
        assert!(cd.is_cooling("alice", t0()));
        assert!(cd.is_cooling("alice", t0() + Duration::milliseconds(4999)));
    }

    #[test]
    fn test_expires_at_window_end() {
        let mut cd = CooldownMap::default();
        cd.start("alice", t0());
        assert!(!cd.is_cooling("alice", t0() + Duration::seconds(5)));
        assert!(cd.is_empty());
    }

    #[test]
    fn test_independent_per_identity() {
        let mut cd = CooldownMap::default();
        cd.start("alice", t0());
        assert!(!cd.is_cooling("bob", t0()));
        assert!(cd.is_cooling("alice", t0()));
    }

    #[test]
    fn test_restart_extends_window() {
        let mut cd = CooldownMap::new(Duration::seconds(5));
        cd.start("alice", t0());
        cd.start("alice", t0() + Duration::seconds(4));
        assert_eq!(cd.expires_at("alice"), Some(t0() + Duration::seconds(9)));
        assert!(cd.is_cooling("alice", t0() + Duration::seconds(6)));
    }

    #[test]
    fn test_prune_only_drops_expired() {
        let mut cd = CooldownMap::default();
        cd.start("alice", t0());
        cd.start("bob", t0() + Duration::seconds(3));
        cd.prune(t0() + Duration::seconds(6));
        assert_eq!(cd.len(), 1);
        assert!(cd.expires_at("bob").is_some());
    }
}
