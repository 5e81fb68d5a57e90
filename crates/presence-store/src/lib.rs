//! presence-store: SQLite persistence for enrolled identities and
//! attendance events.
//!
//! Implements the enrollment store and attendance ledger consumed by
//! `presence-core` sessions.

pub mod store;

pub use store::{matches_search, AttendanceStore, DaySummary, StoreError};
