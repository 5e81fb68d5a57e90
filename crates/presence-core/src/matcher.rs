//! Nearest-descriptor identity matching with open-set rejection.
//!
//! Linear scan, O(n·d) per query. Fine for classroom-sized galleries;
//! large enrollments would need an indexed nearest-neighbour search.

use crate::types::{Descriptor, EnrolledIdentity};

/// Default Euclidean distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

/// Result of matching a query descriptor against the enrolled set.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult<'a> {
    NoMatch,
    Matched {
        identity: &'a EnrolledIdentity,
        distance: f32,
    },
}

impl<'a> MatchResult<'a> {
    pub fn identity(&self) -> Option<&'a EnrolledIdentity> {
        match self {
            MatchResult::Matched { identity, .. } => Some(*identity),
            MatchResult::NoMatch => None,
        }
    }
}

/// Strategy for comparing a query descriptor against the enrolled set.
pub trait Matcher {
    fn find<'a>(
        &self,
        query: &Descriptor,
        enrolled: &'a [EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult<'a>;
}

/// Euclidean nearest-neighbour matcher.
///
/// The best-so-far bound starts at the threshold and only a strictly
/// smaller distance replaces it, so a distance equal to the threshold never
/// matches and the first of several equidistant identities wins.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn find<'a>(
        &self,
        query: &Descriptor,
        enrolled: &'a [EnrolledIdentity],
        threshold: f32,
    ) -> MatchResult<'a> {
        let mut best_distance = threshold;
        let mut best: Option<&'a EnrolledIdentity> = None;

        for identity in enrolled {
            let Some(distance) = query.euclidean_distance(&identity.descriptor) else {
                tracing::debug!(
                    identity = %identity.id,
                    expected = query.len(),
                    actual = identity.descriptor.len(),
                    "skipping enrolled descriptor with mismatched dimension"
                );
                continue;
            };
            if distance < best_distance {
                best_distance = distance;
                best = Some(identity);
            }
        }

        match best {
            Some(identity) => MatchResult::Matched {
                identity,
                distance: best_distance,
            },
            None => MatchResult::NoMatch,
        }
    }
}
