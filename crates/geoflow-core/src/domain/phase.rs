//! Phase and the explicit phase priority table.
//!
//! Phases travel on the wire as plain strings. Their order is never derived
//! from declaration order or string comparison: it comes from a `PhaseOrder`
//! table that the deployment configures. Reordering the table reorders the
//! pipeline, nothing else has to change.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Coarse-grained pipeline stage (e.g. `DOWNLOAD`, `CONVERT`, `INDEX`, `DEPLOY`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Phase(String);

impl Phase {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for Phase {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Ordered list of phases; earlier entries run first.
///
/// Phases missing from the table rank after every known phase and are ordered
/// among themselves by name, so an unexpected phase on the wire is still
/// executed in a reproducible position instead of being dropped.
#[derive(Debug, Clone)]
pub struct PhaseOrder {
    phases: Vec<Phase>,
    rank: HashMap<Phase, usize>,
}

impl PhaseOrder {
    /// Build a table. Later duplicates are ignored; `GeoflowConfig::validate`
    /// rejects them before they get here.
    pub fn new<I, P>(phases: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Phase>,
    {
        let mut ordered = Vec::new();
        let mut rank = HashMap::new();
        for phase in phases {
            let phase = phase.into();
            if rank.contains_key(&phase) {
                continue;
            }
            rank.insert(phase.clone(), ordered.len());
            ordered.push(phase);
        }
        Self {
            phases: ordered,
            rank,
        }
    }

    /// Default geocoder ordering.
    pub fn default_geocoder() -> Self {
        Self::new(["DOWNLOAD", "CONVERT", "INDEX", "DEPLOY", "EXPORT"])
    }

    pub fn rank(&self, phase: &Phase) -> Option<usize> {
        self.rank.get(phase).copied()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// Total order over phases.
    pub fn compare(&self, a: &Phase, b: &Phase) -> Ordering {
        match (self.rank(a), self.rank(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.cmp(b),
        }
    }
}

impl Default for PhaseOrder {
    fn default() -> Self {
        Self::default_geocoder()
    }
}

impl From<String> for Phase {
    fn from(s: String) -> Self {
        Self(s)
    }
}
