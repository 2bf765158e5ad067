//! Completeness tracking.
//!
//! The tracker owns the name → detection map for the most recent inference
//! pass. `update` replaces the whole map, so completeness reflects what is
//! visible right now rather than anything seen before. Readers take a copy of
//! the key set under a single lock acquisition.

use anyhow::{anyhow, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Mutex;

use crate::detect::Detection;

/// Names currently tracked, copied out of the tracker.
pub type ObjectSnapshot = BTreeSet<String>;

// ----------------------------------------------------------------------------
// RequiredObjectSet
// ----------------------------------------------------------------------------

/// The fixed checklist that defines "complete". Order is configuration order
/// and is used for record columns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequiredObjectSet {
    names: Vec<String>,
    lookup: BTreeSet<String>,
}

impl RequiredObjectSet {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut lookup = BTreeSet::new();
        for name in names {
            let name: String = name.into();
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(anyhow!("required object names must not be empty"));
            }
            if lookup.insert(name.clone()) {
                ordered.push(name);
            }
        }
        if ordered.is_empty() {
            return Err(anyhow!("required object set must not be empty"));
        }
        Ok(Self {
            names: ordered,
            lookup,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup.contains(name)
    }

    /// Required names absent from `snapshot`, in configuration order.
    pub fn missing_from(&self, snapshot: &ObjectSnapshot) -> Vec<String> {
        self.names
            .iter()
            .filter(|name| !snapshot.contains(*name))
            .cloned()
            .collect()
    }

    /// Names in `snapshot` that are not required.
    pub fn unexpected_in(&self, snapshot: &ObjectSnapshot) -> Vec<String> {
        snapshot
            .iter()
            .filter(|name| !self.lookup.contains(*name))
            .cloned()
            .collect()
    }

    /// Subset check used for the live status.
    pub fn is_satisfied_by(&self, snapshot: &ObjectSnapshot) -> bool {
        self.lookup.is_subset(snapshot)
    }

    /// Exact equality used to gate capture.
    pub fn matches_exactly(&self, snapshot: &ObjectSnapshot) -> bool {
        &self.lookup == snapshot
    }
}

// ----------------------------------------------------------------------------
// Completeness
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete { missing: Vec<String> },
}

impl Completeness {
    pub fn evaluate(required: &RequiredObjectSet, snapshot: &ObjectSnapshot) -> Self {
        if required.is_satisfied_by(snapshot) {
            Completeness::Complete
        } else {
            Completeness::Incomplete {
                missing: required.missing_from(snapshot),
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }
}

impl fmt::Display for Completeness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completeness::Complete => write!(f, "COMPLETE"),
            Completeness::Incomplete { missing } => {
                write!(f, "NG (missing: {})", missing.join(", "))
            }
        }
    }
}

// ----------------------------------------------------------------------------
// DetectionStats
// ----------------------------------------------------------------------------

/// Running statistics over inference passes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DetectionStats {
    /// Number of `update` calls.
    pub passes: u64,
    /// Instances per name in the most recent pass (before last-wins collapse).
    pub last_pass_counts: BTreeMap<String, u32>,
    /// Mean confidence per name over every pass it appeared in.
    pub mean_confidence: BTreeMap<String, f32>,
    #[serde(skip)]
    observations: BTreeMap<String, u64>,
}

impl DetectionStats {
    fn record(&mut self, detections: &[Detection]) {
        self.passes += 1;
        self.last_pass_counts.clear();
        for det in detections {
            *self.last_pass_counts.entry(det.name.clone()).or_insert(0) += 1;
            let seen = self.observations.entry(det.name.clone()).or_insert(0);
            *seen += 1;
            let mean = self.mean_confidence.entry(det.name.clone()).or_insert(0.0);
            *mean += (det.confidence - *mean) / *seen as f32;
        }
    }
}

// ----------------------------------------------------------------------------
// CompletenessTracker
// ----------------------------------------------------------------------------

pub struct CompletenessTracker {
    required: RequiredObjectSet,
    state: Mutex<TrackerState>,
}

#[derive(Default)]
struct TrackerState {
    detected: HashMap<String, Detection>,
    stats: DetectionStats,
}

impl CompletenessTracker {
    pub fn new(required: RequiredObjectSet) -> Self {
        Self {
            required,
            state: Mutex::new(TrackerState::default()),
        }
    }

    pub fn required(&self) -> &RequiredObjectSet {
        &self.required
    }

    /// Replace the tracked map with this pass's detections.
    ///
    /// A later detection of the same name overwrites an earlier one. Returns
    /// the completeness of the new contents.
    pub fn update(&self, filtered: Vec<Detection>) -> Result<Completeness> {
        let mut state = self.lock()?;
        state.stats.record(&filtered);
        state.detected = filtered
            .into_iter()
            .map(|det| (det.name.clone(), det))
            .collect();
        let names: ObjectSnapshot = state.detected.keys().cloned().collect();
        Ok(Completeness::evaluate(&self.required, &names))
    }

    /// Copy of the tracked name set.
    pub fn snapshot(&self) -> Result<ObjectSnapshot> {
        let state = self.lock()?;
        Ok(state.detected.keys().cloned().collect())
    }

    /// Copy of the tracked detections, ordered by name.
    pub fn detections(&self) -> Result<Vec<Detection>> {
        let state = self.lock()?;
        let mut detections: Vec<Detection> = state.detected.values().cloned().collect();
        detections.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(detections)
    }

    pub fn status(&self, snapshot: &ObjectSnapshot) -> Completeness {
        Completeness::evaluate(&self.required, snapshot)
    }

    pub fn current_status(&self) -> Result<Completeness> {
        let snapshot = self.snapshot()?;
        Ok(self.status(&snapshot))
    }

    pub fn stats(&self) -> Result<DetectionStats> {
        Ok(self.lock()?.stats.clone())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TrackerState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("detection map lock poisoned"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
