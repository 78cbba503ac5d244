//! Metrics bucket: one accumulation window of evaluation counts

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-toggle counters inside a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleCounts {
    #[serde(default)]
    pub yes: u64,
    #[serde(default)]
    pub no: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variants: BTreeMap<String, u64>,
}

impl ToggleCounts {
    /// Create counts with the given yes/no totals
    pub fn new(yes: u64, no: u64) -> Self {
        Self {
            yes,
            no,
            variants: BTreeMap::new(),
        }
    }

    /// Add another set of counts into this one
    pub fn absorb(&mut self, other: &Self) {
        self.yes = self.yes.saturating_add(other.yes);
        self.no = self.no.saturating_add(other.no);
        for (name, count) in &other.variants {
            let slot = self.variants.entry(name.clone()).or_insert(0);
            *slot = slot.saturating_add(*count);
        }
    }

    /// Number of evaluations counted
    pub fn total(&self) -> u64 {
        self.yes.saturating_add(self.no)
    }
}

/// Counts keyed by toggle name
pub type ToggleCountsMap = BTreeMap<String, ToggleCounts>;

/// Accumulation window for one tenant
///
/// `stop` equals `start` while the bucket is active and is set when the bucket
/// is detached for sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsBucket {
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    #[serde(default)]
    pub toggles: ToggleCountsMap,
}

impl MetricsBucket {
    /// Open an empty window starting at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            stop: start,
            toggles: BTreeMap::new(),
        }
    }

    /// Count one evaluation
    pub fn record(&mut self, toggle: &str, enabled: bool, variant: Option<&str>) {
        let counts = match self.toggles.get_mut(toggle) {
            Some(counts) => counts,
            None => self.toggles.entry(toggle.to_string()).or_default(),
        };

        if enabled {
            counts.yes = counts.yes.saturating_add(1);
        } else {
            counts.no = counts.no.saturating_add(1);
        }

        if let Some(variant) = variant {
            let slot = match counts.variants.get_mut(variant) {
                Some(slot) => slot,
                None => counts.variants.entry(variant.to_string()).or_insert(0),
            };
            *slot = slot.saturating_add(1);
        }
    }

    /// Merge pre-aggregated counts into the window
    pub fn merge(&mut self, toggles: &ToggleCountsMap) {
        for (name, counts) in toggles {
            self.toggles.entry(name.clone()).or_default().absorb(counts);
        }
    }

    /// Whether nothing has been counted
    pub fn is_empty(&self) -> bool {
        self.toggles.values().all(|c| c.total() == 0 && c.variants.is_empty())
    }

    /// Sum of yes and no over all toggles
    pub fn total(&self) -> u64 {
        self.toggles.values().map(ToggleCounts::total).sum()
    }

    /// Close the window
    #[must_use]
    pub fn close(mut self, stop: DateTime<Utc>) -> Self {
        self.stop = stop;
        self
    }
}
