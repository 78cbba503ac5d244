//! Per-tenant usage metrics
//!
//! A [`MetricsBucket`] is one time window of yes/no/variant counts. The
//! [`MetricsAggregator`] owns the active bucket of a tenant, counts into it on
//! every evaluation and periodically detaches it for sending.

mod aggregator;
mod bucket;

pub use aggregator::{FlushOutcome, MetricsAggregator, MetricsTarget};
pub use bucket::{MetricsBucket, ToggleCounts, ToggleCountsMap};
