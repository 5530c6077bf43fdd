//! Usage accounting: per-request records, spend counters and rollups.

/// Record and aggregate types.
pub mod record;
/// Text rendering of usage summaries.
pub mod report;
/// Store-backed tracker.
pub mod tracker;

pub use record::{DailyUsage, RealtimeSnapshot, UsageQuery, UsageRecord, UsageSummary, UsageTotals};
pub use report::UsageReport;
pub use tracker::UsageTracker;
