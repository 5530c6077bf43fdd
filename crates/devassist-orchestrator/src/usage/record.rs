use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use devassist_core::{ProviderKind, TaskType, TokenUsage};
use serde::{Deserialize, Serialize};

/// One provider call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// When the call finished
    pub timestamp: DateTime<Utc>,
    /// Request the call served
    pub correlation_id: String,
    /// Requesting user
    pub user_id: Option<String>,
    /// Requesting organization
    pub organization_id: Option<String>,
    /// Provider called
    pub provider: ProviderKind,
    /// Model called
    pub model: String,
    /// Task type of the request
    pub task_type: TaskType,
    /// Tokens billed
    pub usage: TokenUsage,
    /// Cost computed from the model's rates
    pub cost_usd: f64,
    /// Wall-clock latency of the whole request
    pub latency_ms: u64,
    /// Whether the request produced text
    pub success: bool,
    /// Failure summary
    #[serde(default)]
    pub error: Option<String>,
}

impl UsageRecord {
    /// UTC day the record belongs to.
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date_naive()
    }
}

/// Aggregated counters over a set of records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Requests counted
    pub requests: u64,
    /// Requests that produced text
    pub successful: u64,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Spend in USD
    pub cost_usd: f64,
    /// Sum of latencies, for averaging
    pub total_latency_ms: u64,
}

impl UsageTotals {
    /// Folds one record into the totals.
    pub fn add(&mut self, record: &UsageRecord) {
        self.requests += 1;
        if record.success {
            self.successful += 1;
        }
        self.input_tokens += record.usage.input;
        self.output_tokens += record.usage.output;
        self.cost_usd += record.cost_usd;
        self.total_latency_ms += record.latency_ms;
    }

    /// Requests that failed.
    pub const fn failed(&self) -> u64 {
        self.requests - self.successful
    }

    /// Input plus output tokens.
    pub const fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Mean latency, zero when empty.
    pub fn avg_latency_ms(&self) -> u64 {
        self.total_latency_ms.checked_div(self.requests).unwrap_or(0)
    }

    /// Share of successful requests, zero when empty.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.successful as f64 / self.requests as f64
        }
    }
}

/// Filter for [`UsageTracker::get_usage`](super::UsageTracker::get_usage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageQuery {
    /// Only this user's records
    pub user_id: Option<String>,
    /// Only this organization's records
    pub organization_id: Option<String>,
    /// Only this provider's records
    pub provider: Option<ProviderKind>,
    /// First day, inclusive
    pub start: NaiveDate,
    /// Last day, inclusive
    pub end: NaiveDate,
}

impl UsageQuery {
    /// Query over `[start, end]` with no filters.
    pub const fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            user_id: None,
            organization_id: None,
            provider: None,
            start,
            end,
        }
    }

    /// Restricts to one user.
    #[must_use]
    pub fn for_user<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Restricts to one organization.
    #[must_use]
    pub fn for_organization<S: Into<String>>(mut self, organization_id: S) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Restricts to one provider.
    #[must_use]
    pub const fn for_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Whether a record passes the filters (dates are handled by the caller).
    pub fn matches(&self, record: &UsageRecord) -> bool {
        self.user_id
            .as_ref()
            .is_none_or(|user| record.user_id.as_ref() == Some(user))
            && self
                .organization_id
                .as_ref()
                .is_none_or(|org| record.organization_id.as_ref() == Some(org))
            && self.provider.is_none_or(|provider| record.provider == provider)
    }
}

/// Totals for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// Day
    pub date: NaiveDate,
    /// Totals for the day
    pub totals: UsageTotals,
}

/// Answer to a usage query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    /// First day covered
    pub start: NaiveDate,
    /// Last day covered
    pub end: NaiveDate,
    /// Totals over the whole range
    pub totals: UsageTotals,
    /// One entry per day in range, including empty days
    pub daily: Vec<DailyUsage>,
    /// Totals per provider
    pub by_provider: BTreeMap<ProviderKind, UsageTotals>,
    /// Totals per model
    pub by_model: BTreeMap<String, UsageTotals>,
}

/// Today's usage as seen right now.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    /// Current UTC day
    pub date: NaiveDate,
    /// Totals so far today
    pub totals: UsageTotals,
    /// Totals per provider so far today
    pub by_provider: BTreeMap<ProviderKind, UsageTotals>,
}
