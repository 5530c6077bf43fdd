//! Store-backed usage tracker with spend limits.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use devassist_core::config::LimitsConfig;
use devassist_core::{Error as CoreError, KeyValueStore, StoreError, StoreResult};
use tracing::{debug, error, warn};

use super::record::{DailyUsage, RealtimeSnapshot, UsageQuery, UsageRecord, UsageSummary, UsageTotals};
use crate::error::Result;

/// Key of the append-only record log for a day.
pub fn records_key(date: NaiveDate) -> String {
    format!("usage:records:{}", date.format("%Y-%m-%d"))
}

/// Key of a user's cost counter for a day.
pub fn user_cost_key(user_id: &str, date: NaiveDate) -> String {
    format!("usage:user:{user_id}:{}:cost", date.format("%Y-%m-%d"))
}

/// Key of an organization's cost counter for the month containing `date`.
pub fn org_cost_key(organization_id: &str, date: NaiveDate) -> String {
    format!("usage:org:{organization_id}:{}:cost", date.format("%Y-%m"))
}

/// Records usage and answers spend-limit and rollup queries.
#[derive(Clone)]
pub struct UsageTracker {
    store: Arc<dyn KeyValueStore>,
    limits: LimitsConfig,
}

impl UsageTracker {
    /// Creates a tracker over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    /// Limit settings in force.
    pub const fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    /// Appends a record and bumps the spend counters.
    ///
    /// Store failures are logged and swallowed.
    pub async fn record(&self, record: &UsageRecord) {
        if let Err(store_error) = self.try_record(record).await {
            error!(
                "Failed to record usage for {}: {store_error}",
                record.correlation_id
            );
        }
    }

    async fn try_record(&self, record: &UsageRecord) -> StoreResult<()> {
        let ttl = Some(self.limits.record_ttl());
        let date = record.date();
        let payload = serde_json::to_string(record).map_err(|serde_error| StoreError::Corrupt {
            key: records_key(date),
            reason: serde_error.to_string(),
        })?;
        self.store.push(&records_key(date), payload, ttl).await?;

        if record.cost_usd > 0.0 {
            if let Some(user_id) = &record.user_id {
                self.store
                    .incr_by_float(&user_cost_key(user_id, date), record.cost_usd, ttl)
                    .await?;
            }
            if let Some(organization_id) = &record.organization_id {
                self.store
                    .incr_by_float(&org_cost_key(organization_id, date), record.cost_usd, ttl)
                    .await?;
            }
        }
        debug!(
            "Recorded usage for {}: {} via {}/{} ${:.6}",
            record.correlation_id,
            if record.success { "success" } else { "failure" },
            record.provider,
            record.model,
            record.cost_usd
        );
        Ok(())
    }

    async fn read_cost(&self, key: &str) -> StoreResult<f64> {
        match self.store.get(key).await? {
            None => Ok(0.0),
            Some(raw) => raw.parse::<f64>().map_err(|parse_error| StoreError::Corrupt {
                key: key.to_owned(),
                reason: parse_error.to_string(),
            }),
        }
    }

    /// Whether spending `projected_cost` more keeps both requesters within limits.
    ///
    /// When the store cannot answer, the request is allowed unless the
    /// deployment sets `fail_closed`.
    pub async fn check_limit(
        &self,
        user_id: Option<&str>,
        organization_id: Option<&str>,
        projected_cost: f64,
    ) -> bool {
        match self.try_check_limit(user_id, organization_id, projected_cost).await {
            Ok(allowed) => allowed,
            Err(store_error) => {
                let allowed = !self.limits.fail_closed;
                warn!(
                    "Spend limit check failed ({store_error}); {}",
                    if allowed { "allowing request" } else { "denying request" }
                );
                allowed
            }
        }
    }

    async fn try_check_limit(
        &self,
        user_id: Option<&str>,
        organization_id: Option<&str>,
        projected_cost: f64,
    ) -> StoreResult<bool> {
        let today = Utc::now().date_naive();
        let projected = projected_cost.max(0.0);

        if let Some(user_id) = user_id {
            let spent = self.read_cost(&user_cost_key(user_id, today)).await?;
            if spent + projected > self.limits.user_daily_usd {
                warn!(
                    "User {user_id} would exceed daily limit: ${spent:.4} spent + ${projected:.4} > ${:.2}",
                    self.limits.user_daily_usd
                );
                return Ok(false);
            }
        }
        if let Some(organization_id) = organization_id {
            let spent = self.read_cost(&org_cost_key(organization_id, today)).await?;
            if spent + projected > self.limits.org_monthly_usd {
                warn!(
                    "Organization {organization_id} would exceed monthly limit: ${spent:.4} spent + ${projected:.4} > ${:.2}",
                    self.limits.org_monthly_usd
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Raw records of one day, oldest first.
    ///
    /// # Errors
    /// Returns an error if the store fails or a record cannot be parsed.
    pub async fn records(&self, date: NaiveDate) -> Result<Vec<UsageRecord>> {
        let key = records_key(date);
        let raw = self.store.list(&key).await.map_err(CoreError::from)?;
        let mut records = Vec::with_capacity(raw.len());
        for line in &raw {
            let record = serde_json::from_str::<UsageRecord>(line).map_err(|serde_error| {
                CoreError::from(StoreError::Corrupt {
                    key: key.clone(),
                    reason: serde_error.to_string(),
                })
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// Aggregates records matching `query`, day by day.
    ///
    /// # Errors
    /// Returns an error if the store fails or a record cannot be parsed.
    pub async fn get_usage(&self, query: &UsageQuery) -> Result<UsageSummary> {
        let mut totals = UsageTotals::default();
        let mut daily = Vec::new();
        let mut by_provider: BTreeMap<_, UsageTotals> = BTreeMap::new();
        let mut by_model: BTreeMap<String, UsageTotals> = BTreeMap::new();

        for date in query.start.iter_days().take_while(|date| *date <= query.end) {
            let mut day = UsageTotals::default();
            for record in self.records(date).await? {
                if !query.matches(&record) {
                    continue;
                }
                day.add(&record);
                totals.add(&record);
                by_provider.entry(record.provider).or_default().add(&record);
                by_model.entry(record.model.clone()).or_default().add(&record);
            }
            daily.push(DailyUsage { date, totals: day });
        }

        Ok(UsageSummary {
            start: query.start,
            end: query.end,
            totals,
            daily,
            by_provider,
            by_model,
        })
    }

    /// Today's totals, overall and per provider.
    ///
    /// # Errors
    /// Returns an error if the store fails or a record cannot be parsed.
    pub async fn realtime_snapshot(&self) -> Result<RealtimeSnapshot> {
        let date = Utc::now().date_naive();
        let mut totals = UsageTotals::default();
        let mut by_provider: BTreeMap<_, UsageTotals> = BTreeMap::new();
        for record in self.records(date).await? {
            totals.add(&record);
            by_provider.entry(record.provider).or_default().add(&record);
        }
        Ok(RealtimeSnapshot {
            date,
            totals,
            by_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone as _};
    use devassist_core::{MemoryStore, ProviderKind, TaskType, TokenUsage};

    fn tracker_with(limits: LimitsConfig) -> (UsageTracker, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let tracker = UsageTracker::new(Arc::clone(&store) as Arc<dyn KeyValueStore>, limits);
        (tracker, store)
    }

    fn record(cost: f64, provider: ProviderKind) -> UsageRecord {
        UsageRecord {
            timestamp: Utc::now(),
            correlation_id: "c-1".to_owned(),
            user_id: Some("user-1".to_owned()),
            organization_id: Some("org-1".to_owned()),
            provider,
            model: "claude-3-haiku-20240307".to_owned(),
            task_type: TaskType::RiskAssessment,
            usage: TokenUsage::new(1000, 200),
            cost_usd: cost,
            latency_ms: 900,
            success: true,
            error: None,
        }
    }

    #[test]
    fn test_key_layout() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(records_key(date), "usage:records:2024-03-09");
        assert_eq!(user_cost_key("u", date), "usage:user:u:2024-03-09:cost");
        assert_eq!(org_cost_key("o", date), "usage:org:o:2024-03:cost");
    }

    #[tokio::test]
    async fn test_record_updates_counters() {
        let (tracker, store) = tracker_with(LimitsConfig::default());
        tracker.record(&record(1.25, ProviderKind::Anthropic)).await;
        tracker.record(&record(0.75, ProviderKind::Anthropic)).await;

        let today = Utc::now().date_naive();
        let user_cost: f64 = store
            .get(&user_cost_key("user-1", today))
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!((user_cost - 2.0).abs() < 1e-9);
        assert_eq!(tracker.records(today).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_check_limit_user_daily() {
        let limits = LimitsConfig {
            user_daily_usd: 2.0,
            ..LimitsConfig::default()
        };
        let (tracker, _store) = tracker_with(limits);
        assert!(tracker.check_limit(Some("user-1"), None, 1.5).await);
        tracker.record(&record(1.5, ProviderKind::OpenAi)).await;
        assert!(tracker.check_limit(Some("user-1"), None, 0.5).await);
        assert!(!tracker.check_limit(Some("user-1"), None, 0.51).await);
        assert!(tracker.check_limit(Some("user-2"), None, 1.9).await);
    }

    #[tokio::test]
    async fn test_check_limit_org_monthly() {
        let limits = LimitsConfig {
            org_monthly_usd: 1.0,
            ..LimitsConfig::default()
        };
        let (tracker, _store) = tracker_with(limits);
        tracker.record(&record(0.9, ProviderKind::Google)).await;
        assert!(!tracker.check_limit(None, Some("org-1"), 0.2).await);
        assert!(tracker.check_limit(None, None, 1_000.0).await);
    }

    #[tokio::test]
    async fn test_corrupt_counter_follows_failure_policy() {
        let today = Utc::now().date_naive();
        let (open, open_store) = tracker_with(LimitsConfig::default());
        open_store
            .push(&user_cost_key("user-1", today), "x".to_owned(), None)
            .await
            .unwrap();
        assert!(open.check_limit(Some("user-1"), None, 0.1).await);

        let (closed, closed_store) = tracker_with(LimitsConfig {
            fail_closed: true,
            ..LimitsConfig::default()
        });
        closed_store
            .push(&user_cost_key("user-1", today), "x".to_owned(), None)
            .await
            .unwrap();
        assert!(!closed.check_limit(Some("user-1"), None, 0.1).await);
    }

    #[tokio::test]
    async fn test_get_usage_rolls_up_by_day() {
        let (tracker, _store) = tracker_with(LimitsConfig::default());
        let today = Utc::now().date_naive();
        let yesterday = today - ChronoDuration::days(1);

        let mut old = record(1.0, ProviderKind::OpenAi);
        old.timestamp = Utc.from_utc_datetime(&yesterday.and_hms_opt(12, 0, 0).unwrap());
        old.model = "gpt-4o".to_owned();
        tracker.record(&old).await;
        tracker.record(&record(0.5, ProviderKind::Anthropic)).await;
        let mut failed = record(0.0, ProviderKind::Anthropic);
        failed.success = false;
        tracker.record(&failed).await;

        let summary = tracker
            .get_usage(&UsageQuery::between(yesterday, today))
            .await
            .unwrap();
        assert_eq!(summary.daily.len(), 2);
        assert_eq!(summary.daily[0].totals.requests, 1);
        assert_eq!(summary.daily[1].totals.requests, 2);
        assert_eq!(summary.totals.failed(), 1);
        assert!((summary.totals.cost_usd - 1.5).abs() < 1e-9);
        assert_eq!(summary.by_provider[&ProviderKind::Anthropic].requests, 2);
        assert_eq!(summary.by_model["gpt-4o"].requests, 1);

        let anthropic_only = tracker
            .get_usage(&UsageQuery::between(yesterday, today).for_provider(ProviderKind::Anthropic))
            .await
            .unwrap();
        assert_eq!(anthropic_only.totals.requests, 2);
    }

    #[tokio::test]
    async fn test_realtime_snapshot() {
        let (tracker, _store) = tracker_with(LimitsConfig::default());
        tracker.record(&record(0.25, ProviderKind::Google)).await;
        let snapshot = tracker.realtime_snapshot().await.unwrap();
        assert_eq!(snapshot.totals.requests, 1);
        assert_eq!(snapshot.by_provider[&ProviderKind::Google].requests, 1);
    }

    #[tokio::test]
    async fn test_empty_range() {
        let (tracker, _store) = tracker_with(LimitsConfig::default());
        let today = Utc::now().date_naive();
        let summary = tracker
            .get_usage(&UsageQuery::between(today, today - ChronoDuration::days(3)))
            .await
            .unwrap();
        assert!(summary.daily.is_empty());
        assert_eq!(summary.totals.requests, 0);
    }
}
