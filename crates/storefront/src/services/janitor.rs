//! Order lifecycle janitor.
//!
//! Pending orders that never received a payment confirmation are failed after
//! `pending_ttl`; failed orders are deleted with their lines after
//! `failed_ttl`. Both use a strict "created before cutoff" comparison. Each
//! background tick also prunes idle keys from the checkout rate limiter.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument};

use super::CommerceError;
use super::cache::{CacheKey, ReadCache};
use super::rate_limit::RateLimiter;
use crate::db::OrderRepository;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub failed_count: usize,
    pub deleted_count: usize,
}

/// Periodic cleanup of abandoned orders.
#[derive(Clone)]
pub struct LifecycleJanitor {
    orders: Arc<dyn OrderRepository>,
    cache: ReadCache,
    pending_ttl: TimeDelta,
    failed_ttl: TimeDelta,
    rate_limiter: Option<Arc<dyn RateLimiter>>,
}

impl LifecycleJanitor {
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        cache: ReadCache,
        pending_ttl: TimeDelta,
        failed_ttl: TimeDelta,
    ) -> Self {
        Self {
            orders,
            cache,
            pending_ttl,
            failed_ttl,
            rate_limiter: None,
        }
    }

    /// Prune `limiter` on every background tick.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Sweep relative to the current time.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if either step fails.
    pub async fn run_sweep(&self) -> Result<SweepReport, CommerceError> {
        self.sweep_at(Utc::now()).await
    }

    /// Sweep relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns `Repository` if either step fails. Orders failed before a
    /// deletion error stay failed.
    #[instrument(skip(self))]
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> Result<SweepReport, CommerceError> {
        let failed = self
            .orders
            .fail_stale_pending(now - self.pending_ttl, now)
            .await?;
        let deleted = self.orders.delete_stale_failed(now - self.failed_ttl).await?;

        let users: BTreeSet<_> = failed
            .iter()
            .chain(deleted.iter())
            .filter_map(|order| order.user_id)
            .collect();
        self.cache
            .invalidate_many(users.into_iter().map(CacheKey::Orders))
            .await;

        let report = SweepReport {
            failed_count: failed.len(),
            deleted_count: deleted.len(),
        };
        if report != SweepReport::default() {
            info!(
                failed = report.failed_count,
                deleted = report.deleted_count,
                "Order lifecycle sweep completed"
            );
        }
        Ok(report)
    }

    /// One background tick: sweep orders, then prune the rate limiter. A
    /// failed sweep is logged and does not skip the prune.
    pub async fn tick(&self) {
        if let Err(e) = self.run_sweep().await {
            error!(error = %e, "Order lifecycle sweep failed");
        }
        if let Some(limiter) = &self.rate_limiter {
            limiter.prune();
        }
    }

    /// Run [`tick`](Self::tick) every `interval` on a background task. The
    /// first tick runs after one full interval.
    #[must_use]
    pub fn spawn(self, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.tick().await;
            }
        })
    }
}
