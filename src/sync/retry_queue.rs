//! Persisted retry queue
//!
//! Items that still fail after the transport's inline retries are stored with
//! their payload and reprocessed by a periodic worker using the same
//! exponential backoff. An item that runs out of attempts stays unresolved and
//! is never picked up again; it shows up in [`RetryQueue::get_failed_items`]
//! for manual reconciliation.

use super::types::{SyncError, SyncPayload, SyncType};
use crate::api::{ErrorCategory, RetryConfig};
use crate::correlation::{self, CorrelationId};
use crate::store::{NewRetryItem, RetryItemFilter, SyncRetryItem, SyncStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_BATCH_SIZE: u32 = 100;
pub const DEFAULT_WORKER_INTERVAL: Duration = Duration::from_secs(300);

/// Replays one queued item
#[async_trait]
pub trait RetryProcessor: Send + Sync {
    async fn reprocess(&self, sync_type: SyncType, payload: &SyncPayload) -> Result<(), SyncError>;
}

#[derive(Debug, Clone)]
pub struct RetryQueueConfig {
    pub max_retries: u32,
    pub batch_size: u32,
    pub worker_interval: Duration,
    pub backoff: RetryConfig,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            batch_size: DEFAULT_BATCH_SIZE,
            worker_interval: DEFAULT_WORKER_INTERVAL,
            backoff: RetryConfig::default(),
        }
    }
}

/// Counts for one worker pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryPassSummary {
    pub selected: usize,
    pub resolved: usize,
    pub failed: usize,
    /// Failed items that used their last attempt in this pass
    pub exhausted: usize,
    /// Left untouched because the breaker was open
    pub deferred: usize,
    /// Lost an optimistic-concurrency race with another writer
    pub conflicts: usize,
}

#[derive(Clone)]
pub struct RetryQueue {
    store: Arc<dyn SyncStore>,
    config: RetryQueueConfig,
}

impl RetryQueue {
    pub fn new(store: Arc<dyn SyncStore>, config: RetryQueueConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RetryQueueConfig {
        &self.config
    }

    /// Queue a failed item with its first backoff already applied
    pub async fn add_retry_item(
        &self,
        sync_type: SyncType,
        payload: &SyncPayload,
        error: &str,
        category: ErrorCategory,
    ) -> Result<i64, SyncError> {
        let next_retry_at = Utc::now() + to_chrono(self.config.backoff.delay_for(0));
        let item = NewRetryItem {
            sync_type,
            item_id: payload.item_id(),
            item_type: payload.item_type().to_string(),
            payload: serde_json::to_string(payload)?,
            last_error: error.to_string(),
            error_category: category,
            correlation_id: CorrelationId::current_or_new(),
            max_retries: self.config.max_retries,
            next_retry_at,
        };

        let id = self.store.insert_retry_item(&item).await?;
        debug!(
            "Queued {} item {} for retry at {} ({})",
            sync_type, item.item_id, next_retry_at, category
        );
        Ok(id)
    }

    /// Queue an item that failed during a pass. Failing to queue is logged,
    /// not propagated, so the pass carries on.
    pub async fn enqueue_failed(&self, sync_type: SyncType, payload: &SyncPayload, error: &SyncError) {
        if let Err(e) = self
            .add_retry_item(sync_type, payload, &error.to_string(), error.category())
            .await
        {
            error!("Failed to queue {} item {} for retry: {}", sync_type, payload.item_id(), e);
        }
    }

    /// Unresolved items that still have attempts left
    pub async fn get_pending_retries(&self, sync_type: Option<SyncType>) -> Result<Vec<SyncRetryItem>, SyncError> {
        let filter = RetryItemFilter {
            sync_type,
            ..RetryItemFilter::pending()
        };
        Ok(self.store.retry_items(&filter).await?)
    }

    /// Unresolved items that exhausted their attempts
    pub async fn get_failed_items(&self) -> Result<Vec<SyncRetryItem>, SyncError> {
        Ok(self.store.retry_items(&RetryItemFilter::failed()).await?)
    }

    pub async fn purge_resolved(&self, older_than: chrono::Duration) -> Result<u64, SyncError> {
        let purged = self.store.purge_resolved(Utc::now() - older_than).await?;
        if purged > 0 {
            info!("Purged {} resolved retry items", purged);
        }
        Ok(purged)
    }

    /// Reprocess every item due at `now`, grouped by flow
    pub async fn process_due(
        &self,
        processor: &dyn RetryProcessor,
        now: DateTime<Utc>,
    ) -> Result<RetryPassSummary, SyncError> {
        let items = self.store.due_retry_items(now, self.config.batch_size).await?;
        let mut summary = RetryPassSummary {
            selected: items.len(),
            ..RetryPassSummary::default()
        };
        if items.is_empty() {
            return Ok(summary);
        }
        info!("Retry worker processing {} due items", items.len());

        let mut breaker_open = false;
        for sync_type in SyncType::ALL {
            for item in items.iter().filter(|item| item.sync_type == sync_type) {
                if breaker_open {
                    summary.deferred += 1;
                    continue;
                }
                match self.process_item(processor, item.clone(), now, &mut summary).await? {
                    ItemResult::Done => {}
                    ItemResult::BreakerOpen => {
                        breaker_open = true;
                        summary.deferred += 1;
                    }
                }
            }
        }

        info!(
            "Retry pass finished: {} resolved, {} failed, {} exhausted, {} deferred",
            summary.resolved, summary.failed, summary.exhausted, summary.deferred
        );
        Ok(summary)
    }

    async fn process_item(
        &self,
        processor: &dyn RetryProcessor,
        mut item: SyncRetryItem,
        now: DateTime<Utc>,
        summary: &mut RetryPassSummary,
    ) -> Result<ItemResult, SyncError> {
        let outcome = match serde_json::from_str::<SyncPayload>(&item.payload) {
            Ok(payload) => {
                item.correlation_id
                    .clone()
                    .scope(processor.reprocess(item.sync_type, &payload))
                    .await
            }
            Err(e) => Err(SyncError::Payload(e)),
        };

        let result = match outcome {
            Ok(()) => {
                item.is_resolved = true;
                item.resolved_at = Some(now);
                summary.resolved += 1;
                debug!("Retry item {} ({} {}) resolved", item.id, item.sync_type, item.item_id);
                ItemResult::Done
            }
            Err(e) if e.is_flow_level() => {
                warn!("Retry pass paused at item {}: {}", item.id, e);
                return Ok(ItemResult::BreakerOpen);
            }
            Err(e) => {
                item.retry_count += 1;
                item.last_error = e.to_string();
                item.error_category = e.category();
                item.next_retry_at = now + to_chrono(self.config.backoff.delay_for(item.retry_count as usize));
                summary.failed += 1;
                if item.retry_count >= item.max_retries {
                    summary.exhausted += 1;
                    error!(
                        "Retry item {} ({} {}) failed permanently after {} attempts: {}",
                        item.id, item.sync_type, item.item_id, item.retry_count, e
                    );
                } else {
                    debug!(
                        "Retry item {} failed (attempt {}/{}), next at {}",
                        item.id, item.retry_count, item.max_retries, item.next_retry_at
                    );
                }
                ItemResult::Done
            }
        };

        if !self.store.update_retry_item(&item).await? {
            warn!("Retry item {} was changed concurrently, skipping update", item.id);
            summary.conflicts += 1;
        }
        Ok(result)
    }

    /// Run `process_due` every `worker_interval` until `shutdown` is cancelled
    pub fn spawn_worker(&self, processor: Arc<dyn RetryProcessor>, shutdown: CancellationToken) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.config.worker_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Retry worker started (every {:?})", queue.config.worker_interval);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => {}
                }

                let pass = correlation::in_scope(queue.process_due(processor.as_ref(), Utc::now())).await;
                if let Err(e) = pass {
                    error!("Retry worker pass failed: {}", e);
                }
            }
            info!("Retry worker stopped");
        })
    }
}

enum ItemResult {
    Done,
    BreakerOpen,
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}
