//! Delta synchronization
//!
//! Processes only entities changed since the persisted watermark of a flow.
//! The watermark advances to the pass start time at the end of every pass
//! that runs to completion, including passes with failed items; those items
//! are left to the retry queue rather than re-scanned. A pass aborted by a
//! flow-level error leaves the watermark where it was.

use super::items::ItemProcessor;
use super::retry_queue::RetryQueue;
use super::types::{DeltaItem, DeltaOutcome, DeltaResult, SyncError, SyncPayload, SyncResult, SyncType};
use crate::correlation;
use crate::store::SyncStore;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::sync::Arc;

#[derive(Clone)]
pub struct DeltaSyncEngine {
    items: ItemProcessor,
    store: Arc<dyn SyncStore>,
    queue: RetryQueue,
}

impl DeltaSyncEngine {
    pub fn new(items: ItemProcessor, store: Arc<dyn SyncStore>, queue: RetryQueue) -> Self {
        Self { items, store, queue }
    }

    /// Import remote products changed since `since` (or the stored watermark)
    pub async fn sync_products_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        correlation::in_scope(async {
            let pass_start = Utc::now();
            let since = self.resolve_since(SyncType::ProductsPull, since).await?;
            let client = self.items.client();

            let products = match since {
                Some(since) if client.supports_changed_since() => client.list_products_changed_since(since).await?,
                Some(since) => client
                    .list_products()
                    .await?
                    .into_iter()
                    .filter(|product| product.updated_at > since)
                    .collect(),
                None => client.list_products().await?,
            };

            let candidates = products.into_iter().map(DeltaItem::RemoteProduct).collect();
            self.run_pass(SyncType::ProductsPull, since, pass_start, candidates).await
        })
        .await
    }

    /// Import remote orders changed since `since` (or the stored watermark)
    pub async fn sync_orders_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        correlation::in_scope(async {
            let pass_start = Utc::now();
            let since = self.resolve_since(SyncType::OrdersPull, since).await?;
            let client = self.items.client();

            let orders = match since {
                Some(since) if client.supports_changed_since() => client.list_orders_changed_since(since).await?,
                Some(since) => client
                    .list_orders()
                    .await?
                    .into_iter()
                    .filter(|order| order.updated_at > since)
                    .collect(),
                None => client.list_orders().await?,
            };

            let candidates = orders.into_iter().map(DeltaItem::RemoteOrder).collect();
            self.run_pass(SyncType::OrdersPull, since, pass_start, candidates).await
        })
        .await
    }

    /// Push local products edited since `since` (or the stored watermark)
    pub async fn sync_local_products_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        correlation::in_scope(async {
            let pass_start = Utc::now();
            let since = self.resolve_since(SyncType::ProductsPush, since).await?;

            let candidates = self
                .items
                .repository()
                .list_products()
                .await?
                .into_iter()
                .filter(|product| since.is_none_or(|since| product.updated_at > since))
                .map(DeltaItem::LocalProduct)
                .collect();

            self.run_pass(SyncType::ProductsPush, since, pass_start, candidates).await
        })
        .await
    }

    async fn resolve_since(
        &self,
        sync_type: SyncType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<DateTime<Utc>>, SyncError> {
        match since {
            Some(since) => Ok(Some(since)),
            None => Ok(self.store.get_sync_state(sync_type).await?),
        }
    }

    async fn run_pass(
        &self,
        sync_type: SyncType,
        since: Option<DateTime<Utc>>,
        pass_start: DateTime<Utc>,
        candidates: Vec<DeltaItem>,
    ) -> Result<DeltaResult, SyncError> {
        debug!("{} delta: {} candidates since {:?}", sync_type, candidates.len(), since);

        let mut delta = DeltaResult {
            sync_type,
            since,
            watermark: pass_start,
            new_count: 0,
            modified_count: 0,
            skipped_count: 0,
            result: SyncResult::start(Some(sync_type)),
        };

        for item in candidates {
            match self.dispatch(&item).await {
                Ok(outcome) => {
                    delta.record(outcome);
                    if outcome != DeltaOutcome::Skipped {
                        delta.result.record_success();
                    }
                }
                Err(e) if e.is_flow_level() => {
                    warn!("{} delta aborted: {}", sync_type, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{} delta item {} failed: {}", sync_type, item.item_id(), e);
                    delta.result.record_failure(item.item_id(), &e);
                    self.queue.enqueue_failed(sync_type, &payload_for(&item), &e).await;
                }
            }
        }

        delta.watermark = self.store.advance_sync_state(sync_type, pass_start).await?;
        delta.result = delta.result.finish();
        info!(
            "{} delta complete: {} new, {} modified, {} skipped, {} failed",
            sync_type, delta.new_count, delta.modified_count, delta.skipped_count, delta.result.error_count
        );
        Ok(delta)
    }

    async fn dispatch(&self, item: &DeltaItem) -> Result<DeltaOutcome, SyncError> {
        match item {
            DeltaItem::RemoteProduct(product) => self.items.import_product(product).await,
            DeltaItem::RemoteOrder(order) => self.items.import_order(order).await,
            DeltaItem::LocalProduct(product) => {
                let in_sync = product
                    .last_synced_at
                    .is_some_and(|synced| synced >= product.updated_at);
                if in_sync && product.remote_id.is_some() {
                    return Ok(DeltaOutcome::Skipped);
                }
                self.items.push_product(product).await
            }
        }
    }
}

fn payload_for(item: &DeltaItem) -> SyncPayload {
    match item {
        DeltaItem::RemoteProduct(product) => SyncPayload::RemoteProduct(product.clone()),
        DeltaItem::RemoteOrder(order) => SyncPayload::RemoteOrder(order.clone()),
        DeltaItem::LocalProduct(product) => SyncPayload::LocalProduct { product_id: product.id },
    }
}
