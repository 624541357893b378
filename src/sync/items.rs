//! Per-item sync operations
//!
//! The orchestrator, the delta engine and the retry queue all funnel single
//! items through [`ItemProcessor`], so an item behaves the same whichever path
//! processes it.

use super::retry_queue::RetryProcessor;
use super::types::{DeltaOutcome, SyncError, SyncPayload, SyncType};
use crate::api::{
    BulkStockResult, PlatformClient, RemoteOrder, RemoteProduct, RemoteProductInput, StockUpdate, UpsertOutcome,
};
use crate::domain::{LocalRepository, NewOrder, NewProduct, Order, OrderLine, OrderStatus, Product};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::sync::Arc;

#[derive(Clone)]
pub struct ItemProcessor {
    client: PlatformClient,
    repository: Arc<dyn LocalRepository>,
}

impl ItemProcessor {
    pub fn new(client: PlatformClient, repository: Arc<dyn LocalRepository>) -> Self {
        Self { client, repository }
    }

    pub fn client(&self) -> &PlatformClient {
        &self.client
    }

    pub fn repository(&self) -> &Arc<dyn LocalRepository> {
        &self.repository
    }

    /// Create or update the local copy of a remote product.
    ///
    /// Matches by stored remote id, then SKU. Local stock is never overwritten
    /// for an existing product, and a local copy edited after the remote one is
    /// left alone.
    pub async fn import_product(&self, remote: &RemoteProduct) -> Result<DeltaOutcome, SyncError> {
        let now = Utc::now();
        let existing = match self.repository.find_product_by_remote_id(&remote.id).await? {
            Some(product) => Some(product),
            None => match remote.sku.as_deref() {
                Some(sku) => self.repository.find_product_by_sku(sku).await?,
                None => None,
            },
        };

        let Some(mut product) = existing else {
            let sku = remote
                .sku
                .clone()
                .filter(|sku| !sku.trim().is_empty())
                .ok_or_else(|| SyncError::Validation(format!("remote product {} has no SKU", remote.id)))?;
            self.repository
                .create_product(NewProduct {
                    sku,
                    name: remote.name.clone(),
                    description: remote.description.clone(),
                    price: remote.price,
                    stock_quantity: remote.stock_quantity,
                    remote_id: Some(remote.id.clone()),
                    updated_at: remote.updated_at,
                    last_synced_at: Some(now),
                })
                .await?;
            return Ok(DeltaOutcome::New);
        };

        let linked = product.remote_id.as_deref() == Some(remote.id.as_str());
        if linked && product.updated_at >= remote.updated_at {
            debug!("Local product {} is not older than remote {}, skipping", product.sku, remote.id);
            return Ok(DeltaOutcome::Skipped);
        }

        product.name = remote.name.clone();
        product.description = remote.description.clone();
        product.price = remote.price;
        product.remote_id = Some(remote.id.clone());
        product.updated_at = remote.updated_at;
        product.last_synced_at = Some(now);
        self.repository.update_product(&product).await?;
        Ok(DeltaOutcome::Modified)
    }

    /// Create or update the remote copy of a local product and remember the
    /// remote id for id-based matching next time.
    pub async fn push_product(&self, product: &Product) -> Result<DeltaOutcome, SyncError> {
        let input = RemoteProductInput {
            sku: product.sku.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            price: product.price,
            stock_quantity: product.stock_quantity,
        };

        let (remote, outcome) = match self.client.upsert_product(product.remote_id.as_deref(), &input).await? {
            UpsertOutcome::Updated(remote) => (remote, DeltaOutcome::Modified),
            UpsertOutcome::Created(remote) => (remote, DeltaOutcome::New),
        };

        let mut updated = product.clone();
        updated.remote_id = Some(remote.id);
        updated.last_synced_at = Some(Utc::now());
        self.repository.update_product(&updated).await?;
        Ok(outcome)
    }

    pub async fn push_product_by_id(&self, product_id: i64) -> Result<DeltaOutcome, SyncError> {
        let product = self
            .repository
            .get_product(product_id)
            .await?
            .ok_or_else(|| SyncError::Validation(format!("local product {} no longer exists", product_id)))?;
        self.push_product(&product).await
    }

    /// Push a batch of stock levels. Entries rejected by the platform are
    /// returned in the result rather than as an error.
    pub async fn push_stock(&self, updates: &[StockUpdate]) -> Result<BulkStockResult, SyncError> {
        let result = self.client.bulk_update_stock(updates).await?;
        let synced_at = Utc::now();
        for product_id in &result.updated {
            if let Some(mut product) = self.repository.find_product_by_remote_id(product_id).await? {
                product.last_synced_at = Some(synced_at);
                self.repository.update_product(&product).await?;
            }
        }
        Ok(result)
    }

    /// Create or update the local copy of a remote order, keyed by remote id
    pub async fn import_order(&self, remote: &RemoteOrder) -> Result<DeltaOutcome, SyncError> {
        let status = OrderStatus::parse_remote(&remote.status);
        let lines: Vec<OrderLine> = remote
            .line_items
            .iter()
            .map(|item| OrderLine {
                sku: item.sku.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
            })
            .collect();

        let Some(mut order) = self.repository.find_order_by_remote_id(&remote.id).await? else {
            self.repository
                .create_order(NewOrder {
                    remote_id: Some(remote.id.clone()),
                    order_number: remote.number.clone(),
                    customer_name: remote.customer_name.clone(),
                    status,
                    total: remote.total,
                    lines,
                    created_at: remote.created_at,
                    updated_at: remote.updated_at,
                })
                .await?;
            return Ok(DeltaOutcome::New);
        };

        if order.updated_at >= remote.updated_at {
            return Ok(DeltaOutcome::Skipped);
        }

        if order.status != status {
            order.status_changed_at = Utc::now();
        }
        order.status = status;
        order.order_number = remote.number.clone();
        order.customer_name = remote.customer_name.clone();
        order.total = remote.total;
        order.lines = lines;
        order.updated_at = remote.updated_at;
        self.repository.update_order(&order).await?;
        Ok(DeltaOutcome::Modified)
    }

    pub async fn push_order_status(&self, order: &Order) -> Result<(), SyncError> {
        let remote_id = order
            .remote_id
            .as_deref()
            .ok_or_else(|| SyncError::Validation(format!("order {} has no remote id", order.order_number)))?;
        self.client
            .update_order_status(remote_id, &order.status.as_str().to_lowercase())
            .await?;
        Ok(())
    }

    pub async fn push_order_status_by_id(&self, order_id: i64) -> Result<(), SyncError> {
        let order = self
            .repository
            .get_order(order_id)
            .await?
            .ok_or_else(|| SyncError::Validation(format!("local order {} no longer exists", order_id)))?;
        self.push_order_status(&order).await
    }

    /// Push one stock level, refreshed from the local product when it still exists
    async fn push_single_stock(&self, update: &StockUpdate) -> Result<(), SyncError> {
        let quantity = match self.repository.find_product_by_remote_id(&update.product_id).await? {
            Some(product) => product.available(),
            None => update.quantity,
        };
        let update = StockUpdate {
            product_id: update.product_id.clone(),
            quantity,
        };

        let result = self.push_stock(std::slice::from_ref(&update)).await?;
        match result.failed.into_iter().next() {
            Some(failure) => Err(SyncError::Validation(format!(
                "stock update for {} rejected: {}",
                failure.product_id, failure.message
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RetryProcessor for ItemProcessor {
    async fn reprocess(&self, _sync_type: SyncType, payload: &SyncPayload) -> Result<(), SyncError> {
        match payload {
            SyncPayload::RemoteProduct(product) => self.import_product(product).await.map(|_| ()),
            SyncPayload::LocalProduct { product_id } => self.push_product_by_id(*product_id).await.map(|_| ()),
            SyncPayload::StockLevel(update) => self.push_single_stock(update).await,
            SyncPayload::RemoteOrder(order) => self.import_order(order).await.map(|_| ()),
            SyncPayload::OrderStatus { order_id } => self.push_order_status_by_id(*order_id).await,
        }
    }
}
