//! Sync orchestration
//!
//! Runs one flow at a time per orchestrator: a second start while a flow is
//! running is rejected. Each flow runs in its own correlation scope, emits
//! started / completed / error events, updates the health provider and, when
//! it runs to completion, advances its persisted watermark to the pass start.
//!
//! Per-item failures are counted, queued for background retry, and do not
//! stop the flow. A flow-level failure (listing the remote catalog fails, the
//! breaker is open) aborts the rest of the flow.

use super::delta::DeltaSyncEngine;
use super::health::SyncHealthProvider;
use super::items::ItemProcessor;
use super::retry_queue::RetryQueue;
use super::types::{DeltaResult, SyncError, SyncItemError, SyncPayload, SyncResult, SyncType};
use crate::api::resilience::{SyncLifecycleEvent, SyncLifecyclePhase, TelemetrySink};
use crate::api::{ErrorCategory, StockUpdate};
use crate::correlation::{self, CorrelationId};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shortest accepted auto-sync interval
pub const MIN_AUTO_SYNC_INTERVAL: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 64;

/// Entry points of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SyncFlow {
    ProductsToRemote,
    ProductsFromRemote,
    StockToRemote,
    OrdersFromRemote,
    OrderStatusToRemote,
    Full,
    ProductsDelta,
    OrdersDelta,
    LocalProductsDelta,
}

impl SyncFlow {
    pub const ALL: [SyncFlow; 9] = [
        SyncFlow::ProductsToRemote,
        SyncFlow::ProductsFromRemote,
        SyncFlow::StockToRemote,
        SyncFlow::OrdersFromRemote,
        SyncFlow::OrderStatusToRemote,
        SyncFlow::Full,
        SyncFlow::ProductsDelta,
        SyncFlow::OrdersDelta,
        SyncFlow::LocalProductsDelta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFlow::ProductsToRemote => "products-push",
            SyncFlow::ProductsFromRemote => "products-pull",
            SyncFlow::StockToRemote => "stock-push",
            SyncFlow::OrdersFromRemote => "orders-pull",
            SyncFlow::OrderStatusToRemote => "order-status-push",
            SyncFlow::Full => "full",
            SyncFlow::ProductsDelta => "products-delta",
            SyncFlow::OrdersDelta => "orders-delta",
            SyncFlow::LocalProductsDelta => "local-products-delta",
        }
    }

    /// Watermark key of the flow; `None` for the composite full sync
    pub fn sync_type(&self) -> Option<SyncType> {
        match self {
            SyncFlow::ProductsToRemote | SyncFlow::LocalProductsDelta => Some(SyncType::ProductsPush),
            SyncFlow::ProductsFromRemote | SyncFlow::ProductsDelta => Some(SyncType::ProductsPull),
            SyncFlow::StockToRemote => Some(SyncType::StockPush),
            SyncFlow::OrdersFromRemote | SyncFlow::OrdersDelta => Some(SyncType::OrdersPull),
            SyncFlow::OrderStatusToRemote => Some(SyncType::OrderStatusPush),
            SyncFlow::Full => None,
        }
    }
}

impl fmt::Display for SyncFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncFlow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncFlow::ALL
            .into_iter()
            .find(|flow| flow.as_str() == s)
            .ok_or_else(|| format!("unknown sync flow '{}'", s))
    }
}

/// Lifecycle notifications
#[derive(Debug, Clone, Serialize)]
pub enum SyncEvent {
    Started {
        flow: SyncFlow,
        correlation_id: CorrelationId,
    },
    Completed {
        flow: SyncFlow,
        result: SyncResult,
        correlation_id: CorrelationId,
    },
    Error {
        flow: SyncFlow,
        message: String,
        correlation_id: CorrelationId,
    },
}

struct AutoSync {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    items: ItemProcessor,
    store: Arc<dyn crate::store::SyncStore>,
    queue: RetryQueue,
    delta: DeltaSyncEngine,
    health: SyncHealthProvider,
    telemetry: Arc<dyn TelemetrySink>,
    running: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    events: broadcast::Sender<SyncEvent>,
    auto_sync: Mutex<Option<AutoSync>>,
}

/// Clears the running flag when the flow ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    pub fn new(
        items: ItemProcessor,
        store: Arc<dyn crate::store::SyncStore>,
        queue: RetryQueue,
        health: SyncHealthProvider,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let delta = DeltaSyncEngine::new(items.clone(), store.clone(), queue.clone());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                items,
                store,
                queue,
                delta,
                health,
                telemetry,
                running: AtomicBool::new(false),
                last_sync: Mutex::new(None),
                events,
                auto_sync: Mutex::new(None),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_sync_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// End time of the last flow that ran to completion
    pub fn last_sync_date(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_sync.lock().unwrap()
    }

    pub fn health(&self) -> &SyncHealthProvider {
        &self.inner.health
    }

    pub fn retry_queue(&self) -> &RetryQueue {
        &self.inner.queue
    }

    pub fn items(&self) -> &ItemProcessor {
        &self.inner.items
    }

    // Flows

    pub async fn sync_products_to_remote(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::ProductsToRemote, self.products_to_remote_pass())
            .await
    }

    pub async fn sync_products_from_remote(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::ProductsFromRemote, self.products_from_remote_pass())
            .await
    }

    pub async fn sync_stock_to_remote(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::StockToRemote, self.stock_to_remote_pass())
            .await
    }

    pub async fn sync_orders_from_remote(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::OrdersFromRemote, self.orders_from_remote_pass())
            .await
    }

    pub async fn sync_order_status_to_remote(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::OrderStatusToRemote, self.order_status_to_remote_pass())
            .await
    }

    /// Pull products, push products, push stock, pull orders, push order status
    pub async fn full_sync(&self) -> Result<SyncResult, SyncError> {
        self.execute(SyncFlow::Full, self.full_pass()).await
    }

    pub async fn sync_products_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        self.execute(SyncFlow::ProductsDelta, self.inner.delta.sync_products_delta(since))
            .await
    }

    pub async fn sync_orders_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        self.execute(SyncFlow::OrdersDelta, self.inner.delta.sync_orders_delta(since))
            .await
    }

    pub async fn sync_local_products_delta(&self, since: Option<DateTime<Utc>>) -> Result<DeltaResult, SyncError> {
        self.execute(
            SyncFlow::LocalProductsDelta,
            self.inner.delta.sync_local_products_delta(since),
        )
        .await
    }

    /// Run a flow by name. Delta flows use their stored watermark.
    pub async fn run(&self, flow: SyncFlow) -> Result<SyncResult, SyncError> {
        match flow {
            SyncFlow::ProductsToRemote => self.sync_products_to_remote().await,
            SyncFlow::ProductsFromRemote => self.sync_products_from_remote().await,
            SyncFlow::StockToRemote => self.sync_stock_to_remote().await,
            SyncFlow::OrdersFromRemote => self.sync_orders_from_remote().await,
            SyncFlow::OrderStatusToRemote => self.sync_order_status_to_remote().await,
            SyncFlow::Full => self.full_sync().await,
            SyncFlow::ProductsDelta => self.sync_products_delta(None).await.map(|d| d.result),
            SyncFlow::OrdersDelta => self.sync_orders_delta(None).await.map(|d| d.result),
            SyncFlow::LocalProductsDelta => self.sync_local_products_delta(None).await.map(|d| d.result),
        }
    }

    /// Run a full sync every `interval` (at least [`MIN_AUTO_SYNC_INTERVAL`]).
    /// Replaces any running schedule; returns the effective interval.
    pub fn start_auto_sync(&self, interval: Duration) -> Duration {
        let interval = interval.max(MIN_AUTO_SYNC_INTERVAL);
        let token = CancellationToken::new();
        let orchestrator = self.clone();
        let stop = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                match orchestrator.full_sync().await {
                    Ok(_) => {}
                    Err(SyncError::AlreadyRunning) => {}
                    Err(e) => warn!("Scheduled sync failed: {}", e),
                }
            }
        });

        let previous = self
            .inner
            .auto_sync
            .lock()
            .unwrap()
            .replace(AutoSync { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        info!("Auto-sync scheduled every {:?}", interval);
        interval
    }

    /// Stop the periodic schedule and wait for an in-flight scheduled sync to finish
    pub async fn stop_auto_sync(&self) {
        let auto_sync = self.inner.auto_sync.lock().unwrap().take();
        if let Some(auto_sync) = auto_sync {
            auto_sync.token.cancel();
            if let Err(e) = auto_sync.handle.await {
                error!("Auto-sync task ended abnormally: {}", e);
            }
            info!("Auto-sync stopped");
        }
    }

    pub fn is_auto_sync_active(&self) -> bool {
        self.inner.auto_sync.lock().unwrap().is_some()
    }

    fn try_begin(&self, flow: SyncFlow) -> Result<RunningGuard<'_>, SyncError> {
        self.inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| RunningGuard(&self.inner.running))
            .map_err(|_| {
                warn!("Sync {} rejected: another sync is running", flow);
                SyncError::AlreadyRunning
            })
    }

    async fn execute<T, Fut>(&self, flow: SyncFlow, pass: Fut) -> Result<T, SyncError>
    where
        T: AsRef<SyncResult>,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let _guard = self.try_begin(flow)?;

        correlation::in_scope(async move {
            let correlation_id = CorrelationId::current_or_new();
            info!("Sync {} started", flow);
            self.emit(
                SyncEvent::Started {
                    flow,
                    correlation_id: correlation_id.clone(),
                },
                SyncLifecyclePhase::Started,
                None,
            );

            match pass.await {
                Ok(outcome) => {
                    let result = outcome.as_ref().clone();
                    *self.inner.last_sync.lock().unwrap() = Some(result.end_time.unwrap_or_else(Utc::now));
                    self.inner.health.record_success(flow.sync_type());
                    info!(
                        "Sync {} completed: {} processed, {} succeeded, {} failed",
                        flow, result.total_processed, result.success_count, result.error_count
                    );
                    self.emit(
                        SyncEvent::Completed {
                            flow,
                            result: result.clone(),
                            correlation_id,
                        },
                        SyncLifecyclePhase::Completed,
                        Some(&result),
                    );
                    Ok(outcome)
                }
                Err(e) => {
                    let message = e.to_string();
                    error!("Sync {} failed: {}", flow, message);
                    self.inner.health.record_failure(flow.sync_type(), &message);
                    self.emit(
                        SyncEvent::Error {
                            flow,
                            message,
                            correlation_id,
                        },
                        SyncLifecyclePhase::Failed,
                        None,
                    );
                    Err(e)
                }
            }
        })
        .await
    }

    fn emit(&self, event: SyncEvent, phase: SyncLifecyclePhase, result: Option<&SyncResult>) {
        let (flow, message, correlation_id) = match &event {
            SyncEvent::Started { flow, correlation_id } => (*flow, None, correlation_id.clone()),
            SyncEvent::Completed { flow, correlation_id, .. } => (*flow, None, correlation_id.clone()),
            SyncEvent::Error {
                flow,
                message,
                correlation_id,
            } => (*flow, Some(message.clone()), correlation_id.clone()),
        };
        self.inner.telemetry.sync_lifecycle(&SyncLifecycleEvent {
            flow: flow.to_string(),
            phase,
            processed: result.map(|r| r.total_processed).unwrap_or(0),
            errors: result.map(|r| r.error_count).unwrap_or(0),
            message,
            correlation_id,
        });
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }

    // Passes. These do not touch the running gate so `full_pass` can chain them.

    async fn products_from_remote_pass(&self) -> Result<SyncResult, SyncError> {
        let sync_type = SyncType::ProductsPull;
        let pass_start = Utc::now();
        let mut result = SyncResult::start(Some(sync_type));

        let products = self.inner.items.client().list_products().await?;
        info!("Importing {} remote products", products.len());
        for product in products {
            let outcome = self.inner.items.import_product(&product).await.map(|_| ());
            self.settle(sync_type, &mut result, outcome, SyncPayload::RemoteProduct(product))
                .await?;
        }

        self.complete(sync_type, pass_start, result).await
    }

    async fn products_to_remote_pass(&self) -> Result<SyncResult, SyncError> {
        let sync_type = SyncType::ProductsPush;
        let pass_start = Utc::now();
        let mut result = SyncResult::start(Some(sync_type));

        let products = self.inner.items.repository().list_products().await?;
        info!("Pushing {} local products", products.len());
        for product in products {
            let outcome = self.inner.items.push_product(&product).await.map(|_| ());
            let payload = SyncPayload::LocalProduct { product_id: product.id };
            self.settle(sync_type, &mut result, outcome, payload).await?;
        }

        self.complete(sync_type, pass_start, result).await
    }

    /// One bulk call for every linked product. A failed call fails the whole
    /// batch; each item is then queued on its own.
    async fn stock_to_remote_pass(&self) -> Result<SyncResult, SyncError> {
        let sync_type = SyncType::StockPush;
        let pass_start = Utc::now();
        let mut result = SyncResult::start(Some(sync_type));

        let updates: Vec<StockUpdate> = self
            .inner
            .items
            .repository()
            .list_products()
            .await?
            .into_iter()
            .filter_map(|product| {
                let quantity = product.available();
                product.remote_id.map(|product_id| StockUpdate { product_id, quantity })
            })
            .collect();

        if !updates.is_empty() {
            info!("Pushing stock for {} products", updates.len());
            match self.inner.items.push_stock(&updates).await {
                Ok(bulk) => {
                    for update in &updates {
                        match bulk.failed.iter().find(|f| f.product_id == update.product_id) {
                            Some(failure) => {
                                let error = SyncError::Validation(format!("stock update rejected: {}", failure.message));
                                let payload = SyncPayload::StockLevel(update.clone());
                                self.settle(sync_type, &mut result, Err(error), payload).await?;
                            }
                            None => result.record_success(),
                        }
                    }
                }
                Err(e) if e.is_flow_level() => return Err(e),
                Err(e) => {
                    warn!("Bulk stock update of {} items failed: {}", updates.len(), e);
                    result.total_processed += updates.len();
                    result.error_count += updates.len();
                    result.errors.push(SyncItemError {
                        item_id: format!("batch of {}", updates.len()),
                        message: e.to_string(),
                        category: e.category(),
                    });
                    for update in updates {
                        self.inner
                            .queue
                            .enqueue_failed(sync_type, &SyncPayload::StockLevel(update), &e)
                            .await;
                    }
                }
            }
        }

        self.complete(sync_type, pass_start, result).await
    }

    async fn orders_from_remote_pass(&self) -> Result<SyncResult, SyncError> {
        let sync_type = SyncType::OrdersPull;
        let pass_start = Utc::now();
        let mut result = SyncResult::start(Some(sync_type));

        let orders = self.inner.items.client().list_orders().await?;
        info!("Importing {} remote orders", orders.len());
        for order in orders {
            let outcome = self.inner.items.import_order(&order).await.map(|_| ());
            self.settle(sync_type, &mut result, outcome, SyncPayload::RemoteOrder(order))
                .await?;
        }

        self.complete(sync_type, pass_start, result).await
    }

    /// Push the status of linked orders modified since the last completed pass
    async fn order_status_to_remote_pass(&self) -> Result<SyncResult, SyncError> {
        let sync_type = SyncType::OrderStatusPush;
        let pass_start = Utc::now();
        let mut result = SyncResult::start(Some(sync_type));
        let since = self.inner.store.get_sync_state(sync_type).await?;

        let orders: Vec<_> = self
            .inner
            .items
            .repository()
            .list_orders()
            .await?
            .into_iter()
            .filter(|order| order.remote_id.is_some())
            .filter(|order| since.is_none_or(|since| order.updated_at > since))
            .collect();

        info!("Pushing status of {} orders", orders.len());
        for order in orders {
            let outcome = self.inner.items.push_order_status(&order).await;
            let payload = SyncPayload::OrderStatus { order_id: order.id };
            self.settle(sync_type, &mut result, outcome, payload).await?;
        }

        self.complete(sync_type, pass_start, result).await
    }

    async fn full_pass(&self) -> Result<SyncResult, SyncError> {
        let mut result = SyncResult::start(None);
        result.merge(self.products_from_remote_pass().await?);
        result.merge(self.products_to_remote_pass().await?);
        result.merge(self.stock_to_remote_pass().await?);
        result.merge(self.orders_from_remote_pass().await?);
        result.merge(self.order_status_to_remote_pass().await?);
        Ok(result.finish())
    }

    /// Account for one item. Flow-level errors propagate; anything else is
    /// recorded and queued.
    async fn settle(
        &self,
        sync_type: SyncType,
        result: &mut SyncResult,
        outcome: Result<(), SyncError>,
        payload: SyncPayload,
    ) -> Result<(), SyncError> {
        match outcome {
            Ok(()) => {
                result.record_success();
                Ok(())
            }
            Err(e) if e.is_flow_level() => Err(e),
            Err(e) => {
                let item_id = payload.item_id();
                warn!("{} item {} failed: {}", sync_type, item_id, e);
                result.record_failure(item_id, &e);
                self.inner.queue.enqueue_failed(sync_type, &payload, &e).await;
                Ok(())
            }
        }
    }

    async fn complete(
        &self,
        sync_type: SyncType,
        pass_start: DateTime<Utc>,
        result: SyncResult,
    ) -> Result<SyncResult, SyncError> {
        self.inner.store.advance_sync_state(sync_type, pass_start).await?;
        if result.error_count > 0 {
            let category = result
                .errors
                .first()
                .map(|e| e.category)
                .unwrap_or(ErrorCategory::Unknown);
            warn!(
                "{} finished with {} failed items (first: {})",
                sync_type, result.error_count, category
            );
        }
        Ok(result.finish())
    }
}
