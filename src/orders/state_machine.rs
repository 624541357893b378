//! Order status lifecycle
//!
//! ```text
//! Pending -> Confirmed -> Shipped -> Delivered
//!    |           |           |
//!    +-----------+-----------+--> Cancelled
//! ```
//!
//! Delivered and Cancelled are terminal. A transition is validated, persisted
//! together with its timestamp, then its side effects run and a
//! [`StatusChanged`] event is broadcast. Side-effect failures do not undo the
//! status change; they are reported as warnings on the outcome.

use crate::correlation::{self, CorrelationId};
use crate::domain::{LocalRepository, Order, OrderStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 64;

/// Edge check against the lifecycle graph only
pub fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    from.can_transition_to(to)
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("cannot move order {order_id} from {from} to {to}: {reason}")]
    Rejected {
        order_id: i64,
        from: OrderStatus,
        to: OrderStatus,
        reason: String,
    },

    #[error("failed to persist order status: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Result of checking a transition before applying it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionValidation {
    pub allowed: bool,
    /// Destructive but permitted; interactive callers should confirm first
    pub requires_confirmation: bool,
    pub warnings: Vec<String>,
    pub error: Option<String>,
}

impl TransitionValidation {
    fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    fn allow() -> Self {
        Self {
            allowed: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusChanged {
    pub order_id: i64,
    pub order_number: String,
    pub previous: OrderStatus,
    pub current: OrderStatus,
    pub actor: String,
    pub reason: Option<String>,
    pub correlation_id: CorrelationId,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub event: StatusChanged,
    pub warnings: Vec<String>,
}

/// Fulfilment collaborators triggered by status changes
#[async_trait]
pub trait FulfillmentHooks: Send + Sync {
    async fn request_shipment(&self, _order: &Order) -> Result<()> {
        Ok(())
    }

    async fn issue_invoice(&self, _order: &Order) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct NoopFulfillment;

impl FulfillmentHooks for NoopFulfillment {}

pub struct OrderStateMachine {
    repository: Arc<dyn LocalRepository>,
    hooks: Arc<dyn FulfillmentHooks>,
    events: broadcast::Sender<StatusChanged>,
}

impl OrderStateMachine {
    pub fn new(repository: Arc<dyn LocalRepository>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repository,
            hooks: Arc::new(NoopFulfillment),
            events,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn FulfillmentHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChanged> {
        self.events.subscribe()
    }

    pub async fn validate_transition(
        &self,
        from: OrderStatus,
        to: OrderStatus,
        order: &Order,
    ) -> Result<TransitionValidation> {
        if from == OrderStatus::Delivered && to == OrderStatus::Cancelled {
            return Ok(TransitionValidation::reject("a delivered order cannot be cancelled"));
        }
        if !is_valid_transition(from, to) {
            return Ok(TransitionValidation::reject(format!("{} -> {} is not a valid transition", from, to)));
        }

        let mut validation = TransitionValidation::allow();
        match (from, to) {
            (OrderStatus::Confirmed | OrderStatus::Shipped, OrderStatus::Cancelled) => {
                validation.requires_confirmation = true;
                validation
                    .warnings
                    .push(format!("cancelling a {} order", from.as_str().to_lowercase()));
            }
            (OrderStatus::Pending, OrderStatus::Confirmed) => {
                validation.warnings.extend(self.stock_shortages(order).await?);
            }
            _ => {}
        }
        Ok(validation)
    }

    async fn stock_shortages(&self, order: &Order) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        for line in &order.lines {
            match self.repository.find_product_by_sku(&line.sku).await? {
                Some(product) if product.available() >= line.quantity => {}
                Some(product) => warnings.push(format!(
                    "insufficient stock for {}: {} requested, {} available",
                    line.sku,
                    line.quantity,
                    product.available()
                )),
                None => warnings.push(format!("unknown product {}", line.sku)),
            }
        }
        Ok(warnings)
    }

    /// Validate and apply a status change. On rejection nothing is written
    /// and no event is raised.
    pub async fn transition_to(
        &self,
        order: &mut Order,
        new_status: OrderStatus,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        correlation::in_scope(self.apply(order, new_status, reason, actor)).await
    }

    async fn apply(
        &self,
        order: &mut Order,
        new_status: OrderStatus,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<TransitionOutcome, TransitionError> {
        let previous = order.status;
        let validation = self.validate_transition(previous, new_status, order).await?;
        if !validation.allowed {
            return Err(TransitionError::Rejected {
                order_id: order.id,
                from: previous,
                to: new_status,
                reason: validation.error.unwrap_or_default(),
            });
        }

        let now = Utc::now();
        let mut updated = order.clone();
        updated.status = new_status;
        updated.status_changed_at = now;
        updated.updated_at = now;
        self.repository.update_order(&updated).await?;
        *order = updated;

        let mut warnings = validation.warnings;
        if let Err(e) = self.side_effects(order, previous).await {
            warn!("Side effects of order {} {} -> {} failed: {:#}", order.id, previous, new_status, e);
            warnings.push(format!("side effect failed: {:#}", e));
        }

        let event = StatusChanged {
            order_id: order.id,
            order_number: order.order_number.clone(),
            previous,
            current: new_status,
            actor: actor.to_string(),
            reason: reason.map(str::to_string),
            correlation_id: CorrelationId::current_or_new(),
            changed_at: now,
        };
        info!(
            "Order {} moved {} -> {} by {}",
            order.order_number, previous, new_status, actor
        );
        // No subscribers is fine
        let _ = self.events.send(event.clone());

        Ok(TransitionOutcome { event, warnings })
    }

    async fn side_effects(&self, order: &Order, previous: OrderStatus) -> Result<()> {
        match (previous, order.status) {
            (_, OrderStatus::Confirmed) => self.adjust_stock(order, |product, qty| {
                product.reserved_quantity += qty;
            })
            .await,
            (OrderStatus::Confirmed, OrderStatus::Cancelled) => self.adjust_stock(order, |product, qty| {
                product.reserved_quantity = (product.reserved_quantity - qty).max(0);
            })
            .await,
            (_, OrderStatus::Shipped) => {
                self.adjust_stock(order, |product, qty| {
                    product.stock_quantity -= qty;
                    product.reserved_quantity = (product.reserved_quantity - qty).max(0);
                })
                .await?;
                self.hooks.request_shipment(order).await.context("shipping trigger failed")
            }
            (_, OrderStatus::Delivered) => self.hooks.issue_invoice(order).await.context("invoice trigger failed"),
            _ => Ok(()),
        }
    }

    async fn adjust_stock<F>(&self, order: &Order, adjust: F) -> Result<()>
    where
        F: Fn(&mut crate::domain::Product, i64) + Send + Sync,
    {
        for line in &order.lines {
            let Some(mut product) = self.repository.find_product_by_sku(&line.sku).await? else {
                warn!("Order {} references unknown product {}", order.order_number, line.sku);
                continue;
            };
            adjust(&mut product, line.quantity);
            product.updated_at = Utc::now();
            self.repository.update_product(&product).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, NewProduct, OrderLine};
    use crate::store::{SqliteLocalRepository, db};
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingHooks {
        calls: Mutex<Vec<&'static str>>,
        fail_shipment: bool,
    }

    #[async_trait]
    impl FulfillmentHooks for RecordingHooks {
        async fn request_shipment(&self, _order: &Order) -> Result<()> {
            self.calls.lock().unwrap().push("ship");
            if self.fail_shipment {
                anyhow::bail!("carrier unavailable");
            }
            Ok(())
        }

        async fn issue_invoice(&self, _order: &Order) -> Result<()> {
            self.calls.lock().unwrap().push("invoice");
            Ok(())
        }
    }

    async fn setup(stock: i64, quantity: i64) -> (Arc<SqliteLocalRepository>, Order) {
        let repo = Arc::new(SqliteLocalRepository::new(db::open_memory().await.unwrap()));
        repo.create_product(NewProduct::new("MUG", "Mug", Decimal::TEN, stock)).await.unwrap();
        let now = Utc::now();
        let order = repo
            .create_order(NewOrder {
                remote_id: None,
                order_number: "1001".to_string(),
                customer_name: None,
                status: OrderStatus::Pending,
                total: Decimal::TEN * Decimal::from(quantity),
                lines: vec![OrderLine {
                    sku: "MUG".to_string(),
                    quantity,
                    unit_price: Decimal::TEN,
                }],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();
        (repo, order)
    }

    #[test]
    fn test_is_valid_transition() {
        assert!(is_valid_transition(OrderStatus::Pending, OrderStatus::Confirmed));
        for status in OrderStatus::ALL {
            assert!(!is_valid_transition(OrderStatus::Delivered, status));
            assert!(!is_valid_transition(status, status));
        }
    }

    #[tokio::test]
    async fn test_confirm_reserves_stock_and_emits_event() {
        let (repo, mut order) = setup(10, 3).await;
        let machine = OrderStateMachine::new(repo.clone());
        let mut events = machine.subscribe();

        let outcome = CorrelationId::from_string("cid-42")
            .scope(machine.transition_to(&mut order, OrderStatus::Confirmed, Some("paid"), "alice"))
            .await
            .unwrap();

        assert!(outcome.warnings.is_empty());
        assert_eq!(order.status, OrderStatus::Confirmed);

        let product = repo.find_product_by_sku("MUG").await.unwrap().unwrap();
        assert_eq!(product.reserved_quantity, 3);

        let event = events.try_recv().unwrap();
        assert_eq!(event.previous, OrderStatus::Pending);
        assert_eq!(event.current, OrderStatus::Confirmed);
        assert_eq!(event.actor, "alice");
        assert_eq!(event.reason.as_deref(), Some("paid"));
        assert_eq!(event.correlation_id.as_str(), "cid-42");

        let stored = repo.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_shortage_is_a_warning_not_a_failure() {
        let (repo, mut order) = setup(1, 5).await;
        let machine = OrderStateMachine::new(repo);

        let validation = machine
            .validate_transition(OrderStatus::Pending, OrderStatus::Confirmed, &order)
            .await
            .unwrap();
        assert!(validation.allowed);
        assert_eq!(validation.warnings.len(), 1);

        let outcome = machine
            .transition_to(&mut order, OrderStatus::Confirmed, None, "system")
            .await
            .unwrap();
        assert!(outcome.warnings[0].contains("insufficient stock"));
    }

    #[tokio::test]
    async fn test_invalid_transition_mutates_nothing() {
        let (repo, mut order) = setup(10, 1).await;
        let machine = OrderStateMachine::new(repo.clone());
        let mut events = machine.subscribe();
        let before = order.clone();

        let error = machine
            .transition_to(&mut order, OrderStatus::Delivered, None, "bob")
            .await
            .unwrap_err();

        assert!(matches!(error, TransitionError::Rejected { .. }));
        assert_eq!(order, before);
        assert_eq!(repo.get_order(order.id).await.unwrap().unwrap().status, OrderStatus::Pending);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelling_delivered_is_hard_failure_and_shipped_needs_confirmation() {
        let (repo, order) = setup(10, 1).await;
        let machine = OrderStateMachine::new(repo);

        let delivered = machine
            .validate_transition(OrderStatus::Delivered, OrderStatus::Cancelled, &order)
            .await
            .unwrap();
        assert!(!delivered.allowed);
        assert!(delivered.error.unwrap().contains("delivered"));

        let shipped = machine
            .validate_transition(OrderStatus::Shipped, OrderStatus::Cancelled, &order)
            .await
            .unwrap();
        assert!(shipped.allowed);
        assert!(shipped.requires_confirmation);
    }

    #[tokio::test]
    async fn test_full_lifecycle_triggers_hooks_and_releases_on_cancel() {
        let (repo, mut order) = setup(10, 2).await;
        let hooks = Arc::new(RecordingHooks::default());
        let machine = OrderStateMachine::new(repo.clone()).with_hooks(hooks.clone());

        machine.transition_to(&mut order, OrderStatus::Confirmed, None, "a").await.unwrap();
        machine.transition_to(&mut order, OrderStatus::Shipped, None, "a").await.unwrap();
        machine.transition_to(&mut order, OrderStatus::Delivered, None, "a").await.unwrap();
        assert_eq!(*hooks.calls.lock().unwrap(), vec!["ship", "invoice"]);

        let product = repo.find_product_by_sku("MUG").await.unwrap().unwrap();
        assert_eq!(product.stock_quantity, 8);
        assert_eq!(product.reserved_quantity, 0);

        let (repo, mut order) = setup(10, 2).await;
        let machine = OrderStateMachine::new(repo.clone());
        machine.transition_to(&mut order, OrderStatus::Confirmed, None, "a").await.unwrap();
        machine.transition_to(&mut order, OrderStatus::Cancelled, Some("customer"), "a").await.unwrap();
        let product = repo.find_product_by_sku("MUG").await.unwrap().unwrap();
        assert_eq!(product.reserved_quantity, 0);
        assert_eq!(product.stock_quantity, 10);
    }

    #[tokio::test]
    async fn test_failed_hook_keeps_status_and_warns() {
        let (repo, mut order) = setup(10, 1).await;
        let hooks = Arc::new(RecordingHooks {
            fail_shipment: true,
            ..RecordingHooks::default()
        });
        let machine = OrderStateMachine::new(repo.clone()).with_hooks(hooks);

        machine.transition_to(&mut order, OrderStatus::Confirmed, None, "a").await.unwrap();
        let outcome = machine.transition_to(&mut order, OrderStatus::Shipped, None, "a").await.unwrap();

        assert_eq!(order.status, OrderStatus::Shipped);
        assert!(outcome.warnings[0].contains("shipping trigger failed"));
    }
}
