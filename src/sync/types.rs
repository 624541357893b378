//! Shared sync vocabulary: flow identifiers, per-pass results, queued payloads

use crate::api::{ApiError, ErrorCategory, RemoteOrder, RemoteProduct, StockUpdate};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One synchronization flow. Also the key of the persisted watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncType {
    ProductsPull,
    ProductsPush,
    StockPush,
    OrdersPull,
    OrderStatusPush,
}

impl SyncType {
    pub const ALL: [SyncType; 5] = [
        SyncType::ProductsPull,
        SyncType::ProductsPush,
        SyncType::StockPush,
        SyncType::OrdersPull,
        SyncType::OrderStatusPush,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::ProductsPull => "products_pull",
            SyncType::ProductsPush => "products_push",
            SyncType::StockPush => "stock_push",
            SyncType::OrdersPull => "orders_pull",
            SyncType::OrderStatusPush => "order_status_push",
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SyncType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown sync type '{}'", s))
    }
}

/// Why one item of a pass failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncItemError {
    pub item_id: String,
    pub message: String,
    pub category: ErrorCategory,
}

/// Outcome of one pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResult {
    pub sync_type: Option<SyncType>,
    pub total_processed: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<SyncItemError>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl SyncResult {
    pub fn start(sync_type: Option<SyncType>) -> Self {
        Self {
            sync_type,
            total_processed: 0,
            success_count: 0,
            error_count: 0,
            errors: Vec::new(),
            start_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn record_success(&mut self) {
        self.total_processed += 1;
        self.success_count += 1;
    }

    pub fn record_failure(&mut self, item_id: impl Into<String>, error: &SyncError) {
        self.total_processed += 1;
        self.error_count += 1;
        self.errors.push(SyncItemError {
            item_id: item_id.into(),
            message: error.to_string(),
            category: error.category(),
        });
    }

    /// Fold a sub-pass into this one (used by the full flow)
    pub fn merge(&mut self, other: SyncResult) {
        self.total_processed += other.total_processed;
        self.success_count += other.success_count;
        self.error_count += other.error_count;
        self.errors.extend(other.errors);
    }

    pub fn finish(mut self) -> Self {
        self.end_time = Some(Utc::now());
        self
    }

    pub fn is_clean(&self) -> bool {
        self.error_count == 0
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time.map(|end| (end - self.start_time).num_milliseconds())
    }
}

/// What a queued retry replays. Stored as JSON in the retry item row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncPayload {
    /// Import of one remote product
    RemoteProduct(RemoteProduct),
    /// Push of one local product, reloaded at replay time
    LocalProduct { product_id: i64 },
    /// One stock level
    StockLevel(StockUpdate),
    /// Import of one remote order
    RemoteOrder(RemoteOrder),
    /// Status push of one local order, reloaded at replay time
    OrderStatus { order_id: i64 },
}

impl SyncPayload {
    /// Entity kind recorded in the retry item's `item_type` column
    pub fn item_type(&self) -> &'static str {
        match self {
            SyncPayload::RemoteProduct(_) | SyncPayload::LocalProduct { .. } => "product",
            SyncPayload::StockLevel(_) => "stock",
            SyncPayload::RemoteOrder(_) | SyncPayload::OrderStatus { .. } => "order",
        }
    }

    /// Stable id of the affected entity
    pub fn item_id(&self) -> String {
        match self {
            SyncPayload::RemoteProduct(product) => product.id.clone(),
            SyncPayload::LocalProduct { product_id } => product_id.to_string(),
            SyncPayload::StockLevel(update) => update.product_id.clone(),
            SyncPayload::RemoteOrder(order) => order.id.clone(),
            SyncPayload::OrderStatus { order_id } => order_id.to_string(),
        }
    }
}

/// Errors of the sync layer
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("invalid item: {0}")]
    Validation(String),

    #[error("invalid retry payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Api(e) => e.category(),
            SyncError::Storage(_) => ErrorCategory::Storage,
            SyncError::Validation(_) | SyncError::Payload(_) => ErrorCategory::Validation,
            SyncError::AlreadyRunning => ErrorCategory::Unknown,
        }
    }

    /// Failures that abort the remainder of a flow rather than a single item
    pub fn is_flow_level(&self) -> bool {
        matches!(
            self,
            SyncError::Api(ApiError::CircuitOpen { .. }) | SyncError::Api(ApiError::Cancelled)
        )
    }
}

/// Changed entity detected by a delta pass
#[derive(Debug, Clone)]
pub enum DeltaItem {
    RemoteProduct(RemoteProduct),
    RemoteOrder(RemoteOrder),
    LocalProduct(crate::domain::Product),
}

impl DeltaItem {
    pub fn item_id(&self) -> String {
        match self {
            DeltaItem::RemoteProduct(product) => product.id.clone(),
            DeltaItem::RemoteOrder(order) => order.id.clone(),
            DeltaItem::LocalProduct(product) => product.id.to_string(),
        }
    }
}

/// Classification of one delta candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOutcome {
    New,
    Modified,
    Skipped,
}

/// Outcome of one delta pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaResult {
    pub sync_type: SyncType,
    pub since: Option<DateTime<Utc>>,
    pub watermark: DateTime<Utc>,
    pub new_count: usize,
    pub modified_count: usize,
    pub skipped_count: usize,
    pub result: SyncResult,
}

impl DeltaResult {
    pub fn record(&mut self, outcome: DeltaOutcome) {
        match outcome {
            DeltaOutcome::New => self.new_count += 1,
            DeltaOutcome::Modified => self.modified_count += 1,
            DeltaOutcome::Skipped => self.skipped_count += 1,
        }
    }

    pub fn changed(&self) -> usize {
        self.new_count + self.modified_count
    }
}

impl AsRef<SyncResult> for SyncResult {
    fn as_ref(&self) -> &SyncResult {
        self
    }
}

impl AsRef<SyncResult> for DeltaResult {
    fn as_ref(&self) -> &SyncResult {
        &self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_sync_type_round_trip() {
        for sync_type in SyncType::ALL {
            assert_eq!(sync_type.as_str().parse::<SyncType>().unwrap(), sync_type);
        }
        assert!("bogus".parse::<SyncType>().is_err());
    }

    #[test]
    fn test_payload_is_tagged() {
        let payload = SyncPayload::StockLevel(StockUpdate {
            product_id: "p1".to_string(),
            quantity: 4,
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "stock_level");
        assert_eq!(json["product_id"], "p1");
        assert_eq!(payload.item_type(), "stock");

        let order = SyncPayload::OrderStatus { order_id: 7 };
        let back: SyncPayload = serde_json::from_str(&serde_json::to_string(&order).unwrap()).unwrap();
        assert_eq!(back, order);
        assert_eq!(back.item_id(), "7");
    }

    #[test]
    fn test_result_accounting() {
        let mut result = SyncResult::start(Some(SyncType::StockPush));
        result.record_success();
        result.record_failure("p2", &SyncError::Validation("missing sku".to_string()));

        let mut other = SyncResult::start(None);
        other.record_success();
        result.merge(other);

        assert_eq!(result.total_processed, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.error_count, 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Validation);
        assert!(!result.is_clean());
    }

    #[test]
    fn test_delta_result_exposes_its_summary() {
        let mut delta = DeltaResult {
            sync_type: SyncType::OrdersPull,
            since: None,
            watermark: Utc::now(),
            new_count: 0,
            modified_count: 0,
            skipped_count: 0,
            result: SyncResult::start(Some(SyncType::OrdersPull)),
        };
        delta.record(DeltaOutcome::New);
        delta.result.record_success();
        delta.record(DeltaOutcome::Skipped);

        let summary: &SyncResult = delta.as_ref();
        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.sync_type, Some(SyncType::OrdersPull));
        assert_eq!(delta.changed(), 1);
    }

    #[test]
    fn test_flow_level_errors() {
        let open = SyncError::Api(ApiError::CircuitOpen {
            retry_after: Duration::from_secs(1),
        });
        assert!(open.is_flow_level());
        assert!(!SyncError::Validation("x".to_string()).is_flow_level());
    }
}
