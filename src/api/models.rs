//! Wire models for the remote platform API

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product as the platform reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProduct {
    pub id: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price: Decimal,
    #[serde(default)]
    pub stock_quantity: i64,
    pub updated_at: DateTime<Utc>,
}

/// Body of a product create or update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteProductInput {
    pub sku: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i64,
}

/// One entry of a bulk stock push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub product_id: String,
    pub quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockUpdateFailure {
    pub product_id: String,
    pub message: String,
}

/// Platform response to a bulk stock push
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkStockResult {
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub failed: Vec<StockUpdateFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteLineItem {
    pub sku: String,
    pub quantity: i64,
    pub unit_price: Decimal,
}

/// Order as the platform reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOrder {
    pub id: String,
    pub number: String,
    /// Free-form status text, mapped onto the local lifecycle on import
    pub status: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub total: Decimal,
    #[serde(default)]
    pub line_items: Vec<RemoteLineItem>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusUpdate {
    pub status: String,
}

/// One page of a cursor-paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Outcome of a product create-or-update
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    Created(RemoteProduct),
    Updated(RemoteProduct),
}
