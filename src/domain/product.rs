use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Local catalog product. Stock levels are authoritative locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i64,
    /// Units held by confirmed orders that have not shipped yet
    pub reserved_quantity: i64,
    /// Platform id, set once the product has been matched or created remotely
    pub remote_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Units that can still be promised to new orders
    pub fn available(&self) -> i64 {
        (self.stock_quantity - self.reserved_quantity).max(0)
    }

    pub fn is_linked(&self) -> bool {
        self.remote_id.is_some()
    }
}

/// Fields for inserting a product
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub stock_quantity: i64,
    pub remote_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl NewProduct {
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: Decimal, stock_quantity: i64) -> Self {
        Self {
            sku: sku.into(),
            name: name.into(),
            description: None,
            price,
            stock_quantity,
            remote_id: None,
            updated_at: Utc::now(),
            last_synced_at: None,
        }
    }
}
