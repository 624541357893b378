//! Local inventory and order entities
//!
//! The local system is consumed only through [`LocalRepository`]; the
//! SQLite implementation lives in `store::local`.

pub mod order;
pub mod product;

pub use order::{NewOrder, Order, OrderLine, OrderStatus};
pub use product::{NewProduct, Product};

use anyhow::Result;
use async_trait::async_trait;

/// Get-all / get-by-id / create / update access to local products and orders.
///
/// Updates write every field as given; callers own `updated_at`.
#[async_trait]
pub trait LocalRepository: Send + Sync {
    async fn list_products(&self) -> Result<Vec<Product>>;
    async fn get_product(&self, id: i64) -> Result<Option<Product>>;
    async fn find_product_by_sku(&self, sku: &str) -> Result<Option<Product>>;
    async fn find_product_by_remote_id(&self, remote_id: &str) -> Result<Option<Product>>;
    async fn create_product(&self, product: NewProduct) -> Result<Product>;
    async fn update_product(&self, product: &Product) -> Result<()>;

    async fn list_orders(&self) -> Result<Vec<Order>>;
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;
    async fn find_order_by_remote_id(&self, remote_id: &str) -> Result<Option<Order>>;
    async fn create_order(&self, order: NewOrder) -> Result<Order>;
    async fn update_order(&self, order: &Order) -> Result<()>;
}
