//! SQLite-backed local inventory and orders

use super::db::{from_millis, from_millis_opt, to_millis};
use crate::domain::{LocalRepository, NewOrder, NewProduct, Order, OrderLine, OrderStatus, Product};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;

const PRODUCT_COLUMNS: &str = "id, sku, name, description, price, stock_quantity, reserved_quantity, \
     remote_id, created_at, updated_at, last_synced_at";

const ORDER_COLUMNS: &str = "id, remote_id, order_number, customer_name, status, total, lines_json, \
     status_changed_at, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct SqliteLocalRepository {
    pool: SqlitePool,
}

impl SqliteLocalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn product_where(&self, clause: &str, value: &str) -> Result<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE {} = ?", PRODUCT_COLUMNS, clause))
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get product by {} '{}'", clause, value))?;

        row.map(parse_product_row).transpose()
    }
}

#[async_trait]
impl LocalRepository for SqliteLocalRepository {
    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows = sqlx::query(&format!("SELECT {} FROM products ORDER BY id", PRODUCT_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list products")?;

        rows.into_iter().map(parse_product_row).collect()
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let row = sqlx::query(&format!("SELECT {} FROM products WHERE id = ?", PRODUCT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get product {}", id))?;

        row.map(parse_product_row).transpose()
    }

    async fn find_product_by_sku(&self, sku: &str) -> Result<Option<Product>> {
        self.product_where("sku", sku).await
    }

    async fn find_product_by_remote_id(&self, remote_id: &str) -> Result<Option<Product>> {
        self.product_where("remote_id", remote_id).await
    }

    async fn create_product(&self, product: NewProduct) -> Result<Product> {
        let now = Utc::now();
        let id = sqlx::query(
            r#"
            INSERT INTO products (
                sku, name, description, price, stock_quantity, reserved_quantity,
                remote_id, created_at, updated_at, last_synced_at
            )
            VALUES (?, ?, ?, ?, ?, 0, ?, ?, ?, ?)
            "#,
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(product.stock_quantity)
        .bind(&product.remote_id)
        .bind(to_millis(now))
        .bind(to_millis(product.updated_at))
        .bind(product.last_synced_at.map(to_millis))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create product '{}'", product.sku))?
        .last_insert_rowid();

        self.get_product(id)
            .await?
            .with_context(|| format!("Product {} vanished after insert", id))
    }

    async fn update_product(&self, product: &Product) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET sku = ?, name = ?, description = ?, price = ?, stock_quantity = ?,
                reserved_quantity = ?, remote_id = ?, updated_at = ?, last_synced_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&product.sku)
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.to_string())
        .bind(product.stock_quantity)
        .bind(product.reserved_quantity)
        .bind(&product.remote_id)
        .bind(to_millis(product.updated_at))
        .bind(product.last_synced_at.map(to_millis))
        .bind(product.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update product {}", product.id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Product {} not found", product.id);
        }
        Ok(())
    }

    async fn list_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!("SELECT {} FROM orders ORDER BY id", ORDER_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .context("Failed to list orders")?;

        rows.into_iter().map(parse_order_row).collect()
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get order {}", id))?;

        row.map(parse_order_row).transpose()
    }

    async fn find_order_by_remote_id(&self, remote_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query(&format!("SELECT {} FROM orders WHERE remote_id = ?", ORDER_COLUMNS))
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to get order by remote id '{}'", remote_id))?;

        row.map(parse_order_row).transpose()
    }

    async fn create_order(&self, order: NewOrder) -> Result<Order> {
        let lines_json = serde_json::to_string(&order.lines).context("Failed to serialize order lines")?;
        let id = sqlx::query(
            r#"
            INSERT INTO orders (
                remote_id, order_number, customer_name, status, total, lines_json,
                status_changed_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&order.remote_id)
        .bind(&order.order_number)
        .bind(&order.customer_name)
        .bind(order.status.as_str())
        .bind(order.total.to_string())
        .bind(&lines_json)
        .bind(to_millis(order.updated_at))
        .bind(to_millis(order.created_at))
        .bind(to_millis(order.updated_at))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create order '{}'", order.order_number))?
        .last_insert_rowid();

        self.get_order(id)
            .await?
            .with_context(|| format!("Order {} vanished after insert", id))
    }

    async fn update_order(&self, order: &Order) -> Result<()> {
        let lines_json = serde_json::to_string(&order.lines).context("Failed to serialize order lines")?;
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET remote_id = ?, order_number = ?, customer_name = ?, status = ?, total = ?,
                lines_json = ?, status_changed_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&order.remote_id)
        .bind(&order.order_number)
        .bind(&order.customer_name)
        .bind(order.status.as_str())
        .bind(order.total.to_string())
        .bind(&lines_json)
        .bind(to_millis(order.status_changed_at))
        .bind(to_millis(order.updated_at))
        .bind(order.id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update order {}", order.id))?;

        if result.rows_affected() == 0 {
            anyhow::bail!("Order {} not found", order.id);
        }
        Ok(())
    }
}

fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in database: '{}'", value))
}

fn parse_product_row(row: SqliteRow) -> Result<Product> {
    let price: String = row.try_get("price")?;
    Ok(Product {
        id: row.try_get("id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: parse_decimal(&price)?,
        stock_quantity: row.try_get("stock_quantity")?,
        reserved_quantity: row.try_get("reserved_quantity")?,
        remote_id: row.try_get("remote_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
        last_synced_at: from_millis_opt(row.try_get("last_synced_at")?)?,
    })
}

fn parse_order_row(row: SqliteRow) -> Result<Order> {
    let status: String = row.try_get("status")?;
    let total: String = row.try_get("total")?;
    let lines_json: String = row.try_get("lines_json")?;
    let lines: Vec<OrderLine> = serde_json::from_str(&lines_json).context("Failed to parse order lines")?;

    Ok(Order {
        id: row.try_get("id")?,
        remote_id: row.try_get("remote_id")?,
        order_number: row.try_get("order_number")?,
        customer_name: row.try_get("customer_name")?,
        status: OrderStatus::from_str(&status).map_err(anyhow::Error::msg)?,
        total: parse_decimal(&total)?,
        lines,
        status_changed_at: from_millis(row.try_get("status_changed_at")?)?,
        created_at: from_millis(row.try_get("created_at")?)?,
        updated_at: from_millis(row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::db;

    async fn repository() -> SqliteLocalRepository {
        SqliteLocalRepository::new(db::open_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_product_create_lookup_update() {
        let repo = repository().await;
        let created = repo
            .create_product(NewProduct::new("MUG-1", "Mug", Decimal::new(1299, 2), 10))
            .await
            .unwrap();
        assert_eq!(created.price, Decimal::new(1299, 2));
        assert!(created.remote_id.is_none());

        let mut product = repo.find_product_by_sku("MUG-1").await.unwrap().unwrap();
        product.remote_id = Some("r-1".to_string());
        product.reserved_quantity = 4;
        repo.update_product(&product).await.unwrap();

        let linked = repo.find_product_by_remote_id("r-1").await.unwrap().unwrap();
        assert_eq!(linked.id, created.id);
        assert_eq!(linked.available(), 6);
        assert_eq!(repo.list_products().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_sku_is_rejected() {
        let repo = repository().await;
        repo.create_product(NewProduct::new("A", "A", Decimal::ONE, 1)).await.unwrap();
        assert!(repo.create_product(NewProduct::new("A", "A2", Decimal::ONE, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_order_round_trip_with_lines() {
        let repo = repository().await;
        let now = Utc::now();
        let created = repo
            .create_order(NewOrder {
                remote_id: Some("o-1".to_string()),
                order_number: "1001".to_string(),
                customer_name: Some("Sam".to_string()),
                status: OrderStatus::Pending,
                total: Decimal::new(2598, 2),
                lines: vec![OrderLine {
                    sku: "MUG-1".to_string(),
                    quantity: 2,
                    unit_price: Decimal::new(1299, 2),
                }],
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let mut order = repo.find_order_by_remote_id("o-1").await.unwrap().unwrap();
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.id, created.id);

        order.status = OrderStatus::Confirmed;
        repo.update_order(&order).await.unwrap();
        let reloaded = repo.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_update_missing_order_fails() {
        let repo = repository().await;
        let now = Utc::now();
        let ghost = Order {
            id: 99,
            remote_id: None,
            order_number: "x".to_string(),
            customer_name: None,
            status: OrderStatus::Pending,
            total: Decimal::ZERO,
            lines: Vec::new(),
            status_changed_at: now,
            created_at: now,
            updated_at: now,
        };
        assert!(repo.update_order(&ghost).await.is_err());
    }
}
