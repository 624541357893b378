//! In-memory stand-in for the e-commerce platform

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use shopsync::api::{ApiRequest, ApiResponse, HttpTransport, RemoteLineItem, RemoteOrder, RemoteProduct, TransportError};
use shopsync::app::SyncApp;
use shopsync::config::Config;
use shopsync::store::db;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_URL: &str = "http://platform.test";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    pub correlation_id: Option<String>,
}

#[derive(Default)]
struct PlatformState {
    products: BTreeMap<String, RemoteProduct>,
    orders: BTreeMap<String, RemoteOrder>,
    next_id: u64,
    /// Statuses returned for the next requests, in order
    injected: VecDeque<u16>,
    /// Path prefix that always answers with the given status
    failing_paths: Vec<(String, u16)>,
    rejected_stock: HashSet<String>,
    requests: Vec<RecordedRequest>,
    latency: Option<Duration>,
}

#[derive(Default)]
pub struct FakePlatform {
    state: Mutex<PlatformState>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_product(&self, id: &str, sku: &str, price: Decimal, stock: i64, updated_at: DateTime<Utc>) {
        let product = RemoteProduct {
            id: id.to_string(),
            sku: Some(sku.to_string()),
            name: format!("Product {}", sku),
            description: None,
            price,
            stock_quantity: stock,
            updated_at,
        };
        self.state.lock().unwrap().products.insert(id.to_string(), product);
    }

    pub fn add_order(&self, id: &str, status: &str, lines: &[(&str, i64)], updated_at: DateTime<Utc>) {
        let order = RemoteOrder {
            id: id.to_string(),
            number: format!("#{}", id),
            status: status.to_string(),
            customer_name: Some("Ada".to_string()),
            total: Decimal::new(2000, 2),
            line_items: lines
                .iter()
                .map(|(sku, quantity)| RemoteLineItem {
                    sku: sku.to_string(),
                    quantity: *quantity,
                    unit_price: Decimal::new(1000, 2),
                })
                .collect(),
            created_at: updated_at,
            updated_at,
        };
        self.state.lock().unwrap().orders.insert(id.to_string(), order);
    }

    /// Rename a product and bump its modification time
    pub fn touch_product(&self, id: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(product) = state.products.get_mut(id) {
            product.name = name.to_string();
            product.updated_at = Utc::now();
        }
    }

    pub fn product(&self, id: &str) -> Option<RemoteProduct> {
        self.state.lock().unwrap().products.get(id).cloned()
    }

    pub fn products(&self) -> Vec<RemoteProduct> {
        self.state.lock().unwrap().products.values().cloned().collect()
    }

    pub fn order(&self, id: &str) -> Option<RemoteOrder> {
        self.state.lock().unwrap().orders.get(id).cloned()
    }

    pub fn inject_statuses(&self, statuses: &[u16]) {
        self.state.lock().unwrap().injected.extend(statuses.iter().copied());
    }

    pub fn fail_path(&self, prefix: &str, status: u16) {
        self.state.lock().unwrap().failing_paths.push((prefix.to_string(), status));
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_paths.clear();
        state.injected.clear();
        state.rejected_stock.clear();
    }

    pub fn reject_stock_for(&self, product_id: &str) {
        self.state.lock().unwrap().rejected_stock.insert(product_id.to_string());
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = Some(latency);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn requests_to(&self, method: Method, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let (path, query) = split_url(&request.url);
        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            method: request.method.clone(),
            path: path.clone(),
            query: query.clone(),
            correlation_id: request.header_value("X-Correlation-ID").map(str::to_string),
        });

        if let Some(status) = state.injected.pop_front() {
            return ApiResponse::new(status, format!("injected {}", status));
        }
        if let Some((_, status)) = state.failing_paths.iter().find(|(prefix, _)| path.starts_with(prefix.as_str())) {
            return ApiResponse::new(*status, "unavailable");
        }

        let segments: Vec<&str> = path.split('/').collect();
        let body: Value = request
            .body
            .as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(Value::Null);

        match (request.method.as_str(), segments.as_slice()) {
            ("GET", ["products"]) => {
                let since = query.get("updated_since").and_then(|s| s.parse::<DateTime<Utc>>().ok());
                let items: Vec<&RemoteProduct> = state
                    .products
                    .values()
                    .filter(|p| query.get("sku").is_none_or(|sku| p.sku.as_ref() == Some(sku)))
                    .filter(|p| since.is_none_or(|since| p.updated_at > since))
                    .collect();
                page(&items, &query)
            }
            ("GET", ["products", id]) => match state.products.get(*id) {
                Some(product) => ok(product),
                None => ApiResponse::new(404, "not found"),
            },
            ("POST", ["products"]) => {
                state.next_id += 1;
                let product = RemoteProduct {
                    id: format!("p-{}", state.next_id),
                    sku: body["sku"].as_str().map(str::to_string),
                    name: body["name"].as_str().unwrap_or_default().to_string(),
                    description: body["description"].as_str().map(str::to_string),
                    price: serde_json::from_value(body["price"].clone()).unwrap_or_default(),
                    stock_quantity: body["stock_quantity"].as_i64().unwrap_or_default(),
                    updated_at: Utc::now(),
                };
                state.products.insert(product.id.clone(), product.clone());
                ApiResponse::new(201, serde_json::to_vec(&product).unwrap())
            }
            ("PUT", ["products", id]) => match state.products.get_mut(*id) {
                Some(product) => {
                    product.name = body["name"].as_str().unwrap_or_default().to_string();
                    product.price = serde_json::from_value(body["price"].clone()).unwrap_or_default();
                    product.stock_quantity = body["stock_quantity"].as_i64().unwrap_or_default();
                    product.updated_at = Utc::now();
                    ok(&*product)
                }
                None => ApiResponse::new(404, "not found"),
            },
            ("POST", ["inventory", "bulk"]) => {
                let mut updated = Vec::new();
                let mut failed = Vec::new();
                for update in body["updates"].as_array().cloned().unwrap_or_default() {
                    let id = update["product_id"].as_str().unwrap_or_default().to_string();
                    let quantity = update["quantity"].as_i64().unwrap_or_default();
                    if state.rejected_stock.contains(&id) {
                        failed.push(json!({ "product_id": id, "message": "locked" }));
                        continue;
                    }
                    match state.products.get_mut(&id) {
                        Some(product) => {
                            product.stock_quantity = quantity;
                            updated.push(json!(id));
                        }
                        None => failed.push(json!({ "product_id": id, "message": "unknown product" })),
                    }
                }
                ok(&json!({ "updated": updated, "failed": failed }))
            }
            ("GET", ["orders"]) => {
                let since = query.get("updated_since").and_then(|s| s.parse::<DateTime<Utc>>().ok());
                let items: Vec<&RemoteOrder> = state
                    .orders
                    .values()
                    .filter(|o| since.is_none_or(|since| o.updated_at > since))
                    .collect();
                page(&items, &query)
            }
            ("GET", ["orders", id]) => match state.orders.get(*id) {
                Some(order) => ok(order),
                None => ApiResponse::new(404, "not found"),
            },
            ("PUT", ["orders", id, "status"]) => match state.orders.get_mut(*id) {
                Some(order) => {
                    order.status = body["status"].as_str().unwrap_or_default().to_string();
                    order.updated_at = Utc::now();
                    ok(&*order)
                }
                None => ApiResponse::new(404, "not found"),
            },
            _ => ApiResponse::new(404, "no route"),
        }
    }
}

#[async_trait]
impl HttpTransport for FakePlatform {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, TransportError> {
        let latency = self.state.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.handle(&request))
    }
}

fn ok<T: serde::Serialize + ?Sized>(value: &T) -> ApiResponse {
    ApiResponse::new(200, serde_json::to_vec(value).unwrap())
}

/// Cursor is the offset of the next page
fn page<T: serde::Serialize>(items: &[T], query: &HashMap<String, String>) -> ApiResponse {
    let limit = query.get("limit").and_then(|l| l.parse().ok()).unwrap_or(250usize);
    let offset = query.get("cursor").and_then(|c| c.parse().ok()).unwrap_or(0usize);
    let end = (offset + limit).min(items.len());
    let next_cursor = (end < items.len()).then(|| end.to_string());
    ok(&json!({ "items": &items[offset.min(end)..end], "next_cursor": next_cursor }))
}

fn split_url(url: &str) -> (String, HashMap<String, String>) {
    let rest = url
        .strip_prefix(BASE_URL)
        .and_then(|rest| rest.strip_prefix("/api/v1/"))
        .unwrap_or(url);
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
    let query = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| {
            let value = urlencoding::decode(value).map(|v| v.into_owned()).unwrap_or_default();
            (key.to_string(), value)
        })
        .collect();
    let path = urlencoding::decode(path).map(|p| p.into_owned()).unwrap_or_default();
    (path, query)
}

/// Config with no inline retries, no rate limit and immediate queue retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.platform.base_url = BASE_URL.to_string();
    config.resilience.backoff_secs = Vec::new();
    config.resilience.rate_limit_enabled = false;
    config
}

pub async fn app_with(platform: Arc<FakePlatform>, config: Config) -> SyncApp {
    let pool = db::open_memory().await.unwrap();
    SyncApp::assemble(config, pool, platform)
}

pub async fn app(platform: Arc<FakePlatform>) -> SyncApp {
    app_with(platform, test_config()).await
}
