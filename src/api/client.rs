//! Semantic operations against the remote e-commerce platform
//!
//! Every call goes through the [`ResilientTransport`]; this layer maps
//! outcomes to found / not-found / error and reports one API-call telemetry
//! event per operation.

use super::constants::{self, PAGE_SIZE, headers, params};
use super::error::ApiError;
use super::models::{
    BulkStockResult, OrderStatusUpdate, Page, RemoteOrder, RemoteProduct, RemoteProductInput,
    StockUpdate, UpsertOutcome,
};
use super::resilience::{ApiCallEvent, is_retryable_status};
use super::transport::{ApiRequest, ApiResponse, ResilientTransport};
use crate::correlation::CorrelationId;
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

const ERROR_BODY_LIMIT: usize = 512;

/// Client for the remote platform API
#[derive(Clone)]
pub struct PlatformClient {
    base_url: String,
    transport: ResilientTransport,
    supports_changed_since: bool,
}

impl PlatformClient {
    pub fn new(base_url: impl Into<String>, transport: ResilientTransport) -> Self {
        Self {
            base_url: base_url.into(),
            transport,
            supports_changed_since: true,
        }
    }

    /// Declare whether the platform honours the `updated_since` filter
    pub fn with_changed_since(mut self, supported: bool) -> Self {
        self.supports_changed_since = supported;
        self
    }

    pub fn supports_changed_since(&self) -> bool {
        self.supports_changed_since
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &ResilientTransport {
        &self.transport
    }

    // Products

    pub async fn list_products(&self) -> Result<Vec<RemoteProduct>, ApiError> {
        self.list_paged("products", constants::products_endpoint(&self.base_url), None)
            .await
    }

    /// Products updated strictly after `since`, using the platform filter
    pub async fn list_products_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteProduct>, ApiError> {
        self.list_paged("products", constants::products_endpoint(&self.base_url), Some(since))
            .await
    }

    pub async fn get_product(&self, id: &str) -> Result<Option<RemoteProduct>, ApiError> {
        let request = ApiRequest::get(constants::product_endpoint(&self.base_url, id));
        match self.call("products/{id}", request, true).await? {
            Some(response) => Ok(Some(decode("products/{id}", &response)?)),
            None => Ok(None),
        }
    }

    pub async fn find_product_by_sku(&self, sku: &str) -> Result<Option<RemoteProduct>, ApiError> {
        let url = constants::with_query(
            &constants::products_endpoint(&self.base_url),
            &[(params::SKU, sku.to_string()), (params::LIMIT, "1".to_string())],
        );
        let Some(response) = self.call("products", ApiRequest::get(url), false).await? else {
            return Ok(None);
        };
        let page: Page<RemoteProduct> = decode("products", &response)?;
        Ok(page
            .items
            .into_iter()
            .find(|product| product.sku.as_deref() == Some(sku)))
    }

    /// Create a product. The idempotency key is fixed for all retries of this call.
    pub async fn create_product(&self, input: &RemoteProductInput) -> Result<RemoteProduct, ApiError> {
        if input.sku.trim().is_empty() {
            return Err(ApiError::Validation("product SKU must not be empty".to_string()));
        }
        let request = ApiRequest::post(constants::products_endpoint(&self.base_url))
            .json(input)?
            .header(headers::IDEMPOTENCY_KEY, uuid::Uuid::new_v4().to_string());
        let response = self.require("products", request).await?;
        decode("products", &response)
    }

    pub async fn update_product(
        &self,
        id: &str,
        input: &RemoteProductInput,
    ) -> Result<Option<RemoteProduct>, ApiError> {
        let request = ApiRequest::put(constants::product_endpoint(&self.base_url, id)).json(input)?;
        match self.call("products/{id}", request, true).await? {
            Some(response) => Ok(Some(decode("products/{id}", &response)?)),
            None => Ok(None),
        }
    }

    /// Create-or-update a product, matching by remote id first and SKU second
    pub async fn upsert_product(
        &self,
        remote_id: Option<&str>,
        input: &RemoteProductInput,
    ) -> Result<UpsertOutcome, ApiError> {
        if let Some(id) = remote_id {
            if let Some(updated) = self.update_product(id, input).await? {
                return Ok(UpsertOutcome::Updated(updated));
            }
            debug!("Remote product {} no longer exists, matching by SKU", id);
        }

        if let Some(existing) = self.find_product_by_sku(&input.sku).await? {
            if let Some(updated) = self.update_product(&existing.id, input).await? {
                return Ok(UpsertOutcome::Updated(updated));
            }
        }

        Ok(UpsertOutcome::Created(self.create_product(input).await?))
    }

    /// Push stock levels in one call. The platform may reject individual entries.
    pub async fn bulk_update_stock(&self, updates: &[StockUpdate]) -> Result<BulkStockResult, ApiError> {
        if updates.is_empty() {
            return Ok(BulkStockResult::default());
        }
        let body = serde_json::json!({ "updates": updates });
        let request = ApiRequest::post(constants::bulk_inventory_endpoint(&self.base_url)).json(&body)?;
        let response = self.require("inventory/bulk", request).await?;
        decode("inventory/bulk", &response)
    }

    // Orders

    pub async fn list_orders(&self) -> Result<Vec<RemoteOrder>, ApiError> {
        self.list_paged("orders", constants::orders_endpoint(&self.base_url), None)
            .await
    }

    pub async fn list_orders_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<RemoteOrder>, ApiError> {
        self.list_paged("orders", constants::orders_endpoint(&self.base_url), Some(since))
            .await
    }

    pub async fn get_order(&self, id: &str) -> Result<Option<RemoteOrder>, ApiError> {
        let request = ApiRequest::get(constants::order_endpoint(&self.base_url, id));
        match self.call("orders/{id}", request, true).await? {
            Some(response) => Ok(Some(decode("orders/{id}", &response)?)),
            None => Ok(None),
        }
    }

    pub async fn update_order_status(&self, id: &str, status: &str) -> Result<RemoteOrder, ApiError> {
        let body = OrderStatusUpdate {
            status: status.to_string(),
        };
        let request = ApiRequest::put(constants::order_status_endpoint(&self.base_url, id)).json(&body)?;
        let response = self.require("orders/{id}/status", request).await?;
        decode("orders/{id}/status", &response)
    }

    async fn list_paged<T: DeserializeOwned>(
        &self,
        label: &str,
        base: String,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let mut query = vec![(params::LIMIT, PAGE_SIZE.to_string())];
            if let Some(since) = since {
                query.push((params::UPDATED_SINCE, since.to_rfc3339_opts(SecondsFormat::Millis, true)));
            }
            if let Some(cursor) = &cursor {
                query.push((params::CURSOR, cursor.clone()));
            }

            let request = ApiRequest::get(constants::with_query(&base, &query));
            let response = self.require(label, request).await?;
            let page: Page<T> = decode(label, &response)?;
            items.extend(page.items);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        Ok(items)
    }

    async fn require(&self, label: &str, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        match self.call(label, request, false).await? {
            Some(response) => Ok(response),
            None => Err(ApiError::Protocol {
                status: 404,
                endpoint: label.to_string(),
                message: "not found".to_string(),
            }),
        }
    }

    /// Execute one operation and report it. `Ok(None)` means 404 when
    /// `not_found_ok` is set.
    async fn call(&self, label: &str, request: ApiRequest, not_found_ok: bool) -> Result<Option<ApiResponse>, ApiError> {
        let method = request.method.to_string();
        let started = Instant::now();

        let outcome = self.transport.execute(request).await;
        let status_code = match &outcome {
            Ok(response) => Some(response.status),
            Err(e) => e.status(),
        };
        let result = match outcome {
            Ok(response) if response.is_success() => Ok(Some(response)),
            Ok(response) if response.status == 404 && not_found_ok => Ok(None),
            Ok(response) => Err(status_error(label, response)),
            Err(e) => Err(e),
        };

        self.transport.telemetry().api_call(&ApiCallEvent {
            method,
            endpoint: label.to_string(),
            duration: started.elapsed(),
            success: result.is_ok(),
            status_code,
            error_category: result.as_ref().err().map(|e| e.category().to_string()),
            correlation_id: CorrelationId::current_or_new(),
        });

        result
    }
}

fn status_error(label: &str, response: ApiResponse) -> ApiError {
    let mut message = response.text();
    if message.len() > ERROR_BODY_LIMIT {
        let mut end = ERROR_BODY_LIMIT;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }

    let protocol = ApiError::Protocol {
        status: response.status,
        endpoint: label.to_string(),
        message,
    };
    if is_retryable_status(response.status) {
        ApiError::RetriesExhausted {
            attempts: response.attempts,
            last: Box::new(protocol),
        }
    } else {
        protocol
    }
}

fn decode<T: DeserializeOwned>(label: &str, response: &ApiResponse) -> Result<T, ApiError> {
    response.json().map_err(|source| ApiError::Deserialization {
        endpoint: label.to_string(),
        source,
    })
}
