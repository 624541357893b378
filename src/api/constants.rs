//! API constants and endpoint builders for the remote e-commerce platform

/// Base API path
pub const API_BASE_PATH: &str = "/api";

/// Platform API version
pub const API_VERSION: &str = "v1";

/// Page size requested when listing collections
pub const PAGE_SIZE: u32 = 250;

/// Full API path with version
pub fn api_path() -> String {
    format!("{}/{}", API_BASE_PATH, API_VERSION)
}

/// Standard headers for platform requests
pub mod headers {
    /// Content type for JSON requests
    pub const CONTENT_TYPE_JSON: &str = "application/json";

    /// Correlation header attached to every outbound request
    pub const X_CORRELATION_ID: &str = "X-Correlation-ID";

    /// Access token header used by the platform
    pub const X_ACCESS_TOKEN: &str = "X-Access-Token";

    /// Idempotency key so a replayed create is applied once by the platform
    pub const IDEMPOTENCY_KEY: &str = "Idempotency-Key";
}

/// Query parameter names
pub mod params {
    pub const UPDATED_SINCE: &str = "updated_since";
    pub const SKU: &str = "sku";
    pub const LIMIT: &str = "limit";
    pub const CURSOR: &str = "cursor";
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}/{}", base_url.trim_end_matches('/'), api_path(), path)
}

pub fn products_endpoint(base_url: &str) -> String {
    endpoint(base_url, "products")
}

pub fn product_endpoint(base_url: &str, id: &str) -> String {
    endpoint(base_url, &format!("products/{}", urlencoding::encode(id)))
}

pub fn bulk_inventory_endpoint(base_url: &str) -> String {
    endpoint(base_url, "inventory/bulk")
}

pub fn orders_endpoint(base_url: &str) -> String {
    endpoint(base_url, "orders")
}

pub fn order_endpoint(base_url: &str, id: &str) -> String {
    endpoint(base_url, &format!("orders/{}", urlencoding::encode(id)))
}

pub fn order_status_endpoint(base_url: &str, id: &str) -> String {
    endpoint(base_url, &format!("orders/{}/status", urlencoding::encode(id)))
}

/// Append query parameters to a URL, percent-encoding the values
pub fn with_query(url: &str, query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let encoded: Vec<String> = query
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
    format!("{}?{}", url, encoded.join("&"))
}
