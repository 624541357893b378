//! Remote platform API
//!
//! The [`transport`] module owns the resilience wrapper every outbound call
//! goes through; [`client`] builds the platform's product, inventory and order
//! operations on top of it.

pub mod client;
pub mod constants;
pub mod error;
pub mod models;
pub mod resilience;
pub mod transport;

pub use client::PlatformClient;
pub use error::{ApiError, ErrorCategory, TransportError, TransportErrorKind};
pub use models::{
    BulkStockResult, Page, RemoteLineItem, RemoteOrder, RemoteProduct, RemoteProductInput,
    StockUpdate, StockUpdateFailure, UpsertOutcome,
};
pub use resilience::{MetricsCollector, ResilienceConfig, RetryConfig, TelemetrySink};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport, ResilientTransport};
