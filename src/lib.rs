pub mod api;
pub mod app;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod orders;
pub mod store;
pub mod sync;
