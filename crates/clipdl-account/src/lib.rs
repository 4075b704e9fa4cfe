//! Account state for clipdl.
//!
//! This crate provides:
//! - An in-memory account cache with an adaptive validity window
//! - A REST client for the device/credit/license backend
//! - Retry with backoff and jitter around backend calls
//! - Optimistic credit accounting
//! - The credential store contract

pub mod backend;
pub mod cache;
pub mod credentials;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod service;

#[cfg(test)]
mod backend_tests;

pub use backend::{BackendClient, BackendConfig, DeviceStatus, DeviceUpdate, HttpBackend};
pub use cache::{AccountCache, AccountSnapshot};
pub use credentials::{CredentialStore, MemoryCredentialStore};
pub use error::{AccountError, AccountResult};
pub use retry::{with_retry, RetryConfig};
pub use service::AccountService;
