//! Outbound HTTP plumbing for the studio API.
//!
//! This module provides the `ApiClient` every authenticated call goes
//! through, the `AuthInterceptor` that watches response statuses for
//! repeated 401s, and the `ApiError` classification of failed calls.

pub mod client;
pub mod error;
pub mod interceptor;

pub use client::ApiClient;
pub use error::ApiError;
pub use interceptor::{AuthInterceptor, InterceptorSignal, Observation};
