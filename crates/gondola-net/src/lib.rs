#![forbid(unsafe_code)]

//! # gondola-net
//!
//! HTTP layer for the gondola update runtime.
//!
//! [`HttpClient`] wraps `reqwest` with the timeout/retry policy the engine
//! configures. The [`protocol`] module implements the update server wire
//! format: a multipart `manifest`/`directive` response body plus the
//! `expo-manifest-filters` and `expo-server-defined-headers` response
//! headers. Either part may be absent; a response with neither is treated
//! as "no update available".

mod client;
mod error;
pub mod protocol;
mod retry;
mod types;

pub use client::{HttpClient, HttpResponse};
pub use error::{NetError, NetResult, ProtocolError};
pub use retry::retrying;
pub use types::{Headers, NetOptions, RetryPolicy};
