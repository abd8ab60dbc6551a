//! Shared HTTP plumbing for the remote adapters

pub mod client;
pub mod status;

pub use client::{HttpClient, HttpClientBuilder};
pub use status::{error_for_status, parse_retry_after};
