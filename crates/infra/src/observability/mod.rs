//! Logging setup
//!
//! Library code only emits `tracing` events; the binary installs the
//! subscriber once through [`init_tracing`].

pub mod logging;

pub use logging::{build_filter, init_tracing};
