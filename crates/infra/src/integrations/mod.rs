//! External service integrations

pub mod graph;
pub mod sink;

pub use graph::{GraphIdentity, GraphMailbox};
pub use sink::HttpSink;
