//! Durable delivery of detected items to the sink

pub mod payload;
pub mod pipeline;
pub mod ports;

pub use payload::{build_payload, classify_response};
pub use pipeline::{PipelineSettings, TransmissionPipeline};
pub use ports::{SinkApi, SinkResponse, TransmissionRepository};
