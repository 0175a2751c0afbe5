pub mod config;
pub mod error;
pub mod fetch;
pub mod load;
pub mod pipeline;
pub mod store;
pub mod task;
pub mod transform;
pub mod warehouse;

pub use config::PipelineConfig;
pub use error::{EtlError, RecordMalformed};
pub use pipeline::RunSummary;
