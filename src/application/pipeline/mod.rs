pub mod dedup_state_store;
pub mod engine;
pub mod symbol_pipeline;
pub mod worker;

pub use dedup_state_store::DedupStateStore;
pub use engine::DetectionEngine;
pub use symbol_pipeline::SymbolPipeline;
pub use worker::{PipelineCommand, WorkerStatus};
