pub mod pipeline;
pub mod worker;

pub use pipeline::{PipelineConfig, SearchPipeline};
pub use worker::{SearchWorker, WorkerHandle};
