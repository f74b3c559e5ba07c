pub mod chunk;
pub mod pipeline;
pub mod run;

// Re-export the pieces the worker binary wires together.
pub use pipeline::{Pipeline, PipelineSettings};
pub use run::{run_worker, WorkerSettings};
