pub mod rest;
pub mod state;

// Re-export the handlers to make them easily accessible to the binary that
// builds the web server router.
pub use rest::{
    create_job_handler, download_artifact_handler, get_job_handler, list_jobs_handler,
};
