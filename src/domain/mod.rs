pub mod clips;
pub mod render_jobs;
