pub mod captions;
pub mod cloudflare;
pub mod error;
pub mod job_store;
pub mod pipeline;
pub mod render_task;
pub mod retry;
pub mod session;

#[cfg(test)]
pub mod testing;
