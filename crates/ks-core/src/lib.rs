pub mod concurrency;
pub mod config;
pub mod errors;
pub mod files;
pub mod ids;

pub use concurrency::{Context, WorkerQueue, MAX_WORKERS};
pub use config::Config;
pub use errors::{Error, Result};
