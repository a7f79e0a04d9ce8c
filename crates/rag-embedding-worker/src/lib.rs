pub mod config;
pub mod database;
pub mod document;
pub mod embedding;
pub mod utils;
pub mod worker;

pub use config::Settings;
pub use utils::error::WorkerError;
