pub mod models;
pub mod pool;
pub mod repository;
pub mod listener;

pub use models::*;
pub use pool::DbPool;
pub use repository::Repository;
pub use listener::NotificationListener;
