//! SQLite store implementing the core persistence ports

mod codec;
pub mod account_repository;
pub mod item_repository;
pub mod manager;
pub mod transmission_repository;

pub use account_repository::SqliteAccountRepository;
pub use item_repository::SqliteItemRepository;
pub use manager::{DbConnection, DbManager};
pub use transmission_repository::SqliteTransmissionRepository;
