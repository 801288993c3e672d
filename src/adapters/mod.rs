// Implementations of the domain ports: persistence, file storage and the upstream tariff API.

pub mod memory;
pub mod sqlite;
pub mod storage;
pub mod tariff_api;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use storage::LocalStorage;
#[cfg(feature = "s3")]
pub use storage::S3Storage;
pub use tariff_api::{TariffApiConfig, TradeTariffClient};
