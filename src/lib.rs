pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
pub mod utils;

pub use adapters::{LocalStorage, MemoryStore, SqliteStore, TariffApiConfig, TradeTariffClient};
#[cfg(feature = "s3")]
pub use adapters::S3Storage;
#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::AppConfig;

pub use core::resolver::{ResolvedDocument, RulesOfOriginResolver};
pub use utils::error::{HelpdeskError, Result};
