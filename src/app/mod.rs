pub mod reload;

pub use reload::{ReloadContext, ReloadJob, ReloadStep, ReloadStore};
