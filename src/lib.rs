//! Do I Need That? - pauses purchase-commit clicks on shopping pages and
//! asks the shopper to reflect before the purchase goes through.

pub mod alternatives;
pub mod config;
pub mod database;
pub mod detector;
pub mod error;
pub mod gate;
pub mod interceptor;
pub mod models;
pub mod page;
pub mod presenter;
pub mod resume;
pub mod sites;
pub mod traits;

pub use config::Settings;
pub use database::{Database, MemoryStore};
pub use error::ResumeError;
pub use gate::InterceptionGate;
pub use interceptor::Interceptor;
pub use page::SnapshotPage;
