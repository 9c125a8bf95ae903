pub mod audit;
pub mod config;
pub mod context;
pub mod crypto;
pub mod database;
pub mod error;
pub mod events;

pub use context::AuditContext;
pub use error::AuditError;
