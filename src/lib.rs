pub mod adapter;
pub mod client_pool;
pub mod config;
pub mod convert;
pub mod duration;
pub mod error;
pub mod fakes;
pub mod host_pool;
pub mod logger;
pub mod migrate;
pub mod progress;
pub mod relocate;
pub mod thumbprint;
pub mod vcenter;
pub mod vim;
pub mod vm_migrator;
pub mod vm_source;
pub mod worker;

pub use error::MigrateError;

pub type Result<T> = std::result::Result<T, MigrateError>;

// Convenience re-exports for the main entry points
pub use client_pool::ClientPool;
pub use config::MigrationConfig;
pub use host_pool::{HostPool, HostPoolConfig};
pub use migrate::FoundationMigrator;
pub use vcenter::{Client, TargetSpec, Vm};
