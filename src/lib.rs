// Re-export modules for the binaries and integration tests
pub mod aws {
    pub mod cli;

    pub use cli::{AwsCli, LockTable, ObjectStore, RemoteError};
}

pub mod formatters {
    pub mod output;
}

pub mod shared {
    pub mod audit;
    pub mod logging;
}

pub mod terraform {
    pub mod backend;
    pub mod engine;
    pub mod lock;
    pub mod state;
}

pub mod core {
    pub mod analyzer;
    pub mod backup;
    pub mod connectivity;
    pub mod error;
    pub mod migrator;
    pub mod tfbackend;
    pub mod unlock;
    pub mod verify;
}

pub mod hcp {
    pub mod client;

    pub use client::{HcpClient, HcpError};
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use core::backup::{BackupArtifact, BackupStore};
pub use core::error::MigrationError;
pub use core::migrator::{MigrationState, Migrator};
pub use core::tfbackend::TfBackend;
pub use terraform::engine::{StateEngine, TerraformCli};
pub use terraform::state::StateSnapshot;
