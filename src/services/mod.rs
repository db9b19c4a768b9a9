//! Services layer - orchestration logic
//!
//! This module coordinates between domain logic and infrastructure.
//! Services use the analyzer and infrastructure adapters to perform I/O.

pub mod backup_manager;
pub mod execution_engine;
pub mod registry;
pub mod status_ledger;

// Re-export commonly used types
pub use backup_manager::BackupManager;
pub use execution_engine::{require_capability, BatchOptions, BatchReport, ExecutionEngine};
pub use registry::Registry;
pub use status_ledger::{LedgerEntry, StatusLedger};
