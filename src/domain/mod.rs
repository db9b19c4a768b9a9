//! Domain layer - pure business logic
//!
//! This module contains business logic with no external I/O.
//! Types and functions here can be unit tested without mocking.

pub mod execution;
pub mod migration;
pub mod policy;

// Re-export commonly used types
pub use execution::{
    ErrorDetail, ExecutionResult, ExecutionStatus, FailureReason, Operation, Phase,
};
pub use migration::{Capability, Category, EntryPoint, EntryTarget, MigrationDescriptor};
pub use policy::{Environment, ExecutionPolicy, PolicyOverrides};
