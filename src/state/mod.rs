//! State Management Module
//!
//! Seed election and the lifecycle hooks built on it.

pub mod election;
mod lifecycle;

pub use election::{Election, SeedElection, SeedRecord};
pub use lifecycle::{
    HookContext, HookOutcome, LifecycleCommand, LifecycleNode, SeedState, EXIT_FAILURE, EXIT_OK,
};
