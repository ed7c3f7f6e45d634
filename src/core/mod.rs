//! Core orchestration logic.
//!
//! This module contains:
//! - RegistryService: validation and cache-aside over the task store
//! - TeammateDirectory: reference lists and player search

pub mod service;
pub mod teammates;

// Re-export commonly used types
pub use service::{RegistryService, ServiceResult};
pub use teammates::TeammateDirectory;
