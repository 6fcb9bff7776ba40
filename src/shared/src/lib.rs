//! Shared types for the Scadenze platform

pub mod types;

// Export all types from types module
pub use types::*;
