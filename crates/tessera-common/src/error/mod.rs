//! Error handling for Tessera.
//!
//! This module provides the unified error type and result alias used
//! across all Tessera components.

mod engine;

pub use engine::EngineError;

/// Result type alias for Tessera operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
