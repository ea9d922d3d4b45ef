//! Kiln - Staged Artifact Build Pipeline
//!
//! Turns a versioned source tree plus a pinned dependency manifest into a
//! single runnable service image, reusing dependency and compilation caches
//! across repeated and concurrent builds without corruption.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod exec;
pub mod pipeline;

pub use error::{KilnError, KilnResult};
