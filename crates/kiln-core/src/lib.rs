//! Kiln Core
//!
//! Shared utilities for the kiln rendering engine: logging bootstrap and
//! plain geometry types used across the workspace.

pub mod geometry;
pub mod logging;
