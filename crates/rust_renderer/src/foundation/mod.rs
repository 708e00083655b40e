//! Foundation module - Core utilities shared by the renderer
//!
//! - Logging utilities

pub mod logging;
