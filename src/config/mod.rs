//! Configuration module for GpuFleet
//!
//! Provides CLI arguments, derived runtime settings, and loading of the
//! server list and CPU affinity files.

mod files;
mod settings;

pub use files::*;
pub use settings::*;
