//! Fleet reporting
//!
//! Orchestrates the per-server probe steps and renders the result.

mod render;
mod reporter;

pub use render::*;
pub use reporter::*;
