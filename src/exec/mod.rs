//! Command execution against local and remote targets
//!
//! - [`CommandRunner`]: runs one shell command under a wall-clock budget
//! - [`Target`]: classifies a server address and builds the concrete
//!   (optionally SSH-wrapped) command lines for every probe step

mod runner;
mod target;

pub use runner::*;
pub use target::*;

#[cfg(test)]
pub(crate) mod testing;
