//! Accelerator inventory
//!
//! Turns `nvidia-smi -q -x` output into per-device records.

mod inventory;

pub use inventory::*;
