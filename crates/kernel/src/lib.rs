//! Persistent code-execution kernels.
//!
//! Each notebook gets one long-lived interpreter worker whose namespace
//! is shared across cell executions. [`KernelRegistry`] owns the
//! notebook-id → [`Kernel`] map and evicts idle entries from a
//! background sweeper.

mod kernel;
mod registry;
mod worker;

pub use kernel::{ExecuteOutcome, Kernel};
pub use registry::{spawn_sweeper, KernelRegistry};
