//! rematforge - Dynamic Tensor Rematerialization
//!
//! A memory manager that lets an eager execution engine run past its device
//! memory budget. Buffers produced by recorded operations can be evicted when
//! an allocation does not fit and are recomputed by replaying their producer
//! when accessed again.
//!
//! The pool consumes a [`backend::DeviceAllocator`] and a
//! [`backend::KernelReplay`] implementation; [`backend::host`] provides both
//! on host memory.

#![allow(clippy::type_complexity)] // Kernel closure signatures

pub mod backend;
pub mod buffer;
pub mod cost;
pub mod disjoint;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pool;

pub use backend::{DeviceAllocator, DeviceRegion, HostAllocator, HostKernels, KernelReplay};
pub use buffer::{BufferId, ComputeOperand, KernelDescriptor, ManagedBuffer, RecomputeMode};
pub use cost::{CostEvaluator, Heuristic, OpCostTable};
pub use error::{ErrorCategory, RematError, RematResult};
pub use metrics::PoolMetrics;
pub use pool::{PoolConfig, PoolStats, SharedTensorPool, TensorPool};
