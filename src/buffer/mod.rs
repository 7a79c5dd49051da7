//! Managed buffers and the recipes that recreate them
//!
//! Buffers live in a generational [`BufferArena`] and are referred to by
//! [`BufferId`]. A [`ComputeOperand`] captures the kernel and the input/output
//! handles of one executed operation; since it only stores handles, an operand
//! never keeps a buffer alive, and a handle whose buffer was released simply
//! stops resolving.

pub mod arena;
pub mod managed;
pub mod operand;

pub use arena::{BufferArena, BufferId};
pub use managed::{ManagedBuffer, RecomputeMode};
pub use operand::{ComputeOperand, KernelDescriptor};
