//! Captured operations used to replay computation

use std::sync::Arc;

use super::arena::BufferId;

/// Shared, immutable description of a kernel
///
/// The operator kind drives eviction eligibility (excluded kinds) and the
/// compute-time multiplier table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelDescriptor {
    op_type: String,
}

impl KernelDescriptor {
    pub fn new(op_type: impl Into<String>) -> Self {
        KernelDescriptor {
            op_type: op_type.into(),
        }
    }

    /// Convenience constructor for the shared form stored in operands
    pub fn shared(op_type: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(op_type))
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }
}

/// Immutable record of one executed operation
///
/// Inputs and outputs are non-owning handles: resolving one against the
/// pool's arena yields nothing once that buffer has been released.
#[derive(Debug, Clone)]
pub struct ComputeOperand {
    kernel: Arc<KernelDescriptor>,
    inputs: Vec<BufferId>,
    outputs: Vec<BufferId>,
}

impl ComputeOperand {
    pub fn new(kernel: Arc<KernelDescriptor>, inputs: Vec<BufferId>, outputs: Vec<BufferId>) -> Self {
        ComputeOperand {
            kernel,
            inputs,
            outputs,
        }
    }

    pub fn kernel(&self) -> &KernelDescriptor {
        &self.kernel
    }

    pub fn op_type(&self) -> &str {
        self.kernel.op_type()
    }

    pub fn inputs(&self) -> &[BufferId] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[BufferId] {
        &self.outputs
    }
}
