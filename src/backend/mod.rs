//! Device seams consumed by the pool
//!
//! The pool never touches device memory itself. It asks a [`DeviceAllocator`]
//! for regions and a [`KernelReplay`] implementation to run captured kernels
//! over them. The host backend in [`host`] implements both on plain byte
//! vectors and serves as the reference for device backends.

pub mod host;

pub use host::{HostAllocator, HostAllocatorStats, HostKernelFn, HostKernels};

use crate::buffer::KernelDescriptor;
use crate::error::RematResult;

/// Opaque handle to a device memory region
///
/// Handles are only meaningful to the allocator that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceRegion {
    id: u64,
    bytes: usize,
}

impl DeviceRegion {
    pub fn new(id: u64, bytes: usize) -> Self {
        DeviceRegion { id, bytes }
    }

    /// Allocator-specific region identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Size of the region in bytes
    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

/// Device allocator consumed by the pool
pub trait DeviceAllocator {
    /// Allocate `bytes` of device memory
    ///
    /// # Errors
    /// `RematError::AllocationFailed` if the device cannot satisfy the request.
    fn allocate(&mut self, bytes: usize) -> RematResult<DeviceRegion>;

    /// Return a region previously obtained from [`DeviceAllocator::allocate`]
    fn deallocate(&mut self, region: DeviceRegion, bytes: usize);
}

/// Kernel replay capability
///
/// Given a captured kernel and resident input regions, (re)computes the
/// outputs into the provided output regions. Implementations must be
/// deterministic: replaying the same kernel over the same inputs writes
/// bit-identical outputs.
///
/// `None` in `inputs` or `outputs` stands for a zero-sized buffer or an output
/// whose buffer has been released; kernels must not expect storage for it.
pub trait KernelReplay<A: DeviceAllocator> {
    fn replay(
        &mut self,
        allocator: &mut A,
        kernel: &KernelDescriptor,
        inputs: &[Option<DeviceRegion>],
        outputs: &[Option<DeviceRegion>],
    ) -> RematResult<()>;
}
