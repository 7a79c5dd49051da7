//! Host-memory reference backend
//!
//! [`HostAllocator`] hands out regions backed by `Vec<u8>` and exposes their
//! contents, [`HostKernels`] replays kernels registered as plain functions
//! over byte slices. Together they let the pool run end to end without a GPU.

use std::collections::HashMap;
use std::sync::Arc;

use super::{DeviceAllocator, DeviceRegion, KernelReplay};
use crate::buffer::KernelDescriptor;
use crate::error::{internal_err, recompute_err, RematError, RematResult};

/// Allocation statistics for the host allocator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostAllocatorStats {
    pub total_allocations: usize,
    pub total_deallocations: usize,
    pub peak_bytes: usize,
}

/// `DeviceAllocator` backed by host byte vectors
///
/// An optional hard capacity models a device whose physical memory is smaller
/// than what the pool's budget would allow.
#[derive(Debug, Default)]
pub struct HostAllocator {
    regions: HashMap<u64, Vec<u8>>,
    next_id: u64,
    capacity: Option<usize>,
    allocated_bytes: usize,
    stats: HostAllocatorStats,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that refuses requests beyond `capacity` bytes in total
    pub fn with_capacity(capacity: usize) -> Self {
        HostAllocator {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    /// Contents of a live region
    pub fn read(&self, region: DeviceRegion) -> Option<&[u8]> {
        self.regions.get(&region.id()).map(|v| v.as_slice())
    }

    /// Overwrite a live region with `data`
    ///
    /// # Errors
    /// `InternalError` if the region is unknown or `data` has the wrong length.
    pub fn write(&mut self, region: DeviceRegion, data: &[u8]) -> RematResult<()> {
        let storage = self
            .regions
            .get_mut(&region.id())
            .ok_or_else(|| internal_err(&format!("write to unknown region {}", region.id())))?;
        if storage.len() != data.len() {
            return Err(internal_err(&format!(
                "write of {} bytes into region {} of {} bytes",
                data.len(),
                region.id(),
                storage.len()
            )));
        }
        storage.copy_from_slice(data);
        Ok(())
    }

    /// Bytes currently held by live regions
    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Number of live regions
    pub fn live_regions(&self) -> usize {
        self.regions.len()
    }

    pub fn stats(&self) -> &HostAllocatorStats {
        &self.stats
    }
}

impl DeviceAllocator for HostAllocator {
    fn allocate(&mut self, bytes: usize) -> RematResult<DeviceRegion> {
        if let Some(capacity) = self.capacity {
            if self.allocated_bytes + bytes > capacity {
                return Err(RematError::AllocationFailed(format!(
                    "host allocator capacity {} exceeded: {} in use, {} requested",
                    capacity, self.allocated_bytes, bytes
                )));
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.regions.insert(id, vec![0u8; bytes]);
        self.allocated_bytes += bytes;
        self.stats.total_allocations += 1;
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.allocated_bytes);

        tracing::trace!("host allocate region {} ({} bytes)", id, bytes);
        Ok(DeviceRegion::new(id, bytes))
    }

    fn deallocate(&mut self, region: DeviceRegion, bytes: usize) {
        match self.regions.remove(&region.id()) {
            Some(storage) => {
                if storage.len() != bytes {
                    tracing::warn!(
                        "region {} deallocated with size {} but holds {} bytes",
                        region.id(),
                        bytes,
                        storage.len()
                    );
                }
                self.allocated_bytes = self.allocated_bytes.saturating_sub(storage.len());
                self.stats.total_deallocations += 1;
            }
            None => tracing::warn!("double free of host region {}", region.id()),
        }
    }
}

/// Kernel body for [`HostKernels`]
///
/// Receives input contents and mutable output storage, in operand order.
/// Zero-sized and released buffers appear as empty slices.
pub type HostKernelFn =
    Arc<dyn Fn(&[&[u8]], &mut [&mut [u8]]) -> Result<(), String> + Send + Sync>;

/// Registry of host kernels keyed by operator kind
#[derive(Default, Clone)]
pub struct HostKernels {
    kernels: HashMap<String, HostKernelFn>,
    replay_counts: HashMap<String, usize>,
}

impl HostKernels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the body for an operator kind
    pub fn register<F>(&mut self, op_type: &str, body: F)
    where
        F: Fn(&[&[u8]], &mut [&mut [u8]]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.kernels.insert(op_type.to_string(), Arc::new(body));
    }

    /// Builder-style [`HostKernels::register`]
    pub fn with_kernel<F>(mut self, op_type: &str, body: F) -> Self
    where
        F: Fn(&[&[u8]], &mut [&mut [u8]]) -> Result<(), String> + Send + Sync + 'static,
    {
        self.register(op_type, body);
        self
    }

    /// Number of times `op_type` ran (first execution and replays)
    pub fn replay_count(&self, op_type: &str) -> usize {
        self.replay_counts.get(op_type).copied().unwrap_or(0)
    }

    pub fn total_replays(&self) -> usize {
        self.replay_counts.values().sum()
    }
}

impl std::fmt::Debug for HostKernels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.kernels.keys().collect();
        names.sort();
        f.debug_struct("HostKernels")
            .field("kernels", &names)
            .field("replay_counts", &self.replay_counts)
            .finish()
    }
}

impl KernelReplay<HostAllocator> for HostKernels {
    fn replay(
        &mut self,
        allocator: &mut HostAllocator,
        kernel: &KernelDescriptor,
        inputs: &[Option<DeviceRegion>],
        outputs: &[Option<DeviceRegion>],
    ) -> RematResult<()> {
        let body = self
            .kernels
            .get(kernel.op_type())
            .cloned()
            .ok_or_else(|| recompute_err(kernel.op_type(), "no host kernel registered"))?;

        // Copy inputs out so outputs can be borrowed mutably from the same allocator
        let input_data: Vec<Vec<u8>> = inputs
            .iter()
            .map(|region| match region {
                Some(region) => allocator
                    .read(*region)
                    .map(|bytes| bytes.to_vec())
                    .ok_or_else(|| {
                        recompute_err(
                            kernel.op_type(),
                            format!("input region {} is not live", region.id()),
                        )
                    }),
                None => Ok(Vec::new()),
            })
            .collect::<RematResult<_>>()?;
        let mut output_data: Vec<Vec<u8>> = outputs
            .iter()
            .map(|region| vec![0u8; region.map(|r| r.bytes()).unwrap_or(0)])
            .collect();

        {
            let input_refs: Vec<&[u8]> = input_data.iter().map(|v| v.as_slice()).collect();
            let mut output_refs: Vec<&mut [u8]> =
                output_data.iter_mut().map(|v| v.as_mut_slice()).collect();
            body(&input_refs, &mut output_refs)
                .map_err(|reason| recompute_err(kernel.op_type(), reason))?;
        }

        for (region, data) in outputs.iter().zip(output_data.iter()) {
            if let Some(region) = region {
                allocator.write(*region, data)?;
            }
        }

        *self
            .replay_counts
            .entry(kernel.op_type().to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}
