//! Thread-shareable pool handle
//!
//! Every pool operation runs under one mutex, so allocation, eviction and
//! recomputation are serialized. Pinning is what protects in-flight operands
//! between two calls.

use std::sync::{Arc, Mutex, MutexGuard};

use super::stats::PoolStats;
use super::tensor_pool::TensorPool;
use crate::backend::{DeviceAllocator, DeviceRegion, KernelReplay};
use crate::buffer::{BufferId, KernelDescriptor};
use crate::error::RematResult;

/// Cloneable handle to a [`TensorPool`] behind a mutex
pub struct SharedTensorPool<A: DeviceAllocator, K: KernelReplay<A>> {
    inner: Arc<Mutex<TensorPool<A, K>>>,
}

impl<A: DeviceAllocator, K: KernelReplay<A>> Clone for SharedTensorPool<A, K> {
    fn clone(&self) -> Self {
        SharedTensorPool {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: DeviceAllocator, K: KernelReplay<A>> SharedTensorPool<A, K> {
    pub fn new(pool: TensorPool<A, K>) -> Self {
        SharedTensorPool {
            inner: Arc::new(Mutex::new(pool)),
        }
    }

    /// Lock the pool for a sequence of operations
    ///
    /// # Errors
    /// `LockPoisoned` if a previous holder panicked.
    pub fn lock(&self) -> RematResult<MutexGuard<'_, TensorPool<A, K>>> {
        Ok(self.inner.lock()?)
    }

    /// Run `f` with exclusive access to the pool
    pub fn with_pool<R>(
        &self,
        f: impl FnOnce(&mut TensorPool<A, K>) -> RematResult<R>,
    ) -> RematResult<R> {
        let mut pool = self.lock()?;
        f(&mut pool)
    }

    pub fn try_allocate(&self, bytes: usize) -> RematResult<DeviceRegion> {
        self.with_pool(|pool| pool.try_allocate(bytes))
    }

    pub fn ensure_resident(&self, id: BufferId) -> RematResult<()> {
        self.with_pool(|pool| pool.ensure_resident(id))
    }

    pub fn pin(&self, id: BufferId) -> RematResult<()> {
        self.with_pool(|pool| pool.pin(id))
    }

    pub fn unpin(&self, id: BufferId) -> RematResult<()> {
        self.with_pool(|pool| pool.unpin(id))
    }

    pub fn dispatch(
        &self,
        kernel: Arc<KernelDescriptor>,
        inputs: &[BufferId],
        output_bytes: &[usize],
        compute_time: Option<f64>,
    ) -> RematResult<Vec<BufferId>> {
        self.with_pool(|pool| pool.dispatch(kernel, inputs, output_bytes, compute_time))
    }

    pub fn release(&self, id: BufferId) -> RematResult<()> {
        self.with_pool(|pool| pool.release(id))
    }

    pub fn stats(&self) -> RematResult<PoolStats> {
        self.with_pool(|pool| Ok(pool.stats()))
    }
}
