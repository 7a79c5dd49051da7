//! Managed buffer state
//!
//! A `ManagedBuffer` only tracks bookkeeping: the region it owns, how to
//! recreate it and how it is used. Operations that touch the allocator or the
//! pool counters (evict, recompute, release) live on
//! [`crate::pool::TensorPool`].

use std::collections::HashSet;
use std::sync::Arc;

use super::operand::ComputeOperand;
use crate::backend::DeviceRegion;
use crate::disjoint::NodeId;
use crate::error::{precondition_err, RematResult};

/// Direction chosen by the reverse-cost heuristic for the last recompute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecomputeMode {
    #[default]
    Forward,
    Backward,
}

/// Device buffer under eviction management
#[derive(Debug)]
pub struct ManagedBuffer {
    bytes: usize,
    region: Option<DeviceRegion>,
    pin_count: usize,
    could_evict: bool,
    backprop_required: bool,
    compute_time: f64,
    last_access_time: u64,
    recompute_mode: RecomputeMode,
    producer: Option<Arc<ComputeOperand>>,
    consumers: Vec<Arc<ComputeOperand>>,
    group: NodeId,
}

impl ManagedBuffer {
    /// New non-resident buffer of `bytes`; compute time defaults to its size
    pub fn new(bytes: usize, group: NodeId) -> Self {
        ManagedBuffer {
            bytes,
            region: None,
            pin_count: 0,
            could_evict: true,
            backprop_required: false,
            compute_time: bytes as f64,
            last_access_time: 0,
            recompute_mode: RecomputeMode::Forward,
            producer: None,
            consumers: Vec::new(),
            group,
        }
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn region(&self) -> Option<DeviceRegion> {
        self.region
    }

    pub(crate) fn set_region(&mut self, region: DeviceRegion) {
        self.region = Some(region);
    }

    pub(crate) fn take_region(&mut self) -> Option<DeviceRegion> {
        self.region.take()
    }

    /// Resident when backed by a region; zero-sized buffers always are
    pub fn is_resident(&self) -> bool {
        self.region.is_some() || self.bytes == 0
    }

    pub fn pin_count(&self) -> usize {
        self.pin_count
    }

    pub fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }

    pub fn pin(&mut self) {
        self.pin_count += 1;
    }

    /// # Errors
    /// `PreconditionViolation` when the buffer is not pinned.
    pub fn unpin(&mut self) -> RematResult<()> {
        if self.pin_count == 0 {
            return Err(precondition_err("unpin called with zero pin count"));
        }
        self.pin_count -= 1;
        Ok(())
    }

    pub fn could_evict(&self) -> bool {
        self.could_evict
    }

    /// Permanently exclude this buffer from eviction
    pub fn forbid_eviction(&mut self) {
        self.could_evict = false;
    }

    /// Has a recipe with at least one input whose kind is not excluded
    pub fn is_evictable(&self, excluded_ops: &HashSet<String>) -> bool {
        match &self.producer {
            Some(op) => {
                !op.inputs().is_empty() && !excluded_ops.contains(op.op_type()) && self.could_evict
            }
            None => false,
        }
    }

    pub fn is_backprop_required(&self) -> bool {
        self.backprop_required
    }

    pub fn set_backprop_required(&mut self, required: bool) {
        self.backprop_required = required;
    }

    pub fn compute_time(&self) -> f64 {
        self.compute_time
    }

    /// Store a measured compute time; non-positive values fall back to the size
    pub fn set_compute_time(&mut self, compute_time: f64, multiplier: f64) {
        let base = if compute_time > 0.0 && compute_time.is_finite() {
            compute_time
        } else {
            self.bytes as f64
        };
        self.compute_time = base * multiplier;
    }

    pub fn last_access_time(&self) -> u64 {
        self.last_access_time
    }

    pub(crate) fn set_last_access_time(&mut self, clock: u64) {
        self.last_access_time = clock;
    }

    pub fn recompute_mode(&self) -> RecomputeMode {
        self.recompute_mode
    }

    pub(crate) fn set_recompute_mode(&mut self, mode: RecomputeMode) {
        self.recompute_mode = mode;
    }

    pub fn producer(&self) -> Option<&Arc<ComputeOperand>> {
        self.producer.as_ref()
    }

    /// Store the recipe that produced this buffer
    ///
    /// An input-less recipe cannot be replayed from anything cheaper than
    /// itself, so it permanently disables eviction.
    pub fn record_producer(&mut self, operand: Arc<ComputeOperand>, clock: u64) {
        self.last_access_time = clock;
        self.could_evict = self.could_evict && !operand.inputs().is_empty();
        self.producer = Some(operand);
    }

    pub fn consumers(&self) -> &[Arc<ComputeOperand>] {
        &self.consumers
    }

    pub fn append_consumer(&mut self, operand: Arc<ComputeOperand>) {
        self.consumers.push(operand);
    }

    pub fn group(&self) -> NodeId {
        self.group
    }

    pub(crate) fn set_group(&mut self, group: NodeId) {
        self.group = group;
    }
}
