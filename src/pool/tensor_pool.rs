//! Tensor pool: budget accounting, victim selection and rematerialization
//!
//! The pool owns every managed buffer of one execution context. Allocation
//! requests that would exceed the budget evict the lowest-scoring candidate
//! under the configured heuristic until the request fits. Accessing an
//! evicted buffer replays its recorded producer, recomputing evicted inputs
//! first.
//!
//! All methods take `&mut self`; wrap the pool in
//! [`crate::pool::SharedTensorPool`] to share it between threads.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::config::PoolConfig;
use super::stats::PoolStats;
use crate::backend::{DeviceAllocator, DeviceRegion, KernelReplay};
use crate::buffer::{
    BufferArena, BufferId, ComputeOperand, KernelDescriptor, ManagedBuffer, RecomputeMode,
};
use crate::cost::{CostContext, CostEvaluator};
use crate::disjoint::{DisjointSet, NodeId};
use crate::error::{precondition_err, recompute_err, RematError, RematResult};
use crate::metrics::PoolMetrics;

/// Per-operation debug event, emitted only when the pool runs with `debug`
macro_rules! dtr_debug {
    ($pool:expr, $($arg:tt)*) => {
        if $pool.config.debug {
            tracing::debug!($($arg)*);
        }
    };
}

/// Eviction candidate predicate: resident, non-empty, unpinned, replayable
fn is_candidate(buffer: &ManagedBuffer, excluded: &HashSet<String>) -> bool {
    buffer.bytes() > 0
        && buffer.region().is_some()
        && !buffer.is_pinned()
        && buffer.is_evictable(excluded)
}

/// Memory manager for buffers that can be evicted and recomputed
pub struct TensorPool<A: DeviceAllocator, K: KernelReplay<A>> {
    config: PoolConfig,
    allocator: A,
    kernels: K,
    buffers: BufferArena,
    groups: DisjointSet,
    /// Eviction candidates in registration order
    members: Vec<BufferId>,
    excluded: HashSet<String>,
    resident_bytes: usize,
    peak_resident_bytes: usize,
    clock: u64,
    eviction_count: u64,
    recompute_count: u64,
    rng: ChaCha8Rng,
    metrics: Option<Arc<PoolMetrics>>,
}

impl<A: DeviceAllocator, K: KernelReplay<A>> TensorPool<A, K> {
    /// Build a pool over an allocator and a kernel replay capability
    ///
    /// # Errors
    /// `InvalidConfiguration` if `config` does not validate.
    pub fn new(config: PoolConfig, allocator: A, kernels: K) -> RematResult<Self> {
        config.validate()?;

        let rng = match config.rng_seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let excluded = config.excluded_ops.iter().cloned().collect();

        tracing::info!(
            "Created tensor pool: budget={} bytes, heuristic={}",
            config.budget_bytes,
            config.heuristic
        );

        Ok(TensorPool {
            config,
            allocator,
            kernels,
            buffers: BufferArena::new(),
            groups: DisjointSet::new(),
            members: Vec::new(),
            excluded,
            resident_bytes: 0,
            peak_resident_bytes: 0,
            clock: 0,
            eviction_count: 0,
            recompute_count: 0,
            rng,
            metrics: None,
        })
    }

    /// Attach a metrics sink
    pub fn with_metrics(mut self, metrics: Arc<PoolMetrics>) -> Self {
        metrics.set_budget_bytes(self.config.budget_bytes);
        metrics.set_resident_bytes(self.resident_bytes);
        self.metrics = Some(metrics);
        self
    }

    // ========== Accessors ==========

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn budget(&self) -> usize {
        self.config.budget_bytes
    }

    pub fn resident_bytes(&self) -> usize {
        self.resident_bytes
    }

    pub fn peak_resident_bytes(&self) -> usize {
        self.peak_resident_bytes
    }

    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn recompute_count(&self) -> u64 {
        self.recompute_count
    }

    /// Logical clock; advances on every access
    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn members(&self) -> &[BufferId] {
        &self.members
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn kernels(&self) -> &K {
        &self.kernels
    }

    pub fn groups(&self) -> &DisjointSet {
        &self.groups
    }

    pub fn buffer(&self, id: BufferId) -> RematResult<&ManagedBuffer> {
        self.buffers.get(id).ok_or(RematError::BufferNotFound(id))
    }

    fn buffer_mut(&mut self, id: BufferId) -> RematResult<&mut ManagedBuffer> {
        self.buffers.get_mut(id).ok_or(RematError::BufferNotFound(id))
    }

    /// Whether `id` still resolves to a live buffer
    pub fn contains(&self, id: BufferId) -> bool {
        self.buffers.contains(id)
    }

    pub fn is_resident(&self, id: BufferId) -> RematResult<bool> {
        Ok(self.buffer(id)?.is_resident())
    }

    /// Current device region of `id`, if resident
    pub fn region(&self, id: BufferId) -> RematResult<Option<DeviceRegion>> {
        Ok(self.buffer(id)?.region())
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            heuristic: self.config.heuristic,
            budget_bytes: self.config.budget_bytes,
            resident_bytes: self.resident_bytes,
            peak_resident_bytes: self.peak_resident_bytes,
            eviction_count: self.eviction_count,
            recompute_count: self.recompute_count,
            member_count: self.members.len(),
            clock: self.clock,
        }
    }

    // ========== Membership ==========

    /// Make `id` an eviction candidate; registering twice is a no-op
    pub fn register(&mut self, id: BufferId) -> RematResult<()> {
        if !self.buffers.contains(id) {
            return Err(RematError::BufferNotFound(id));
        }
        if !self.members.contains(&id) {
            self.members.push(id);
        }
        Ok(())
    }

    /// Drop `id` from the candidates; returns whether it was registered
    pub fn deregister(&mut self, id: BufferId) -> bool {
        let before = self.members.len();
        self.members.retain(|member| *member != id);
        before != self.members.len()
    }

    fn insert_buffer(&mut self, bytes: usize, region: Option<DeviceRegion>) -> BufferId {
        let group = self.groups.make_set(bytes as f64);
        let mut buffer = ManagedBuffer::new(bytes, group);
        if let Some(region) = region {
            buffer.set_region(region);
        }
        let id = self.buffers.insert(buffer);
        self.members.push(id);
        id
    }

    /// Allocate a resident buffer with no recipe (a leaf such as a weight or
    /// a user input); leaves are never evicted
    pub fn materialize(&mut self, bytes: usize) -> RematResult<BufferId> {
        let region = if bytes > 0 {
            Some(self.try_allocate(bytes)?)
        } else {
            None
        };
        let id = self.insert_buffer(bytes, region);
        self.touch(id)?;
        dtr_debug!(self, "materialized {} ({} bytes)", id, bytes);
        Ok(id)
    }

    // ========== Budget ==========

    /// Allocate `bytes` under the budget, evicting victims while it does not fit
    ///
    /// The returned region is accounted as resident until it is handed back
    /// with [`TensorPool::release_region`] or attached to a buffer that is
    /// later evicted or released.
    ///
    /// # Errors
    /// `ResourceExhausted` when no candidate remains and the request still
    /// does not fit; allocator errors are propagated.
    pub fn try_allocate(&mut self, bytes: usize) -> RematResult<DeviceRegion> {
        let budget = self.config.budget_bytes;
        let mut victims = 0u64;

        if bytes > budget {
            return Err(self.exhausted(bytes));
        }

        while self.resident_bytes + bytes > budget {
            match self.select_victim()? {
                Some(victim) => {
                    self.evict(victim)?;
                    victims += 1;
                }
                None => return Err(self.exhausted(bytes)),
            }
        }

        let region = self.allocator.allocate(bytes)?;
        self.resident_bytes += bytes;
        self.peak_resident_bytes = self.peak_resident_bytes.max(self.resident_bytes);

        if victims > 0 {
            tracing::debug!(
                "evicted {} buffers to allocate {} bytes ({} of {} resident)",
                victims,
                bytes,
                self.resident_bytes,
                budget
            );
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_allocation(victims, self.resident_bytes);
        }
        Ok(region)
    }

    fn exhausted(&self, bytes: usize) -> RematError {
        tracing::warn!(
            "cannot fit {} bytes: {} of {} resident and no evictable buffer left",
            bytes,
            self.resident_bytes,
            self.config.budget_bytes
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_allocation_failure();
        }
        RematError::ResourceExhausted {
            requested: bytes,
            resident: self.resident_bytes,
            budget: self.config.budget_bytes,
        }
    }

    /// Hand back a region obtained from [`TensorPool::try_allocate`] that was
    /// never attached to a buffer
    pub fn release_region(&mut self, region: DeviceRegion) {
        let bytes = region.bytes();
        self.allocator.deallocate(region, bytes);
        self.resident_bytes = self.resident_bytes.saturating_sub(bytes);
        if let Some(metrics) = &self.metrics {
            metrics.set_resident_bytes(self.resident_bytes);
        }
    }

    /// Score every candidate and return the one with the lowest cost
    ///
    /// Ties go to the earliest registered candidate. Scores are computed by a
    /// fresh [`CostEvaluator`], so recursive costs are memoized for this
    /// search only.
    pub fn select_victim(&mut self) -> RematResult<Option<BufferId>> {
        let heuristic = self.config.heuristic;
        let ctx = self.cost_context();
        let mut evaluator = CostEvaluator::new(&self.buffers, &self.groups, ctx);

        let mut best: Option<(BufferId, f64)> = None;
        let mut modes: Vec<(BufferId, RecomputeMode)> = Vec::new();

        for &id in &self.members {
            let Some(buffer) = self.buffers.get(id) else {
                continue;
            };
            if !is_candidate(buffer, &self.excluded) {
                continue;
            }

            let score = evaluator.cost(id, heuristic, &mut self.rng)?;
            modes.push((id, score.mode));
            if score.cost.is_nan() {
                tracing::warn!("{} scored NaN under {}, skipped", id, heuristic);
                continue;
            }
            dtr_debug!(self, "cost of {} under {}: {}", id, heuristic, score.cost);

            match best {
                Some((_, lowest)) if score.cost >= lowest => {}
                _ => best = Some((id, score.cost)),
            }
        }
        drop(evaluator);

        for (id, mode) in modes {
            if let Some(buffer) = self.buffers.get_mut(id) {
                buffer.set_recompute_mode(mode);
            }
        }

        Ok(best.map(|(id, _)| id))
    }

    fn cost_context(&self) -> CostContext {
        CostContext {
            clock: self.clock,
            budget: self.config.budget_bytes,
            resident_bytes: self.resident_bytes,
            backprop_filter: self.config.backprop_filter,
        }
    }

    /// Evaluator over the current pool state, for inspecting scores
    pub fn cost_evaluator(&self) -> CostEvaluator<'_> {
        CostEvaluator::new(&self.buffers, &self.groups, self.cost_context())
    }

    /// Score one buffer under the configured heuristic
    pub fn cost(&mut self, id: BufferId) -> RematResult<f64> {
        let heuristic = self.config.heuristic;
        let ctx = self.cost_context();
        let mut evaluator = CostEvaluator::new(&self.buffers, &self.groups, ctx);
        Ok(evaluator.cost(id, heuristic, &mut self.rng)?.cost)
    }

    // ========== Buffer state ==========

    /// Free the region of `id`, keeping its recipe for later recomputation
    ///
    /// Zero-sized buffers have nothing to free and are left untouched, as is
    /// a buffer that is already evicted. Both still have to pass the pin and
    /// recipe checks.
    ///
    /// # Errors
    /// `PreconditionViolation` if the buffer is pinned or has no usable recipe.
    pub fn evict(&mut self, id: BufferId) -> RematResult<()> {
        let buffer = self.buffers.get_mut(id).ok_or(RematError::BufferNotFound(id))?;
        if buffer.is_pinned() {
            return Err(precondition_err(&format!("cannot evict pinned buffer {}", id)));
        }
        if !buffer.is_evictable(&self.excluded) {
            return Err(precondition_err(&format!("buffer {} is not evictable", id)));
        }
        let bytes = buffer.bytes();
        if bytes == 0 {
            dtr_debug!(self, "evict {} skipped: zero-sized", id);
            return Ok(());
        }
        let Some(region) = buffer.take_region() else {
            return Ok(());
        };

        self.allocator.deallocate(region, bytes);
        self.resident_bytes = self.resident_bytes.saturating_sub(bytes);
        self.eviction_count += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_eviction(self.resident_bytes);
        }
        dtr_debug!(self, "evicted {} ({} bytes)", id, bytes);

        self.update_after_evict(id);
        Ok(())
    }

    /// Merge the evicted buffer's group with the groups of its evicted
    /// producer inputs and siblings
    fn update_after_evict(&mut self, id: BufferId) {
        let Some(buffer) = self.buffers.get(id) else {
            return;
        };
        let target = buffer.group();
        let neighbors: Vec<NodeId> = match buffer.producer() {
            Some(producer) => producer
                .inputs()
                .iter()
                .chain(producer.outputs().iter())
                .filter(|other| **other != id)
                .filter_map(|other| self.buffers.get(*other))
                .filter(|other| !other.is_resident())
                .map(|other| other.group())
                .collect(),
            None => Vec::new(),
        };

        for node in neighbors {
            self.groups.union(node, target);
        }
    }

    /// Give a rematerialized buffer its own group again
    fn update_after_compute(&mut self, id: BufferId) -> RematResult<()> {
        let buffer = self.buffer(id)?;
        let (group, compute_time) = (buffer.group(), buffer.compute_time());
        let fresh = self.groups.detach(group, compute_time, compute_time);
        self.buffer_mut(id)?.set_group(fresh);
        Ok(())
    }

    /// Record an access: stamp the buffer with the clock, then advance it
    pub fn touch(&mut self, id: BufferId) -> RematResult<()> {
        let clock = self.clock;
        self.buffer_mut(id)?.set_last_access_time(clock);
        self.clock += 1;
        dtr_debug!(self, "access time of {} set to {}", id, clock);
        Ok(())
    }

    pub fn pin(&mut self, id: BufferId) -> RematResult<()> {
        let buffer = self.buffer_mut(id)?;
        buffer.pin();
        let count = buffer.pin_count();
        dtr_debug!(self, "pinned {}, {} to {}", id, count - 1, count);
        Ok(())
    }

    pub fn unpin(&mut self, id: BufferId) -> RematResult<()> {
        let buffer = self.buffer_mut(id)?;
        buffer.unpin()?;
        let count = buffer.pin_count();
        dtr_debug!(self, "unpinned {}, {} to {}", id, count + 1, count);
        Ok(())
    }

    /// Unpin every handle in `ids`, reporting the first failure
    fn unpin_all(&mut self, ids: &[BufferId]) -> RematResult<()> {
        let mut first_err = None;
        for id in ids {
            if let Err(e) = self.unpin(*id) {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Store the recipe that produced `id`
    pub fn record_producer(&mut self, id: BufferId, operand: Arc<ComputeOperand>) -> RematResult<()> {
        let clock = self.clock;
        dtr_debug!(self, "producer of {} set to '{}'", id, operand.op_type());
        self.buffer_mut(id)?.record_producer(operand, clock);
        Ok(())
    }

    /// Record a downstream use of `id`
    pub fn append_consumer(&mut self, id: BufferId, operand: Arc<ComputeOperand>) -> RematResult<()> {
        self.buffer_mut(id)?.append_consumer(operand);
        Ok(())
    }

    /// Record how long the producer of `id` took
    ///
    /// Non-positive times fall back to the buffer size. The operator-kind
    /// multiplier is applied and the buffer's group total follows the change.
    pub fn set_compute_time(&mut self, id: BufferId, compute_time: f64) -> RematResult<()> {
        let buffer = self.buffer(id)?;
        let multiplier = buffer
            .producer()
            .map(|op| self.config.op_costs.multiplier(op.op_type()))
            .unwrap_or(1.0);
        let old = buffer.compute_time();
        let group = buffer.group();

        let buffer = self.buffer_mut(id)?;
        buffer.set_compute_time(compute_time, multiplier);
        let new = buffer.compute_time();
        self.groups.adjust(group, new - old);
        dtr_debug!(self, "compute time of {} set to {}", id, new);
        Ok(())
    }

    /// Flag `id` as an input of a gradient computation
    pub fn mark_backprop_required(&mut self, id: BufferId) -> RematResult<()> {
        self.buffer_mut(id)?.set_backprop_required(true);
        Ok(())
    }

    // ========== Rematerialization ==========

    /// Make `id` resident, recomputing it (and any evicted ancestors) if
    /// needed, then record the access
    ///
    /// Within one call, residency is the only record of what was already
    /// brought back. An ancestor recomputed for one input can be evicted
    /// again while a later input is being allocated, and is then replayed a
    /// second time. Holding pins on every recomputed ancestor would avoid the
    /// replay but turn deep chains into `ResourceExhausted`.
    ///
    /// # Errors
    /// `RecomputeFailure` if a replay fails or an ancestor was released;
    /// `ResourceExhausted` if the recomputed buffers cannot fit.
    pub fn ensure_resident(&mut self, id: BufferId) -> RematResult<()> {
        let mut in_progress = HashSet::new();
        self.rematerialize(id, &mut in_progress)?;
        self.touch(id)
    }

    fn rematerialize(&mut self, id: BufferId, in_progress: &mut HashSet<BufferId>) -> RematResult<()> {
        let buffer = self.buffer(id)?;
        if buffer.is_resident() {
            return Ok(());
        }
        let producer = buffer
            .producer()
            .cloned()
            .ok_or_else(|| precondition_err(&format!("evicted buffer {} has no recipe", id)))?;
        if !in_progress.insert(id) {
            return Err(recompute_err(
                producer.op_type(),
                format!("{} depends on itself", id),
            ));
        }

        let mut pinned = Vec::new();
        let result = self.replay_producer(&producer, in_progress, &mut pinned);
        let unpinned = self.unpin_all(&pinned);
        in_progress.remove(&id);
        result?;
        unpinned
    }

    /// Bring inputs back, allocate missing outputs and replay `producer`
    ///
    /// Every handle pinned along the way is pushed to `pinned` so the caller
    /// can release it whatever the outcome.
    fn replay_producer(
        &mut self,
        producer: &Arc<ComputeOperand>,
        in_progress: &mut HashSet<BufferId>,
        pinned: &mut Vec<BufferId>,
    ) -> RematResult<()> {
        let kernel = producer.op_type();

        for input in producer.inputs() {
            if !self.buffers.contains(*input) {
                return Err(recompute_err(
                    kernel,
                    format!("input {} was released", input),
                ));
            }
            self.rematerialize(*input, in_progress)?;
            self.pin(*input)?;
            pinned.push(*input);
        }

        // Pin resident siblings first so allocating the others cannot evict them
        let mut missing = Vec::new();
        for output in producer.outputs() {
            let Some(buffer) = self.buffers.get(*output) else {
                continue;
            };
            if buffer.is_resident() {
                self.pin(*output)?;
                pinned.push(*output);
            } else {
                missing.push(*output);
            }
        }

        let mut allocated = Vec::new();
        for output in &missing {
            let bytes = self.buffer(*output)?.bytes();
            match self.try_allocate(bytes) {
                Ok(region) => {
                    self.buffer_mut(*output)?.set_region(region);
                    allocated.push(*output);
                    self.pin(*output)?;
                    pinned.push(*output);
                }
                Err(e) => {
                    self.discard_regions(&allocated);
                    return Err(e);
                }
            }
        }

        let inputs = self.regions_of(producer.inputs());
        let outputs = self.regions_of(producer.outputs());
        let start = Instant::now();
        let replayed = self
            .kernels
            .replay(&mut self.allocator, producer.kernel(), &inputs, &outputs)
            .map_err(|e| match e {
                RematError::RecomputeFailure { .. } => e,
                other => recompute_err(kernel, other.to_string()),
            });
        if let Err(e) = replayed {
            tracing::warn!("recompute of '{}' failed: {}", kernel, e);
            self.discard_regions(&allocated);
            return Err(e);
        }
        let elapsed = start.elapsed().as_secs_f64();

        let clock = self.clock;
        for output in &allocated {
            self.recompute_count += 1;
            self.buffer_mut(*output)?.set_last_access_time(clock);
            self.update_after_compute(*output)?;
            if let Some(metrics) = &self.metrics {
                metrics.record_recompute(elapsed);
            }
            dtr_debug!(self, "recomputed {} with '{}'", output, kernel);
        }
        Ok(())
    }

    fn regions_of(&self, ids: &[BufferId]) -> Vec<Option<DeviceRegion>> {
        ids.iter()
            .map(|id| self.buffers.get(*id).and_then(|b| b.region()))
            .collect()
    }

    /// Return regions allocated for a replay that did not complete
    fn discard_regions(&mut self, ids: &[BufferId]) {
        for id in ids {
            let region = self.buffers.get_mut(*id).and_then(|b| b.take_region());
            if let Some(region) = region {
                self.release_region(region);
            }
        }
    }

    /// Run `kernel` for the first time and record it as the producer of its
    /// outputs
    ///
    /// Inputs are made resident and pinned for the duration of the call;
    /// outputs are allocated through [`TensorPool::try_allocate`]. When
    /// `compute_time` is `None` the kernel is timed, in microseconds.
    /// Returns the handles of the new output buffers.
    pub fn dispatch(
        &mut self,
        kernel: Arc<KernelDescriptor>,
        inputs: &[BufferId],
        output_bytes: &[usize],
        compute_time: Option<f64>,
    ) -> RematResult<Vec<BufferId>> {
        let mut pinned = Vec::new();
        let result = self.dispatch_pinned(kernel, inputs, output_bytes, compute_time, &mut pinned);
        let unpinned = self.unpin_all(&pinned);
        let outputs = result?;
        unpinned?;
        Ok(outputs)
    }

    fn dispatch_pinned(
        &mut self,
        kernel: Arc<KernelDescriptor>,
        inputs: &[BufferId],
        output_bytes: &[usize],
        compute_time: Option<f64>,
        pinned: &mut Vec<BufferId>,
    ) -> RematResult<Vec<BufferId>> {
        for input in inputs {
            self.ensure_resident(*input)?;
            self.pin(*input)?;
            pinned.push(*input);
        }

        let mut outputs = Vec::with_capacity(output_bytes.len());
        for &bytes in output_bytes {
            let region = if bytes > 0 {
                match self.try_allocate(bytes) {
                    Ok(region) => Some(region),
                    Err(e) => {
                        self.discard_outputs(&outputs);
                        return Err(e);
                    }
                }
            } else {
                None
            };
            outputs.push(self.insert_buffer(bytes, region));
        }

        let input_regions = self.regions_of(inputs);
        let output_regions = self.regions_of(&outputs);
        let start = Instant::now();
        if let Err(e) =
            self.kernels
                .replay(&mut self.allocator, &kernel, &input_regions, &output_regions)
        {
            self.discard_outputs(&outputs);
            return Err(e);
        }
        let measured = start.elapsed().as_secs_f64() * 1e6;
        let compute_time = compute_time.unwrap_or(measured);

        let operand = Arc::new(ComputeOperand::new(
            kernel,
            inputs.to_vec(),
            outputs.clone(),
        ));
        for output in &outputs {
            self.record_producer(*output, operand.clone())?;
            self.set_compute_time(*output, compute_time)?;
            self.touch(*output)?;
        }
        for input in inputs {
            self.append_consumer(*input, operand.clone())?;
        }

        dtr_debug!(
            self,
            "dispatched '{}' with {} inputs, {} outputs",
            operand.op_type(),
            inputs.len(),
            outputs.len()
        );
        Ok(outputs)
    }

    /// Drop outputs of a dispatch that did not complete
    fn discard_outputs(&mut self, ids: &[BufferId]) {
        for id in ids {
            self.deregister(*id);
            if let Some(mut buffer) = self.buffers.remove(*id) {
                if let Some(region) = buffer.take_region() {
                    self.release_region(region);
                }
            }
        }
    }

    // ========== Destruction ==========

    /// Destroy `id`: free its region, deregister it and invalidate its handle
    ///
    /// Outputs of operations that consumed `id` can no longer be recomputed,
    /// so they lose eviction eligibility.
    ///
    /// # Errors
    /// `PreconditionViolation` if the buffer is pinned.
    pub fn release(&mut self, id: BufferId) -> RematResult<()> {
        if self.buffer(id)?.is_pinned() {
            return Err(precondition_err(&format!("cannot release pinned buffer {}", id)));
        }
        let mut buffer = self
            .buffers
            .remove(id)
            .ok_or(RematError::BufferNotFound(id))?;
        self.deregister(id);

        match buffer.take_region() {
            Some(region) => self.release_region(region),
            // Its compute time no longer counts toward the group it was merged into
            None if buffer.bytes() > 0 => self.groups.adjust(buffer.group(), -buffer.compute_time()),
            None => {}
        }

        for consumer in buffer.consumers() {
            for output in consumer.outputs() {
                if let Some(dependent) = self.buffers.get_mut(*output) {
                    dependent.forbid_eviction();
                    if !dependent.is_resident() {
                        tracing::warn!(
                            "released {} while its dependent {} is evicted; it can no longer be recomputed",
                            id,
                            output
                        );
                    }
                }
            }
        }

        dtr_debug!(self, "released {} ({} bytes)", id, buffer.bytes());
        Ok(())
    }
}

impl<A, K> std::fmt::Debug for TensorPool<A, K>
where
    A: DeviceAllocator,
    K: KernelReplay<A>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TensorPool")
            .field("heuristic", &self.config.heuristic)
            .field("budget_bytes", &self.config.budget_bytes)
            .field("resident_bytes", &self.resident_bytes)
            .field("members", &self.members.len())
            .field("eviction_count", &self.eviction_count)
            .field("recompute_count", &self.recompute_count)
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HostAllocator, HostKernels};
    use crate::cost::Heuristic;

    type HostPool = TensorPool<HostAllocator, HostKernels>;

    fn kernels() -> HostKernels {
        HostKernels::new()
            .with_kernel("inc", |inputs, outputs| {
                for out in outputs.iter_mut() {
                    for (o, x) in out.iter_mut().zip(inputs[0].iter()) {
                        *o = x.wrapping_add(1);
                    }
                }
                Ok(())
            })
    }

    fn pool(budget: usize, heuristic: Heuristic) -> HostPool {
        let config = PoolConfig::new(budget)
            .with_heuristic(heuristic)
            .with_rng_seed(1);
        TensorPool::new(config, HostAllocator::new(), kernels()).unwrap()
    }

    fn inc(pool: &mut HostPool, input: BufferId, bytes: usize) -> BufferId {
        pool.dispatch(KernelDescriptor::shared("inc"), &[input], &[bytes], Some(1.0))
            .unwrap()[0]
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = HostPool::new(PoolConfig::new(0), HostAllocator::new(), kernels());
        assert!(matches!(result, Err(RematError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_materialize_accounts_bytes() {
        let mut pool = pool(1000, Heuristic::Size);
        let leaf = pool.materialize(100).unwrap();
        assert_eq!(pool.resident_bytes(), 100);
        assert!(pool.is_resident(leaf).unwrap());
        assert_eq!(pool.members(), &[leaf]);
        assert_eq!(pool.clock(), 1);
    }

    #[test]
    fn test_leaves_are_never_evicted() {
        let mut pool = pool(100, Heuristic::Size);
        let _leaf = pool.materialize(80).unwrap();
        let err = pool.try_allocate(40).unwrap_err();
        assert!(matches!(err, RematError::ResourceExhausted { .. }));
        assert_eq!(pool.eviction_count(), 0);
    }

    #[test]
    fn test_request_larger_than_budget_fails_fast() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let _y = inc(&mut pool, leaf, 10);
        assert!(pool.try_allocate(101).is_err());
        assert_eq!(pool.eviction_count(), 0);
    }

    #[test]
    fn test_deregistered_buffer_is_not_a_victim() {
        let mut pool = pool(20, Heuristic::Size);
        let leaf = pool.materialize(5).unwrap();
        let y = inc(&mut pool, leaf, 10);

        assert!(pool.deregister(y));
        assert!(!pool.deregister(y));
        assert_eq!(pool.select_victim().unwrap(), None);
        let err = pool.try_allocate(10).unwrap_err();
        assert!(matches!(err, RematError::ResourceExhausted { .. }));
        assert!(pool.is_resident(y).unwrap());

        pool.register(y).unwrap();
        pool.register(y).unwrap();
        assert_eq!(pool.members(), &[leaf, y]);
        assert_eq!(pool.select_victim().unwrap(), Some(y));
        let region = pool.try_allocate(10).unwrap();
        assert!(!pool.is_resident(y).unwrap());
        assert_eq!(pool.eviction_count(), 1);
        pool.release_region(region);
    }

    #[test]
    fn test_register_released_handle_fails() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(5).unwrap();
        let y = inc(&mut pool, leaf, 10);
        pool.release(y).unwrap();

        assert!(matches!(pool.register(y), Err(RematError::BufferNotFound(_))));
        assert_eq!(pool.members(), &[leaf]);
    }

    #[test]
    fn test_touch_advances_clock() {
        let mut pool = pool(100, Heuristic::Lru);
        let leaf = pool.materialize(10).unwrap();
        let before = pool.clock();
        pool.touch(leaf).unwrap();
        assert_eq!(pool.buffer(leaf).unwrap().last_access_time(), before);
        assert_eq!(pool.clock(), before + 1);
    }

    #[test]
    fn test_unpin_unpinned_is_precondition_violation() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let err = pool.unpin(leaf).unwrap_err();
        assert!(matches!(err, RematError::PreconditionViolation(_)));
    }

    #[test]
    fn test_evict_requires_recipe() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let err = pool.evict(leaf).unwrap_err();
        assert!(matches!(err, RematError::PreconditionViolation(_)));
    }

    #[test]
    fn test_evict_pinned_fails() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        pool.pin(y).unwrap();
        assert!(matches!(
            pool.evict(y),
            Err(RematError::PreconditionViolation(_))
        ));
        pool.unpin(y).unwrap();
        pool.evict(y).unwrap();
        assert!(!pool.is_resident(y).unwrap());
        assert_eq!(pool.resident_bytes(), 10);
    }

    #[test]
    fn test_evict_twice_is_noop() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        pool.evict(y).unwrap();
        pool.evict(y).unwrap();
        assert_eq!(pool.eviction_count(), 1);
    }

    #[test]
    fn test_excluded_ops_are_not_candidates() {
        let kernels = kernels().with_kernel("nll", |_, outputs| {
            outputs[0].fill(7);
            Ok(())
        });
        let config = PoolConfig::new(30).with_heuristic(Heuristic::Size);
        let mut pool = TensorPool::new(config, HostAllocator::new(), kernels).unwrap();
        let leaf = pool.materialize(10).unwrap();
        let loss = pool
            .dispatch(KernelDescriptor::shared("nll"), &[leaf], &[10], Some(1.0))
            .unwrap()[0];

        assert!(!pool.buffer(loss).unwrap().is_evictable(&pool.excluded));
        let err = pool.try_allocate(15).unwrap_err();
        assert!(matches!(err, RematError::ResourceExhausted { .. }));
        assert!(pool.is_resident(loss).unwrap());
    }

    #[test]
    fn test_dispatch_failure_rolls_back_outputs() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let result = pool.dispatch(KernelDescriptor::shared("missing"), &[leaf], &[10], None);
        assert!(matches!(result, Err(RematError::RecomputeFailure { .. })));
        assert_eq!(pool.resident_bytes(), 10);
        assert_eq!(pool.members(), &[leaf]);
        assert_eq!(pool.buffer(leaf).unwrap().pin_count(), 0);
    }

    #[test]
    fn test_set_compute_time_applies_multiplier() {
        let mut pool = pool(100, Heuristic::Eq);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        assert_eq!(pool.buffer(y).unwrap().compute_time(), 1.0);

        let mut config = pool.config().clone();
        config.op_costs.set("inc", 5.0);
        let mut boosted = TensorPool::new(config, HostAllocator::new(), kernels()).unwrap();
        let leaf = boosted.materialize(10).unwrap();
        let y = inc(&mut boosted, leaf, 10);
        let buffer = boosted.buffer(y).unwrap();
        assert_eq!(buffer.compute_time(), 5.0);
        assert_eq!(boosted.groups().root_compute_time(buffer.group()), 5.0);
    }

    #[test]
    fn test_release_invalidates_handle() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        pool.release(y).unwrap();

        assert!(!pool.contains(y));
        assert_eq!(pool.resident_bytes(), 10);
        assert!(matches!(pool.buffer(y), Err(RematError::BufferNotFound(_))));
        assert!(matches!(pool.release(y), Err(RematError::BufferNotFound(_))));
    }

    #[test]
    fn test_release_pinned_fails() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        pool.pin(leaf).unwrap();
        assert!(matches!(
            pool.release(leaf),
            Err(RematError::PreconditionViolation(_))
        ));
    }

    #[test]
    fn test_release_input_forbids_eviction_of_dependents() {
        let mut pool = pool(100, Heuristic::Size);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        let z = inc(&mut pool, y, 10);

        pool.release(y).unwrap();
        assert!(!pool.buffer(z).unwrap().could_evict());
        assert!(pool.evict(z).is_err());
    }

    #[test]
    fn test_evict_merges_groups_of_evicted_inputs() {
        let mut pool = pool(1000, Heuristic::Eq);
        let leaf = pool.materialize(10).unwrap();
        let y = inc(&mut pool, leaf, 10);
        let z = inc(&mut pool, y, 10);

        pool.evict(y).unwrap();
        pool.evict(z).unwrap();

        let groups = pool.groups();
        let gy = pool.buffer(y).unwrap().group();
        let gz = pool.buffer(z).unwrap().group();
        assert_eq!(groups.find_root(gy), groups.find_root(gz));
        assert_eq!(groups.root_compute_time(gz), 2.0);

        pool.ensure_resident(z).unwrap();
        let groups = pool.groups();
        let gz = pool.buffer(z).unwrap().group();
        assert!(groups.is_root(gz));
        assert_eq!(groups.root_compute_time(gz), 1.0);
        // y came back as an input and left the group too
        let gy = pool.buffer(y).unwrap().group();
        assert_eq!(groups.root_compute_time(gy), 1.0);
    }

    #[test]
    fn test_bp_aware_selects_victim() {
        let mut pool = pool(25, Heuristic::BpAware);
        let leaf = pool.materialize(5).unwrap();
        let y = inc(&mut pool, leaf, 10);
        pool.mark_backprop_required(y).unwrap();
        let _z = inc(&mut pool, y, 10);
        assert!(pool.buffer(y).unwrap().is_backprop_required());
        // Next allocation forces a bp_aware victim search
        let region = pool.try_allocate(10).unwrap();
        assert_eq!(pool.eviction_count(), 1);
        pool.release_region(region);
        assert_eq!(pool.resident_bytes(), 15);
    }

    #[test]
    fn test_stats_snapshot() {
        let mut pool = pool(1000, Heuristic::Size);
        let leaf = pool.materialize(600).unwrap();
        let _y = inc(&mut pool, leaf, 100);
        let stats = pool.stats();
        assert_eq!(stats.budget_bytes, 1000);
        assert_eq!(stats.resident_bytes, 700);
        assert_eq!(stats.peak_resident_bytes, 700);
        assert_eq!(stats.member_count, 2);
        assert_eq!(stats.heuristic, Heuristic::Size);
    }

    #[test]
    fn test_metrics_follow_pool() {
        let metrics = Arc::new(PoolMetrics::new());
        let mut pool = pool(20, Heuristic::Size).with_metrics(metrics.clone());
        let leaf = pool.materialize(5).unwrap();
        let y = inc(&mut pool, leaf, 10);
        let _z = inc(&mut pool, leaf, 10);
        pool.ensure_resident(y).unwrap();

        let export = metrics.export();
        assert!(export.contains("rematforge_budget_bytes 20"));
        assert!(export.contains("rematforge_evictions_total 2"));
        assert!(export.contains("rematforge_recomputations_total 1"));
    }
}
