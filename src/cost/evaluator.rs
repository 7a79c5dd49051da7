//! Cost evaluation over the live dependency graph
//!
//! A [`CostEvaluator`] borrows the pool's arena and recompute groups for one
//! victim search. Recursive quantities (parent/child cost and depth) are
//! memoized for the lifetime of the evaluator, so each is computed once per
//! search no matter how many candidates share ancestors.

use std::collections::HashMap;

use rand::{Rng, RngCore};

use super::heuristic::Heuristic;
use crate::buffer::{BufferArena, BufferId, ManagedBuffer, RecomputeMode};
use crate::disjoint::DisjointSet;
use crate::error::{RematError, RematResult};

/// Pool state a cost evaluation depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostContext {
    pub clock: u64,
    pub budget: usize,
    pub resident_bytes: usize,
    /// Restrict the recursive neighbour cost to backprop-required buffers
    pub backprop_filter: bool,
}

/// Result of scoring one buffer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub cost: f64,
    /// Recompute direction picked by `bp_aware`; `Forward` for every other heuristic
    pub mode: RecomputeMode,
}

pub struct CostEvaluator<'a> {
    buffers: &'a BufferArena,
    groups: &'a DisjointSet,
    ctx: CostContext,
    parent_costs: HashMap<(BufferId, bool), f64>,
    child_costs: HashMap<(BufferId, bool), f64>,
    parent_depths: HashMap<BufferId, i64>,
    child_depths: HashMap<BufferId, i64>,
}

impl<'a> CostEvaluator<'a> {
    pub fn new(buffers: &'a BufferArena, groups: &'a DisjointSet, ctx: CostContext) -> Self {
        CostEvaluator {
            buffers,
            groups,
            ctx,
            parent_costs: HashMap::new(),
            child_costs: HashMap::new(),
            parent_depths: HashMap::new(),
            child_depths: HashMap::new(),
        }
    }

    pub fn context(&self) -> &CostContext {
        &self.ctx
    }

    fn buffer(&self, id: BufferId) -> RematResult<&'a ManagedBuffer> {
        self.buffers.get(id).ok_or(RematError::BufferNotFound(id))
    }

    fn staleness(&self, buffer: &ManagedBuffer) -> f64 {
        self.ctx.clock.saturating_sub(buffer.last_access_time()).max(1) as f64
    }

    fn safe_bytes(buffer: &ManagedBuffer) -> f64 {
        buffer.bytes().max(1) as f64
    }

    fn safe_compute_time(buffer: &ManagedBuffer) -> f64 {
        let ct = buffer.compute_time();
        if ct > 0.0 && ct.is_finite() {
            ct
        } else {
            1.0
        }
    }

    /// Live, non-resident inputs of `buffer`'s producer
    fn evicted_inputs(&self, buffer: &ManagedBuffer, bp: bool) -> Vec<BufferId> {
        let Some(producer) = buffer.producer() else {
            return Vec::new();
        };
        producer
            .inputs()
            .iter()
            .copied()
            .filter(|id| self.is_counted(*id, bp))
            .collect()
    }

    /// Live, non-resident outputs of every consumer of `buffer`
    fn evicted_children(&self, buffer: &ManagedBuffer, bp: bool) -> Vec<BufferId> {
        buffer
            .consumers()
            .iter()
            .flat_map(|op| op.outputs().iter().copied())
            .filter(|id| self.is_counted(*id, bp))
            .collect()
    }

    fn is_counted(&self, id: BufferId, bp: bool) -> bool {
        match self.buffers.get(id) {
            Some(b) => !b.is_resident() && (!bp || b.is_backprop_required()),
            None => false,
        }
    }

    /// Cost of recomputing every evicted ancestor of `id`
    ///
    /// With `bp` set only backprop-required ancestors are followed.
    pub fn parent_cost(&mut self, id: BufferId, bp: bool) -> RematResult<f64> {
        if let Some(cost) = self.parent_costs.get(&(id, bp)) {
            return Ok(*cost);
        }
        // Guard against revisiting a node on a malformed cyclic graph
        self.parent_costs.insert((id, bp), 0.0);

        let buffer = self.buffer(id)?;
        let mut cost = 0.0;
        for input in self.evicted_inputs(buffer, bp) {
            let ct = self.buffer(input)?.compute_time();
            cost += ct + self.parent_cost(input, bp)?;
        }
        self.parent_costs.insert((id, bp), cost);
        Ok(cost)
    }

    /// Cost of recomputing every evicted descendant of `id`
    pub fn child_cost(&mut self, id: BufferId, bp: bool) -> RematResult<f64> {
        if let Some(cost) = self.child_costs.get(&(id, bp)) {
            return Ok(*cost);
        }
        self.child_costs.insert((id, bp), 0.0);

        let buffer = self.buffer(id)?;
        let mut cost = 0.0;
        for output in self.evicted_children(buffer, bp) {
            let ct = self.buffer(output)?.compute_time();
            cost += ct + self.child_cost(output, bp)?;
        }
        self.child_costs.insert((id, bp), cost);
        Ok(cost)
    }

    /// Length of the longest evicted ancestor chain; 0 when none
    pub fn parent_depth(&mut self, id: BufferId) -> RematResult<i64> {
        if let Some(depth) = self.parent_depths.get(&id) {
            return Ok(*depth);
        }
        self.parent_depths.insert(id, 0);

        let buffer = self.buffer(id)?;
        let mut max = -1;
        for input in self.evicted_inputs(buffer, false) {
            max = max.max(self.parent_depth(input)?);
        }
        self.parent_depths.insert(id, max + 1);
        Ok(max + 1)
    }

    /// Length of the longest evicted descendant chain; 0 when none
    pub fn child_depth(&mut self, id: BufferId) -> RematResult<i64> {
        if let Some(depth) = self.child_depths.get(&id) {
            return Ok(*depth);
        }
        self.child_depths.insert(id, 0);

        let buffer = self.buffer(id)?;
        let mut max = -1;
        for output in self.evicted_children(buffer, false) {
            max = max.max(self.child_depth(output)?);
        }
        self.child_depths.insert(id, max + 1);
        Ok(max + 1)
    }

    /// Own compute time plus the recursive cost of evicted neighbours
    pub fn neighbor_cost(&mut self, id: BufferId) -> RematResult<f64> {
        let bp = self.ctx.backprop_filter;
        let parent = self.parent_cost(id, bp)?;
        let child = self.child_cost(id, bp)?;
        Ok(parent + child + self.buffer(id)?.compute_time())
    }

    /// Non-recursive neighbour cost using recompute-group totals
    ///
    /// Each evicted input or output of the producer contributes the larger of
    /// its group's total and its own compute time.
    pub fn approx_neighbor_cost(&self, id: BufferId) -> RematResult<f64> {
        let buffer = self.buffer(id)?;
        let mut cost = 0.0;
        if let Some(producer) = buffer.producer() {
            for neighbor in producer.inputs().iter().chain(producer.outputs().iter()) {
                let Some(other) = self.buffers.get(*neighbor) else {
                    continue;
                };
                if other.is_resident() {
                    continue;
                }
                let group_cost = self.groups.pseudo(other.group()).root_compute_time();
                cost += group_cost.max(other.compute_time());
            }
        }
        Ok(cost + buffer.compute_time())
    }

    fn base_cost(&self, buffer: &ManagedBuffer) -> f64 {
        Self::safe_compute_time(buffer) / Self::safe_bytes(buffer) / self.staleness(buffer)
    }

    /// Cost of recomputing `id` forward from its evicted ancestors, discounted
    /// by the ancestors that would come back resident along the way
    pub fn rev_fwd_cost(&mut self, id: BufferId) -> RematResult<f64> {
        let buffer = self.buffer(id)?;
        let ct = Self::safe_compute_time(buffer);
        let base = self.base_cost(buffer);
        let cost_parent = ct + self.parent_cost(id, true)?;

        let available = self.ctx.budget.saturating_sub(self.ctx.resident_bytes) as f64;
        let mut potential = 0.0;
        if let Some(producer) = buffer.producer() {
            for input in producer.inputs() {
                let Some(other) = self.buffers.get(*input) else {
                    continue;
                };
                let input_ct = other.compute_time();
                if potential + input_ct < available
                    && !other.is_resident()
                    && other.is_backprop_required()
                {
                    potential += input_ct;
                } else {
                    break;
                }
            }
        }

        Ok(base * cost_parent / (ct + potential))
    }

    /// Cost of recomputing `id` from the cheapest of its consumers
    pub fn rev_bwd_cost(&mut self, id: BufferId) -> RematResult<f64> {
        let buffer = self.buffer(id)?;
        let ct = Self::safe_compute_time(buffer);
        let base = self.base_cost(buffer);

        let mut cheapest: Option<f64> = None;
        for consumer in buffer.consumers() {
            let mut consumer_cost = 0.0;
            for output in consumer.outputs() {
                let Some(other) = self.buffers.get(*output) else {
                    continue;
                };
                if !other.is_resident() && other.is_backprop_required() {
                    consumer_cost += other.compute_time() + self.child_cost(*output, false)?;
                }
            }
            cheapest = Some(match cheapest {
                Some(current) => current.min(consumer_cost),
                None => consumer_cost,
            });
        }

        let cost_parent = ct + cheapest.unwrap_or(0.0);
        Ok(base * cost_parent / ct)
    }

    /// Cheaper of the two recompute directions
    pub fn reverse_cost(&mut self, id: BufferId) -> RematResult<Score> {
        let forward = self.rev_fwd_cost(id)?;
        let backward = self.rev_bwd_cost(id)?;
        if backward < forward {
            Ok(Score {
                cost: backward,
                mode: RecomputeMode::Backward,
            })
        } else {
            Ok(Score {
                cost: forward,
                mode: RecomputeMode::Forward,
            })
        }
    }

    /// Score `id` under `heuristic`; lower scores are evicted first
    ///
    /// # Errors
    /// `BufferNotFound` when `id` or a recorded neighbour no longer resolves.
    pub fn cost(
        &mut self,
        id: BufferId,
        heuristic: Heuristic,
        rng: &mut dyn RngCore,
    ) -> RematResult<Score> {
        let buffer = self.buffer(id)?;
        let bytes = Self::safe_bytes(buffer);
        let ct = buffer.compute_time();
        let staleness = self.staleness(buffer);

        let cost = match heuristic {
            Heuristic::Random => rng.gen::<f64>(),
            Heuristic::Size => 1.0 / bytes,
            Heuristic::Lru => 1.0 / staleness,
            Heuristic::LocalComputeTime => ct,
            Heuristic::LocalComputeTimeAndLastAccess => ct / staleness,
            Heuristic::Local => ct / bytes / staleness,
            Heuristic::ComputeTime => self.neighbor_cost(id)?,
            Heuristic::ComputeTimeAndSize => self.neighbor_cost(id)? / bytes,
            Heuristic::Full => self.neighbor_cost(id)? / bytes / staleness,
            Heuristic::Eq => self.approx_neighbor_cost(id)? / bytes / staleness,
            Heuristic::EqComputeTimeAndLastAccess => self.approx_neighbor_cost(id)? / staleness,
            Heuristic::Depth => (self.parent_depth(id)? + self.child_depth(id)?) as f64,
            Heuristic::BpAware => return self.reverse_cost(id),
        };

        Ok(Score {
            cost,
            mode: RecomputeMode::Forward,
        })
    }
}
