//! Pool fixtures over the host backend

use rematforge::backend::{HostAllocator, HostKernels};
use rematforge::buffer::{BufferId, KernelDescriptor};
use rematforge::cost::Heuristic;
use rematforge::pool::{PoolConfig, TensorPool};

pub type HostPool = TensorPool<HostAllocator, HostKernels>;

/// Seed shared by every fixture pool so `random` runs are reproducible
pub const TEST_SEED: u64 = 0x5eed;

// ============================================================================
// Kernels
// ============================================================================

/// Deterministic kernels used across the integration tests
///
/// - `ramp`: output `j` holds `i + j + sum(inputs)` at position `i`
/// - `scale`: `3 * x + 1` of the first input
/// - `add`: element-wise wrapping sum of all inputs (shorter inputs wrap around)
/// - `split`: every output gets the first input, xor'ed with the output index
/// - `fail`: always errors
pub fn host_kernels() -> HostKernels {
    HostKernels::new()
        .with_kernel("ramp", |inputs, outputs| {
            let seed = inputs
                .iter()
                .flat_map(|input| input.iter())
                .fold(0u8, |acc, x| acc.wrapping_add(*x));
            for (j, out) in outputs.iter_mut().enumerate() {
                for (i, value) in out.iter_mut().enumerate() {
                    *value = (i as u8).wrapping_add(j as u8).wrapping_add(seed);
                }
            }
            Ok(())
        })
        .with_kernel("scale", |inputs, outputs| {
            let input = inputs.first().ok_or("scale needs one input")?;
            for out in outputs.iter_mut() {
                for (o, x) in out.iter_mut().zip(input.iter()) {
                    *o = x.wrapping_mul(3).wrapping_add(1);
                }
            }
            Ok(())
        })
        .with_kernel("add", |inputs, outputs| {
            for out in outputs.iter_mut() {
                for (i, o) in out.iter_mut().enumerate() {
                    *o = inputs
                        .iter()
                        .filter(|input| !input.is_empty())
                        .fold(0u8, |acc, input| acc.wrapping_add(input[i % input.len()]));
                }
            }
            Ok(())
        })
        .with_kernel("split", |inputs, outputs| {
            let input = inputs.first().ok_or("split needs one input")?;
            for (j, out) in outputs.iter_mut().enumerate() {
                for (o, x) in out.iter_mut().zip(input.iter()) {
                    *o = x ^ (j as u8);
                }
            }
            Ok(())
        })
        .with_kernel("fail", |_, _| Err("kernel fault".to_string()))
}

// ============================================================================
// Pools
// ============================================================================

pub fn host_config(budget: usize, heuristic: Heuristic) -> PoolConfig {
    PoolConfig::new(budget)
        .with_heuristic(heuristic)
        .with_rng_seed(TEST_SEED)
}

/// Pool over an unbounded host allocator
pub fn host_pool(budget: usize, heuristic: Heuristic) -> HostPool {
    TensorPool::new(host_config(budget, heuristic), HostAllocator::new(), host_kernels())
        .expect("fixture config is valid")
}

// ============================================================================
// Buffers
// ============================================================================

/// Leaf buffer holding `data`
pub fn leaf_with(pool: &mut HostPool, data: &[u8]) -> BufferId {
    let id = pool.materialize(data.len()).expect("leaf fits the budget");
    if let Some(region) = pool.region(id).expect("leaf is live") {
        pool.allocator_mut()
            .write(region, data)
            .expect("leaf region has the right size");
    }
    id
}

/// Zero-sized leaf, handy as the single input of source-like kernels
pub fn empty_leaf(pool: &mut HostPool) -> BufferId {
    pool.materialize(0).expect("zero-sized leaf always fits")
}

/// Run `kind` over `inputs` producing one output of `bytes`
///
/// The compute time is fixed to the output size so scores are deterministic.
pub fn op(pool: &mut HostPool, kind: &str, inputs: &[BufferId], bytes: usize) -> BufferId {
    pool.dispatch(
        KernelDescriptor::shared(kind),
        inputs,
        &[bytes],
        Some(bytes.max(1) as f64),
    )
    .expect("dispatch succeeds")[0]
}

/// Make `id` resident and copy out its bytes
pub fn contents(pool: &mut HostPool, id: BufferId) -> Vec<u8> {
    pool.ensure_resident(id).expect("buffer can be made resident");
    match pool.region(id).expect("buffer is live") {
        Some(region) => pool
            .allocator()
            .read(region)
            .expect("resident region is readable")
            .to_vec(),
        None => Vec::new(),
    }
}

/// Sum of the sizes of resident live buffers
pub fn resident_sum(pool: &HostPool, ids: &[BufferId]) -> usize {
    ids.iter()
        .filter_map(|id| pool.buffer(*id).ok())
        .filter(|buffer| buffer.region().is_some())
        .map(|buffer| buffer.bytes())
        .sum()
}
