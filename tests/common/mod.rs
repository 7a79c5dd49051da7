//! Common test utilities for pool integration tests
//!
//! Every test builds its own pool over the host backend, so tests never share
//! state. The kernels registered here are deterministic functions of their
//! inputs, which is what makes bit-identical recomputation checkable.
//!
//! # Usage
//!
//! ```ignore
//! mod common;
//! use common::*;
//!
//! #[test]
//! fn my_pool_test() {
//!     let mut pool = host_pool(1000, Heuristic::Size);
//!     let x = leaf_with(&mut pool, &[1, 2, 3]);
//!     let y = op(&mut pool, "scale", &[x], 3);
//!     assert_eq!(contents(&mut pool, y), vec![4, 7, 10]);
//! }
//! ```

#![allow(dead_code)]

mod fixtures;
mod tempfile_helpers;

pub use fixtures::*;
pub use serial_test::serial;
pub use tempfile_helpers::*;
