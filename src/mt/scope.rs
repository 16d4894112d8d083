// src/mt/scope.rs

//! Index ranges and the range splitter.
//!
//! A [`Scope`] describes one contiguous slice `[start, end)` of a larger
//! iteration space plus its position among sibling slices. The splitter turns
//! an iteration count into an ordered list of scopes, preferring a single
//! sequential pass when the count is too small to be worth parallelising.

use std::ops::Range;

use crate::config::SchedulerConfig;

/// Immutable descriptor of a contiguous index range.
///
/// `Scope::default()` is the invalid sentinel (`count == 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scope {
    pub start: usize,
    pub count: usize,
    pub end: usize,
    /// 0-based position among sibling scopes.
    pub loop_index: usize,
}

impl Scope {
    pub fn new(start: usize, count: usize, loop_index: usize) -> Self {
        Self {
            start,
            count,
            end: start + count,
            loop_index,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.count > 0
    }

    pub fn indices(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        index >= self.start && index < self.end
    }
}

/// Compute the effective scope width for `num_iterations`.
///
/// - `desired == 0` falls back to `config.default_chunk_size`.
/// - Counts below `config.small_batch_threshold` are widened to a single
///   scope covering everything.
///
/// The result is always `>= 1`.
pub fn sanitized_batch_size(
    num_iterations: usize,
    desired: usize,
    config: &SchedulerConfig,
) -> usize {
    if num_iterations < config.small_batch_threshold {
        return num_iterations.max(1);
    }

    let desired = if desired == 0 {
        config.default_chunk_size
    } else {
        desired
    };

    desired.max(1)
}

/// Split `[0, num_iterations)` into consecutive scopes of at most
/// `range_size` iterations each.
pub fn sub_loop_scopes(num_iterations: usize, range_size: usize) -> Vec<Scope> {
    let range_size = range_size.max(1);
    let mut scopes = Vec::with_capacity(num_iterations.div_ceil(range_size));

    let mut start = 0;
    while start < num_iterations {
        let count = range_size.min(num_iterations - start);
        scopes.push(Scope::new(start, count, scopes.len()));
        start += count;
    }

    scopes
}

/// Sanitize `desired` for `num_iterations` and split accordingly.
pub fn split_iterations(
    num_iterations: usize,
    desired: usize,
    config: &SchedulerConfig,
) -> Vec<Scope> {
    let range_size = sanitized_batch_size(num_iterations, desired, config);
    sub_loop_scopes(num_iterations, range_size)
}
