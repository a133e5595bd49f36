//! Batched parallel-for over index ranges and slice chunks.
//!
//! Work is split into a small number of contiguous batches rather than one
//! task per index: `min_batch_size` bounds how little work a batch may carry,
//! and the batch count never exceeds the core count or the configured
//! parallelism. A single batch runs inline on the calling thread.

use crate::error::{invalid_argument, GemmError, Result};
use crate::hardware::RUNTIME_HW_CONFIG;
use log::warn;
use rayon::prelude::*;
use std::ops::Range;

/// How `count` work items are split into batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    pub count: usize,
    pub num_batches: usize,
    pub batch_size: usize,
}

impl BatchPlan {
    /// `max_batches = ceil(count / min_batch_size)`, then
    /// `min(max_batches, cores, max_parallelism)` batches of
    /// `ceil(count / batches)` items; the last batch may be shorter.
    pub fn new(count: usize, min_batch_size: usize, cores: usize, max_parallelism: usize) -> Self {
        if count == 0 {
            return BatchPlan {
                count,
                num_batches: 0,
                batch_size: 0,
            };
        }
        let max_batches = count.div_ceil(min_batch_size.max(1));
        let num_batches = max_batches.min(cores).min(max_parallelism).max(1);
        let batch_size = count.div_ceil(num_batches);
        BatchPlan {
            count,
            // Rounding the size up can leave the tail batches empty.
            num_batches: count.div_ceil(batch_size),
            batch_size,
        }
    }

    pub fn is_sequential(&self) -> bool {
        self.num_batches <= 1
    }

    /// Item indices of batch `b`.
    pub fn batch(&self, b: usize) -> Range<usize> {
        let start = (b * self.batch_size).min(self.count);
        start..(start + self.batch_size).min(self.count)
    }
}

/// Runs batches on an owned worker pool.
#[derive(Debug)]
pub struct Distributor {
    pool: Option<rayon::ThreadPool>,
    max_parallelism: usize,
    cores: usize,
}

impl Distributor {
    /// Creates a distributor running at most `max_parallelism` batches at
    /// once. With `max_parallelism == 1` no worker threads are started.
    pub fn new(max_parallelism: usize) -> Result<Self> {
        if max_parallelism == 0 {
            return Err(invalid_argument("max_parallelism must be at least 1"));
        }
        let pool = if max_parallelism > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(max_parallelism)
                .thread_name(|i| format!("autogemm-worker-{i}"))
                .build()
                .map_err(|e| invalid_argument(format!("cannot start worker pool: {e}")))?;
            Some(pool)
        } else {
            None
        };

        Ok(Distributor {
            pool,
            max_parallelism,
            cores: RUNTIME_HW_CONFIG.logical_cores(),
        })
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// The batch split used for `count` items.
    pub fn plan(&self, count: usize, min_batch_size: usize) -> BatchPlan {
        BatchPlan::new(count, min_batch_size, self.cores, self.max_parallelism)
    }

    /// Invokes `action(i)` once for every `i` in `range`.
    ///
    /// Every batch runs to completion or to its first failing index; the
    /// failures of all batches are then combined into one error.
    pub fn parallel_for<F>(&self, range: Range<usize>, min_batch_size: usize, action: F) -> Result<()>
    where
        F: Fn(usize) -> Result<()> + Sync,
    {
        if min_batch_size == 0 {
            return Err(invalid_argument("min_batch_size must be at least 1"));
        }
        if range.start > range.end {
            return Err(invalid_argument(format!(
                "parallel_for range start ({}) exceeds end ({})",
                range.start, range.end
            )));
        }

        let start = range.start;
        let plan = self.plan(range.len(), min_batch_size);
        let run_batch = |b: usize| plan.batch(b).try_for_each(|i| action(start + i));

        match &self.pool {
            Some(pool) if !plan.is_sequential() => {
                let results: Vec<Result<()>> =
                    pool.install(|| (0..plan.num_batches).into_par_iter().map(run_batch).collect());
                combine(results)
            }
            _ => (0..plan.num_batches).try_for_each(run_batch),
        }
    }

    /// Splits `data` into `chunk_len`-sized chunks (the last may be shorter)
    /// and invokes `action(i, chunk)` for each, batching like
    /// [`parallel_for`](Self::parallel_for). Each call has exclusive access
    /// to its chunk.
    pub fn parallel_for_chunks<T, F>(
        &self,
        data: &mut [T],
        chunk_len: usize,
        min_batch_size: usize,
        action: F,
    ) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut [T]) -> Result<()> + Sync,
    {
        if min_batch_size == 0 {
            return Err(invalid_argument("min_batch_size must be at least 1"));
        }
        if chunk_len == 0 {
            return Err(invalid_argument("chunk_len must be at least 1"));
        }

        let plan = self.plan(data.len().div_ceil(chunk_len), min_batch_size);
        match &self.pool {
            Some(pool) if !plan.is_sequential() => {
                let batch_len = plan.batch_size * chunk_len;
                let results: Vec<Result<()>> = pool.install(|| {
                    data.par_chunks_mut(batch_len)
                        .enumerate()
                        .map(|(b, batch)| {
                            let first = b * plan.batch_size;
                            batch
                                .chunks_mut(chunk_len)
                                .enumerate()
                                .try_for_each(|(j, chunk)| action(first + j, chunk))
                        })
                        .collect()
                });
                combine(results)
            }
            _ => data
                .chunks_mut(chunk_len)
                .enumerate()
                .try_for_each(|(i, chunk)| action(i, chunk)),
        }
    }
}

/// Folds per-batch results into one: a single failure is returned as is,
/// several become [`GemmError::Parallel`].
fn combine(results: Vec<Result<()>>) -> Result<()> {
    let mut failures = results.into_iter().filter_map(Result::err);
    let Some(first) = failures.next() else {
        return Ok(());
    };
    let failed_batches = 1 + failures.count();
    if failed_batches == 1 {
        return Err(first);
    }
    warn!("{failed_batches} parallel batches failed, first: {first}");
    Err(GemmError::Parallel {
        failed_batches,
        first: Box::new(first),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_batch_plan() {
        // 100 items, at least 16 per batch: 7 batches possible, 4 cores.
        let plan = BatchPlan::new(100, 16, 4, 8);
        assert_eq!(plan.num_batches, 4);
        assert_eq!(plan.batch_size, 25);
        assert_eq!(plan.batch(3), 75..100);

        // Too little work for more than one batch.
        assert!(BatchPlan::new(10, 16, 8, 8).is_sequential());
        // Parallelism cap of one.
        assert!(BatchPlan::new(1000, 1, 8, 1).is_sequential());
        assert_eq!(BatchPlan::new(0, 16, 8, 8).num_batches, 0);
    }

    #[test]
    fn test_batch_plan_drops_empty_tail() {
        // ceil(10 / 4) = 3 per batch covers everything in 4 batches.
        let plan = BatchPlan::new(10, 1, 4, 4);
        assert_eq!(plan.batch_size, 3);
        assert_eq!(plan.num_batches, 4);
        // 9 items over 4 batches: size 3 leaves only 3 non-empty batches.
        let plan = BatchPlan::new(9, 1, 4, 4);
        assert_eq!(plan.num_batches, 3);
        let covered: usize = (0..plan.num_batches).map(|b| plan.batch(b).len()).sum();
        assert_eq!(covered, 9);
    }

    #[test]
    fn test_parallel_for_visits_every_index_once() {
        for threads in [1, 2, 4] {
            let distributor = Distributor::new(threads).unwrap();
            let hits: Vec<AtomicUsize> = (0..200).map(|_| AtomicUsize::new(0)).collect();
            distributor
                .parallel_for(10..200, 3, |i| {
                    hits[i].fetch_add(1, Ordering::Relaxed);
                    Ok(())
                })
                .unwrap();

            for (i, h) in hits.iter().enumerate() {
                let expected = usize::from(i >= 10);
                assert_eq!(h.load(Ordering::Relaxed), expected, "index {}", i);
            }
        }
    }

    #[test]
    fn test_parallel_for_chunks_hands_out_disjoint_chunks() {
        let distributor = Distributor::new(4).unwrap();
        let mut data = vec![0usize; 103];
        distributor
            .parallel_for_chunks(&mut data, 10, 1, |i, chunk| {
                chunk.iter_mut().for_each(|x| *x = i);
                Ok(())
            })
            .unwrap();
        for (pos, &x) in data.iter().enumerate() {
            assert_eq!(x, pos / 10);
        }
    }

    #[test]
    fn test_invalid_arguments() {
        let distributor = Distributor::new(1).unwrap();
        assert!(distributor.parallel_for(0..10, 0, |_| Ok(())).is_err());
        #[allow(clippy::reversed_empty_ranges)]
        let reversed = 5..2;
        assert!(distributor.parallel_for(reversed, 1, |_| Ok(())).is_err());
        assert!(distributor
            .parallel_for_chunks(&mut [0.0f64; 4], 0, 1, |_, _| Ok(()))
            .is_err());
        assert!(Distributor::new(0).is_err());
    }

    #[test]
    fn test_empty_range_is_a_no_op() {
        let distributor = Distributor::new(2).unwrap();
        distributor
            .parallel_for(7..7, 1, |_| Err(invalid_argument("must not run")))
            .unwrap();
    }

    #[test]
    fn test_failures_are_combined() {
        let results = vec![
            Ok(()),
            Err(invalid_argument("batch 1")),
            Ok(()),
            Err(invalid_argument("batch 3")),
        ];
        match combine(results) {
            Err(GemmError::Parallel {
                failed_batches,
                first,
            }) => {
                assert_eq!(failed_batches, 2);
                assert_eq!(*first, invalid_argument("batch 1"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let single = combine(vec![Ok(()), Err(invalid_argument("only"))]);
        assert_eq!(single, Err(invalid_argument("only")));
        assert_eq!(combine(vec![Ok(()), Ok(())]), Ok(()));
    }

    #[test]
    fn test_sequential_stops_at_first_failure() {
        let distributor = Distributor::new(1).unwrap();
        let calls = AtomicUsize::new(0);
        let result = distributor.parallel_for(0..10, 1, |i| {
            calls.fetch_add(1, Ordering::Relaxed);
            if i == 3 {
                Err(invalid_argument("stop"))
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err(invalid_argument("stop")));
        assert_eq!(calls.load(Ordering::Relaxed), 4);
    }
}
