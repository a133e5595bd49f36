use autogemm::buffer::PanelPool;
use autogemm::parallel::{BatchPlan, Distributor};
use autogemm::{Engine, GemmError};
use rand::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_batch_plan_bounds() {
    for count in [1, 2, 7, 16, 100, 1000] {
        for min_batch_size in [1, 3, 16] {
            for cores in [1, 2, 8] {
                for max_parallelism in [1, 4, 64] {
                    let plan = BatchPlan::new(count, min_batch_size, cores, max_parallelism);
                    assert!(plan.num_batches >= 1);
                    assert!(plan.num_batches <= cores.min(max_parallelism).max(1));
                    let covered: usize = (0..plan.num_batches).map(|b| plan.batch(b).len()).sum();
                    assert_eq!(covered, count, "{plan:?}");
                    assert!((0..plan.num_batches).all(|b| !plan.batch(b).is_empty()), "{plan:?}");
                }
            }
        }
    }
}

#[test]
fn test_parallel_for_with_offset_range() {
    let distributor = Distributor::new(4).unwrap();
    let sum = AtomicUsize::new(0);
    distributor
        .parallel_for(100..1100, 16, |i| {
            sum.fetch_add(i, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
    assert_eq!(sum.load(Ordering::Relaxed), (100..1100).sum::<usize>());
}

#[test]
fn test_every_failing_batch_is_counted() {
    let distributor = Distributor::new(4).unwrap();
    let plan = distributor.plan(400, 1);
    if plan.is_sequential() {
        // A single-core machine runs inline and stops at the first failure.
        return;
    }
    let result = distributor.parallel_for(0..400, 1, |i| {
        if i % plan.batch_size == 0 {
            Err(GemmError::InvalidArgument {
                message: format!("index {i}"),
            })
        } else {
            Ok(())
        }
    });
    match result {
        Err(GemmError::Parallel {
            failed_batches,
            first,
        }) => {
            assert_eq!(failed_batches, plan.num_batches);
            assert!(matches!(*first, GemmError::InvalidArgument { .. }));
        }
        other => panic!("expected an aggregated failure, got {other:?}"),
    }
}

#[test]
fn test_chunks_cover_data_exactly_once() {
    let distributor = Distributor::new(3).unwrap();
    let mut data = vec![0u32; 1001];
    distributor
        .parallel_for_chunks(&mut data, 7, 2, |_, chunk| {
            chunk.iter_mut().for_each(|x| *x += 1);
            Ok(())
        })
        .unwrap();
    assert!(data.iter().all(|&x| x == 1));
}

#[test]
fn test_panel_pool_reuses_released_buffers() {
    let pool = PanelPool::new();
    {
        let mut buffer = pool.acquire(1000).unwrap();
        buffer.iter_mut().for_each(|x| *x = 3.0);
        assert_eq!(buffer.len(), 1000);
    }
    assert_eq!(pool.pooled(), 1);

    // A smaller request is served from the pooled buffer, zeroed.
    let buffer = pool.acquire(500).unwrap();
    assert_eq!(pool.pooled(), 0);
    assert_eq!(buffer.len(), 500);
    assert!(buffer.iter().all(|&x| x == 0.0));
}

#[test]
fn test_shared_engine_serves_concurrent_calls() {
    let engine = match Engine::builder()
        .blocking(16, 16, 32)
        .max_parallelism(2)
        .min_batch_size(1)
        .build()
    {
        Ok(engine) => Arc::new(engine),
        Err(GemmError::UnsupportedHardware { .. }) => return,
        Err(e) => panic!("{e}"),
    };
    let (m, n, k) = (37, 41, 29);
    let mut rng = StdRng::seed_from_u64(2024);
    let a: Arc<Vec<f64>> = Arc::new((0..m * k).map(|_| rng.random_range(-1.0..1.0)).collect());
    let b: Arc<Vec<f64>> = Arc::new((0..k * n).map(|_| rng.random_range(-1.0..1.0)).collect());

    let mut expected = vec![0.0; m * n];
    engine.gemm_simple(m, n, k, &a, k, &b, n, &mut expected, n).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let (engine, a, b) = (Arc::clone(&engine), Arc::clone(&a), Arc::clone(&b));
            std::thread::spawn(move || {
                let mut c = vec![f64::NAN; m * n];
                engine.gemm_simple(m, n, k, &a, k, &b, n, &mut c, n).unwrap();
                c
            })
        })
        .collect();

    for handle in handles {
        let c = handle.join().unwrap();
        assert!(
            c.iter().zip(&expected).all(|(x, y)| x.to_bits() == y.to_bits()),
            "concurrent result differs"
        );
    }
}
