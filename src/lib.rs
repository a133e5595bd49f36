//! Double-precision matrix multiplication, `C = alpha * A * B + beta * C`.
//!
//! All matrices are row-major with explicit leading dimensions. A call is
//! cache-blocked into `mc × kc` slabs of A and `kc × nc` slabs of B, both
//! packed into microkernel order, and each `mr × nr` tile of C is computed by
//! a microkernel generated for the configured shape and the detected SIMD
//! width.
//!
//! ```no_run
//! let (m, n, k) = (64, 48, 32);
//! let a = vec![1.0; m * k];
//! let b = vec![2.0; k * n];
//! let mut c = vec![0.0; m * n];
//!
//! autogemm::dgemm_simple(m, n, k, &a, k, &b, n, &mut c, n)?;
//! assert!(c.iter().all(|&x| x == 64.0));
//! # Ok::<(), autogemm::GemmError>(())
//! ```
//!
//! For repeated calls or non-default shapes, build an [`Engine`] directly.

pub mod buffer;
pub mod config;
pub mod engine;
pub mod error;
pub mod hardware;
pub mod kernel;
pub mod macro_kernel;
pub mod matrix;
pub mod pack;
pub mod parallel;
pub mod simd;

pub use config::{BlockingParams, EngineBuilder, EngineConfig};
pub use engine::Engine;
pub use error::{GemmError, Result};
pub use hardware::VectorWidth;
pub use kernel::{KernelShape, MicroKernel};

use once_cell::sync::Lazy;

pub const MR: usize = 4;
pub const NR: usize = 8;

pub const MC: usize = 1024;
pub const KC: usize = 1024;
pub const NC: usize = 256;

/// Default smallest batch handed to a worker.
pub const MIN_BATCH_SIZE: usize = 16;

static DEFAULT_ENGINE: Lazy<Result<Engine>> = Lazy::new(Engine::new);

fn default_engine() -> Result<&'static Engine> {
    DEFAULT_ENGINE.as_ref().map_err(Clone::clone)
}

/// [`Engine::gemm`] on a lazily built engine with default settings.
#[allow(clippy::too_many_arguments)]
pub fn dgemm(
    m: usize,
    n: usize,
    k: usize,
    alpha: f64,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    beta: f64,
    c: &mut [f64],
    ldc: usize,
) -> Result<()> {
    default_engine()?.gemm(m, n, k, alpha, a, lda, b, ldb, beta, c, ldc)
}

/// [`Engine::gemm_simple`] on a lazily built engine with default settings.
#[allow(clippy::too_many_arguments)]
pub fn dgemm_simple(
    m: usize,
    n: usize,
    k: usize,
    a: &[f64],
    lda: usize,
    b: &[f64],
    ldb: usize,
    c: &mut [f64],
    ldc: usize,
) -> Result<()> {
    default_engine()?.gemm_simple(m, n, k, a, lda, b, ldb, c, ldc)
}
