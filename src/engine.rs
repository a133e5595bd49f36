//! The blocked GEMM driver.

use crate::buffer::PanelPool;
use crate::config::{BlockingParams, EngineBuilder, EngineConfig};
use crate::error::Result;
use crate::hardware::VectorWidth;
use crate::kernel::{build_kernel, KernelShape, MicroKernel};
use crate::macro_kernel::{macro_kernel, MacroContext};
use crate::matrix::{MatrixView, MatrixViewMut};
use crate::pack::{pack_a, pack_b, packed_a_len, packed_b_len};
use crate::parallel::Distributor;
use log::{debug, trace};
use std::fmt;

/// A configured GEMM engine.
///
/// Owns the generated microkernel, the worker pool and the packing buffers.
/// An engine is `Send + Sync` and can serve concurrent calls; only
/// [`configure`](Engine::configure) needs exclusive access.
pub struct Engine {
    config: EngineConfig,
    kernel: MicroKernel,
    distributor: Distributor,
    pool: PanelPool,
}

impl Engine {
    /// Engine with the default shape and blocking on the detected hardware.
    pub fn new() -> Result<Self> {
        EngineBuilder::new().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn with_config(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let kernel = build_kernel(config.shape, config.vector_width)?;
        let distributor = Distributor::new(config.max_parallelism)?;
        debug!(
            "engine ready: {} kernel at {}, blocking {:?}, {} workers",
            config.shape, config.vector_width, config.blocking, config.max_parallelism
        );

        Ok(Engine {
            config,
            kernel,
            distributor,
            pool: PanelPool::new(),
        })
    }

    /// Switches to an `mr × nr` register tile and rebuilds the microkernel.
    ///
    /// On error the engine keeps its previous shape and kernel.
    pub fn configure(&mut self, mr: usize, nr: usize) -> Result<()> {
        let config = EngineConfig {
            shape: KernelShape::new(mr, nr),
            ..self.config
        };
        config.validate()?;
        let kernel = build_kernel(config.shape, config.vector_width)?;

        debug!("reconfigured from {} to {}", self.config.shape, config.shape);
        self.kernel = kernel;
        self.config = config;
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn shape(&self) -> KernelShape {
        self.config.shape
    }

    pub fn blocking(&self) -> BlockingParams {
        self.config.blocking
    }

    pub fn vector_width(&self) -> VectorWidth {
        self.config.vector_width
    }

    pub fn max_parallelism(&self) -> usize {
        self.config.max_parallelism
    }

    pub fn kernel(&self) -> &MicroKernel {
        &self.kernel
    }

    /// `C = A * B` for row-major `A` (`m × k`), `B` (`k × n`), `C` (`m × n`).
    #[allow(clippy::too_many_arguments)]
    pub fn gemm_simple(
        &self,
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
        self.gemm(m, n, k, 1.0, a, lda, b, ldb, 0.0, c, ldc)
    }

    /// `C = alpha * A * B + beta * C` for row-major `A` (`m × k`, leading
    /// dimension `lda`), `B` (`k × n`, `ldb`) and `C` (`m × n`, `ldc`).
    ///
    /// Arguments are validated before anything is written. C is then scaled
    /// by `beta` (exactly zeroed when `beta == 0`, untouched when
    /// `beta == 1`) and, unless `k == 0` or `alpha == 0`, the product is
    /// accumulated into it.
    #[allow(clippy::too_many_arguments)]
    pub fn gemm(
        &self,
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
        let a = MatrixView::new("A", a, m, k, lda)?;
        let b = MatrixView::new("B", b, k, n, ldb)?;
        let mut c = MatrixViewMut::new("C", c, m, n, ldc)?;

        if m == 0 || n == 0 {
            return Ok(());
        }
        if k == 0 || alpha == 0.0 {
            c.scale(beta);
            return Ok(());
        }

        let KernelShape { mr, nr } = self.config.shape;
        let BlockingParams { mc, kc, nc } = self.config.blocking;
        let min_batch_size = self.config.min_batch_size;
        let mut packed_a = self.pool.acquire(packed_a_len(mr, mc.min(m), kc.min(k)))?;
        let mut packed_b = self.pool.acquire(packed_b_len(nr, kc.min(k), nc.min(n)))?;
        trace!("gemm {m}x{n}x{k}, alpha={alpha}, beta={beta}");

        c.scale(beta);

        let ctx = MacroContext {
            kernel: &self.kernel,
            distributor: &self.distributor,
            min_batch_size,
        };
        for i in (0..m).step_by(mc) {
            let mc_block = mc.min(m - i);
            for q in (0..k).step_by(kc) {
                let kc_block = kc.min(k - q);
                pack_a(mr, &a.block(i, q, mc_block, kc_block), alpha, &mut packed_a);

                for j in (0..n).step_by(nc) {
                    let nc_block = nc.min(n - j);
                    pack_b(
                        nr,
                        &b.block(q, j, kc_block, nc_block),
                        &mut packed_b,
                        &self.distributor,
                        min_batch_size,
                    )?;
                    macro_kernel(
                        &ctx,
                        mc_block,
                        nc_block,
                        kc_block,
                        &packed_a,
                        &packed_b,
                        c.block_mut(i, j, mc_block, nc_block),
                        ldc,
                    )?;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("kernel", &self.kernel)
            .finish_non_exhaustive()
    }
}
