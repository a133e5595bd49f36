//! Engine configuration.
//!
//! Defaults come from the crate-level constants ([`MR`](crate::MR),
//! [`NR`](crate::NR), [`MC`](crate::MC), [`KC`](crate::KC),
//! [`NC`](crate::NC), [`MIN_BATCH_SIZE`](crate::MIN_BATCH_SIZE)) and from the
//! detected hardware; [`EngineBuilder`] overrides any of them.

use crate::engine::Engine;
use crate::error::{invalid_argument, Result};
use crate::hardware::{VectorWidth, RUNTIME_HW_CONFIG};
use crate::kernel::KernelShape;
use crate::{KC, MC, MIN_BATCH_SIZE, MR, NC, NR};

/// Cache blocking factors: A is packed `mc × kc` at a time, B `kc × nc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingParams {
    pub mc: usize,
    pub kc: usize,
    pub nc: usize,
}

impl BlockingParams {
    pub const fn new(mc: usize, kc: usize, nc: usize) -> Self {
        BlockingParams { mc, kc, nc }
    }
}

impl Default for BlockingParams {
    fn default() -> Self {
        BlockingParams::new(MC, KC, NC)
    }
}

/// Everything an [`Engine`] is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub shape: KernelShape,
    pub blocking: BlockingParams,
    pub vector_width: VectorWidth,
    /// Upper bound on concurrently running batches (and worker threads).
    pub max_parallelism: usize,
    /// Fewest row panels or B tiles a parallel batch may receive.
    pub min_batch_size: usize,
}

impl EngineConfig {
    /// Checks the divisibility rules tying the kernel shape to the blocking.
    pub fn validate(&self) -> Result<()> {
        let KernelShape { mr, nr } = self.shape;
        let BlockingParams { mc, kc, nc } = self.blocking;

        self.shape.validate(self.vector_width)?;
        if mc == 0 || kc == 0 || nc == 0 {
            return Err(invalid_argument(format!(
                "blocking factors must be non-zero, got mc={mc} kc={kc} nc={nc}"
            )));
        }
        if mc % mr != 0 {
            return Err(invalid_argument(format!(
                "mc ({mc}) must be a multiple of mr ({mr})"
            )));
        }
        if nc % nr != 0 {
            return Err(invalid_argument(format!(
                "nc ({nc}) must be a multiple of nr ({nr})"
            )));
        }
        if self.max_parallelism == 0 {
            return Err(invalid_argument("max_parallelism must be at least 1"));
        }
        if self.min_batch_size == 0 {
            return Err(invalid_argument("min_batch_size must be at least 1"));
        }
        Ok(())
    }
}

/// `MR × NR`, or `MR × 2 vectors` where the register file is too small for
/// it (128-bit vectors on x86 have 16 registers, `4x8` needs 24).
pub fn default_shape(width: VectorWidth) -> KernelShape {
    let shape = KernelShape::new(MR, NR);
    if shape.validate(width).is_ok() {
        shape
    } else {
        KernelShape::new(MR, 2 * width.lanes())
    }
}

/// Builder for [`Engine`].
///
/// ```no_run
/// use autogemm::{Engine, VectorWidth};
///
/// let engine = Engine::builder()
///     .shape(4, 8)
///     .blocking(256, 256, 128)
///     .vector_width(VectorWidth::V256)
///     .max_parallelism(4)
///     .build()?;
/// # Ok::<(), autogemm::GemmError>(())
/// ```
#[derive(Debug, Clone)]
pub struct EngineBuilder {
    shape: Option<KernelShape>,
    blocking: BlockingParams,
    vector_width: Option<VectorWidth>,
    max_parallelism: Option<usize>,
    min_batch_size: usize,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        EngineBuilder {
            shape: None,
            blocking: BlockingParams::default(),
            vector_width: None,
            max_parallelism: None,
            min_batch_size: MIN_BATCH_SIZE,
        }
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register-tile shape of the microkernel.
    pub fn shape(mut self, mr: usize, nr: usize) -> Self {
        self.shape = Some(KernelShape::new(mr, nr));
        self
    }

    pub fn blocking(mut self, mc: usize, kc: usize, nc: usize) -> Self {
        self.blocking = BlockingParams::new(mc, kc, nc);
        self
    }

    /// Vector width to generate for instead of the widest detected one.
    pub fn vector_width(mut self, width: VectorWidth) -> Self {
        self.vector_width = Some(width);
        self
    }

    pub fn max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = Some(max_parallelism);
        self
    }

    pub fn min_batch_size(mut self, min_batch_size: usize) -> Self {
        self.min_batch_size = min_batch_size;
        self
    }

    /// Resolves defaults and validates the result.
    pub fn config(&self) -> Result<EngineConfig> {
        let vector_width = match self.vector_width {
            Some(width) => width,
            None => RUNTIME_HW_CONFIG.widest_vector()?,
        };
        let config = EngineConfig {
            shape: self.shape.unwrap_or_else(|| default_shape(vector_width)),
            blocking: self.blocking,
            vector_width,
            max_parallelism: self
                .max_parallelism
                .unwrap_or_else(|| RUNTIME_HW_CONFIG.num_threads()),
            min_batch_size: self.min_batch_size,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn build(&self) -> Result<Engine> {
        Engine::with_config(self.config()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mr: usize, nr: usize, mc: usize, nc: usize) -> EngineConfig {
        EngineConfig {
            shape: KernelShape::new(mr, nr),
            blocking: BlockingParams::new(mc, 64, nc),
            vector_width: VectorWidth::V256,
            max_parallelism: 2,
            min_batch_size: 1,
        }
    }

    #[test]
    fn test_divisibility_rules() {
        assert!(config(4, 8, 64, 64).validate().is_ok());
        assert!(config(4, 8, 66, 64).validate().is_err());
        assert!(config(4, 8, 64, 60).validate().is_err());
        assert!(config(4, 6, 64, 60).validate().is_err());
        assert!(config(4, 8, 0, 64).validate().is_err());
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        let mut c = config(4, 8, 64, 64);
        c.max_parallelism = 0;
        assert!(c.validate().is_err());
        c.max_parallelism = 1;
        c.min_batch_size = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_builder_defaults() {
        let builder = EngineBuilder::new();
        if let Ok(config) = builder.config() {
            assert_eq!(config.shape, default_shape(config.vector_width));
            assert_eq!(config.blocking, BlockingParams::new(MC, KC, NC));
            assert_eq!(config.max_parallelism, RUNTIME_HW_CONFIG.num_threads());
            assert_eq!(config.min_batch_size, MIN_BATCH_SIZE);
        }
    }

    #[test]
    fn test_default_shape_fits_every_width() {
        assert_eq!(default_shape(VectorWidth::V256), KernelShape::new(MR, NR));
        assert_eq!(default_shape(VectorWidth::V512), KernelShape::new(MR, NR));
        for width in VectorWidth::ALL {
            let shape = default_shape(width);
            assert!(shape.validate(width).is_ok(), "{shape} at {width}");
            assert_eq!(NC % shape.nr, 0);
            assert_eq!(MC % shape.mr, 0);
        }
    }

    #[test]
    fn test_builder_rejects_bad_blocking() {
        let result = EngineBuilder::new()
            .vector_width(VectorWidth::V128)
            .shape(4, 4)
            .blocking(30, 64, 64)
            .config();
        assert!(matches!(
            result,
            Err(crate::GemmError::InvalidArgument { .. })
        ));
    }
}
