//! Microkernel generation.
//!
//! A microkernel multiplies an `mr×k` packed A panel by a `k×nr` packed B
//! panel and accumulates the `mr×nr` result into C. Kernels are planned by a
//! small compiler pipeline:
//!
//! ```text
//! KernelBuilder ──► Program (IR) ──► ControlFlow ──► schedule ──► MicroKernel
//! ```
//!
//! The emitter lowers the scheduled program to an instruction listing, checks
//! it describes an `mr × nr/lanes` register tile, and binds the natively
//! compiled tile kernel for that shape and width. That kernel is fully
//! unrolled and holds the whole C tile in vector registers for the duration
//! of the `k` loop.
//!
//! [`build_kernel`] runs the whole pipeline for one shape and vector width.

pub mod builder;
pub mod cfg;
pub mod emit;
pub mod ir;
pub mod schedule;
pub(crate) mod tile;

pub use emit::MicroKernel;

use crate::error::{invalid_argument, Result};
use crate::hardware::VectorWidth;
use log::{debug, log_enabled, trace, Level};
use std::fmt;

/// Largest architectural vector register file of any supported width.
pub const MAX_VEC_REGS: usize = 32;
/// Reference slots in a lowered kernel.
pub const MAX_REFS: usize = 40;
/// Integer slots in a lowered kernel.
pub const MAX_NUMS: usize = 8;

// Kernel argument positions: kernel(k, a, b, c, ldc).
pub(crate) const ARG_K: u8 = 0;
pub(crate) const ARG_A: u8 = 1;
pub(crate) const ARG_B: u8 = 2;
pub(crate) const ARG_C: u8 = 3;
pub(crate) const ARG_LDC: u8 = 4;

/// Register-tile shape of a microkernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelShape {
    pub mr: usize,
    pub nr: usize,
}

impl KernelShape {
    pub const fn new(mr: usize, nr: usize) -> Self {
        KernelShape { mr, nr }
    }

    /// Elements in one C tile.
    pub const fn tile_len(&self) -> usize {
        self.mr * self.nr
    }

    /// Vector registers live across the `k` loop: one broadcast per row, one
    /// B vector per column group and the accumulators.
    pub fn live_registers(&self, width: VectorWidth) -> usize {
        let nv = self.nr / width.lanes();
        self.mr + nv + self.mr * nv
    }

    /// Checks the shape can be generated for `width`.
    pub fn validate(&self, width: VectorWidth) -> Result<()> {
        if self.mr == 0 || self.nr == 0 {
            return Err(invalid_argument(format!(
                "kernel shape {self} must have non-zero mr and nr"
            )));
        }
        if self.nr % width.lanes() != 0 {
            return Err(invalid_argument(format!(
                "nr ({}) must be a multiple of the {} lane count ({})",
                self.nr,
                width,
                width.lanes()
            )));
        }
        let live = self.live_registers(width);
        let available = width.registers();
        if live > available {
            return Err(invalid_argument(format!(
                "kernel shape {self} needs {live} vector registers at {width}, the CPU has {available}"
            )));
        }
        Ok(())
    }
}

impl fmt::Display for KernelShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.mr, self.nr)
    }
}

/// Generates, schedules and emits the microkernel for `shape` at `width`.
pub fn build_kernel(shape: KernelShape, width: VectorWidth) -> Result<MicroKernel> {
    let mut program = builder::KernelBuilder::new(shape, width)?.build()?;
    let flow = cfg::ControlFlow::build(&program)?;
    if log_enabled!(Level::Trace) {
        trace!("{shape} kernel before scheduling:\n{}", flow.display(&program));
    }

    schedule::schedule_program(&mut program, &flow);
    if log_enabled!(Level::Trace) {
        trace!("{shape} kernel after scheduling:\n{}", flow.display(&program));
    }

    let kernel = MicroKernel::emit(shape, width, &program, &flow)?;
    debug!(
        "built {} kernel for {}: {} nodes, {} blocks, {} instructions",
        shape,
        width,
        program.nodes().len(),
        flow.blocks().len(),
        kernel.instruction_count()
    );
    Ok(kernel)
}

/// Scalar microkernel with the same contract as a generated one.
///
/// `a` holds `k` groups of `mr` values, `b` holds `k` rows of `nr` values,
/// and `c` rows are `ldc` apart. Each update is a fused multiply-add, in the
/// same order the generated kernels use, so results match bit for bit.
pub fn reference_kernel(
    mr: usize,
    nr: usize,
    k: usize,
    a: &[f64],
    b: &[f64],
    c: &mut [f64],
    ldc: usize,
) {
    for p in 0..k {
        let a_col = &a[p * mr..(p + 1) * mr];
        let b_row = &b[p * nr..(p + 1) * nr];
        for (i, &a_ip) in a_col.iter().enumerate() {
            let c_row = &mut c[i * ldc..i * ldc + nr];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij = a_ip.mul_add(b_pj, *c_ij);
            }
        }
    }
}
