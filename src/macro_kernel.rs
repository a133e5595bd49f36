//! The macro-kernel: walks packed A and B blocks tile by tile.
//!
//! Row panels of `mr` rows are independent (each writes its own rows of C),
//! so they are distributed across workers. Within a panel the column tiles
//! run in order. Every tile goes through a stack scratch buffer so that the
//! microkernel always sees a full `mr × nr` tile with `ldc = nr`, even at the
//! bottom and right edges of C.

use crate::error::Result;
use crate::kernel::{MicroKernel, MAX_VEC_REGS};
use crate::parallel::Distributor;

/// Upper bound on `mr * nr` for any kernel that passes shape validation.
const MAX_TILE_LEN: usize = 8 * MAX_VEC_REGS;

/// Shared, read-only state of one macro-kernel call.
pub struct MacroContext<'a> {
    pub kernel: &'a MicroKernel,
    pub distributor: &'a Distributor,
    pub min_batch_size: usize,
}

/// `C[mc × nc] += packed_a * packed_b`.
///
/// `packed_a` holds `ceil(mc/mr)` A tiles and `packed_b` holds `ceil(nc/nr)`
/// B tiles, all of depth `k`. `c` starts at the block's top-left element and
/// has rows `ldc` apart; it must reach the end of the block's last row.
pub fn macro_kernel(
    ctx: &MacroContext<'_>,
    mc: usize,
    nc: usize,
    k: usize,
    packed_a: &[f64],
    packed_b: &[f64],
    c: &mut [f64],
    ldc: usize,
) -> Result<()> {
    if mc == 0 || nc == 0 {
        return Ok(());
    }
    let shape = ctx.kernel.shape();
    let (mr, nr) = (shape.mr, shape.nr);
    debug_assert!(shape.tile_len() <= MAX_TILE_LEN);
    let col_tiles = nc.div_ceil(nr);

    // Trimmed so that the `mr`-row chunks line up with the row panels.
    let c = &mut c[..(mc - 1) * ldc + nc];

    ctx.distributor
        .parallel_for_chunks(c, mr * ldc, ctx.min_batch_size, |panel, c_panel| {
            let rows = mr.min(mc - panel * mr);
            let a_tile = &packed_a[panel * mr * k..(panel + 1) * mr * k];
            let mut scratch = [0.0f64; MAX_TILE_LEN];
            let scratch = &mut scratch[..mr * nr];

            for tile in 0..col_tiles {
                let first_col = tile * nr;
                let cols = nr.min(nc - first_col);
                let b_tile = &packed_b[tile * k * nr..(tile + 1) * k * nr];

                load_tile(scratch, c_panel, rows, cols, nr, ldc, first_col);
                ctx.kernel.compute(k, a_tile, b_tile, scratch, nr);
                store_tile(scratch, c_panel, rows, cols, nr, ldc, first_col);
            }
            Ok(())
        })
}

/// Copies the `rows × cols` corner of C into `scratch`, zero-filling the rest.
#[inline(always)]
fn load_tile(
    scratch: &mut [f64],
    c_panel: &[f64],
    rows: usize,
    cols: usize,
    nr: usize,
    ldc: usize,
    first_col: usize,
) {
    for (r, dst) in scratch.chunks_exact_mut(nr).enumerate() {
        if r < rows {
            let src = &c_panel[r * ldc + first_col..r * ldc + first_col + cols];
            dst[..cols].copy_from_slice(src);
            dst[cols..].fill(0.0);
        } else {
            dst.fill(0.0);
        }
    }
}

/// Writes the `rows × cols` corner of `scratch` back to C.
#[inline(always)]
fn store_tile(
    scratch: &[f64],
    c_panel: &mut [f64],
    rows: usize,
    cols: usize,
    nr: usize,
    ldc: usize,
    first_col: usize,
) {
    for (r, src) in scratch.chunks_exact(nr).take(rows).enumerate() {
        c_panel[r * ldc + first_col..r * ldc + first_col + cols].copy_from_slice(&src[..cols]);
    }
}
