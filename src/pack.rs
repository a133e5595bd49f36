//! Packing of A and B blocks into microkernel-ordered panels.
//!
//! A packed A block is a sequence of `mr × kc` tiles, one per `mr`-row
//! stripe, each stored column by column: element `(r, p)` of tile `t` lives
//! at `t*mr*kc + p*mr + r`. A packed B block is a sequence of `kc × nr`
//! tiles, one per `nr`-column stripe, stored row by row: element `(p, c)` of
//! tile `t` lives at `t*kc*nr + p*nr + c`. Stripes that run past the matrix
//! edge are zero-padded, so the microkernel always sees full tiles.

use crate::error::Result;
use crate::matrix::MatrixView;
use crate::parallel::Distributor;

/// Doubles needed to pack an `mc × kc` block of A.
pub fn packed_a_len(mr: usize, mc: usize, kc: usize) -> usize {
    mc.div_ceil(mr) * mr * kc
}

/// Doubles needed to pack a `kc × nc` block of B.
pub fn packed_b_len(nr: usize, kc: usize, nc: usize) -> usize {
    nc.div_ceil(nr) * nr * kc
}

/// Packs the `mc × kc` block `a` into `dst`, scaling every value by `alpha`.
///
/// # Panics
///
/// Panics if `dst` is shorter than [`packed_a_len`].
pub fn pack_a(mr: usize, a: &MatrixView<'_>, alpha: f64, dst: &mut [f64]) {
    let (mc, kc) = (a.rows(), a.cols());
    let tiles = mc.div_ceil(mr);
    if tiles == 0 || kc == 0 {
        return;
    }
    let dst = &mut dst[..tiles * mr * kc];

    for (t, tile) in dst.chunks_exact_mut(mr * kc).enumerate() {
        let first_row = t * mr;
        let rows = mr.min(mc - first_row);

        for r in 0..rows {
            let src = a.row(first_row + r);
            for (p, &value) in src.iter().enumerate() {
                tile[p * mr + r] = alpha * value;
            }
        }
        // Zero padding for the short last stripe.
        for r in rows..mr {
            for p in 0..kc {
                tile[p * mr + r] = 0.0;
            }
        }
    }
}

/// Packs the `kc × nc` block `b` into `dst`, one `nr`-column tile per task.
///
/// # Panics
///
/// Panics if `dst` is shorter than [`packed_b_len`].
pub fn pack_b(
    nr: usize,
    b: &MatrixView<'_>,
    dst: &mut [f64],
    distributor: &Distributor,
    min_batch_size: usize,
) -> Result<()> {
    let (kc, nc) = (b.rows(), b.cols());
    let tiles = nc.div_ceil(nr);
    if tiles == 0 || kc == 0 {
        return Ok(());
    }
    let dst = &mut dst[..tiles * kc * nr];

    distributor.parallel_for_chunks(dst, kc * nr, min_batch_size, |t, tile| {
        let first_col = t * nr;
        let cols = nr.min(nc - first_col);
        for (p, row) in tile.chunks_exact_mut(nr).enumerate() {
            row[..cols].copy_from_slice(&b.row(p)[first_col..first_col + cols]);
            row[cols..].fill(0.0);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: usize, cols: usize, ld: usize) -> Vec<f64> {
        (0..rows * ld).map(|i| (i % 17) as f64 - 8.0 + 0.25 * (i % 3) as f64).collect()
    }

    /// Reads element `(i, j)` of a packed A block.
    fn unpack_a(packed: &[f64], mr: usize, kc: usize, i: usize, j: usize) -> f64 {
        packed[(i / mr) * mr * kc + j * mr + i % mr]
    }

    /// Reads element `(i, j)` of a packed B block.
    fn unpack_b(packed: &[f64], nr: usize, kc: usize, i: usize, j: usize) -> f64 {
        packed[(j / nr) * kc * nr + i * nr + j % nr]
    }

    #[test]
    fn test_packed_lengths() {
        assert_eq!(packed_a_len(4, 10, 7), 12 * 7);
        assert_eq!(packed_a_len(4, 8, 7), 8 * 7);
        assert_eq!(packed_b_len(8, 5, 9), 5 * 16);
        assert_eq!(packed_b_len(8, 5, 0), 0);
    }

    #[test]
    fn test_pack_a_round_trip_with_alpha() {
        let (m, k, lda, mr) = (11, 6, 9, 4);
        let data = matrix(m, k, lda);
        let view = MatrixView::new("A", &data, m, k, lda).unwrap();
        let block = view.block(2, 1, 7, 5);
        let mut packed = vec![f64::NAN; packed_a_len(mr, 7, 5)];

        pack_a(mr, &block, -2.0, &mut packed);

        for i in 0..8 {
            for j in 0..5 {
                let expected = if i < 7 { -2.0 * block.get(i, j) } else { 0.0 };
                assert_eq!(
                    unpack_a(&packed, mr, 5, i, j),
                    expected,
                    "Mismatch at ({}, {})",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_pack_b_round_trip() {
        let (k, n, ldb, nr) = (5, 19, 21, 8);
        let data = matrix(k, n, ldb);
        let view = MatrixView::new("B", &data, k, n, ldb).unwrap();
        let mut packed = vec![f64::NAN; packed_b_len(nr, k, n)];

        for threads in [1, 4] {
            let distributor = Distributor::new(threads).unwrap();
            pack_b(nr, &view, &mut packed, &distributor, 1).unwrap();

            for i in 0..k {
                for j in 0..24 {
                    let expected = if j < n { view.get(i, j) } else { 0.0 };
                    assert_eq!(
                        unpack_b(&packed, nr, k, i, j),
                        expected,
                        "Mismatch at ({}, {}) with {} threads",
                        i,
                        j,
                        threads
                    );
                }
            }
        }
    }

    #[test]
    fn test_pack_empty_blocks() {
        let data = [1.0; 4];
        let view = MatrixView::new("B", &data, 2, 2, 2).unwrap();
        let distributor = Distributor::new(1).unwrap();
        let mut dst: Vec<f64> = Vec::new();
        pack_a(4, &view.block(0, 0, 0, 2), 1.0, &mut dst);
        pack_b(8, &view.block(0, 0, 2, 0), &mut dst, &distributor, 1).unwrap();
        assert!(dst.is_empty());
    }
}
