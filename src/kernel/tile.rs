//! Native register-tile kernels.
//!
//! [`tile`] is written once over a register type and two const parameters:
//! `MR` rows and `NV` vectors per row. Every loop except the one over `k` has
//! a constant trip count, so each instantiation unrolls completely and its
//! `MR × NV` accumulator array lives in vector registers. Instantiations are
//! wrapped in `#[target_feature]` functions, one family per vector width, and
//! [`select`] picks the one matching a validated shape at run time.

use crate::hardware::VectorWidth;
use crate::simd::SimdF64;

/// `kernel(k, a, b, c, ldc)`, the calling convention of every tile kernel.
pub(crate) type TileFn = unsafe fn(usize, *const f64, *const f64, *mut f64, usize);

/// `C[MR × NV*LANES] += A_panel * B_panel`.
///
/// The body follows the scheduled program: the row of B first, then for
/// each row of A one broadcast feeding `NV` fused multiply-adds.
///
/// # Safety
///
/// The CPU must support `V`. `a` must be valid for `MR*k` reads, `b` for
/// `NV*LANES*k` reads, and every row `c + i*ldc` for `NV*LANES` reads and
/// writes.
#[inline(always)]
#[allow(clippy::needless_range_loop)]
unsafe fn tile<V: SimdF64, const MR: usize, const NV: usize>(
    k: usize,
    mut a: *const f64,
    mut b: *const f64,
    c: *mut f64,
    ldc: usize,
) {
    let mut acc = [[V::zeros(); NV]; MR];
    for i in 0..MR {
        for j in 0..NV {
            acc[i][j] = V::load_unaligned(c.add(i * ldc + j * V::LANES));
        }
    }

    for _ in 0..k {
        let mut b_row = [V::zeros(); NV];
        for j in 0..NV {
            b_row[j] = V::load_unaligned(b.add(j * V::LANES));
        }
        b = b.add(NV * V::LANES);

        for i in 0..MR {
            let a_i = V::splat(*a.add(i));
            for j in 0..NV {
                acc[i][j] = acc[i][j].fmadd(a_i, b_row[j]);
            }
        }
        a = a.add(MR);
    }

    for i in 0..MR {
        for j in 0..NV {
            acc[i][j].store_unaligned_at(c.add(i * ldc + j * V::LANES));
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "sse2,fma")]
unsafe fn tile_sse_fma<const MR: usize, const NV: usize>(
    k: usize,
    a: *const f64,
    b: *const f64,
    c: *mut f64,
    ldc: usize,
) {
    tile::<crate::simd::sse::f64x2::F64x2, MR, NV>(k, a, b, c, ldc)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx,avx2,fma")]
unsafe fn tile_avx2<const MR: usize, const NV: usize>(
    k: usize,
    a: *const f64,
    b: *const f64,
    c: *mut f64,
    ldc: usize,
) {
    tile::<crate::simd::avx2::f64x4::F64x4, MR, NV>(k, a, b, c, ldc)
}

#[cfg(all(autogemm_avx512, any(target_arch = "x86", target_arch = "x86_64")))]
#[target_feature(enable = "avx512f,fma")]
unsafe fn tile_avx512<const MR: usize, const NV: usize>(
    k: usize,
    a: *const f64,
    b: *const f64,
    c: *mut f64,
    ldc: usize,
) {
    tile::<crate::simd::avx512::f64x8::F64x8, MR, NV>(k, a, b, c, ldc)
}

#[cfg(target_arch = "aarch64")]
#[target_feature(enable = "neon")]
unsafe fn tile_neon<const MR: usize, const NV: usize>(
    k: usize,
    a: *const f64,
    b: *const f64,
    c: *mut f64,
    ldc: usize,
) {
    tile::<crate::simd::neon::f64x2::F64x2, MR, NV>(k, a, b, c, ldc)
}

macro_rules! select_tile {
    ($kernel:ident, $mr:expr, $nv:expr; $(($m:literal, $n:literal)),+ $(,)?) => {
        match ($mr, $nv) {
            $(($m, $n) => Some($kernel::<$m, $n> as TileFn),)+
            _ => None,
        }
    };
}

/// Every `(mr, nv)` with `mr + nv + mr*nv <= 16`.
#[allow(unused_macros)]
macro_rules! select_tile_16 {
    ($kernel:ident, $mr:expr, $nv:expr) => {
        select_tile!($kernel, $mr, $nv;
            (1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 6), (1, 7),
            (2, 1), (2, 2), (2, 3), (2, 4),
            (3, 1), (3, 2), (3, 3),
            (4, 1), (4, 2),
            (5, 1), (6, 1), (7, 1),
        )
    };
}

/// Every `(mr, nv)` with `mr + nv + mr*nv <= 32`.
#[allow(unused_macros)]
macro_rules! select_tile_32 {
    ($kernel:ident, $mr:expr, $nv:expr) => {
        select_tile!($kernel, $mr, $nv;
            (1, 1), (1, 2), (1, 3), (1, 4), (1, 5), (1, 6), (1, 7), (1, 8),
            (1, 9), (1, 10), (1, 11), (1, 12), (1, 13), (1, 14), (1, 15),
            (2, 1), (2, 2), (2, 3), (2, 4), (2, 5), (2, 6), (2, 7), (2, 8),
            (2, 9), (2, 10),
            (3, 1), (3, 2), (3, 3), (3, 4), (3, 5), (3, 6), (3, 7),
            (4, 1), (4, 2), (4, 3), (4, 4), (4, 5),
            (5, 1), (5, 2), (5, 3), (5, 4),
            (6, 1), (6, 2), (6, 3),
            (7, 1), (7, 2), (7, 3),
            (8, 1), (8, 2),
            (9, 1), (9, 2),
            (10, 1), (10, 2),
            (11, 1), (12, 1), (13, 1), (14, 1), (15, 1),
        )
    };
}

/// The compiled kernel for an `mr × nv` tile of `width` vectors, if this
/// binary contains one.
///
/// Does not check the running CPU; callers go through the hardware detector
/// first.
pub(crate) fn select(width: VectorWidth, mr: usize, nv: usize) -> Option<TileFn> {
    match width {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        VectorWidth::V128 => select_tile_16!(tile_sse_fma, mr, nv),
        #[cfg(target_arch = "aarch64")]
        VectorWidth::V128 => select_tile_32!(tile_neon, mr, nv),
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        VectorWidth::V256 => select_tile_16!(tile_avx2, mr, nv),
        #[cfg(all(autogemm_avx512, any(target_arch = "x86", target_arch = "x86_64")))]
        VectorWidth::V512 => select_tile_32!(tile_avx512, mr, nv),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Lane count of the register type behind `width` on this target.
#[cfg(test)]
fn native_lanes(width: VectorWidth) -> Option<usize> {
    match width {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        VectorWidth::V128 => Some(<crate::simd::sse::f64x2::F64x2 as SimdF64>::LANES),
        #[cfg(target_arch = "aarch64")]
        VectorWidth::V128 => Some(<crate::simd::neon::f64x2::F64x2 as SimdF64>::LANES),
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        VectorWidth::V256 => Some(<crate::simd::avx2::f64x4::F64x4 as SimdF64>::LANES),
        #[cfg(all(autogemm_avx512, any(target_arch = "x86", target_arch = "x86_64")))]
        VectorWidth::V512 => Some(<crate::simd::avx512::f64x8::F64x8 as SimdF64>::LANES),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}
