//! AVX2 4-lane f64 SIMD vector.
//!
//! `F64x4` wraps `__m256d`. It is the workhorse register type on Haswell and
//! later cores, where two 256-bit FMA units keep a 4×8 register tile busy.

#[cfg(target_arch = "x86")]
use std::arch::x86::*;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::simd::SimdF64;

/// Number of f64 elements that fit in an AVX2 256-bit vector.
pub const LANE_COUNT: usize = 4;

/// AVX2 SIMD vector containing 4 packed f64 values.
#[derive(Copy, Clone, Debug)]
pub struct F64x4 {
    /// AVX 256-bit register containing 4 packed f64 values
    pub elements: __m256d,
}

impl SimdF64 for F64x4 {
    const LANES: usize = LANE_COUNT;

    #[inline(always)]
    unsafe fn zeros() -> Self {
        Self {
            elements: _mm256_setzero_pd(),
        }
    }

    #[inline(always)]
    unsafe fn splat(value: f64) -> Self {
        Self {
            elements: _mm256_set1_pd(value),
        }
    }

    /// Loads 4 elements with `_mm256_loadu_pd`; on current cores this costs
    /// the same as the aligned form when the data happens to be aligned.
    #[inline(always)]
    unsafe fn load_unaligned(ptr: *const f64) -> Self {
        Self {
            elements: _mm256_loadu_pd(ptr),
        }
    }

    #[inline(always)]
    unsafe fn store_unaligned_at(&self, ptr: *mut f64) {
        _mm256_storeu_pd(ptr, self.elements)
    }

    #[inline(always)]
    unsafe fn fmadd(&self, a: Self, b: Self) -> Self {
        Self {
            elements: _mm256_fmadd_pd(a.elements, b.elements, self.elements),
        }
    }
}
