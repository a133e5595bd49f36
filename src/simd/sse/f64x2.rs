//! Two-lane f64 vector on `__m128d`.
//!
//! Loads and stores are plain SSE2; the multiply-add uses the FMA3
//! `_mm_fmadd_pd` form, so this type requires `fma` as well as `sse2`.

#[cfg(target_arch = "x86")]
use std::arch::x86::*;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::simd::SimdF64;

/// Number of f64 elements in a 128-bit register.
pub const LANE_COUNT: usize = 2;

/// SSE 128-bit vector containing 2 packed f64 values.
#[derive(Copy, Clone, Debug)]
pub struct F64x2 {
    pub elements: __m128d,
}

impl SimdF64 for F64x2 {
    const LANES: usize = LANE_COUNT;

    #[inline(always)]
    unsafe fn zeros() -> Self {
        Self {
            elements: _mm_setzero_pd(),
        }
    }

    #[inline(always)]
    unsafe fn splat(value: f64) -> Self {
        Self {
            elements: _mm_set1_pd(value),
        }
    }

    #[inline(always)]
    unsafe fn load_unaligned(ptr: *const f64) -> Self {
        Self {
            elements: _mm_loadu_pd(ptr),
        }
    }

    #[inline(always)]
    unsafe fn store_unaligned_at(&self, ptr: *mut f64) {
        _mm_storeu_pd(ptr, self.elements)
    }

    #[inline(always)]
    unsafe fn fmadd(&self, a: Self, b: Self) -> Self {
        Self {
            elements: _mm_fmadd_pd(a.elements, b.elements, self.elements),
        }
    }
}
