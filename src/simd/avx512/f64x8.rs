#[cfg(target_arch = "x86")]
use std::arch::x86::*;

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

use crate::simd::SimdF64;

/// Number of f64 elements in a 512-bit register.
pub const LANE_COUNT: usize = 8;

/// AVX-512 SIMD vector containing 8 packed f64 values.
#[derive(Copy, Clone, Debug)]
pub struct F64x8 {
    pub elements: __m512d,
}

impl SimdF64 for F64x8 {
    const LANES: usize = LANE_COUNT;

    #[inline(always)]
    unsafe fn zeros() -> Self {
        Self {
            elements: _mm512_setzero_pd(),
        }
    }

    #[inline(always)]
    unsafe fn splat(value: f64) -> Self {
        Self {
            elements: _mm512_set1_pd(value),
        }
    }

    #[inline(always)]
    unsafe fn load_unaligned(ptr: *const f64) -> Self {
        Self {
            elements: _mm512_loadu_pd(ptr),
        }
    }

    #[inline(always)]
    unsafe fn store_unaligned_at(&self, ptr: *mut f64) {
        _mm512_storeu_pd(ptr, self.elements)
    }

    #[inline(always)]
    unsafe fn fmadd(&self, a: Self, b: Self) -> Self {
        Self {
            elements: _mm512_fmadd_pd(a.elements, b.elements, self.elements),
        }
    }
}
