#[cfg(target_arch = "aarch64")]
use std::arch::aarch64::*;

use crate::simd::SimdF64;

pub const LANE_COUNT: usize = 2;

/// A NEON vector of 2 64-bit floating point values
#[derive(Copy, Clone, Debug)]
pub struct F64x2 {
    pub elements: float64x2_t,
}

impl SimdF64 for F64x2 {
    const LANES: usize = LANE_COUNT;

    #[inline(always)]
    unsafe fn zeros() -> Self {
        Self {
            elements: vdupq_n_f64(0.0),
        }
    }

    #[inline(always)]
    unsafe fn splat(value: f64) -> Self {
        Self {
            elements: vdupq_n_f64(value),
        }
    }

    #[inline(always)]
    unsafe fn load_unaligned(ptr: *const f64) -> Self {
        Self {
            elements: vld1q_f64(ptr),
        }
    }

    #[inline(always)]
    unsafe fn store_unaligned_at(&self, ptr: *mut f64) {
        vst1q_f64(ptr, self.elements)
    }

    /// `vfmaq_f64(acc, a, b)` computes `acc + a * b` with a single rounding.
    #[inline(always)]
    unsafe fn fmadd(&self, a: Self, b: Self) -> Self {
        Self {
            elements: vfmaq_f64(self.elements, a.elements, b.elements),
        }
    }
}
