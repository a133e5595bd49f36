//! f64 SIMD lane types the native tile kernels are written over.
//!
//! Each backend wraps one native register type and implements [`SimdF64`].
//! Backends are compiled per target architecture; whether one may actually
//! run is decided at run time by [`crate::hardware`].

pub mod traits;

pub use traits::SimdF64;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod sse;

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub mod avx2;

#[cfg(all(autogemm_avx512, any(target_arch = "x86", target_arch = "x86_64")))]
pub mod avx512;

#[cfg(target_arch = "aarch64")]
pub mod neon;
