//! 128-bit aarch64 backend (Advanced SIMD).

pub mod f64x2;
