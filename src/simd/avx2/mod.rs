//! 256-bit x86 backend (AVX2 + FMA3).

pub mod f64x4;
