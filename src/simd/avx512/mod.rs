//! 512-bit x86 backend (AVX-512F).
//!
//! Only compiled when the toolchain exposes the AVX-512 intrinsics; see
//! `build.rs`.

pub mod f64x8;
