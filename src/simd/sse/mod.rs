//! 128-bit x86 backend (SSE2 registers, FMA3 arithmetic).

pub mod f64x2;
