//! Runtime hardware capability detection.
//!
//! The detector runs once, on first access to [`RUNTIME_HW_CONFIG`], and the
//! result is immutable for the life of the process. Two environment variables
//! are honoured at that point:
//!
//! - `AUTOGEMM_NUM_THREADS`: default worker count for new engines.
//! - `AUTOGEMM_MAX_VECTOR_WIDTH`: cap on the usable vector width, in bits
//!   (`128`, `256` or `512`).

use crate::error::{invalid_argument, unsupported_hardware, Result};
use log::{debug, warn};
use once_cell::sync::Lazy;
use std::fmt;

/// Environment variable overriding the default worker count.
pub const NUM_THREADS_ENV: &str = "AUTOGEMM_NUM_THREADS";
/// Environment variable capping the detected vector width.
pub const MAX_VECTOR_WIDTH_ENV: &str = "AUTOGEMM_MAX_VECTOR_WIDTH";

/// SIMD register width a microkernel is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VectorWidth {
    /// 128-bit vectors, two `f64` lanes.
    V128,
    /// 256-bit vectors, four `f64` lanes.
    V256,
    /// 512-bit vectors, eight `f64` lanes.
    V512,
}

impl VectorWidth {
    /// All widths, narrowest first.
    pub const ALL: [VectorWidth; 3] = [VectorWidth::V128, VectorWidth::V256, VectorWidth::V512];

    pub const fn bits(self) -> usize {
        match self {
            VectorWidth::V128 => 128,
            VectorWidth::V256 => 256,
            VectorWidth::V512 => 512,
        }
    }

    /// Number of `f64` lanes in one register.
    pub const fn lanes(self) -> usize {
        self.bits() / 64
    }

    /// Architectural vector registers a kernel of this width can keep live:
    /// `xmm0-15`/`ymm0-15` on x86, `zmm0-31` with AVX-512, `v0-31` on NEON.
    pub const fn registers(self) -> usize {
        match self {
            VectorWidth::V128 if cfg!(target_arch = "aarch64") => 32,
            VectorWidth::V128 | VectorWidth::V256 => 16,
            VectorWidth::V512 => 32,
        }
    }

    pub fn from_bits(bits: usize) -> Result<Self> {
        match bits {
            128 => Ok(VectorWidth::V128),
            256 => Ok(VectorWidth::V256),
            512 => Ok(VectorWidth::V512),
            other => Err(invalid_argument(format!(
                "vector width must be 128, 256 or 512 bits, got {other}"
            ))),
        }
    }
}

impl fmt::Display for VectorWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

/// Instruction-set features relevant to the f64 kernels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    pub sse2: bool,
    pub avx: bool,
    pub avx2: bool,
    pub fma: bool,
    pub avx512f: bool,
    pub neon: bool,
}

impl CpuFeatures {
    /// Whether the silicon (and OS) can run a kernel of `width`, ignoring
    /// overrides and what was compiled in.
    fn can_run(&self, width: VectorWidth) -> bool {
        match width {
            // The x86 128-bit kernel is FMA based like the wider ones.
            VectorWidth::V128 => (self.sse2 && self.fma) || self.neon,
            VectorWidth::V256 => self.avx && self.avx2 && self.fma,
            VectorWidth::V512 => self.avx512f && self.fma,
        }
    }
}

/// Whether this binary contains native kernels for `width`.
pub const fn is_compiled_in(width: VectorWidth) -> bool {
    match width {
        VectorWidth::V128 => cfg!(any(
            target_arch = "x86",
            target_arch = "x86_64",
            target_arch = "aarch64"
        )),
        VectorWidth::V256 => cfg!(any(target_arch = "x86", target_arch = "x86_64")),
        VectorWidth::V512 => cfg!(autogemm_avx512),
    }
}

/// Snapshot of the machine, taken once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareConfig {
    cpu_ft: CpuFeatures,
    width_cap: Option<VectorWidth>,
    logical_cores: usize,
    num_threads: usize,
}

impl HardwareConfig {
    /// Builds a configuration from explicit parts.
    ///
    /// Detection goes through [`RUNTIME_HW_CONFIG`]; this exists so callers
    /// and tests can describe a machine other than the current one.
    pub fn new(
        cpu_ft: CpuFeatures,
        width_cap: Option<VectorWidth>,
        logical_cores: usize,
        num_threads: usize,
    ) -> Self {
        HardwareConfig {
            cpu_ft,
            width_cap,
            logical_cores: logical_cores.max(1),
            num_threads: num_threads.max(1),
        }
    }

    pub fn cpu_features(&self) -> CpuFeatures {
        self.cpu_ft
    }

    /// Number of logical cores reported by the OS.
    pub fn logical_cores(&self) -> usize {
        self.logical_cores
    }

    /// Default worker count: `AUTOGEMM_NUM_THREADS` or the logical core count.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Whether a kernel of `width` can be executed here.
    pub fn supports(&self, width: VectorWidth) -> bool {
        let capped = self.width_cap.is_some_and(|cap| width > cap);
        !capped && is_compiled_in(width) && self.cpu_ft.can_run(width)
    }

    /// Widest usable vector width.
    pub fn widest_vector(&self) -> Result<VectorWidth> {
        VectorWidth::ALL
            .iter()
            .rev()
            .copied()
            .find(|&w| self.supports(w))
            .ok_or_else(|| unsupported_hardware("no usable f64 SIMD capability on this CPU"))
    }

    /// Fails with `InvalidArgument` unless `width` is usable.
    ///
    /// A width that was asked for explicitly is an argument the caller can
    /// change; `UnsupportedHardware` is kept for [`widest_vector`] finding
    /// nothing at all.
    ///
    /// [`widest_vector`]: HardwareConfig::widest_vector
    pub fn require(&self, width: VectorWidth) -> Result<()> {
        if self.supports(width) {
            Ok(())
        } else if !is_compiled_in(width) {
            Err(invalid_argument(format!(
                "{width} kernels are not compiled into this binary"
            )))
        } else if self.width_cap.is_some_and(|cap| width > cap) {
            Err(invalid_argument(format!(
                "{width} vectors are disabled by {MAX_VECTOR_WIDTH_ENV}"
            )))
        } else {
            Err(invalid_argument(format!(
                "{width} vectors are not available on this CPU"
            )))
        }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn detect_cpu_features() -> CpuFeatures {
    let cpuid = raw_cpuid::CpuId::new();
    let mut cpu_ft = CpuFeatures::default();

    if let Some(info) = cpuid.get_feature_info() {
        cpu_ft.sse2 = info.has_sse2();
        cpu_ft.avx = info.has_avx() && info.has_oxsave();
        cpu_ft.fma = info.has_fma();
    }
    if let Some(info) = cpuid.get_extended_feature_info() {
        cpu_ft.avx2 = info.has_avx2();
        cpu_ft.avx512f = info.has_avx512f();
    }

    // cpuid reports what the silicon implements; the std macros also check
    // that the OS saves the wider register state.
    cpu_ft.avx &= is_x86_feature_detected!("avx");
    cpu_ft.avx2 &= is_x86_feature_detected!("avx2");
    cpu_ft.fma &= is_x86_feature_detected!("fma");
    cpu_ft.avx512f &= is_x86_feature_detected!("avx512f");
    cpu_ft
}

#[cfg(target_arch = "aarch64")]
fn detect_cpu_features() -> CpuFeatures {
    use std::arch::is_aarch64_feature_detected;

    CpuFeatures {
        neon: is_aarch64_feature_detected!("neon"),
        ..CpuFeatures::default()
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64")))]
fn detect_cpu_features() -> CpuFeatures {
    CpuFeatures::default()
}

fn parse_num_threads(raw: &str) -> Option<usize> {
    match raw.trim().parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            warn!("ignoring {NUM_THREADS_ENV}={raw:?}: expected a positive integer");
            None
        }
    }
}

fn parse_width_cap(raw: &str) -> Option<VectorWidth> {
    let parsed = raw
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|bits| VectorWidth::from_bits(bits).ok());
    if parsed.is_none() {
        warn!("ignoring {MAX_VECTOR_WIDTH_ENV}={raw:?}: expected 128, 256 or 512");
    }
    parsed
}

fn detect_hw_config() -> HardwareConfig {
    let cpu_ft = detect_cpu_features();
    let logical_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let num_threads = std::env::var(NUM_THREADS_ENV)
        .ok()
        .and_then(|raw| parse_num_threads(&raw))
        .unwrap_or(logical_cores);
    let width_cap = std::env::var(MAX_VECTOR_WIDTH_ENV)
        .ok()
        .and_then(|raw| parse_width_cap(&raw));

    let config = HardwareConfig::new(cpu_ft, width_cap, logical_cores, num_threads);
    debug!(
        "detected {:?}, {} logical cores, {} default threads, widest vector {:?}",
        cpu_ft,
        logical_cores,
        config.num_threads(),
        config.widest_vector().ok()
    );
    config
}

/// Process-wide hardware configuration, detected on first access.
pub static RUNTIME_HW_CONFIG: Lazy<HardwareConfig> = Lazy::new(detect_hw_config);
