use std::env;
use std::process::Command;

// First stable release that ships the AVX-512F intrinsics and target feature.
const AVX512_STABLE_MINOR: u32 = 89;

#[derive(Debug, PartialEq, Eq)]
struct RustcVersion {
    major: u32,
    minor: u32,
}

impl RustcVersion {
    // Parses the first line of `rustc --version --verbose`, e.g.
    // "rustc 1.89.0 (29483883e 2025-08-04)" or "rustc 1.91.0-nightly (...)".
    // Nightlies carry the version they will be released as, so the same
    // cut-off applies to every channel.
    fn parse(version_info: &str) -> Option<Self> {
        let line = version_info.lines().next()?;
        let version = line.split_whitespace().nth(1)?;
        let mut parts = version.split(['.', '-']);
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;

        Some(RustcVersion { major, minor })
    }

    fn has_avx512_intrinsics(&self) -> bool {
        self.major > 1 || self.minor >= AVX512_STABLE_MINOR
    }
}

fn rustc_version() -> Option<RustcVersion> {
    let rustc = env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let output = Command::new(rustc)
        .args(["--version", "--verbose"])
        .output()
        .ok()?;

    RustcVersion::parse(&String::from_utf8_lossy(&output.stdout))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Disable flag warnings for build
    println!("cargo::rustc-check-cfg=cfg(autogemm_avx512)");

    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let version = rustc_version();

    // The 512-bit microkernel backend is only compiled when the toolchain
    // exposes the intrinsics; runtime detection still decides whether it runs.
    let x86 = target_arch == "x86_64" || target_arch == "x86";
    if x86 && version.is_some_and(|v| v.has_avx512_intrinsics()) {
        println!("cargo:rustc-cfg=autogemm_avx512");
    }
}
