/// The operations a microkernel needs from one f64 vector register.
///
/// Implementations are thin wrappers over a native register type. All
/// methods are `unsafe` because they execute instructions that may be
/// missing on the running CPU; callers must only use a type after the
/// hardware detector has confirmed its instruction set.
pub trait SimdF64: Copy {
    /// Number of `f64` lanes in one register.
    const LANES: usize;

    /// A register with every lane set to `0.0`.
    ///
    /// # Safety
    ///
    /// The CPU must support the instruction set of the implementing type.
    unsafe fn zeros() -> Self;

    /// A register with every lane set to `value`.
    ///
    /// # Safety
    ///
    /// The CPU must support the instruction set of the implementing type.
    unsafe fn splat(value: f64) -> Self;

    /// Loads `LANES` consecutive values starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads of `LANES` `f64` values. No alignment
    /// is required.
    unsafe fn load_unaligned(ptr: *const f64) -> Self;

    /// Stores all lanes to `LANES` consecutive values starting at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes of `LANES` `f64` values. No alignment
    /// is required.
    unsafe fn store_unaligned_at(&self, ptr: *mut f64);

    /// Fused multiply-add: returns `a * b + self` lane by lane.
    ///
    /// # Safety
    ///
    /// The CPU must support the instruction set of the implementing type.
    unsafe fn fmadd(&self, a: Self, b: Self) -> Self;
}
