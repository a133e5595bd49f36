//! Lowers a scheduled program into a [`MicroKernel`].
//!
//! Every value is resolved to a slot index, every label to an instruction
//! offset, and jumps to the block that follows anyway are dropped. The
//! resulting listing is checked against the register-tile shape it was built
//! for and then bound to the natively compiled kernel of that shape, which
//! runs the same load, broadcast and FMA sequence fully unrolled.

use super::cfg::ControlFlow;
use super::ir::{Cmp, Node, Origin, Program, RefId, RegId, Scalar};
use super::tile::{self, TileFn};
use super::{KernelShape, ARG_A, ARG_B, ARG_C, ARG_K, ARG_LDC, MAX_NUMS, MAX_REFS, MAX_VEC_REGS};
use crate::error::{invalid_argument, Result};
use crate::hardware::{VectorWidth, RUNTIME_HW_CONFIG};
use std::fmt;

/// An integer operand of a lowered instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(isize),
    Num(u8),
}

/// A lowered instruction. Register, reference and number operands are slot
/// indices; jump targets are instruction offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Load {
        dst: u8,
        base: u8,
        offset: Operand,
    },
    Store {
        base: u8,
        src: u8,
    },
    Broadcast {
        dst: u8,
        base: u8,
    },
    MulAdd {
        acc: u8,
        x: u8,
        y: u8,
    },
    SetRef {
        dst: u8,
        src: u8,
        offset: Operand,
        step: Operand,
    },
    SetNum {
        dst: u8,
        src: Operand,
        offset: Operand,
    },
    Branch {
        lhs: Operand,
        cmp: Cmp,
        rhs: Operand,
        target: u32,
    },
    Jump {
        target: u32,
    },
    Return,
}

/// The resolved instruction stream of one kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Lowered {
    insts: Vec<Inst>,
}

fn slot(index: usize, limit: usize, what: &str) -> Result<u8> {
    if index < limit {
        Ok(index as u8)
    } else {
        Err(invalid_argument(format!(
            "kernel needs more than {limit} {what} slots"
        )))
    }
}

fn operand(scalar: Option<Scalar>, default: isize) -> Result<Operand> {
    match scalar {
        None => Ok(Operand::Imm(default)),
        Some(Scalar::Num(n)) => Ok(Operand::Num(slot(n.index(), MAX_NUMS, "number")?)),
        Some(Scalar::Const(c)) => isize::try_from(c)
            .map(Operand::Imm)
            .map_err(|_| invalid_argument(format!("kernel constant {c} out of range"))),
    }
}

fn lower_compute(node: &Node) -> Result<Inst> {
    let reg = |r: RegId| slot(r.index(), MAX_VEC_REGS, "vector register");
    let rf = |r: RefId| slot(r.index(), MAX_REFS, "reference");
    Ok(match *node {
        Node::LoadVec { dst, src, offset } => Inst::Load {
            dst: reg(dst)?,
            base: rf(src)?,
            offset: operand(offset, 0)?,
        },
        Node::StoreVec { dst, src } => Inst::Store {
            base: rf(dst)?,
            src: reg(src)?,
        },
        Node::Broadcast { dst, src } => Inst::Broadcast {
            dst: reg(dst)?,
            base: rf(src)?,
        },
        Node::MulAdd { acc, x, y } => Inst::MulAdd {
            acc: reg(acc)?,
            x: reg(x)?,
            y: reg(y)?,
        },
        Node::SetRef {
            dst,
            src,
            offset,
            step,
        } => Inst::SetRef {
            dst: rf(dst)?,
            src: rf(src)?,
            offset: operand(offset, 0)?,
            step: operand(step, 1)?,
        },
        Node::SetNumber { dst, src, offset } => Inst::SetNum {
            dst: slot(dst.index(), MAX_NUMS, "number")?,
            src: operand(Some(src), 0)?,
            offset: operand(offset, 0)?,
        },
        Node::Label(_) | Node::Branch { .. } | Node::Jump(_) => {
            return Err(invalid_argument(format!(
                "malformed kernel program: {node:?} inside a block body"
            )))
        }
    })
}

impl Lowered {
    /// Every parameter must bind a pointer argument to a reference and an
    /// integer argument to a number.
    fn check_params(program: &Program) -> Result<()> {
        for (i, decl) in program.refs().iter().enumerate() {
            slot(i, MAX_REFS, "reference")?;
            if let Origin::Param(arg) = decl.origin {
                if ![ARG_A, ARG_B, ARG_C].contains(&arg) {
                    return Err(invalid_argument(format!(
                        "reference {} bound to argument {arg}, which is not a pointer",
                        decl.name
                    )));
                }
            }
        }
        for (i, decl) in program.nums().iter().enumerate() {
            slot(i, MAX_NUMS, "number")?;
            if let Origin::Param(arg) = decl.origin {
                if ![ARG_K, ARG_LDC].contains(&arg) {
                    return Err(invalid_argument(format!(
                        "number {} bound to argument {arg}, which is not an integer",
                        decl.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn lower(program: &Program, flow: &ControlFlow, width: VectorWidth) -> Result<Self> {
        if program.reg_count() > width.registers() {
            return Err(invalid_argument(format!(
                "kernel needs {} vector registers, {} has {}",
                program.reg_count(),
                width,
                width.registers()
            )));
        }
        Self::check_params(program)?;

        let nodes = program.nodes();
        let blocks = flow.blocks();
        let mut insts = Vec::with_capacity(nodes.len() + 1);
        // Jump targets are block indices until every block start is known.
        let mut block_starts = Vec::with_capacity(blocks.len() + 1);

        for (index, block) in blocks.iter().enumerate() {
            block_starts.push(insts.len());
            for node in &nodes[block.start..block.end] {
                insts.push(lower_compute(node)?);
            }

            let next = index + 1;
            match block.terminator.map(|t| nodes[t]) {
                None => insts.push(Inst::Return),
                Some(Node::Jump(label)) => {
                    let target = flow.block_index(label)?;
                    if target != next {
                        insts.push(Inst::Jump {
                            target: target as u32,
                        });
                    }
                }
                Some(Node::Branch {
                    lhs,
                    cmp,
                    rhs,
                    target,
                    fallthrough,
                }) => {
                    insts.push(Inst::Branch {
                        lhs: operand(Some(lhs), 0)?,
                        cmp,
                        rhs: operand(Some(rhs), 0)?,
                        target: flow.block_index(target)? as u32,
                    });
                    let fall = match fallthrough {
                        Some(label) => flow.block_index(label)?,
                        None => next,
                    };
                    if fall != next {
                        insts.push(Inst::Jump {
                            target: fall as u32,
                        });
                    }
                }
                Some(other) => {
                    return Err(invalid_argument(format!(
                        "malformed kernel program: {other:?} used as a terminator"
                    )))
                }
            }
        }
        // Falling off the last block returns.
        block_starts.push(insts.len());
        if insts.last() != Some(&Inst::Return) {
            insts.push(Inst::Return);
        }

        for inst in &mut insts {
            if let Inst::Branch { target, .. } | Inst::Jump { target } = inst {
                *target = block_starts[*target as usize] as u32;
            }
        }

        Ok(Lowered { insts })
    }

    fn count(&self, pred: impl Fn(&Inst) -> bool) -> usize {
        self.insts.iter().filter(|inst| pred(*inst)).count()
    }

    /// Checks the listing is the `mr × nv` tile the native kernels implement:
    /// C loaded and stored once per accumulator, one B load per column
    /// vector, one broadcast per row and one FMA per accumulator.
    fn check_tile(&self, mr: usize, nv: usize) -> Result<()> {
        let fmas = self.count(|i| matches!(i, Inst::MulAdd { .. }));
        let broadcasts = self.count(|i| matches!(i, Inst::Broadcast { .. }));
        let loads = self.count(|i| matches!(i, Inst::Load { .. }));
        let stores = self.count(|i| matches!(i, Inst::Store { .. }));
        let branches = self.count(|i| matches!(i, Inst::Branch { .. }));
        let acc = mr * nv;
        if fmas != acc || broadcasts != mr || loads != acc + nv || stores != acc || branches != 1 {
            return Err(invalid_argument(format!(
                "lowered program is not a {mr}x{nv} register tile: {fmas} FMAs, \
                 {broadcasts} broadcasts, {loads} loads, {stores} stores, {branches} branches"
            )));
        }
        Ok(())
    }
}

/// A generated `mr×nr` kernel computing `C[mr×nr] += A_panel * B_panel`.
///
/// `A_panel` is `k` groups of `mr` values (one column of the A tile each),
/// `B_panel` is `k` rows of `nr` values, and C rows are `ldc` apart.
#[derive(Clone)]
pub struct MicroKernel {
    shape: KernelShape,
    width: VectorWidth,
    code: Lowered,
    entry: TileFn,
}

impl MicroKernel {
    /// Lowers a scheduled program for `width` and binds the native kernel.
    pub fn emit(
        shape: KernelShape,
        width: VectorWidth,
        program: &Program,
        flow: &ControlFlow,
    ) -> Result<Self> {
        RUNTIME_HW_CONFIG.require(width)?;
        shape.validate(width)?;
        let code = Lowered::lower(program, flow, width)?;
        let nv = shape.nr / width.lanes();
        code.check_tile(shape.mr, nv)?;
        let entry = tile::select(width, shape.mr, nv).ok_or_else(|| {
            invalid_argument(format!("no native {shape} kernel for {width} vectors"))
        })?;
        Ok(MicroKernel {
            shape,
            width,
            code,
            entry,
        })
    }

    pub fn shape(&self) -> KernelShape {
        self.shape
    }

    pub fn width(&self) -> VectorWidth {
        self.width
    }

    pub fn instruction_count(&self) -> usize {
        self.code.insts.len()
    }

    pub fn instructions(&self) -> &[Inst] {
        &self.code.insts
    }

    /// Runs the kernel on raw pointers.
    ///
    /// # Safety
    ///
    /// `a` must be valid for `mr*k` reads, `b` for `nr*k` reads, and `c` for
    /// reads and writes of `nr` values at each of the `mr` row starts
    /// `c + i*ldc`.
    #[inline]
    pub unsafe fn call(&self, k: usize, a: *const f64, b: *const f64, c: *mut f64, ldc: usize) {
        (self.entry)(k, a, b, c, ldc)
    }

    /// Accumulates the product of two packed panels into `c`.
    ///
    /// # Panics
    ///
    /// Panics if a slice is too short for the kernel shape and `k`, or if
    /// `ldc < nr`.
    pub fn compute(&self, k: usize, a: &[f64], b: &[f64], c: &mut [f64], ldc: usize) {
        let KernelShape { mr, nr } = self.shape;
        assert!(ldc >= nr, "ldc ({ldc}) must be >= nr ({nr})");
        assert!(a.len() >= mr * k, "A panel holds {} values, need {}", a.len(), mr * k);
        assert!(b.len() >= nr * k, "B panel holds {} values, need {}", b.len(), nr * k);
        let c_needed = (mr - 1) * ldc + nr;
        assert!(c.len() >= c_needed, "C tile holds {} values, need {}", c.len(), c_needed);

        unsafe { self.call(k, a.as_ptr(), b.as_ptr(), c.as_mut_ptr(), ldc) }
    }
}

impl fmt::Debug for MicroKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroKernel")
            .field("shape", &self.shape)
            .field("width", &self.width)
            .field("instructions", &self.code.insts.len())
            .finish()
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) => write!(f, "{v}"),
            Operand::Num(n) => write!(f, "n{n}"),
        }
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Inst::Load { dst, base, offset } => write!(f, "v{dst} = load r{base}[{offset}]"),
            Inst::Store { base, src } => write!(f, "store r{base}, v{src}"),
            Inst::Broadcast { dst, base } => write!(f, "v{dst} = broadcast r{base}"),
            Inst::MulAdd { acc, x, y } => write!(f, "v{acc} += v{x} * v{y}"),
            Inst::SetRef {
                dst,
                src,
                offset,
                step,
            } => write!(f, "r{dst} = r{src} + {offset} * {step}"),
            Inst::SetNum { dst, src, offset } => write!(f, "n{dst} = {src} + {offset}"),
            Inst::Branch {
                lhs,
                cmp,
                rhs,
                target,
            } => write!(f, "br {target} if {lhs} {cmp:?} {rhs}"),
            Inst::Jump { target } => write!(f, "jmp {target}"),
            Inst::Return => write!(f, "ret"),
        }
    }
}

impl fmt::Display for MicroKernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "kernel {} ({}, {} instructions)",
            self.shape,
            self.width,
            self.code.insts.len()
        )?;
        for (pc, inst) in self.code.insts.iter().enumerate() {
            writeln!(f, "{pc:4}: {inst}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{build_kernel, reference_kernel};

    fn supported_widths() -> Vec<VectorWidth> {
        VectorWidth::ALL
            .into_iter()
            .filter(|&w| RUNTIME_HW_CONFIG.supports(w))
            .collect()
    }

    fn panel(len: usize, seed: usize) -> Vec<f64> {
        (0..len)
            .map(|i| (((i * 7 + seed * 13) % 23) as f64 - 11.0) * 0.125)
            .collect()
    }

    #[test]
    fn test_matches_reference_kernel() {
        for width in supported_widths() {
            let lanes = width.lanes();
            for (mr, nr) in [(1, lanes), (4, 8), (3, 2 * lanes), (6, lanes)] {
                let shape = KernelShape::new(mr, nr);
                if shape.validate(width).is_err() {
                    continue;
                }
                let kernel = build_kernel(shape, width).unwrap();
                for k in [0, 1, 5, 37] {
                    let ldc = nr + 3;
                    let a = panel(mr * k, 1);
                    let b = panel(nr * k, 2);
                    let mut c = panel(mr * ldc, 3);
                    let mut expected = c.clone();

                    kernel.compute(k, &a, &b, &mut c, ldc);
                    reference_kernel(mr, nr, k, &a, &b, &mut expected, ldc);

                    for (i, (got, want)) in c.iter().zip(&expected).enumerate() {
                        assert_eq!(
                            got, want,
                            "Mismatch at index {} for {}x{} {} k={}: kernel={}, reference={}",
                            i, mr, nr, width, k, got, want
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_lowering_drops_fallthrough_jumps() {
        let Some(&width) = supported_widths().first() else {
            return;
        };
        let lanes = width.lanes();
        let kernel = build_kernel(KernelShape::new(2, 2 * lanes), width).unwrap();
        let insts = kernel.instructions();

        // One conditional exit, one back edge, one return.
        assert_eq!(insts.iter().filter(|i| matches!(i, Inst::Branch { .. })).count(), 1);
        assert_eq!(insts.iter().filter(|i| matches!(i, Inst::Jump { .. })).count(), 1);
        assert_eq!(insts.last(), Some(&Inst::Return));

        let Some(Inst::Branch { target, .. }) =
            insts.iter().find(|i| matches!(i, Inst::Branch { .. }))
        else {
            unreachable!()
        };
        // The loop exit lands on the first C store.
        assert!(matches!(insts[*target as usize], Inst::Store { .. }));
    }

    #[test]
    fn test_listing_must_describe_the_tile() {
        let Some(&width) = supported_widths().first() else {
            return;
        };
        let kernel = build_kernel(KernelShape::new(3, width.lanes()), width).unwrap();
        assert!(kernel.code.check_tile(3, 1).is_ok());
        // Same listing, claimed to be a different tile.
        assert!(matches!(
            kernel.code.check_tile(2, 1),
            Err(crate::GemmError::InvalidArgument { .. })
        ));
        assert!(kernel.code.check_tile(3, 2).is_err());

        let mut truncated = kernel.code.clone();
        let fma = truncated
            .insts
            .iter()
            .position(|i| matches!(i, Inst::MulAdd { .. }))
            .unwrap();
        truncated.insts.remove(fma);
        assert!(truncated.check_tile(3, 1).is_err());
    }

    #[test]
    fn test_display_dumps_instructions() {
        let Some(&width) = supported_widths().first() else {
            return;
        };
        let kernel = build_kernel(KernelShape::new(1, width.lanes()), width).unwrap();
        let text = kernel.to_string();
        assert!(text.starts_with(&format!("kernel 1x{} ({width}", width.lanes())));
        assert!(text.contains("+= "));
        assert!(text.trim_end().ends_with("ret"));
    }

    #[test]
    fn test_kernel_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MicroKernel>();
    }
}
