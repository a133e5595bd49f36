//! Builds the IR of an `mr×nr` outer-product microkernel.
//!
//! The program has three phases:
//!
//! 1. load every C vector of the register tile,
//! 2. loop `k` times: load one row of packed B, broadcast each packed A
//!    value and FMA it into the matching row of C,
//! 3. store the C vectors back.
//!
//! The result is then normalized so that every block begins with a label and
//! ends with a control node, which is what [`super::cfg::ControlFlow`] expects.

use super::ir::{Cmp, Node, NumId, Program, RefId, RegId, Scalar};
use super::{KernelShape, ARG_A, ARG_B, ARG_C, ARG_K, ARG_LDC};
use crate::error::Result;
use crate::hardware::VectorWidth;

/// Values shared by the three phases.
struct Values {
    k: NumId,
    a: RefId,
    b: RefId,
    c: RefId,
    ldc: NumId,
    counter: NumId,
    a_vecs: Vec<RegId>,
    b_vecs: Vec<RegId>,
    /// Row-major `mr × nv` accumulator registers.
    c_vecs: Vec<RegId>,
    /// Address of each accumulator, same order as `c_vecs`.
    c_refs: Vec<RefId>,
}

pub struct KernelBuilder {
    shape: KernelShape,
    width: VectorWidth,
    program: Program,
}

impl KernelBuilder {
    pub fn new(shape: KernelShape, width: VectorWidth) -> Result<Self> {
        shape.validate(width)?;
        Ok(KernelBuilder {
            shape,
            width,
            program: Program::new(),
        })
    }

    /// Number of vectors per row of the register tile.
    fn vectors_per_row(&self) -> usize {
        self.shape.nr / self.width.lanes()
    }

    /// Produces the normalized program.
    pub fn build(mut self) -> Result<Program> {
        let values = self.declare_values();
        self.build_load_c(&values);
        self.build_accumulate(&values);
        self.build_store_c(&values);
        normalize(&mut self.program);
        Ok(self.program)
    }

    fn declare_values(&mut self) -> Values {
        let (mr, nv) = (self.shape.mr, self.vectors_per_row());
        let p = &mut self.program;

        let k = p.param_num("k", ARG_K);
        let a = p.param_ref("a", ARG_A);
        let b = p.param_ref("b", ARG_B);
        let c = p.param_ref("c", ARG_C);
        let ldc = p.param_num("ldc", ARG_LDC);
        let counter = p.local_num("p");

        let a_vecs = (0..mr).map(|i| p.reg(format!("a{i}"))).collect();
        let b_vecs = (0..nv).map(|j| p.reg(format!("b{j}"))).collect();
        let mut c_vecs = Vec::with_capacity(mr * nv);
        let mut c_refs = Vec::with_capacity(mr * nv);
        for i in 0..mr {
            for j in 0..nv {
                c_vecs.push(p.reg(format!("c{i}_{j}")));
                c_refs.push(p.local_ref(format!("c{i}_{j}")));
            }
        }

        Values {
            k,
            a,
            b,
            c,
            ldc,
            counter,
            a_vecs,
            b_vecs,
            c_vecs,
            c_refs,
        }
    }

    /// Row `i` starts at `c + i*ldc`; each further vector of the row is the
    /// previous address plus one register width.
    fn build_load_c(&mut self, v: &Values) {
        let (mr, nv, lanes) = (self.shape.mr, self.vectors_per_row(), self.width.lanes());
        for i in 0..mr {
            for j in 0..nv {
                let slot = i * nv + j;
                let address = if j == 0 {
                    Node::SetRef {
                        dst: v.c_refs[slot],
                        src: v.c,
                        offset: Some(Scalar::Const(i as i64)),
                        step: Some(Scalar::Num(v.ldc)),
                    }
                } else {
                    Node::SetRef {
                        dst: v.c_refs[slot],
                        src: v.c_refs[slot - 1],
                        offset: Some(Scalar::Const(lanes as i64)),
                        step: None,
                    }
                };
                self.program.push(address);
                self.program.push(Node::LoadVec {
                    dst: v.c_vecs[slot],
                    src: v.c_refs[slot],
                    offset: None,
                });
            }
        }
    }

    fn build_accumulate(&mut self, v: &Values) {
        let (mr, nr) = (self.shape.mr, self.shape.nr);
        let (nv, lanes) = (self.vectors_per_row(), self.width.lanes());
        let head = self.program.label("Continue");
        let exit = self.program.label("Break");
        let p = &mut self.program;

        p.push(Node::SetNumber {
            dst: v.counter,
            src: Scalar::Const(0),
            offset: None,
        });
        p.push(Node::Label(head));
        p.push(Node::Branch {
            lhs: Scalar::Num(v.counter),
            cmp: Cmp::Ge,
            rhs: Scalar::Num(v.k),
            target: exit,
            fallthrough: None,
        });

        for (j, &b_vec) in v.b_vecs.iter().enumerate() {
            p.push(Node::LoadVec {
                dst: b_vec,
                src: v.b,
                offset: Some(Scalar::Const((j * lanes) as i64)),
            });
        }
        p.push(Node::SetRef {
            dst: v.b,
            src: v.b,
            offset: Some(Scalar::Const(nr as i64)),
            step: None,
        });

        for i in 0..mr {
            p.push(Node::Broadcast {
                dst: v.a_vecs[i],
                src: v.a,
            });
            for j in 0..nv {
                p.push(Node::MulAdd {
                    acc: v.c_vecs[i * nv + j],
                    x: v.a_vecs[i],
                    y: v.b_vecs[j],
                });
            }
            p.push(Node::SetRef {
                dst: v.a,
                src: v.a,
                offset: Some(Scalar::Const(1)),
                step: None,
            });
        }

        p.push(Node::SetNumber {
            dst: v.counter,
            src: Scalar::Num(v.counter),
            offset: Some(Scalar::Const(1)),
        });
        p.push(Node::Jump(head));
        p.push(Node::Label(exit));
    }

    fn build_store_c(&mut self, v: &Values) {
        for (&dst, &src) in v.c_refs.iter().zip(&v.c_vecs) {
            self.program.push(Node::StoreVec { dst, src });
        }
    }
}

/// Makes block boundaries explicit.
///
/// A control node followed by anything but a label gets a fresh
/// `<target>_next` label after it (a branch records that label as its
/// fall-through). A compute node followed by a label gets a jump to it.
pub fn normalize(program: &mut Program) {
    let nodes = program.nodes().to_vec();
    let mut out = Vec::with_capacity(nodes.len() + 4);

    for (i, &node) in nodes.iter().enumerate() {
        let next = nodes.get(i + 1);
        match (node.target(), next) {
            (Some(target), Some(next)) if !next.is_label() => {
                let name = format!("{}_next", program.label_name(target));
                let label = program.fresh_label(&name);
                let node = match node {
                    Node::Branch {
                        lhs,
                        cmp,
                        rhs,
                        target,
                        ..
                    } => Node::Branch {
                        lhs,
                        cmp,
                        rhs,
                        target,
                        fallthrough: Some(label),
                    },
                    other => other,
                };
                out.push(node);
                out.push(Node::Label(label));
            }
            (None, Some(&Node::Label(label))) if node.is_compute() => {
                out.push(node);
                out.push(Node::Jump(label));
            }
            _ => out.push(node),
        }
    }

    program.replace_nodes(out);
}
