//! Intermediate representation of a microkernel.
//!
//! A [`Program`] owns typed value tables (vector registers, memory
//! references, integer numbers, labels) and a flat arena of [`Node`]s that
//! refer to them by index. Basic blocks are later expressed as index ranges
//! over that arena.

use std::fmt;

macro_rules! value_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u16);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

value_id!(
    /// A vector register.
    RegId,
    "%v"
);
value_id!(
    /// A memory reference (a pointer into f64 storage).
    RefId,
    "%r"
);
value_id!(
    /// An integer number.
    NumId,
    "%n"
);
value_id!(
    /// A jump target.
    LabelId,
    "@"
);

/// Where a reference or number gets its initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Bound to the kernel argument at this position.
    Param(u8),
    /// Defined inside the kernel.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueDecl {
    pub name: String,
    pub origin: Origin,
}

/// An integer operand: a number value or a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scalar {
    Num(NumId),
    Const(i64),
}

impl Scalar {
    fn num(self) -> Option<NumId> {
        match self {
            Scalar::Num(n) => Some(n),
            Scalar::Const(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cmp {
    fn symbol(self) -> &'static str {
        match self {
            Cmp::Eq => "==",
            Cmp::Ne => "!=",
            Cmp::Lt => "<",
            Cmp::Le => "<=",
            Cmp::Gt => ">",
            Cmp::Ge => ">=",
        }
    }
}

/// One IR instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    /// Marks a jump target.
    Label(LabelId),
    /// `dst = load(src + offset)`.
    LoadVec {
        dst: RegId,
        src: RefId,
        offset: Option<Scalar>,
    },
    /// `store(dst, src)`.
    StoreVec { dst: RefId, src: RegId },
    /// `dst = splat(*src)`.
    Broadcast { dst: RegId, src: RefId },
    /// `acc += x * y`.
    MulAdd { acc: RegId, x: RegId, y: RegId },
    /// `dst = src + offset * step`. A missing offset is 0, a missing step 1.
    SetRef {
        dst: RefId,
        src: RefId,
        offset: Option<Scalar>,
        step: Option<Scalar>,
    },
    /// `dst = src + offset`, a missing offset being 0.
    SetNumber {
        dst: NumId,
        src: Scalar,
        offset: Option<Scalar>,
    },
    /// Jump to `target` when `lhs cmp rhs`; otherwise continue at
    /// `fallthrough`, or the next node when there is none.
    Branch {
        lhs: Scalar,
        cmp: Cmp,
        rhs: Scalar,
        target: LabelId,
        fallthrough: Option<LabelId>,
    },
    /// Unconditional jump.
    Jump(LabelId),
}

/// A storage location a compute node reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Reg(RegId),
    Ref(RefId),
    Num(NumId),
    /// All of f64 memory, treated as one location.
    Memory,
}

impl Node {
    /// Branches and jumps.
    pub fn is_control(&self) -> bool {
        matches!(self, Node::Branch { .. } | Node::Jump(_))
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Node::Label(_))
    }

    /// Nodes that compute values and may be reordered within a block.
    pub fn is_compute(&self) -> bool {
        !self.is_control() && !self.is_label()
    }

    pub fn is_fma(&self) -> bool {
        matches!(self, Node::MulAdd { .. })
    }

    /// Slots this node reads.
    pub fn reads(&self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(4);
        let scalar = |s: Option<Scalar>, slots: &mut Vec<Slot>| {
            if let Some(n) = s.and_then(Scalar::num) {
                slots.push(Slot::Num(n));
            }
        };
        match *self {
            Node::Label(_) | Node::Jump(_) => {}
            Node::LoadVec { src, offset, .. } => {
                slots.push(Slot::Ref(src));
                scalar(offset, &mut slots);
                slots.push(Slot::Memory);
            }
            Node::StoreVec { dst, src } => {
                slots.push(Slot::Ref(dst));
                slots.push(Slot::Reg(src));
            }
            Node::Broadcast { src, .. } => {
                slots.push(Slot::Ref(src));
                slots.push(Slot::Memory);
            }
            Node::MulAdd { acc, x, y } => {
                slots.push(Slot::Reg(acc));
                slots.push(Slot::Reg(x));
                slots.push(Slot::Reg(y));
            }
            Node::SetRef {
                src, offset, step, ..
            } => {
                slots.push(Slot::Ref(src));
                scalar(offset, &mut slots);
                scalar(step, &mut slots);
            }
            Node::SetNumber { src, offset, .. } => {
                scalar(Some(src), &mut slots);
                scalar(offset, &mut slots);
            }
            Node::Branch { lhs, rhs, .. } => {
                scalar(Some(lhs), &mut slots);
                scalar(Some(rhs), &mut slots);
            }
        }
        slots
    }

    /// Slots this node writes.
    pub fn writes(&self) -> Vec<Slot> {
        match *self {
            Node::LoadVec { dst, .. } | Node::Broadcast { dst, .. } => vec![Slot::Reg(dst)],
            Node::MulAdd { acc, .. } => vec![Slot::Reg(acc)],
            Node::StoreVec { .. } => vec![Slot::Memory],
            Node::SetRef { dst, .. } => vec![Slot::Ref(dst)],
            Node::SetNumber { dst, .. } => vec![Slot::Num(dst)],
            Node::Label(_) | Node::Branch { .. } | Node::Jump(_) => Vec::new(),
        }
    }

    /// Label this control node transfers to.
    pub fn target(&self) -> Option<LabelId> {
        match *self {
            Node::Branch { target, .. } | Node::Jump(target) => Some(target),
            _ => None,
        }
    }
}

/// A microkernel under construction.
#[derive(Debug, Clone, Default)]
pub struct Program {
    regs: Vec<String>,
    refs: Vec<ValueDecl>,
    nums: Vec<ValueDecl>,
    labels: Vec<String>,
    nodes: Vec<Node>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reg(&mut self, name: impl Into<String>) -> RegId {
        self.regs.push(name.into());
        RegId((self.regs.len() - 1) as u16)
    }

    pub fn param_ref(&mut self, name: impl Into<String>, position: u8) -> RefId {
        self.new_ref(name.into(), Origin::Param(position))
    }

    pub fn local_ref(&mut self, name: impl Into<String>) -> RefId {
        self.new_ref(name.into(), Origin::Local)
    }

    pub fn param_num(&mut self, name: impl Into<String>, position: u8) -> NumId {
        self.new_num(name.into(), Origin::Param(position))
    }

    pub fn local_num(&mut self, name: impl Into<String>) -> NumId {
        self.new_num(name.into(), Origin::Local)
    }

    /// Returns the label called `name`, declaring it on first use.
    pub fn label(&mut self, name: &str) -> LabelId {
        match self.labels.iter().position(|l| l == name) {
            Some(i) => LabelId(i as u16),
            None => {
                self.labels.push(name.to_string());
                LabelId((self.labels.len() - 1) as u16)
            }
        }
    }

    /// Declares a new label named `base`, or `base` plus a counter when that
    /// name is taken.
    pub fn fresh_label(&mut self, base: &str) -> LabelId {
        let mut name = base.to_string();
        let mut n = 1;
        while self.labels.iter().any(|l| *l == name) {
            name = format!("{base}{n}");
            n += 1;
        }
        self.labels.push(name);
        LabelId((self.labels.len() - 1) as u16)
    }

    fn new_ref(&mut self, name: String, origin: Origin) -> RefId {
        self.refs.push(ValueDecl { name, origin });
        RefId((self.refs.len() - 1) as u16)
    }

    fn new_num(&mut self, name: String, origin: Origin) -> NumId {
        self.nums.push(ValueDecl { name, origin });
        NumId((self.nums.len() - 1) as u16)
    }

    pub fn push(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub(crate) fn replace_nodes(&mut self, nodes: Vec<Node>) {
        self.nodes = nodes;
    }

    pub fn reg_count(&self) -> usize {
        self.regs.len()
    }

    pub fn refs(&self) -> &[ValueDecl] {
        &self.refs
    }

    pub fn nums(&self) -> &[ValueDecl] {
        &self.nums
    }

    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    pub fn label_name(&self, label: LabelId) -> &str {
        &self.labels[label.index()]
    }

    /// Counts nodes matching `pred`.
    pub fn count(&self, pred: impl Fn(&Node) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(n)).count()
    }

    /// Formats one node with value names resolved.
    pub fn display_node<'a>(&'a self, node: &'a Node) -> NodeDisplay<'a> {
        NodeDisplay {
            program: self,
            node,
        }
    }
}

pub struct NodeDisplay<'a> {
    program: &'a Program,
    node: &'a Node,
}

impl NodeDisplay<'_> {
    fn scalar(&self, s: Scalar) -> String {
        match s {
            Scalar::Num(n) => self.program.nums[n.index()].name.clone(),
            Scalar::Const(c) => c.to_string(),
        }
    }

    fn opt(&self, s: Option<Scalar>, default: &str) -> String {
        s.map_or_else(|| default.to_string(), |s| self.scalar(s))
    }
}

impl fmt::Display for NodeDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.program;
        let reg = move |r: RegId| &p.regs[r.index()];
        let rf = move |r: RefId| &p.refs[r.index()].name;
        let num = move |n: NumId| &p.nums[n.index()].name;
        match *self.node {
            Node::Label(l) => write!(f, "{}:", p.label_name(l)),
            Node::LoadVec { dst, src, offset } => match offset {
                Some(o) => write!(f, "    {} = load {}[{}]", reg(dst), rf(src), self.scalar(o)),
                None => write!(f, "    {} = load {}", reg(dst), rf(src)),
            },
            Node::StoreVec { dst, src } => write!(f, "    store {}, {}", rf(dst), reg(src)),
            Node::Broadcast { dst, src } => write!(f, "    {} = broadcast {}", reg(dst), rf(src)),
            Node::MulAdd { acc, x, y } => {
                write!(f, "    {} += {} * {}", reg(acc), reg(x), reg(y))
            }
            Node::SetRef {
                dst,
                src,
                offset,
                step,
            } => write!(
                f,
                "    {} = {} + {} * {}",
                rf(dst),
                rf(src),
                self.opt(offset, "0"),
                self.opt(step, "1")
            ),
            Node::SetNumber { dst, src, offset } => match offset {
                Some(o) => write!(f, "    {} = {} + {}", num(dst), self.scalar(src), self.scalar(o)),
                None => write!(f, "    {} = {}", num(dst), self.scalar(src)),
            },
            Node::Branch {
                lhs,
                cmp,
                rhs,
                target,
                fallthrough,
            } => {
                write!(
                    f,
                    "    br {} if {} {} {}",
                    p.label_name(target),
                    self.scalar(lhs),
                    cmp.symbol(),
                    self.scalar(rhs)
                )?;
                if let Some(next) = fallthrough {
                    write!(f, " else {}", p.label_name(next))?;
                }
                Ok(())
            }
            Node::Jump(target) => write!(f, "    jmp {}", p.label_name(target)),
        }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in &self.nodes {
            writeln!(f, "{}", self.display_node(node))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_interned_by_name() {
        let mut program = Program::new();
        let a = program.label("Continue");
        let b = program.label("Break");
        assert_ne!(a, b);
        assert_eq!(program.label("Continue"), a);
        assert_eq!(program.label_count(), 2);
        assert_eq!(program.label_name(b), "Break");
    }

    #[test]
    fn test_read_write_sets() {
        let mut program = Program::new();
        let v = program.reg("v");
        let a = program.reg("a");
        let b = program.reg("b");
        let r = program.param_ref("B", 2);
        let n = program.local_num("p");

        let load = Node::LoadVec {
            dst: v,
            src: r,
            offset: Some(Scalar::Num(n)),
        };
        assert_eq!(load.reads(), vec![Slot::Ref(r), Slot::Num(n), Slot::Memory]);
        assert_eq!(load.writes(), vec![Slot::Reg(v)]);

        let fma = Node::MulAdd { acc: v, x: a, y: b };
        assert!(fma.is_fma() && fma.is_compute());
        assert_eq!(fma.writes(), vec![Slot::Reg(v)]);
        assert!(fma.reads().contains(&Slot::Reg(v)));

        let store = Node::StoreVec { dst: r, src: v };
        assert_eq!(store.writes(), vec![Slot::Memory]);

        let bump = Node::SetRef {
            dst: r,
            src: r,
            offset: Some(Scalar::Const(8)),
            step: None,
        };
        assert_eq!(bump.reads(), vec![Slot::Ref(r)]);
        assert_eq!(bump.writes(), vec![Slot::Ref(r)]);
    }

    #[test]
    fn test_display_resolves_names() {
        let mut program = Program::new();
        let k = program.param_num("k", 0);
        let p = program.local_num("p");
        let done = program.label("Break");
        program.push(Node::SetNumber {
            dst: p,
            src: Scalar::Num(p),
            offset: Some(Scalar::Const(1)),
        });
        program.push(Node::Branch {
            lhs: Scalar::Num(p),
            cmp: Cmp::Ge,
            rhs: Scalar::Num(k),
            target: done,
            fallthrough: None,
        });
        program.push(Node::Label(done));

        let text = program.to_string();
        assert!(text.contains("p = p + 1"));
        assert!(text.contains("br Break if p >= k"));
        assert!(text.contains("Break:"));
    }
}
