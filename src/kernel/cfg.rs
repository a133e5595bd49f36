//! Basic blocks over a normalized [`Program`].

use super::ir::{LabelId, Node, Program};
use crate::error::{invalid_argument, Result};
use std::collections::HashMap;
use std::fmt;

/// A run of compute nodes `nodes[start..end]`, entered through `label` (the
/// entry block has none) and left through `terminator` (the last block has
/// none and returns).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub label: Option<LabelId>,
    pub start: usize,
    pub end: usize,
    /// Index of the branch or jump ending the block.
    pub terminator: Option<usize>,
}

impl BasicBlock {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlFlow {
    blocks: Vec<BasicBlock>,
    by_label: HashMap<LabelId, usize>,
}

impl ControlFlow {
    /// Splits `program` at every label and after every control node.
    ///
    /// The program must be normalized: a control node is always followed by a
    /// label, and only the final block may end without one.
    pub fn build(program: &Program) -> Result<Self> {
        let nodes = program.nodes();
        let mut blocks = Vec::new();
        let mut by_label = HashMap::new();
        let mut i = 0;

        while i < nodes.len() || blocks.is_empty() {
            let label = match nodes.get(i) {
                Some(Node::Label(l)) => {
                    i += 1;
                    Some(*l)
                }
                _ if blocks.is_empty() => None,
                other => {
                    return Err(invalid_argument(format!(
                        "malformed kernel program: block at node {i} starts with {other:?}"
                    )))
                }
            };

            let start = i;
            while nodes.get(i).is_some_and(Node::is_compute) {
                i += 1;
            }
            let end = i;

            let terminator = match nodes.get(i) {
                Some(node) if node.is_control() => {
                    i += 1;
                    Some(i - 1)
                }
                Some(_) => {
                    return Err(invalid_argument(format!(
                        "malformed kernel program: block ending at node {i} falls through into a label"
                    )))
                }
                None => None,
            };

            if let Some(l) = label {
                if by_label.insert(l, blocks.len()).is_some() {
                    return Err(invalid_argument(format!(
                        "malformed kernel program: label {} defined twice",
                        program.label_name(l)
                    )));
                }
            }
            blocks.push(BasicBlock {
                label,
                start,
                end,
                terminator,
            });
        }

        let flow = ControlFlow { blocks, by_label };
        for node in nodes {
            if let Some(target) = node.target() {
                flow.block_index(target)?;
            }
            if let Node::Branch {
                fallthrough: Some(next),
                ..
            } = node
            {
                flow.block_index(*next)?;
            }
        }
        Ok(flow)
    }

    pub fn blocks(&self) -> &[BasicBlock] {
        &self.blocks
    }

    pub fn entry(&self) -> &BasicBlock {
        &self.blocks[0]
    }

    /// Index of the block a label starts.
    pub fn block_index(&self, label: LabelId) -> Result<usize> {
        self.by_label
            .get(&label)
            .copied()
            .ok_or_else(|| invalid_argument(format!("malformed kernel program: undefined label {label}")))
    }

    pub fn block(&self, label: LabelId) -> Option<&BasicBlock> {
        self.by_label.get(&label).map(|&i| &self.blocks[i])
    }

    /// Blocks control can reach directly from block `index`.
    pub fn successors(&self, program: &Program, index: usize) -> Vec<usize> {
        let block = &self.blocks[index];
        let next = || (index + 1 < self.blocks.len()).then_some(index + 1);
        match block.terminator.map(|t| program.nodes()[t]) {
            Some(Node::Jump(target)) => self.by_label.get(&target).copied().into_iter().collect(),
            Some(Node::Branch {
                target,
                fallthrough,
                ..
            }) => {
                let mut out: Vec<usize> = self.by_label.get(&target).copied().into_iter().collect();
                let fall = match fallthrough {
                    Some(l) => self.by_label.get(&l).copied(),
                    None => next(),
                };
                out.extend(fall.filter(|f| !out.contains(f)));
                out
            }
            _ => Vec::new(),
        }
    }

    /// Formats the blocks of `program` for diagnostics.
    pub fn display<'a>(&'a self, program: &'a Program) -> CfgDisplay<'a> {
        CfgDisplay {
            flow: self,
            program,
        }
    }
}

pub struct CfgDisplay<'a> {
    flow: &'a ControlFlow,
    program: &'a Program,
}

impl fmt::Display for CfgDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.program.nodes();
        for (index, block) in self.flow.blocks.iter().enumerate() {
            let name = block.label.map_or("<entry>", |l| self.program.label_name(l));
            writeln!(
                f,
                "block {index} {name} [{}..{}) -> {:?}",
                block.start,
                block.end,
                self.flow.successors(self.program, index)
            )?;
            for node in &nodes[block.start..block.end] {
                writeln!(f, "{}", self.program.display_node(node))?;
            }
            if let Some(t) = block.terminator {
                writeln!(f, "{}", self.program.display_node(&nodes[t]))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::VectorWidth;
    use crate::kernel::builder::KernelBuilder;
    use crate::kernel::ir::Scalar;
    use crate::kernel::KernelShape;

    fn kernel_program() -> Program {
        KernelBuilder::new(KernelShape::new(4, 8), VectorWidth::V256)
            .and_then(KernelBuilder::build)
            .unwrap()
    }

    #[test]
    fn test_kernel_has_four_blocks() {
        let program = kernel_program();
        let flow = ControlFlow::build(&program).unwrap();
        let names: Vec<Option<&str>> = flow
            .blocks()
            .iter()
            .map(|b| b.label.map(|l| program.label_name(l)))
            .collect();
        assert_eq!(
            names,
            vec![None, Some("Continue"), Some("Break_next"), Some("Break")]
        );

        let blocks = flow.blocks();
        // Entry: 8 address/load pairs plus the counter reset.
        assert_eq!(blocks[0].len(), 17);
        assert!(blocks[1].is_empty());
        // Body: 2 B loads, B advance, 4 rows of broadcast + 2 FMA + A advance,
        // counter increment.
        assert_eq!(blocks[2].len(), 2 + 1 + 4 * 4 + 1);
        assert_eq!(blocks[3].len(), 8);
        assert_eq!(blocks[3].terminator, None);
    }

    #[test]
    fn test_successors() {
        let program = kernel_program();
        let flow = ControlFlow::build(&program).unwrap();
        assert_eq!(flow.successors(&program, 0), vec![1]);
        assert_eq!(flow.successors(&program, 1), vec![3, 2]);
        assert_eq!(flow.successors(&program, 2), vec![1]);
        assert!(flow.successors(&program, 3).is_empty());
    }

    #[test]
    fn test_rejects_unnormalized_program() {
        let mut program = Program::new();
        let n = program.local_num("n");
        let top = program.label("Top");
        program.push(Node::SetNumber {
            dst: n,
            src: Scalar::Const(0),
            offset: None,
        });
        program.push(Node::Label(top));
        program.push(Node::Jump(top));
        assert!(ControlFlow::build(&program).is_err());
    }

    #[test]
    fn test_rejects_undefined_label() {
        let mut program = Program::new();
        let nowhere = program.label("Nowhere");
        program.push(Node::Jump(nowhere));
        assert!(ControlFlow::build(&program).is_err());
    }

    #[test]
    fn test_display_lists_blocks() {
        let program = kernel_program();
        let flow = ControlFlow::build(&program).unwrap();
        let text = flow.display(&program).to_string();
        assert!(text.contains("block 0 <entry>"));
        assert!(text.contains("block 3 Break"));
        assert!(text.contains("jmp Continue"));
    }
}
