use crate::jvm::code::{BranchInstruction, Instruction, SynLabel};

pub type BuilderBasicBlock = BasicBlock<Instruction, BranchInstruction<SynLabel, SynLabel>>;

/// A method code body is made up of a linear sequence of basic blocks
#[derive(Debug, PartialEq, Clone)]
pub struct BasicBlock<Insn, BrInsn> {
    /// Straight-line instructions in the block
    pub instructions: Vec<Insn>,

    /// Branch instruction to close the block
    pub branch_end: BrInsn,
}

impl<Insn, Lbl, LblNext> BasicBlock<Insn, BranchInstruction<Lbl, LblNext>> {
    /// Number of instructions the block occupies once linked
    ///
    /// Fall-through markers are implicit in the block order and so take no space.
    pub fn linked_len(&self) -> usize {
        let branch_len = match self.branch_end {
            BranchInstruction::FallThrough(_) => 0,
            _ => 1,
        };
        self.instructions.len() + branch_len
    }
}
