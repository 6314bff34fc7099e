use crate::jvm::code::{BranchInstruction, BuilderBasicBlock, Instruction, Pc, SynLabel};
use crate::jvm::{BinaryName, Error};
use std::collections::HashMap;

/// Entry in the exception table of a method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler<Lbl> {
    /// Start of the protected range (inclusive)
    pub start: Lbl,

    /// End of the protected range (exclusive)
    pub end: Lbl,

    /// Where control goes when the handler catches
    pub handler: Lbl,

    /// Class of exceptions caught (`None` catches everything, like `finally`)
    pub catch_type: Option<BinaryName>,
}

/// Semantic representation of a method body
#[derive(Debug, Clone)]
pub struct Code {
    /// Size of the locals array (parameters included)
    pub max_locals: u16,

    /// Basic blocks in the code
    pub blocks: HashMap<SynLabel, BuilderBasicBlock>,

    /// Order of basic blocks in the code (elements are unique and exactly match keys of `blocks`)
    pub block_order: Vec<SynLabel>,

    /// Exception table, in priority order
    pub exception_handlers: Vec<ExceptionHandler<SynLabel>>,
}

/// Instruction of a linked method body
#[derive(Debug, Clone, PartialEq)]
pub enum LinkedInstruction {
    Straight(Instruction),
    Branch(BranchInstruction<Pc, ()>),
}

/// Method body ready for interpretation: a flat instruction array addressed by [`Pc`]
#[derive(Debug, Clone)]
pub struct MethodBody {
    pub max_locals: u16,
    pub instructions: Vec<LinkedInstruction>,
    pub exception_table: Vec<ExceptionHandler<Pc>>,
}

impl MethodBody {
    /// Instruction at a program counter
    pub fn instruction(&self, pc: Pc) -> Option<&LinkedInstruction> {
        self.instructions.get(pc.index())
    }

    /// Handlers whose protected range covers the program counter, in priority order
    pub fn handlers_covering(&self, pc: Pc) -> impl Iterator<Item = &ExceptionHandler<Pc>> {
        self.exception_table
            .iter()
            .filter(move |handler| handler.start <= pc && pc < handler.end)
    }
}

impl Code {
    /// Lay the blocks out in order, resolving labels into program counters
    pub fn link(&self) -> Result<MethodBody, Error> {
        let mut label_pcs: HashMap<SynLabel, Pc> = HashMap::new();
        let mut next_pc: u32 = 0;
        for block_label in &self.block_order {
            let block = self
                .blocks
                .get(block_label)
                .ok_or(Error::UnplacedLabel(*block_label))?;
            label_pcs.insert(*block_label, Pc(next_pc));
            next_pc += block.linked_len() as u32;
        }
        let lookup = |label: &SynLabel| -> Result<Pc, Error> {
            label_pcs
                .get(label)
                .copied()
                .ok_or(Error::UnplacedLabel(*label))
        };

        let mut instructions = Vec::with_capacity(next_pc as usize);
        for (idx, block_label) in self.block_order.iter().enumerate() {
            let block = &self.blocks[block_label];
            instructions.extend(block.instructions.iter().cloned().map(LinkedInstruction::Straight));

            // Fall-through targets must be the block laid out next
            if let Some(next_label) = block.branch_end.fallthrough_target() {
                if self.block_order.get(idx + 1) != Some(&next_label) {
                    return Err(Error::BadFallThrough(*block_label, next_label));
                }
            }
            if let BranchInstruction::FallThrough(_) = block.branch_end {
                continue;
            }

            for target in block.branch_end.jump_targets() {
                lookup(&target)?;
            }
            let branch = block
                .branch_end
                .map_labels(|lbl| label_pcs[lbl], |_| ());
            instructions.push(LinkedInstruction::Branch(branch));
        }

        let exception_table = self
            .exception_handlers
            .iter()
            .map(|handler| {
                Ok(ExceptionHandler {
                    start: lookup(&handler.start)?,
                    end: lookup(&handler.end)?,
                    handler: lookup(&handler.handler)?,
                    catch_type: handler.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>, Error>>()?;

        Ok(MethodBody {
            max_locals: self.max_locals,
            instructions,
            exception_table,
        })
    }
}
