use crate::jvm::code::{
    BasicBlock, BranchInstruction, Code, ExceptionHandler, Instruction, LabelGenerator, SynLabel,
    SynLabelGenerator,
};
use crate::jvm::{BinaryName, Error, MethodDescriptor};
use std::collections::{HashMap, HashSet};

/// This provides a very slightly simplified interface for building up method bodies. It does
/// internal bookeeping to track labels, reachability, and the size of the locals array.
///
/// ### Tracking reachability
///
/// Instructions pushed after an unconditional branch (`goto`, `return`, `athrow`, switches) and
/// before the next placed label are unreachable and get dropped. Placing a label always starts a
/// new block, so dead code only arises from forgetting to place a label.
pub struct CodeBuilder {
    /// Method code under construction
    code: Code,

    /// Labels which have been referenced in blocks so far, but not placed yet
    unplaced_labels: HashSet<SynLabel>,

    /// Block currently under construction (label is not in `blocks`)
    current_block: Option<CurrentBlock>,

    /// Generator to produce the next label
    label_generator: SynLabelGenerator,
}

impl CodeBuilder {
    /// Create a builder for a new method
    ///
    /// The initial local variables are just the parameters (including maybe "this").
    pub fn new(descriptor: &MethodDescriptor<BinaryName>, is_static: bool) -> Self {
        let max_locals = descriptor.parameter_length(!is_static) as u16;

        let mut label_generator = SynLabelGenerator::new(SynLabel::START);
        let current_block = Some(CurrentBlock::new(label_generator.fresh_label()));

        let code = Code {
            max_locals,
            blocks: HashMap::new(),
            block_order: vec![],
            exception_handlers: vec![],
        };

        CodeBuilder {
            code,
            unplaced_labels: HashSet::new(),
            current_block,
            label_generator,
        }
    }

    /// Turn the builder into the method code
    pub fn result(self) -> Result<Code, Error> {
        if self.current_block.is_some() || !self.unplaced_labels.is_empty() {
            let mut unplaced_labels: Vec<SynLabel> = self.unplaced_labels.into_iter().collect();
            unplaced_labels.sort();
            return Err(Error::MethodCodeNotFinished {
                pending_block: self
                    .current_block
                    .as_ref()
                    .map(|current_block| current_block.label),
                unplaced_labels,
            });
        }

        Ok(self.code)
    }

    /// Generate a fresh label
    pub fn fresh_label(&mut self) -> SynLabel {
        self.label_generator.fresh_label()
    }

    /// Push a new instruction to the current block
    pub fn push_instruction(&mut self, insn: Instruction) -> Result<(), Error> {
        if let Some(current_block) = self.current_block.as_mut() {
            if let Some(extent) = insn.local_extent() {
                self.code.max_locals = self.code.max_locals.max(extent);
            }
            current_block.instructions.push(insn);
        }
        Ok(())
    }

    /// Push a new branch instruction to close the current block and possibly open a new one
    pub fn push_branch_instruction(
        &mut self,
        insn: BranchInstruction<SynLabel, ()>,
    ) -> Result<(), Error> {
        if let Some(current_block) = self.current_block.take() {
            for jump_label in insn.jump_targets() {
                self.reference_label(jump_label);
            }
            let insn = insn.map_labels(|lbl| *lbl, |()| self.label_generator.fresh_label());
            self.close_block(current_block, insn)?;
        }
        Ok(())
    }

    /// Start a new block with the given label, ending the current block (if there is one) with a
    /// fallthrough. This fails if the label was already placed.
    pub fn place_label(&mut self, label: SynLabel) -> Result<(), Error> {
        if self.code.blocks.contains_key(&label)
            || self.current_block.as_ref().map(|block| block.label) == Some(label)
        {
            return Err(Error::DuplicateLabel(label));
        }

        if let Some(current_block) = self.current_block.take() {
            self.close_block(current_block, BranchInstruction::FallThrough(label))?;
        } else {
            self.current_block = Some(CurrentBlock::new(label));
        }
        let _ = self.unplaced_labels.remove(&label);

        Ok(())
    }

    /// Register a handler for exceptions thrown between `start` (inclusive) and `end` (exclusive)
    ///
    /// Handlers registered first take priority.
    pub fn add_exception_handler(
        &mut self,
        start: SynLabel,
        end: SynLabel,
        handler: SynLabel,
        catch_type: Option<BinaryName>,
    ) {
        for label in [start, end, handler] {
            self.reference_label(label);
        }
        self.code.exception_handlers.push(ExceptionHandler {
            start,
            end,
            handler,
            catch_type,
        });
    }

    /// Remember a label must eventually be placed (if it hasn't been already)
    fn reference_label(&mut self, label: SynLabel) {
        let placed = self.code.blocks.contains_key(&label)
            || self.current_block.as_ref().map(|block| block.label) == Some(label);
        if !placed {
            self.unplaced_labels.insert(label);
        }
    }

    /// Seal a block, possibly opening its fall-through successor as the new current block
    fn close_block(
        &mut self,
        current_block: CurrentBlock,
        branch_end: BranchInstruction<SynLabel, SynLabel>,
    ) -> Result<(), Error> {
        let block_label = current_block.label;
        self.current_block = branch_end.fallthrough_target().map(CurrentBlock::new);
        let basic_block = BasicBlock {
            instructions: current_block.instructions,
            branch_end,
        };

        self.code.block_order.push(block_label);
        if self.code.blocks.insert(block_label, basic_block).is_some() {
            return Err(Error::DuplicateLabel(block_label));
        }
        Ok(())
    }
}

/// Just like `BasicBlock`, but not closed off yet
struct CurrentBlock {
    label: SynLabel,

    /// Accumulated instructions
    instructions: Vec<Instruction>,
}

impl CurrentBlock {
    fn new(label: SynLabel) -> CurrentBlock {
        CurrentBlock {
            label,
            instructions: vec![],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::code::{LinkedInstruction, OrdComparison, Pc};
    use crate::jvm::ParseDescriptor;
    use BranchInstruction::*;
    use Instruction::*;

    fn descriptor(desc: &str) -> MethodDescriptor<BinaryName> {
        MethodDescriptor::parse(desc).unwrap()
    }

    #[test]
    fn counting_loop_links() {
        // static int sum(int n) { int s = 0; while (n > 0) { s += n; n--; } return s; }
        let mut code = CodeBuilder::new(&descriptor("(I)I"), true);
        let loop_head = code.fresh_label();
        let loop_exit = code.fresh_label();
        code.push_instruction(IConst0).unwrap();
        code.push_instruction(IStore(1)).unwrap();
        code.place_label(loop_head).unwrap();
        code.push_instruction(ILoad(0)).unwrap();
        code.push_branch_instruction(If(OrdComparison::LE, loop_exit, ()))
            .unwrap();
        code.push_instruction(ILoad(1)).unwrap();
        code.push_instruction(ILoad(0)).unwrap();
        code.push_instruction(IAdd).unwrap();
        code.push_instruction(IStore(1)).unwrap();
        code.push_instruction(IInc(0, -1)).unwrap();
        code.push_branch_instruction(Goto(loop_head)).unwrap();
        code.place_label(loop_exit).unwrap();
        code.push_instruction(ILoad(1)).unwrap();
        code.push_branch_instruction(IReturn).unwrap();

        let code = code.result().unwrap();
        assert_eq!(code.max_locals, 2);
        let body = code.link().unwrap();
        assert_eq!(body.instructions.len(), 12);
        assert_eq!(
            body.instructions[3],
            LinkedInstruction::Branch(If(OrdComparison::LE, Pc(10), ()))
        );
        assert_eq!(body.instructions[9], LinkedInstruction::Branch(Goto(Pc(2))));
        assert_eq!(body.instructions[11], LinkedInstruction::Branch(IReturn));
    }

    #[test]
    fn unplaced_labels_are_reported() {
        let mut code = CodeBuilder::new(&descriptor("()V"), true);
        let nowhere = code.fresh_label();
        code.push_branch_instruction(Goto(nowhere)).unwrap();
        match code.result() {
            Err(Error::MethodCodeNotFinished {
                pending_block: None,
                unplaced_labels,
            }) => assert_eq!(unplaced_labels, vec![nowhere]),
            other => panic!("unexpected result {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn exception_table_links() {
        // try { throw null; } catch (Throwable t) { return; }
        let mut code = CodeBuilder::new(&descriptor("()V"), true);
        let start = code.fresh_label();
        let end = code.fresh_label();
        let handler = code.fresh_label();
        code.add_exception_handler(start, end, handler, Some(BinaryName::THROWABLE));
        code.place_label(start).unwrap();
        code.push_instruction(AConstNull).unwrap();
        code.push_branch_instruction(AThrow).unwrap();
        code.place_label(end).unwrap();
        code.push_branch_instruction(Return).unwrap();
        code.place_label(handler).unwrap();
        code.push_instruction(AStore(0)).unwrap();
        code.push_branch_instruction(Return).unwrap();

        let body = code.result().unwrap().link().unwrap();
        assert_eq!(body.exception_table.len(), 1);
        let entry = &body.exception_table[0];
        assert_eq!((entry.start, entry.end, entry.handler), (Pc(0), Pc(2), Pc(3)));
        assert_eq!(body.handlers_covering(Pc(1)).count(), 1);
        assert_eq!(body.handlers_covering(Pc(2)).count(), 0);
        assert_eq!(body.max_locals, 1);
    }

    #[test]
    fn dead_code_is_dropped() {
        let mut code = CodeBuilder::new(&descriptor("(J)V"), false);
        assert_eq!(code.code.max_locals, 3);
        code.push_branch_instruction(Return).unwrap();
        code.push_instruction(Ldc(crate::jvm::code::ConstantData::Integer(3)))
            .unwrap();
        let body = code.result().unwrap().link().unwrap();
        assert_eq!(body.instructions.len(), 1);
    }
}
