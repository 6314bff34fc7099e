use super::{Attr, ObjRef, SlotVec, Value, VmError};
use crate::jvm::class_graph::{MethodData, MethodId};
use crate::jvm::code::Pc;

/// Activation record of a method
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFrame {
    pub method: MethodId,

    /// Instruction about to execute (calls only advance this once the callee returns)
    pub pc: Pc,
    pub locals: SlotVec,
    pub stack: SlotVec,

    /// Monitor acquired on entry, released on exit (synchronized methods and `<clinit>`)
    pub lock: Option<ObjRef>,

    /// Frame pushed by the engine rather than by a call instruction
    ///
    /// When a direct frame returns, its result is dropped and the caller's instruction is
    /// executed again (this is how class initializers and natives asking to be repeated work).
    pub direct: bool,

    /// The native call at `pc` already took effect and ended the step: issuing it again only
    /// completes it
    pub call_done: bool,
}

impl StackFrame {
    /// Frame for a method with a body, arguments going into the first locals
    pub fn new(method: &MethodData, args: SlotVec) -> StackFrame {
        let max_locals = method
            .body
            .as_ref()
            .map_or(0, |body| body.max_locals as usize)
            .max(args.len());
        let mut locals = args;
        for _ in locals.len()..max_locals {
            locals.push_word(0, false);
        }
        StackFrame {
            method: method.id,
            pc: Pc::ZERO,
            locals,
            stack: SlotVec::new(),
            lock: None,
            direct: false,
            call_done: false,
        }
    }

    fn underflow(&self) -> VmError {
        VmError::StackUnderflow {
            method: format!("{:?}", self.method),
            pc: self.pc,
        }
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push_value(value);
    }

    pub fn push_int(&mut self, value: i32) {
        self.stack.push_word(value, false);
    }

    pub fn push_ref(&mut self, value: Option<ObjRef>) {
        self.stack.push_word(ObjRef::to_word(value), true);
    }

    pub fn pop_word(&mut self) -> Result<(i32, bool), VmError> {
        let underflow = self.underflow();
        self.stack.pop_word().ok_or(underflow)
    }

    pub fn pop_int(&mut self) -> Result<i32, VmError> {
        Ok(self.pop_word()?.0)
    }

    pub fn pop_long(&mut self) -> Result<i64, VmError> {
        let low = self.pop_word()?.0;
        let high = self.pop_word()?.0;
        Ok(((high as i64) << 32) | (low as u32 as i64))
    }

    pub fn pop_float(&mut self) -> Result<f32, VmError> {
        Ok(f32::from_bits(self.pop_int()? as u32))
    }

    pub fn pop_double(&mut self) -> Result<f64, VmError> {
        Ok(f64::from_bits(self.pop_long()? as u64))
    }

    pub fn pop_ref(&mut self) -> Result<Option<ObjRef>, VmError> {
        Ok(ObjRef::from_word(self.pop_word()?.0))
    }

    /// Reference `depth` words below the top of the operand stack (0 is the top)
    pub fn peek_ref(&self, depth: usize) -> Result<Option<ObjRef>, VmError> {
        let len = self.stack.len();
        if depth >= len {
            return Err(self.underflow());
        }
        Ok(ObjRef::from_word(self.stack.get_int(len - 1 - depth)))
    }

    /// Copy the top `words` operand stack slots, without popping them
    pub fn peek_slots(&self, words: usize) -> Result<SlotVec, VmError> {
        let len = self.stack.len();
        if words > len {
            return Err(self.underflow());
        }
        let mut slots = SlotVec::new();
        for idx in len - words..len {
            slots.push_word(self.stack.get_int(idx), self.stack.is_ref(idx));
        }
        Ok(slots)
    }

    /// Drop the top `words` operand stack slots
    pub fn drop_slots(&mut self, words: usize) -> Result<(), VmError> {
        let len = self.stack.len();
        if words > len {
            return Err(self.underflow());
        }
        self.stack.truncate(len - words);
        Ok(())
    }

    /// Attach a diagnostic attribute to the top of the operand stack
    pub fn set_top_attr(&mut self, attr: Attr) {
        if let Some(top) = self.stack.len().checked_sub(1) {
            self.stack.set_attr(top, Some(attr));
        }
    }

    /// Every reference held in locals or on the operand stack, plus the entry lock
    pub fn references(&self) -> impl Iterator<Item = ObjRef> + '_ {
        self.locals
            .references()
            .chain(self.stack.references())
            .chain(self.lock)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn empty_frame() -> StackFrame {
        StackFrame {
            method: MethodId(0),
            pc: Pc::ZERO,
            locals: SlotVec::zeroed(2),
            stack: SlotVec::new(),
            lock: None,
            direct: false,
            call_done: false,
        }
    }

    #[test]
    fn operand_stack() {
        let mut frame = empty_frame();
        frame.push(Value::Long(-2));
        frame.push_ref(Some(ObjRef(4)));
        frame.push_int(9);

        assert_eq!(frame.peek_ref(1).unwrap(), Some(ObjRef(4)));
        assert_eq!(frame.peek_slots(2).unwrap().len(), 2);
        assert_eq!(frame.references().collect::<Vec<_>>(), vec![ObjRef(4)]);

        assert_eq!(frame.pop_int().unwrap(), 9);
        assert_eq!(frame.pop_ref().unwrap(), Some(ObjRef(4)));
        assert_eq!(frame.pop_long().unwrap(), -2);
        assert!(matches!(
            frame.pop_int(),
            Err(VmError::StackUnderflow { .. })
        ));
    }
}
