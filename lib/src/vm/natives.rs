//! Native bridge
//!
//! Methods declared `native` are not interpreted: the engine hands their (typed) arguments to a
//! [`NativeBridge`] and gets back a [`NativeOutcome`]. Natives have full access to the kernel
//! through a [`NativeContext`], which is also how they take part in the choice protocol. A native
//! that needs a nondeterministic decision returns [`NativeOutcome::Choice`]; the call is issued
//! again once the decision is made, and [`NativeContext::current_choice`] then yields it.
//!
//! Arguments stay on the caller's operand stack until the native returns or throws, so a native
//! asking to be repeated (or for a choice) sees exactly the same arguments the next time.

use super::{Attr, Kernel, ObjRef, SlotVec, StackFrame, StepState, ThreadId, Value, VmError};
use crate::jvm::class_graph::{ClassDatabase, MethodData, MethodId};
use crate::jvm::{BinaryName, Name, RenderDescriptor};
use crate::mc::{ChoiceKind, ChoiceRequest, ChoiceValue, Origin};
use std::collections::HashMap;

/// What a native method call results in
#[derive(Clone, Debug, PartialEq)]
pub enum NativeOutcome {
    /// Normal completion, with the return value for non-`void` methods
    Return(Option<Value>),

    /// Throw a fresh exception of this class, with an optional message
    Throw(BinaryName, Option<String>),

    /// Issue the call again (after the frames the native pushed with
    /// [`NativeContext::push_direct_call`] have returned)
    Repeat,

    /// End the step here; the call is issued again once the decision is made
    Choice(ChoiceRequest),

    /// The calling thread cannot proceed (it is now blocked or waiting); the call is issued again
    /// when the thread gets scheduled
    Blocked,
}

/// Access to the machine for a native method call
pub struct NativeContext<'a> {
    pub kernel: &'a mut Kernel,
    pub db: &'a ClassDatabase,
    step: &'a mut StepState,
    origin: Origin,
    return_attr: Option<Attr>,
}

impl<'a> NativeContext<'a> {
    pub(super) fn new(
        kernel: &'a mut Kernel,
        db: &'a ClassDatabase,
        step: &'a mut StepState,
        origin: Origin,
    ) -> NativeContext<'a> {
        NativeContext {
            kernel,
            db,
            step,
            origin,
            return_attr: None,
        }
    }

    /// Thread making the call
    pub fn thread(&self) -> ThreadId {
        self.origin.thread
    }

    /// Instruction making the call
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Is the call the first instruction of the step?
    ///
    /// This is how natives that end a step (eg. `Thread.yield`) recognize that they are being
    /// re-issued after the scheduling decision.
    pub fn first_step(&self) -> bool {
        self.step.first_insn
    }

    /// Choice made for a decision this very call requested
    pub fn current_choice(&self, kind: ChoiceKind) -> Option<ChoiceValue> {
        if !self.step.first_insn {
            return None;
        }
        self.step
            .choices
            .iter()
            .rev()
            .find(|(choice_kind, origin, _)| *choice_kind == kind && *origin == self.origin)
            .map(|(_, _, value)| *value)
    }

    /// Attach a diagnostic attribute to the return value (not part of the state)
    pub fn set_return_attr(&mut self, attr: Attr) {
        self.return_attr = Some(attr);
    }

    /// Remember that this call took effect, for a native that then ends the step and gets issued
    /// again once the decision is made
    pub fn mark_call_done(&mut self) -> Result<(), VmError> {
        let thread = self.thread();
        let frame = self
            .kernel
            .thread_mut(thread)?
            .top_frame_mut()
            .ok_or(VmError::NoFrame(thread))?;
        frame.call_done = true;
        Ok(())
    }

    /// Is this call being issued again after it took effect? Clears the mark.
    pub fn take_call_done(&mut self) -> Result<bool, VmError> {
        let thread = self.thread();
        let frame = self
            .kernel
            .thread_mut(thread)?
            .top_frame_mut()
            .ok_or(VmError::NoFrame(thread))?;
        Ok(std::mem::replace(&mut frame.call_done, false))
    }

    pub(super) fn take_return_attr(&mut self) -> Option<Attr> {
        self.return_attr.take()
    }

    /// Push a frame that runs before the calling thread continues
    ///
    /// The frame is "direct": when it returns, its result is dropped and the instruction below it
    /// is executed again. Pushed on another thread (eg. the `run` method of a thread being
    /// started), it becomes that thread's bottom frame.
    pub fn push_direct_call(
        &mut self,
        thread: ThreadId,
        method: MethodId,
        args: SlotVec,
    ) -> Result<(), VmError> {
        let method = self.db.method(method);
        if method.body.is_none() {
            return Err(VmError::BadOperand(format!(
                "cannot push a frame for {}",
                self.db.method_name(method.id)
            )));
        }
        let mut frame = StackFrame::new(method, args);
        frame.direct = true;
        self.kernel.thread_mut(thread)?.push_frame(frame);
        Ok(())
    }

    /// Allocate a fresh string
    pub fn new_string(&mut self, value: &str) -> Result<ObjRef, VmError> {
        self.kernel.new_string(self.db, value)
    }

    pub fn read_string(&self, string: ObjRef) -> Result<String, VmError> {
        self.kernel.read_string(self.db, string)
    }

    pub fn atomic_level(&self) -> u32 {
        self.step.atomic.level
    }

    /// Enter an atomic section (sections nest)
    pub fn begin_atomic(&mut self) {
        self.step.atomic.level += 1;
        self.step.atomic.thread = Some(self.origin.thread);
    }

    /// Leave an atomic section, returning false if there was none to leave
    pub fn end_atomic(&mut self) -> bool {
        if self.step.atomic.level == 0 {
            return false;
        }
        self.step.atomic.level -= 1;
        if self.step.atomic.level == 0 {
            self.step.atomic.thread = None;
        }
        true
    }

    /// Prune the current step: the search does not continue from its end state
    pub fn set_ignored(&mut self) {
        self.step.ignored = true;
    }

    /// Run a collection now (the arguments of the call stay reachable from the operand stack)
    pub fn collect_garbage(&mut self) -> Result<usize, VmError> {
        self.kernel.collect_garbage(self.db)
    }
}

/// Implementation of native methods
pub trait NativeBridge {
    fn invoke(
        &self,
        method: &MethodData,
        ctx: &mut NativeContext<'_>,
        args: &[Value],
    ) -> Result<NativeOutcome, VmError>;
}

/// Signature of one native method implementation
pub type NativeMethod = fn(&mut NativeContext<'_>, &[Value]) -> Result<NativeOutcome, VmError>;

/// Native bridge backed by a table of functions, keyed by class, name and descriptor
#[derive(Default, Clone)]
pub struct NativeRegistry {
    methods: HashMap<(String, String, String), NativeMethod>,
}

impl NativeRegistry {
    /// Registry without any natives
    pub fn new() -> NativeRegistry {
        NativeRegistry::default()
    }

    /// Registry with the natives of the built-in library classes
    pub fn with_java_natives() -> NativeRegistry {
        let mut registry = NativeRegistry::new();
        super::java_natives::register(&mut registry);
        registry
    }

    /// Register (or replace) a native
    pub fn register(&mut self, class: &str, name: &str, descriptor: &str, method: NativeMethod) {
        self.methods.insert(
            (
                String::from(class),
                String::from(name),
                String::from(descriptor),
            ),
            method,
        );
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl NativeBridge for NativeRegistry {
    fn invoke(
        &self,
        method: &MethodData,
        ctx: &mut NativeContext<'_>,
        args: &[Value],
    ) -> Result<NativeOutcome, VmError> {
        let class_name = ctx.db.class(method.class).name.as_str();
        let key = (
            String::from(class_name),
            String::from(method.name.as_str()),
            method.descriptor.render(),
        );
        match self.methods.get(&key) {
            Some(native) => native(ctx, args),
            None => {
                log::warn!("No native bound for {}", ctx.db.method_name(method.id));
                Ok(NativeOutcome::Throw(
                    BinaryName::UNSATISFIEDLINKERROR,
                    Some(ctx.db.method_name(method.id)),
                ))
            }
        }
    }
}

impl std::fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<String> = self
            .methods
            .keys()
            .map(|(class, name, descriptor)| format!("{}.{}{}", class, name, descriptor))
            .collect();
        keys.sort();
        f.debug_struct("NativeRegistry")
            .field("methods", &keys)
            .finish()
    }
}
