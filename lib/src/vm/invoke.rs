//! Calls, returns, thread termination, and class initialization

use super::interpreter::{Exec, Exit, Flow};
use super::{
    InitStatus, InsnOutcome, Interpreter, LockOutcome, NativeContext, NativeOutcome, SlotVec,
    StackFrame, ThreadState, Value, VmError, VmEvent,
};
use crate::jvm::class_graph::{ClassId, MethodData};
use crate::jvm::code::{InvokeType, MethodRef};
use crate::jvm::{BinaryName, RenderDescriptor, UnqualifiedName};
use crate::mc::{AtomicSection, SchedulingPoint};
use crate::util::Width;

impl<'a> Interpreter<'a> {
    pub(super) fn invoke(&mut self, kind: InvokeType, method_ref: &MethodRef) -> Exec<Flow> {
        let db = self.db;
        let class = self.resolve_class(&method_ref.class)?;
        let resolved = match db.find_method(class, &method_ref.name, &method_ref.descriptor) {
            Some(method) => db.method(method),
            None => {
                let message = format!(
                    "{}.{}{}",
                    method_ref.class,
                    method_ref.name,
                    method_ref.descriptor.render()
                );
                return Err(self.raise(&BinaryName::NOSUCHMETHODERROR, Some(message)));
            }
        };
        if resolved.is_static() != (kind == InvokeType::Static) {
            let message = db.method_name(resolved.id);
            return Err(self.raise(&BinaryName::INCOMPATIBLECLASSCHANGEERROR, Some(message)));
        }

        let receiver_depth = method_ref.descriptor.parameter_length(false);
        let target = match kind {
            InvokeType::Static => {
                self.initialize(resolved.class)?;
                resolved
            }
            InvokeType::Special => {
                if self.frame()?.peek_ref(receiver_depth)?.is_none() {
                    return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None));
                }
                resolved
            }
            InvokeType::Virtual | InvokeType::Interface => {
                let receiver = match self.frame()?.peek_ref(receiver_depth)? {
                    Some(receiver) => receiver,
                    None => {
                        let message = format!("cannot invoke {}", db.method_name(resolved.id));
                        return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, Some(message)));
                    }
                };
                let receiver_class = self.kernel.heap.get(receiver)?.class;
                match db.dispatch(receiver_class, &method_ref.name, &method_ref.descriptor) {
                    Some(method) => db.method(method),
                    None => {
                        let message = db.method_name(resolved.id);
                        return Err(self.raise(&BinaryName::ABSTRACTMETHODERROR, Some(message)));
                    }
                }
            }
        };

        if target.is_abstract() {
            let message = db.method_name(target.id);
            Err(self.raise(&BinaryName::ABSTRACTMETHODERROR, Some(message)))
        } else if target.is_native() {
            self.invoke_native(target)
        } else {
            self.enter_method(target)
        }
    }

    /// Push a frame for a method with a body, moving the arguments off the caller's stack
    fn enter_method(&mut self, method: &'a MethodData) -> Exec<Flow> {
        let thread = self.step.thread;
        let lock = if method.is_synchronized() {
            let lock = if method.is_static() {
                self.kernel.class_object(self.db, method.class)?
            } else {
                self.frame()?
                    .peek_ref(method.argument_slots - 1)?
                    .ok_or_else(|| VmError::BadOperand(String::from("null receiver")))?
            };
            let shared = self.access_object(lock)?;
            if self.breaks_on_lock(shared) {
                return Ok(Self::schedule(SchedulingPoint::Lock));
            }
            if self.kernel.lock(thread, lock, 1)? == LockOutcome::Blocked {
                return Ok(Flow::Yield(InsnOutcome::Blocked));
            }
            Some(lock)
        } else {
            None
        };

        let caller = self.frame()?;
        let args = caller.peek_slots(method.argument_slots)?;
        caller.drop_slots(method.argument_slots)?;
        let mut frame = StackFrame::new(method, args);
        frame.lock = lock;
        log::trace!("{} enters {}", thread, self.db.method_name(method.id));
        self.kernel.thread_mut(thread)?.push_frame(frame);
        Ok(Flow::Stay)
    }

    /// Call through the native bridge
    ///
    /// The arguments stay on the operand stack until the native completes, so that a call that
    /// gets issued again sees them unchanged.
    fn invoke_native(&mut self, method: &'a MethodData) -> Exec<Flow> {
        let slots = method.argument_slots;
        let operands = self.frame()?.peek_slots(slots)?;
        let mut args = Vec::with_capacity(method.descriptor.parameters.len() + 1);
        let mut idx = 0;
        if !method.is_static() {
            args.push(Value::Ref(operands.get_ref(0)));
            idx = 1;
        }
        for parameter in &method.descriptor.parameters {
            args.push(operands.get_value(idx, parameter));
            idx += parameter.width();
        }

        let origin = self.origin()?;
        let natives = self.natives;
        let (outcome, attr) = {
            let mut ctx = NativeContext::new(&mut *self.kernel, self.db, &mut *self.step, origin);
            let outcome = natives.invoke(method, &mut ctx, &args)?;
            (outcome, ctx.take_return_attr())
        };
        log::trace!("{} -> {:?}", self.db.method_name(method.id), outcome);

        match outcome {
            NativeOutcome::Return(value) => {
                if value.is_some() != method.descriptor.return_type.is_some() {
                    return Err(Exit::Error(VmError::BadOperand(format!(
                        "native {} returned {:?}",
                        self.db.method_name(method.id),
                        value
                    ))));
                }
                let frame = self.frame()?;
                frame.drop_slots(slots)?;
                if let Some(value) = value {
                    frame.push(value);
                    if let Some(attr) = attr {
                        frame.set_top_attr(attr);
                    }
                }
                Ok(Flow::Next)
            }
            NativeOutcome::Throw(class, message) => {
                self.frame()?.drop_slots(slots)?;
                Err(self.raise(&class, message))
            }
            NativeOutcome::Repeat => Ok(Flow::Stay),
            NativeOutcome::Choice(request) => Ok(Flow::Yield(InsnOutcome::Choice(request))),
            NativeOutcome::Blocked => Ok(Flow::Yield(InsnOutcome::Blocked)),
        }
    }

    /// Pop the current frame, handing `width` result words to the caller
    pub(super) fn do_return(&mut self, width: usize) -> Exec<Flow> {
        let db = self.db;
        let thread = self.step.thread;
        let top = self.frame()?;
        top.peek_slots(width)?;
        let len = top.stack.len();
        let result: Vec<_> = (len - width..len)
            .map(|idx| {
                (
                    top.stack.get_int(idx),
                    top.stack.is_ref(idx),
                    top.stack.attr(idx).cloned(),
                )
            })
            .collect();

        let frame = self
            .kernel
            .thread_mut(thread)?
            .pop_frame()
            .ok_or(VmError::NoFrame(thread))?;
        let method = db.method(frame.method);
        if method.name == UnqualifiedName::CLINIT {
            log::debug!("Initialized {}", db.class(method.class).name);
            self.kernel.static_area(db, method.class)?.status = InitStatus::Initialized;
            self.kernel
                .events
                .push(VmEvent::ClassInitialized(method.class));
        }
        if let Some(lock) = frame.lock {
            self.kernel.unlock(thread, lock)?;
        }

        if self.kernel.thread(thread)?.frames.is_empty() {
            self.terminate_thread()?;
            return Ok(Flow::Yield(InsnOutcome::Terminated));
        }
        if !frame.direct {
            let caller = self.frame()?;
            for (word, is_ref, attr) in result {
                caller.stack.push_word(word, is_ref);
                if attr.is_some() {
                    let top = caller.stack.len() - 1;
                    caller.stack.set_attr(top, attr);
                }
            }
            caller.pc = caller.pc.next();
        }
        Ok(Flow::Stay)
    }

    /// Terminate the running thread: release its monitors, wake its joiners, and give up the
    /// atomic section if it held it
    pub(super) fn terminate_thread(&mut self) -> Result<(), VmError> {
        let thread = self.step.thread;
        let held_locks = self.kernel.thread(thread)?.held_locks.clone();
        for object in held_locks {
            log::warn!("{} terminates holding the monitor of {}", thread, object);
            self.kernel.unlock_fully(thread, object)?;
        }

        let info = self.kernel.thread_mut(thread)?;
        info.frames.clear();
        info.blocked_on = None;
        info.pending_exception = None;
        let thread_object = info.thread_object;
        self.kernel.set_thread_state(thread, ThreadState::Terminated)?;
        self.kernel.notify_all(None, thread_object)?;

        if self.step.atomic.is_held_by(thread) {
            log::debug!("{} terminates inside an atomic section", thread);
            self.step.atomic = AtomicSection::default();
        }
        Ok(())
    }

    /// Make sure a class (and its superclasses) are initialized
    ///
    /// Classes without an initializer are marked initialized right away. Otherwise the first
    /// pending initializer is pushed as a direct frame, holding the monitor of the class object,
    /// and the current instruction exits with [`Flow::Stay`] so that it runs again afterwards. A
    /// thread finding a class being initialized by another thread blocks on its class object.
    pub(super) fn initialize(&mut self, class: ClassId) -> Exec<()> {
        let db = self.db;
        let thread = self.step.thread;
        loop {
            let mut target = None;
            let mut next_class = Some(class);
            while let Some(current) = next_class {
                match self.kernel.static_area(db, current)?.status {
                    InitStatus::Initialized => break,
                    InitStatus::Initializing(owner) if owner == thread => break,
                    InitStatus::Initializing(_) => {
                        let class_object = self.kernel.class_object(db, current)?;
                        return match self.kernel.lock(thread, class_object, 1)? {
                            LockOutcome::Blocked => Err(Exit::Flow(Flow::Yield(InsnOutcome::Blocked))),
                            LockOutcome::Acquired => Err(Exit::Error(VmError::BadOperand(format!(
                                "{} is being initialized without its monitor held",
                                db.class(current).name
                            )))),
                        };
                    }
                    InitStatus::Erroneous => {
                        let message = format!("Could not initialize class {}", db.class(current).name);
                        return Err(self.raise(&BinaryName::NOCLASSDEFFOUNDERROR, Some(message)));
                    }
                    InitStatus::Uninitialized => {
                        target = Some(current);
                        next_class = db.class(current).superclass;
                    }
                }
            }

            let target = match target {
                Some(target) => target,
                None => return Ok(()),
            };
            match db.class(target).clinit {
                Some(clinit) => {
                    let class_object = self.kernel.class_object(db, target)?;
                    if self.kernel.lock(thread, class_object, 1)? == LockOutcome::Blocked {
                        return Err(Exit::Flow(Flow::Yield(InsnOutcome::Blocked)));
                    }
                    log::debug!("{} initializes {}", thread, db.class(target).name);
                    self.kernel.static_area(db, target)?.status = InitStatus::Initializing(thread);
                    let mut frame = StackFrame::new(db.method(clinit), SlotVec::new());
                    frame.direct = true;
                    frame.lock = Some(class_object);
                    self.kernel.thread_mut(thread)?.push_frame(frame);
                    return Err(Exit::Flow(Flow::Stay));
                }
                None => {
                    self.kernel.static_area(db, target)?.status = InitStatus::Initialized;
                    self.kernel.events.push(VmEvent::ClassInitialized(target));
                }
            }
        }
    }

    /// Initialize a class outside of any instruction (eg. the main class before the search)
    ///
    /// Returns false if an initializer frame was pushed and still has to run.
    pub fn ensure_initialized(&mut self, class: ClassId) -> Result<bool, VmError> {
        match self.initialize(class) {
            Ok(()) => Ok(true),
            Err(Exit::Flow(_)) => Ok(false),
            Err(Exit::Error(err)) => Err(err),
        }
    }
}
