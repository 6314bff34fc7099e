//! Throwing and unwinding

use super::interpreter::{Exit, Flow};
use super::{InitStatus, InsnOutcome, Interpreter, ObjRef, ThreadId, Value, VmError, VmEvent};
use crate::jvm::class_graph::{ClassId, MethodId};
use crate::jvm::code::Pc;
use crate::jvm::{BinaryName, UnqualifiedName};
use std::fmt;

/// Exception that reached the bottom of a thread's stack
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UncaughtException {
    pub thread: ThreadId,
    pub class: BinaryName,
    pub message: Option<String>,

    /// Frames active when the exception was thrown, innermost first
    pub stack_trace: Vec<String>,
}

impl fmt::Display for UncaughtException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uncaught {} in thread {}", self.class, self.thread)?;
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        for line in &self.stack_trace {
            write!(f, "\n\tat {}", line)?;
        }
        Ok(())
    }
}

impl<'a> Interpreter<'a> {
    /// Throw a fresh exception from the current instruction
    pub(super) fn raise(&mut self, class: &BinaryName, message: Option<String>) -> Exit {
        match self.throw_new(class, message) {
            Ok(flow) => Exit::Flow(flow),
            Err(err) => Exit::Error(err),
        }
    }

    /// Allocate an exception (without running a constructor) and throw it
    pub(super) fn throw_new(
        &mut self,
        class: &BinaryName,
        message: Option<String>,
    ) -> Result<Flow, VmError> {
        log::debug!("{} throws {}", self.step.thread, class);
        let exception = self.allocate_exception(class, message)?;
        self.throw(exception)
    }

    fn allocate_exception(
        &mut self,
        class: &BinaryName,
        message: Option<String>,
    ) -> Result<ObjRef, VmError> {
        let db = self.db;
        let class = db.resolve(class)?;
        let exception = self.kernel.new_object(db, class);
        self.step.allocations += 1;
        if let Some(message) = message {
            let message = self.kernel.new_string(db, &message)?;
            self.step.allocations += 1;
            if let Some(field) = db.find_instance_field(class, &UnqualifiedName::DETAILMESSAGE) {
                self.kernel
                    .heap
                    .get_mut(exception)?
                    .fields
                    .set_ref(field.offset, Some(message));
            }
        }
        Ok(exception)
    }

    /// Throw an exception object: unwind to the closest matching handler, or terminate the
    /// thread if there is none
    pub(super) fn throw(&mut self, exception: ObjRef) -> Result<Flow, VmError> {
        let db = self.db;
        let thread = self.step.thread;
        let stack_trace = self.stack_trace()?;
        self.kernel
            .events
            .push(VmEvent::ExceptionThrown { thread, exception });
        self.kernel.thread_mut(thread)?.pending_exception = Some(exception);

        let mut exception = exception;
        let mut exception_class = self.kernel.heap.get(exception)?.class;
        while let Some(frame) = self.kernel.thread(thread)?.top_frame() {
            if let Some(handler) = self.find_handler(frame.method, frame.pc, exception_class) {
                let info = self.kernel.thread_mut(thread)?;
                info.pending_exception = None;
                let frame = info.top_frame_mut().ok_or(VmError::NoFrame(thread))?;
                frame.pc = handler;
                frame.stack.clear();
                frame.push_ref(Some(exception));
                return Ok(Flow::Stay);
            }

            let frame = self
                .kernel
                .thread_mut(thread)?
                .pop_frame()
                .ok_or(VmError::NoFrame(thread))?;
            if let Some(lock) = frame.lock {
                self.kernel.unlock(thread, lock)?;
            }
            let method = db.method(frame.method);
            if method.name == UnqualifiedName::CLINIT {
                log::debug!("Initializer of {} failed", db.class(method.class).name);
                self.kernel.static_area(db, method.class)?.status = InitStatus::Erroneous;
                if !self.is_error(exception_class) {
                    let cause = db.class(exception_class).name.to_string();
                    exception = self.allocate_exception(
                        &BinaryName::EXCEPTIONININITIALIZERERROR,
                        Some(cause),
                    )?;
                    exception_class = self.kernel.heap.get(exception)?.class;
                    self.kernel.thread_mut(thread)?.pending_exception = Some(exception);
                }
            }
        }

        let message = match self
            .kernel
            .read_field(db, exception, &UnqualifiedName::DETAILMESSAGE)?
        {
            Some(Value::Ref(Some(message))) => Some(self.kernel.read_string(db, message)?),
            _ => None,
        };
        let uncaught = UncaughtException {
            thread,
            class: db.class(exception_class).name.clone(),
            message,
            stack_trace,
        };
        log::debug!("{}", uncaught);
        self.terminate_thread()?;
        Ok(Flow::Yield(InsnOutcome::Uncaught(uncaught)))
    }

    /// Program counter of the first handler in a method catching the exception class
    fn find_handler(
        &self,
        method: MethodId,
        pc: Pc,
        exception_class: ClassId,
    ) -> Option<Pc> {
        let db = self.db;
        let body = db.method(method).body.as_ref()?;
        body.handlers_covering(pc)
            .find(|handler| match &handler.catch_type {
                None => true,
                Some(catch_type) => db
                    .resolve(catch_type)
                    .map_or(false, |catch_class| db.is_assignable(exception_class, catch_class)),
            })
            .map(|handler| handler.handler)
    }

    fn is_error(&self, class: ClassId) -> bool {
        self.db
            .resolve(&BinaryName::ERROR)
            .map_or(false, |error| self.db.is_assignable(class, error))
    }

    /// Active frames of the running thread, innermost first
    fn stack_trace(&self) -> Result<Vec<String>, VmError> {
        let info = self.kernel.thread(self.step.thread)?;
        Ok(info
            .frames
            .iter()
            .rev()
            .map(|frame| format!("{} (pc {})", self.db.method_name(frame.method), frame.pc))
            .collect())
    }
}
