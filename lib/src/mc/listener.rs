//! Observers
//!
//! Listeners see the search as it happens but cannot change it: every hook gets shared
//! references only. A listener can still stop the current branch by reporting a violation (which
//! becomes a finding), or abort the whole run with a failure.

use super::{ChoiceGenerator, SystemState};
use crate::jvm::class_graph::ClassDatabase;
use crate::vm::{ExecutedInsn, Kernel, ThreadId, VmEvent};
use std::fmt;

/// Error raised by a listener
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListenerError {
    /// The program violates a property: this ends the branch as a finding
    Violation(String),

    /// The listener itself failed: this aborts the run
    Failure(String),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerError::Violation(message) => write!(f, "property violated: {}", message),
            ListenerError::Failure(message) => write!(f, "listener failed: {}", message),
        }
    }
}

pub type ListenerResult = Result<(), ListenerError>;

/// Observer of the search
///
/// Every hook has a default no-op implementation.
#[allow(unused_variables)]
pub trait Listener {
    fn instruction_executing(
        &mut self,
        db: &ClassDatabase,
        kernel: &Kernel,
        thread: ThreadId,
        insn: ExecutedInsn,
    ) -> ListenerResult {
        Ok(())
    }

    fn instruction_executed(
        &mut self,
        db: &ClassDatabase,
        kernel: &Kernel,
        thread: ThreadId,
        insn: ExecutedInsn,
    ) -> ListenerResult {
        Ok(())
    }

    /// Thread state changes, locking, class initialization, allocation, GC...
    fn vm_event(&mut self, kernel: &Kernel, event: &VmEvent) -> ListenerResult {
        Ok(())
    }

    /// A transition ended by registering a new choice generator
    fn choice_generator_set(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        Ok(())
    }

    /// A generator moved to its next choice at the start of a transition
    fn choice_generator_advanced(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        Ok(())
    }

    /// Every choice of a generator has been explored
    fn choice_generator_processed(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        Ok(())
    }

    fn state_advanced(
        &mut self,
        kernel: &Kernel,
        system: &SystemState,
        is_new: bool,
    ) -> ListenerResult {
        Ok(())
    }

    fn state_backtracked(&mut self, kernel: &Kernel, system: &SystemState) -> ListenerResult {
        Ok(())
    }
}

/// Dispatches hooks to every registered listener, in registration order
///
/// The first error stops the dispatch and is returned: later listeners do not see the hook.
#[derive(Default)]
pub struct Notifier {
    listeners: Vec<Box<dyn Listener>>,
}

macro_rules! notify_all {
    ($self:ident, $listener:ident => $call:expr) => {{
        for $listener in $self.listeners.iter_mut() {
            $call?;
        }
        Ok(())
    }};
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier::default()
    }

    pub fn add(&mut self, listener: Box<dyn Listener>) {
        self.listeners.push(listener);
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn instruction_executing(
        &mut self,
        db: &ClassDatabase,
        kernel: &Kernel,
        thread: ThreadId,
        insn: ExecutedInsn,
    ) -> ListenerResult {
        notify_all!(self, l => l.instruction_executing(db, kernel, thread, insn))
    }

    pub fn instruction_executed(
        &mut self,
        db: &ClassDatabase,
        kernel: &Kernel,
        thread: ThreadId,
        insn: ExecutedInsn,
    ) -> ListenerResult {
        notify_all!(self, l => l.instruction_executed(db, kernel, thread, insn))
    }

    pub fn vm_events(&mut self, kernel: &Kernel, events: &[VmEvent]) -> ListenerResult {
        for event in events {
            for listener in self.listeners.iter_mut() {
                listener.vm_event(kernel, event)?;
            }
        }
        Ok(())
    }

    pub fn choice_generator_set(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        notify_all!(self, l => l.choice_generator_set(generator))
    }

    pub fn choice_generator_advanced(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        notify_all!(self, l => l.choice_generator_advanced(generator))
    }

    pub fn choice_generator_processed(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        notify_all!(self, l => l.choice_generator_processed(generator))
    }

    pub fn state_advanced(
        &mut self,
        kernel: &Kernel,
        system: &SystemState,
        is_new: bool,
    ) -> ListenerResult {
        notify_all!(self, l => l.state_advanced(kernel, system, is_new))
    }

    pub fn state_backtracked(&mut self, kernel: &Kernel, system: &SystemState) -> ListenerResult {
        notify_all!(self, l => l.state_backtracked(kernel, system))
    }
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mc::{ChoiceRequest, Origin};

    struct Counter {
        seen: std::rc::Rc<std::cell::Cell<usize>>,
        fail_at: Option<usize>,
    }

    impl Listener for Counter {
        fn choice_generator_set(&mut self, _generator: &ChoiceGenerator) -> ListenerResult {
            let seen = self.seen.get() + 1;
            self.seen.set(seen);
            if Some(seen) == self.fail_at {
                return Err(ListenerError::Violation(format!("generator #{}", seen)));
            }
            Ok(())
        }
    }

    #[test]
    fn first_error_stops_dispatch() {
        let seen = std::rc::Rc::new(std::cell::Cell::new(0));
        let mut notifier = Notifier::new();
        notifier.add(Box::new(Counter {
            seen: seen.clone(),
            fail_at: Some(1),
        }));
        notifier.add(Box::new(Counter {
            seen: seen.clone(),
            fail_at: None,
        }));

        let generator = ChoiceGenerator::data(ChoiceRequest::Bools, Origin::root()).unwrap();
        assert_eq!(
            notifier.choice_generator_set(&generator),
            Err(ListenerError::Violation(String::from("generator #1")))
        );
        assert_eq!(seen.get(), 1);
        assert_eq!(notifier.choice_generator_advanced(&generator), Ok(()));
    }
}
