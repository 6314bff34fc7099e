//! Backtracking engine
//!
//! A [`Memento`] is pushed before every transition. It only holds what cannot be reconstructed:
//! the search bookkeeping as it was when the transition started, and the pre-images of the kernel
//! cells the transition wrote. Those pre-images are collected lazily: the kernel journal is
//! sealed (and the diff attached to the top memento) when the next memento is pushed, or when the
//! top memento is popped. Cells nobody wrote stay shared between the live kernel and every
//! earlier state.

use super::{AtomicSection, Origin};
use crate::vm::{Kernel, KernelDiff};

/// What it takes to go back to the state before a transition
#[derive(Debug)]
pub struct Memento {
    /// Pre-images of everything the transition wrote (attached once sealed)
    kernel: Option<KernelDiff>,
    pub atomic: AtomicSection,

    /// Number of choice frames on the path before the transition
    pub choice_depth: usize,
    pub state_id: Option<usize>,

    /// Origin of the choice frame the transition was taken from
    pub origin: Option<Origin>,
}

impl Memento {
    pub fn new(
        atomic: AtomicSection,
        choice_depth: usize,
        state_id: Option<usize>,
        origin: Option<Origin>,
    ) -> Memento {
        Memento {
            kernel: None,
            atomic,
            choice_depth,
            state_id,
            origin,
        }
    }

    fn attach(&mut self, diff: KernelDiff) {
        match &mut self.kernel {
            Some(kernel) => kernel.append(diff),
            None => self.kernel = Some(diff),
        }
    }
}

/// Stack of mementos, one per transition on the current path
#[derive(Debug, Default)]
pub struct Backtracker {
    mementos: Vec<Memento>,
}

impl Backtracker {
    pub fn new() -> Backtracker {
        Backtracker::default()
    }

    /// Forget the writes made before the first transition (the initial state is the baseline)
    pub fn start(&mut self, kernel: &mut Kernel) {
        drop(kernel.seal());
        self.mementos.clear();
    }

    pub fn depth(&self) -> usize {
        self.mementos.len()
    }

    pub fn top(&self) -> Option<&Memento> {
        self.mementos.last()
    }

    /// Save the current state before a transition
    pub fn push(&mut self, kernel: &mut Kernel, memento: Memento) {
        let diff = kernel.seal();
        if let Some(top) = self.mementos.last_mut() {
            top.attach(diff);
        }
        self.mementos.push(memento);
    }

    /// Go back to the state before the last transition, handing back its memento
    pub fn pop(&mut self, kernel: &mut Kernel) -> Option<Memento> {
        let mut memento = self.mementos.pop()?;
        memento.attach(kernel.seal());
        if let Some(diff) = memento.kernel.take() {
            kernel.undo(diff);
        }
        Some(memento)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::test_support::kernel_with_threads;
    use crate::vm::ThreadState;
    use std::rc::Rc;

    fn memento(depth: usize) -> Memento {
        Memento::new(AtomicSection::default(), depth, Some(depth), None)
    }

    #[test]
    fn pop_restores_each_transition() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();
        let mut backtracker = Backtracker::new();
        backtracker.start(&mut kernel);

        backtracker.push(&mut kernel, memento(0));
        kernel.lock(t1, object, 1).unwrap();

        backtracker.push(&mut kernel, memento(1));
        kernel.lock(t2, object, 1).unwrap();
        kernel.set_thread_state(t1, ThreadState::Sleeping).unwrap();
        assert_eq!(kernel.thread(t2).unwrap().state, ThreadState::Blocked);

        let popped = backtracker.pop(&mut kernel).unwrap();
        assert_eq!(popped.state_id, Some(1));
        assert_eq!(kernel.thread(t2).unwrap().state, ThreadState::Runnable);
        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::Runnable);
        assert!(kernel.owns_monitor(t1, object).unwrap());

        backtracker.pop(&mut kernel).unwrap();
        assert!(!kernel.owns_monitor(t1, object).unwrap());
        assert!(kernel.thread(t1).unwrap().held_locks.is_empty());
        assert!(backtracker.pop(&mut kernel).is_none());
    }

    #[test]
    fn untouched_cells_stay_shared() {
        let (mut kernel, object, [t1, _]) = kernel_with_threads();
        let mut backtracker = Backtracker::new();
        backtracker.start(&mut kernel);
        let saved = kernel.clone();

        backtracker.push(&mut kernel, memento(0));
        kernel.lock(t1, object, 1).unwrap();

        // The lock wrote the object and the thread, nothing else
        let other_thread = crate::vm::ThreadId(1);
        assert!(Rc::ptr_eq(
            kernel.threads.get_shared(other_thread.index()).unwrap(),
            saved.threads.get_shared(other_thread.index()).unwrap()
        ));
        assert!(!Rc::ptr_eq(
            kernel.heap.get_shared(object).unwrap(),
            saved.heap.get_shared(object).unwrap()
        ));
        assert_eq!(saved.heap.get(object).unwrap().monitor.owner, None);

        backtracker.pop(&mut kernel).unwrap();
        assert!(Rc::ptr_eq(
            kernel.heap.get_shared(object).unwrap(),
            saved.heap.get_shared(object).unwrap()
        ));
    }
}
