use super::{ChoiceFrame, ChoiceStack, Origin};
use crate::vm::{ObjRef, ThreadId, ThreadState, UncaughtException};
use std::fmt;

/// Atomic section requested by the program (`Verify.beginAtomic`)
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AtomicSection {
    /// Nesting depth (0 outside of any section)
    pub level: u32,

    /// Thread that opened the section
    pub thread: Option<ThreadId>,
}

impl AtomicSection {
    pub fn is_active(&self) -> bool {
        self.level > 0
    }

    /// Is this thread running inside its own atomic section?
    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        self.level > 0 && self.thread == Some(thread)
    }
}

/// Snapshot of one thread, as reported in a deadlock
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreadSummary {
    pub thread: ThreadId,
    pub state: ThreadState,
    pub blocked_on: Option<ObjRef>,
    pub held_locks: Vec<ObjRef>,
}

impl fmt::Display for ThreadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.thread, self.state)?;
        if let Some(object) = self.blocked_on {
            write!(f, " on {}", object)?;
        }
        if !self.held_locks.is_empty() {
            f.write_str(" holding")?;
            for lock in &self.held_locks {
                write!(f, " {}", lock)?;
            }
        }
        Ok(())
    }
}

/// How the last transition ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StateStatus {
    /// A choice generator is pending: the search can go on from here
    Open,

    /// Every thread terminated (or none can ever run again without being deadlocked)
    EndState,

    /// Live threads remain but none is runnable
    Deadlock(Vec<ThreadSummary>),

    /// An exception reached the bottom of a thread's stack
    Uncaught(UncaughtException),

    /// A listener reported a property violation
    Violation(String),

    /// The step was marked ignored (`Verify.ignoreIf`)
    Ignored,
}

impl StateStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, StateStatus::Open)
    }

    /// Does this status describe a finding?
    pub fn is_finding(&self) -> bool {
        matches!(
            self,
            StateStatus::Deadlock(_) | StateStatus::Uncaught(_) | StateStatus::Violation(_)
        )
    }
}

/// Search-level state that is not part of the kernel: pending choices, the atomic section, and
/// bookkeeping about the current state
#[derive(Clone, Debug)]
pub struct SystemState {
    /// Choice frames of the states on the current path (the top one is pending)
    pub choices: ChoiceStack,
    pub atomic: AtomicSection,

    /// Id of the current state, once matched
    pub state_id: Option<usize>,

    /// Was the current state seen for the first time?
    pub is_new: bool,
    pub status: StateStatus,
}

impl SystemState {
    /// State before the first transition: only the main thread, scheduled by a root choice
    pub fn new(root: ChoiceFrame) -> SystemState {
        let mut choices = ChoiceStack::new();
        choices.push(root);
        SystemState {
            choices,
            atomic: AtomicSection::default(),
            state_id: None,
            is_new: true,
            status: StateStatus::Open,
        }
    }

    /// Origin of the pending choice frame
    pub fn pending_origin(&self) -> Option<Origin> {
        self.choices.top().map(|frame| frame.root().origin())
    }
}
