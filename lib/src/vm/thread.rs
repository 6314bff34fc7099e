use super::{ObjRef, StackFrame};
use std::fmt;
use std::rc::Rc;

/// Index of a thread (threads are never removed, so this is stable)
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub const MAIN: ThreadId = ThreadId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Run state of a thread
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ThreadState {
    /// Created but not started
    New,
    Runnable,

    /// Trying to acquire a monitor held by another thread
    Blocked,

    /// In `wait()` without a timeout
    Waiting,

    /// In `wait(timeout)`: can also be resumed by a timeout choice once the lock is free
    TimeoutWaiting,

    /// Woken by `notify`, waiting to reacquire the monitor
    Notified,

    /// Interrupted while waiting, waiting to reacquire the monitor
    Interrupted,
    Terminated,

    /// In `sleep()` (still schedulable, since there is no clock)
    Sleeping,
}

impl ThreadState {
    pub fn is_alive(self) -> bool {
        !matches!(self, ThreadState::New | ThreadState::Terminated)
    }

    /// Code used for the state in canonical state vectors
    pub fn code(self) -> i32 {
        match self {
            ThreadState::New => 0,
            ThreadState::Runnable => 1,
            ThreadState::Blocked => 2,
            ThreadState::Waiting => 3,
            ThreadState::TimeoutWaiting => 4,
            ThreadState::Notified => 5,
            ThreadState::Interrupted => 6,
            ThreadState::Terminated => 7,
            ThreadState::Sleeping => 8,
        }
    }
}

impl fmt::Display for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreadState::New => "NEW",
            ThreadState::Runnable => "RUNNABLE",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Waiting => "WAITING",
            ThreadState::TimeoutWaiting => "TIMEOUT_WAITING",
            ThreadState::Notified => "NOTIFIED",
            ThreadState::Interrupted => "INTERRUPTED",
            ThreadState::Terminated => "TERMINATED",
            ThreadState::Sleeping => "SLEEPING",
        };
        f.write_str(name)
    }
}

/// Set of threads that touched an object or class (for sharedness)
///
/// Threads beyond the first 64 are not tracked individually: any of them makes the set shared.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct ThreadSet {
    bits: u64,
    overflow: bool,
}

impl ThreadSet {
    pub fn contains(&self, thread: ThreadId) -> bool {
        if thread.0 < 64 {
            self.bits & (1u64 << thread.0) != 0
        } else {
            self.overflow
        }
    }

    /// Add a thread, returning whether the set changed
    pub fn insert(&mut self, thread: ThreadId) -> bool {
        if self.contains(thread) {
            return false;
        }
        if thread.0 < 64 {
            self.bits |= 1u64 << thread.0;
        } else {
            self.overflow = true;
        }
        true
    }

    /// Touched by more than one thread
    pub fn is_shared(&self) -> bool {
        self.overflow || self.bits.count_ones() > 1
    }

    pub fn bits(&self) -> (u64, bool) {
        (self.bits, self.overflow)
    }
}

/// Thread and its call stack
///
/// Frames are individually reference counted, so copying a thread on write only copies the
/// frame vector. Frames themselves are copied the first time they are written.
#[derive(Clone, Debug)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub state: ThreadState,

    /// The `java/lang/Thread` object
    pub thread_object: ObjRef,

    /// Call stack (innermost frame last)
    pub frames: Vec<Rc<StackFrame>>,

    /// Monitors currently owned, in acquisition order
    pub held_locks: Vec<ObjRef>,

    /// Object whose monitor the thread is blocked or waiting on
    pub blocked_on: Option<ObjRef>,

    /// Recursion count to restore when reacquiring a monitor after `wait()`
    pub lock_count: u32,

    /// Interrupt flag
    pub interrupted: bool,

    /// Exception being thrown (its diagnostic data must survive a collection)
    pub pending_exception: Option<ObjRef>,
}

impl ThreadInfo {
    pub fn new(id: ThreadId, thread_object: ObjRef) -> ThreadInfo {
        ThreadInfo {
            id,
            state: ThreadState::New,
            thread_object,
            frames: vec![],
            held_locks: vec![],
            blocked_on: None,
            lock_count: 0,
            interrupted: false,
            pending_exception: None,
        }
    }

    pub fn top_frame(&self) -> Option<&StackFrame> {
        self.frames.last().map(|frame| &**frame)
    }

    /// Mutable access to the innermost frame, copying it if it is shared with a saved state
    pub fn top_frame_mut(&mut self) -> Option<&mut StackFrame> {
        self.frames.last_mut().map(Rc::make_mut)
    }

    pub fn push_frame(&mut self, frame: StackFrame) {
        self.frames.push(Rc::new(frame));
    }

    pub fn pop_frame(&mut self) -> Option<Rc<StackFrame>> {
        self.frames.pop()
    }

    pub fn is_alive(&self) -> bool {
        self.state.is_alive()
    }

    pub fn holds_lock(&self, object: ObjRef) -> bool {
        self.held_locks.contains(&object)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn thread_sets() {
        let mut set = ThreadSet::default();
        assert!(set.insert(ThreadId(3)));
        assert!(!set.insert(ThreadId(3)));
        assert!(!set.is_shared());
        assert!(set.insert(ThreadId(0)));
        assert!(set.is_shared());

        let mut many = ThreadSet::default();
        many.insert(ThreadId(70));
        assert!(many.contains(ThreadId(99)), "untracked threads are lumped together");
        assert!(many.is_shared());
    }
}
