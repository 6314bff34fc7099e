//! Monitors (lock records) and the thread state transitions around them

use super::{Kernel, ObjRef, ThreadId, ThreadState, VmError, VmEvent};

/// Lock record of an object
///
/// Invariant: `owner` is set exactly when `count > 0`. The thread lists are kept sorted so that
/// equal lock states compare (and hash) equal no matter the order threads arrived in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Monitor {
    pub owner: Option<ThreadId>,
    pub count: u32,

    /// Threads trying to (re)acquire the monitor
    pub blocked: Vec<ThreadId>,

    /// Threads that released the monitor in `wait()` and have not been notified yet
    pub waiting: Vec<ThreadId>,
}

impl Monitor {
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// Can this thread acquire the monitor right now?
    pub fn can_lock(&self, thread: ThreadId) -> bool {
        self.owner.map_or(true, |owner| owner == thread)
    }

    pub fn is_locked_by(&self, thread: ThreadId) -> bool {
        self.owner == Some(thread)
    }

    /// Is the monitor in its initial state (so the object is not a GC root)?
    pub fn is_idle(&self) -> bool {
        self.owner.is_none() && self.blocked.is_empty() && self.waiting.is_empty()
    }

    fn add_sorted(list: &mut Vec<ThreadId>, thread: ThreadId) {
        if let Err(idx) = list.binary_search(&thread) {
            list.insert(idx, thread);
        }
    }

    fn remove_sorted(list: &mut Vec<ThreadId>, thread: ThreadId) -> bool {
        match list.binary_search(&thread) {
            Ok(idx) => {
                list.remove(idx);
                true
            }
            Err(_) => false,
        }
    }
}

/// What happened when a thread tried to acquire a monitor
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LockOutcome {
    Acquired,

    /// The thread is now BLOCKED on the monitor
    Blocked,
}

impl Kernel {
    fn monitor(&self, object: ObjRef) -> Result<&Monitor, VmError> {
        Ok(&self.heap.get(object)?.monitor)
    }

    fn monitor_mut(&mut self, object: ObjRef) -> Result<&mut Monitor, VmError> {
        Ok(&mut self.heap.get_mut(object)?.monitor)
    }

    /// Is the monitor of this object available to the thread?
    pub fn can_lock(&self, thread: ThreadId, object: ObjRef) -> Result<bool, VmError> {
        Ok(self.monitor(object)?.can_lock(thread))
    }

    /// Acquire a monitor (recursively if already owned), or block on it
    ///
    /// `count` is the recursion count to acquire with: `1` normally, the saved count when
    /// reacquiring after `wait()`.
    pub fn lock(
        &mut self,
        thread: ThreadId,
        object: ObjRef,
        count: u32,
    ) -> Result<LockOutcome, VmError> {
        let monitor = self.monitor_mut(object)?;
        if !monitor.can_lock(thread) {
            Monitor::add_sorted(&mut monitor.blocked, thread);
            self.set_blocked_on(thread, Some(object))?;
            self.set_thread_state(thread, ThreadState::Blocked)?;
            return Ok(LockOutcome::Blocked);
        }

        let first = monitor.owner.is_none();
        monitor.owner = Some(thread);
        monitor.count += count;
        Monitor::remove_sorted(&mut monitor.blocked, thread);

        let info = self.thread_mut(thread)?;
        info.blocked_on = None;
        if first {
            info.held_locks.push(object);
        }
        self.events.push(VmEvent::Locked { thread, object });
        Ok(LockOutcome::Acquired)
    }

    /// Release one level of a monitor
    ///
    /// When the monitor becomes free, merely blocked threads become runnable again (they retry
    /// the acquisition when next scheduled). Notified and interrupted waiters stay in their
    /// states: the scheduler considers them runnable once the monitor is free.
    pub fn unlock(&mut self, thread: ThreadId, object: ObjRef) -> Result<bool, VmError> {
        let monitor = self.monitor_mut(object)?;
        if !monitor.is_locked_by(thread) {
            return Err(VmError::UnownedMonitor { thread, object });
        }
        monitor.count -= 1;
        if monitor.count > 0 {
            return Ok(false);
        }
        monitor.owner = None;
        let blocked = monitor.blocked.clone();

        self.thread_mut(thread)?.held_locks.retain(|held| *held != object);
        self.events.push(VmEvent::Unlocked { thread, object });
        for other in blocked {
            if self.thread(other)?.state == ThreadState::Blocked {
                self.set_thread_state(other, ThreadState::Runnable)?;
            }
        }
        Ok(true)
    }

    /// Release a monitor entirely (any recursion count), returning the count released
    pub fn unlock_fully(&mut self, thread: ThreadId, object: ObjRef) -> Result<u32, VmError> {
        let count = self.monitor(object)?.count;
        if !self.monitor(object)?.is_locked_by(thread) {
            return Err(VmError::UnownedMonitor { thread, object });
        }
        self.monitor_mut(object)?.count = 1;
        self.unlock(thread, object)?;
        Ok(count)
    }

    /// Start `wait()`: release the monitor and move the thread to WAITING or TIMEOUT_WAITING
    ///
    /// The caller must have checked that the thread owns the monitor.
    pub fn wait(&mut self, thread: ThreadId, object: ObjRef, timed: bool) -> Result<(), VmError> {
        let count = self.unlock_fully(thread, object)?;
        Monitor::add_sorted(&mut self.monitor_mut(object)?.waiting, thread);

        let info = self.thread_mut(thread)?;
        info.lock_count = count;
        info.blocked_on = Some(object);
        let state = if timed {
            ThreadState::TimeoutWaiting
        } else {
            ThreadState::Waiting
        };
        self.set_thread_state(thread, state)?;
        self.events.push(VmEvent::Waited { thread, object });
        Ok(())
    }

    /// Finish `wait()` once the thread is scheduled again: reacquire the monitor with the saved
    /// recursion count
    pub fn end_wait(&mut self, thread: ThreadId, object: ObjRef) -> Result<LockOutcome, VmError> {
        let monitor = self.monitor_mut(object)?;
        Monitor::remove_sorted(&mut monitor.waiting, thread);
        if !monitor.can_lock(thread) {
            Monitor::add_sorted(&mut monitor.blocked, thread);
            return Ok(LockOutcome::Blocked);
        }
        let count = self.thread(thread)?.lock_count.max(1);
        let outcome = self.lock(thread, object, count)?;
        let info = self.thread_mut(thread)?;
        info.lock_count = 0;
        self.set_thread_state(thread, ThreadState::Runnable)?;
        Ok(outcome)
    }

    /// Threads waiting on a monitor, in id order
    pub fn waiters(&self, object: ObjRef) -> Result<Vec<ThreadId>, VmError> {
        Ok(self.monitor(object)?.waiting.clone())
    }

    /// Wake a specific waiter: it moves to the blocked set as NOTIFIED
    pub fn notify_thread(
        &mut self,
        notifier: Option<ThreadId>,
        object: ObjRef,
        waiter: ThreadId,
    ) -> Result<(), VmError> {
        let monitor = self.monitor_mut(object)?;
        if !Monitor::remove_sorted(&mut monitor.waiting, waiter) {
            return Err(VmError::BadOperand(format!(
                "thread {} is not waiting on {}",
                waiter, object
            )));
        }
        Monitor::add_sorted(&mut monitor.blocked, waiter);
        self.set_thread_state(waiter, ThreadState::Notified)?;
        self.events.push(VmEvent::Notified {
            notifier,
            object,
            waiter,
        });
        Ok(())
    }

    /// Does the thread own the monitor (as `wait` and `notify` require)?
    pub fn owns_monitor(&self, thread: ThreadId, object: ObjRef) -> Result<bool, VmError> {
        Ok(self.monitor(object)?.is_locked_by(thread))
    }

    /// Wake every waiter
    ///
    /// `notifier` is `None` when the engine itself notifies (eg. a thread object on termination,
    /// which happens without owning its monitor).
    pub fn notify_all(&mut self, notifier: Option<ThreadId>, object: ObjRef) -> Result<(), VmError> {
        for waiter in self.waiters(object)? {
            self.notify_thread(notifier, object, waiter)?;
        }
        Ok(())
    }

    /// Interrupt a thread: a waiting thread moves to INTERRUPTED and must reacquire its monitor
    pub fn interrupt(&mut self, thread: ThreadId) -> Result<(), VmError> {
        let info = self.thread_mut(thread)?;
        info.interrupted = true;
        let blocked_on = info.blocked_on;
        let state = info.state;
        if let (ThreadState::Waiting | ThreadState::TimeoutWaiting, Some(object)) =
            (state, blocked_on)
        {
            let monitor = self.monitor_mut(object)?;
            Monitor::remove_sorted(&mut monitor.waiting, thread);
            Monitor::add_sorted(&mut monitor.blocked, thread);
            self.set_thread_state(thread, ThreadState::Interrupted)?;
        }
        Ok(())
    }

    /// Forget a stale acquisition attempt of a thread that was woken from BLOCKED
    ///
    /// The instruction that blocked runs again and retries the acquisition if it still needs to.
    pub fn cancel_block(&mut self, thread: ThreadId) -> Result<(), VmError> {
        let info = self.thread(thread)?;
        if info.state != ThreadState::Runnable {
            return Ok(());
        }
        if let Some(object) = info.blocked_on {
            Monitor::remove_sorted(&mut self.monitor_mut(object)?.blocked, thread);
            self.set_blocked_on(thread, None)?;
        }
        Ok(())
    }

    /// Is a waiting-to-reacquire thread (NOTIFIED, INTERRUPTED, TIMEOUT_WAITING) able to get its
    /// monitor back?
    pub fn can_reacquire(&self, thread: ThreadId) -> Result<bool, VmError> {
        match self.thread(thread)?.blocked_on {
            Some(object) => Ok(self.monitor(object)?.can_lock(thread)),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::test_support::kernel_with_threads;

    #[test]
    fn lock_is_exclusive_and_recursive() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();

        assert_eq!(kernel.lock(t1, object, 1).unwrap(), LockOutcome::Acquired);
        assert_eq!(kernel.lock(t1, object, 1).unwrap(), LockOutcome::Acquired);
        assert_eq!(kernel.lock(t2, object, 1).unwrap(), LockOutcome::Blocked);
        assert_eq!(kernel.thread(t2).unwrap().state, ThreadState::Blocked);
        assert_eq!(kernel.thread(t2).unwrap().blocked_on, Some(object));

        let monitor = &kernel.heap.get(object).unwrap().monitor;
        assert_eq!(monitor.owner, Some(t1));
        assert_eq!(monitor.count, 2);
        assert_eq!(monitor.blocked, vec![t2]);

        assert!(!kernel.unlock(t1, object).unwrap());
        assert_eq!(kernel.thread(t2).unwrap().state, ThreadState::Blocked);
        assert!(kernel.unlock(t1, object).unwrap());
        assert_eq!(kernel.thread(t2).unwrap().state, ThreadState::Runnable);
        assert!(kernel.thread(t1).unwrap().held_locks.is_empty());

        assert_eq!(kernel.lock(t2, object, 1).unwrap(), LockOutcome::Acquired);
        assert!(kernel.heap.get(object).unwrap().monitor.blocked.is_empty());
    }

    #[test]
    fn unlocking_unowned_monitor_is_internal_error() {
        let (mut kernel, object, [t1, _]) = kernel_with_threads();
        assert!(matches!(
            kernel.unlock(t1, object),
            Err(VmError::UnownedMonitor { .. })
        ));
    }

    #[test]
    fn wait_notify_reacquire() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();
        kernel.lock(t1, object, 1).unwrap();
        kernel.lock(t1, object, 1).unwrap();
        kernel.wait(t1, object, false).unwrap();

        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::Waiting);
        assert_eq!(kernel.thread(t1).unwrap().lock_count, 2);
        assert!(kernel.heap.get(object).unwrap().monitor.is_free());

        kernel.lock(t2, object, 1).unwrap();
        kernel.notify_all(Some(t2), object).unwrap();
        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::Notified);
        assert!(!kernel.can_reacquire(t1).unwrap(), "t2 still holds the lock");

        kernel.unlock(t2, object).unwrap();
        assert_eq!(
            kernel.thread(t1).unwrap().state,
            ThreadState::Notified,
            "notified threads are not made runnable by the release"
        );
        assert!(kernel.can_reacquire(t1).unwrap());
        assert_eq!(kernel.end_wait(t1, object).unwrap(), LockOutcome::Acquired);

        let monitor = &kernel.heap.get(object).unwrap().monitor;
        assert_eq!(monitor.owner, Some(t1));
        assert_eq!(monitor.count, 2, "recursion count is restored");
        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::Runnable);
    }

    #[test]
    fn interrupt_waiting_thread() {
        let (mut kernel, object, [t1, _]) = kernel_with_threads();
        kernel.lock(t1, object, 1).unwrap();
        kernel.wait(t1, object, true).unwrap();
        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::TimeoutWaiting);

        kernel.interrupt(t1).unwrap();
        assert_eq!(kernel.thread(t1).unwrap().state, ThreadState::Interrupted);
        assert!(kernel.thread(t1).unwrap().interrupted);
        assert!(kernel.waiters(object).unwrap().is_empty());
    }

    #[test]
    fn woken_thread_forgets_stale_attempt() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();
        kernel.lock(t1, object, 1).unwrap();
        kernel.lock(t2, object, 1).unwrap();
        kernel.unlock(t1, object).unwrap();
        assert_eq!(kernel.heap.get(object).unwrap().monitor.blocked, vec![t2]);

        kernel.cancel_block(t2).unwrap();
        assert!(kernel.heap.get(object).unwrap().monitor.is_idle());
        assert_eq!(kernel.thread(t2).unwrap().blocked_on, None);
    }
}
