//! Scheduling policy
//!
//! When a step reaches a scheduling point, the scheduler decides whether that becomes a state
//! boundary (a new thread choice generator), whether the running thread just keeps going, or
//! whether the search has reached an end state or a deadlock.

use super::{AtomicSection, ChoiceGenerator, Config, Origin, SchedulingPoint, ThreadSummary};
use crate::vm::{Kernel, ThreadId, ThreadState, VmError};

/// What to do at a scheduling point
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// End the step with this generator
    Register(ChoiceGenerator),

    /// The running thread continues in the same step
    Skip,

    /// No thread is alive anymore
    EndState,

    /// Threads are alive but none can run
    Deadlock(Vec<ThreadSummary>),
}

/// Threads that can be scheduled, in id order
///
/// Besides RUNNABLE (and SLEEPING, since there is no clock) threads, this includes the threads
/// that were woken from `wait()` and are able to reacquire their monitor.
pub fn runnable_threads(kernel: &Kernel) -> Result<Vec<ThreadId>, VmError> {
    let mut runnable = vec![];
    for thread in kernel.all_threads() {
        let schedulable = match thread.state {
            ThreadState::Runnable | ThreadState::Sleeping => true,
            ThreadState::Notified | ThreadState::Interrupted | ThreadState::TimeoutWaiting => {
                kernel.can_reacquire(thread.id)?
            }
            _ => false,
        };
        if schedulable {
            runnable.push(thread.id);
        }
    }
    Ok(runnable)
}

/// Summaries of every live thread
pub fn live_threads(kernel: &Kernel) -> Vec<ThreadSummary> {
    kernel
        .all_threads()
        .filter(|thread| thread.is_alive())
        .map(|thread| ThreadSummary {
            thread: thread.id,
            state: thread.state,
            blocked_on: thread.blocked_on,
            held_locks: thread.held_locks.clone(),
        })
        .collect()
}

/// Decide what happens at a scheduling point reached by `current`
pub fn thread_choice(
    kernel: &Kernel,
    config: &Config,
    atomic: &AtomicSection,
    point: SchedulingPoint,
    origin: Origin,
) -> Result<Decision, VmError> {
    let current = origin.thread;
    let runnable = runnable_threads(kernel)?;
    if runnable.is_empty() {
        let live = live_threads(kernel);
        return Ok(if live.is_empty() {
            Decision::EndState
        } else {
            Decision::Deadlock(live)
        });
    }

    let current_runnable = runnable.contains(&current);
    if current_runnable && atomic.is_held_by(current) {
        return Ok(Decision::Skip);
    }
    if runnable == [current] && !config.break_on_single_choice {
        return Ok(Decision::Skip);
    }
    Ok(Decision::Register(ChoiceGenerator::threads(
        point, origin, runnable,
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::test_support::kernel_with_threads;

    fn origin(thread: ThreadId) -> Origin {
        Origin {
            thread,
            method: None,
            pc: crate::jvm::code::Pc(7),
        }
    }

    #[test]
    fn runnable_set_is_the_domain() {
        let (kernel, _, [t1, t2]) = kernel_with_threads();
        let config = Config::new();
        let decision = thread_choice(
            &kernel,
            &config,
            &AtomicSection::default(),
            SchedulingPoint::Yield,
            origin(t1),
        )
        .unwrap();
        match decision {
            Decision::Register(cg) => {
                assert_eq!(cg.total(), 2);
                assert_eq!(cg.choice_codes(), vec![t1.0 as i32, t2.0 as i32]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn single_choice_and_atomic_skip() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();
        let mut config = Config::new();
        let atomic = AtomicSection {
            level: 1,
            thread: Some(t1),
        };
        assert_eq!(
            thread_choice(&kernel, &config, &atomic, SchedulingPoint::Lock, origin(t1)).unwrap(),
            Decision::Skip
        );

        kernel.lock(t1, object, 1).unwrap();
        kernel.lock(t2, object, 1).unwrap();
        let none = AtomicSection::default();
        assert_eq!(
            thread_choice(&kernel, &config, &none, SchedulingPoint::Lock, origin(t1)).unwrap(),
            Decision::Skip
        );
        config.break_on_single_choice = true;
        assert!(matches!(
            thread_choice(&kernel, &config, &none, SchedulingPoint::Lock, origin(t1)).unwrap(),
            Decision::Register(_)
        ));
    }

    #[test]
    fn blocked_in_atomic_still_deadlocks() {
        let (mut kernel, object, [t1, t2]) = kernel_with_threads();
        let other = kernel.heap.alloc(
            crate::jvm::class_graph::ClassId(0),
            crate::vm::SlotVec::zeroed(0),
            None,
        );
        kernel.lock(t1, object, 1).unwrap();
        kernel.lock(t2, other, 1).unwrap();
        kernel.lock(t1, other, 1).unwrap();
        kernel.lock(t2, object, 1).unwrap();
        let atomic = AtomicSection {
            level: 1,
            thread: Some(t2),
        };
        match thread_choice(&kernel, &Config::new(), &atomic, SchedulingPoint::Blocked, origin(t2))
            .unwrap()
        {
            Decision::Deadlock(threads) => {
                assert_eq!(threads.len(), 2);
                assert_eq!(threads[0].blocked_on, Some(other));
                assert_eq!(threads[1].blocked_on, Some(object));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn no_live_thread_is_an_end_state() {
        let (mut kernel, _, [t1, t2]) = kernel_with_threads();
        kernel.set_thread_state(t1, ThreadState::Terminated).unwrap();
        kernel.set_thread_state(t2, ThreadState::Terminated).unwrap();
        assert_eq!(
            thread_choice(
                &kernel,
                &Config::new(),
                &AtomicSection::default(),
                SchedulingPoint::Terminate,
                origin(t2)
            )
            .unwrap(),
            Decision::EndState
        );
    }
}
