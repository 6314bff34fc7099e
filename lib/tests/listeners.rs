use jvmc::demos::{self, Demo, DemoSize};
use jvmc::jvm::class_graph::ClassDatabase;
use jvmc::mc::*;
use jvmc::vm::{ExecutedInsn, Kernel, ThreadId, VmError, VmEvent};
use std::cell::Cell;
use std::rc::Rc;

/// Checks in every state that no monitor is owned by two threads, and that the threads' lists of
/// held locks agree with the monitors
#[derive(Default)]
struct MonitorExclusion {
    checked: Rc<Cell<usize>>,
    contended: Rc<Cell<usize>>,
}

impl Listener for MonitorExclusion {
    fn state_advanced(&mut self, kernel: &Kernel, _system: &SystemState, _is_new: bool) -> ListenerResult {
        for (object, data) in kernel.heap.iter() {
            let holders: Vec<ThreadId> = kernel
                .all_threads()
                .filter(|thread| thread.held_locks.contains(&object))
                .map(|thread| thread.id)
                .collect();
            if holders.len() > 1 {
                return Err(ListenerError::Violation(format!(
                    "{} is held by {:?}",
                    object, holders
                )));
            }
            if data.monitor.owner != holders.first().copied() {
                return Err(ListenerError::Failure(format!(
                    "monitor of {} is owned by {:?}, threads hold it {:?}",
                    object, data.monitor.owner, holders
                )));
            }
            if !data.monitor.blocked.is_empty() {
                self.contended.set(self.contended.get() + 1);
            }
        }
        self.checked.set(self.checked.get() + 1);
        Ok(())
    }
}

fn machine(demo: Demo, iterations: usize, stop_on_first_finding: bool) -> Machine {
    let mut config = Config::new();
    config.stop_on_first_finding = stop_on_first_finding;
    let size = DemoSize {
        threads: 2,
        iterations,
    };
    demos::machine(demo, &size, config).unwrap()
}

#[test]
fn monitors_are_exclusive_in_every_state() {
    let mut machine = machine(Demo::GuardedCounter, 2, false);
    let listener = MonitorExclusion::default();
    let checked = listener.checked.clone();
    let contended = listener.contended.clone();
    machine.add_listener(Box::new(listener));

    let report = Search::new(machine).run().unwrap();
    assert!(!report.has_findings(), "{}", report);
    assert_eq!(checked.get(), report.statistics.transitions);
    assert!(contended.get() > 0);
}

/// Reports taking a second monitor while holding one as a violation
///
/// Nested `monitorenter`s run within one transition, so this has to look at every instruction
/// rather than at the states in between.
struct NoNestedLocks;

impl Listener for NoNestedLocks {
    fn instruction_executed(
        &mut self,
        _db: &ClassDatabase,
        kernel: &Kernel,
        thread: ThreadId,
        _insn: ExecutedInsn,
    ) -> ListenerResult {
        match kernel
            .thread(thread)
            .ok()
            .filter(|thread| thread.held_locks.len() > 1)
        {
            Some(thread) => Err(ListenerError::Violation(format!(
                "{} holds {} monitors",
                thread.id,
                thread.held_locks.len()
            ))),
            None => Ok(()),
        }
    }
}

#[test]
fn violations_are_findings() {
    let mut machine = machine(Demo::LockOrder, 1, false);
    machine.add_listener(Box::new(NoNestedLocks));

    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    let kinds: Vec<FindingKind> = report.findings.iter().map(|finding| finding.kind).collect();
    assert!(kinds.contains(&FindingKind::Violation));
    assert!(kinds.contains(&FindingKind::Deadlock));
    for finding in &report.findings {
        if let StateStatus::Violation(message) = &finding.status {
            assert!(message.contains("holds 2 monitors"));
        }
    }
}

/// Fails as soon as the first thread is started
struct FailOnStart;

impl Listener for FailOnStart {
    fn vm_event(&mut self, _kernel: &Kernel, event: &VmEvent) -> ListenerResult {
        match event {
            VmEvent::ThreadStateChanged { thread, .. } if *thread != ThreadId::MAIN => {
                Err(ListenerError::Failure(String::from("no threads allowed")))
            }
            _ => Ok(()),
        }
    }
}

#[test]
fn listener_failures_abort_the_search() {
    let mut machine = machine(Demo::RacyCounter, 1, true);
    machine.add_listener(Box::new(FailOnStart));
    match Search::new(machine).run() {
        Err(VmError::Listener(message)) => assert!(message.contains("no threads allowed")),
        other => panic!("unexpected outcome {:?}", other.map(|report| report.complete)),
    }
}

/// Counts hooks, checking that forward and backtrack notifications pair up
#[derive(Default)]
struct Balance {
    depth: Rc<Cell<isize>>,
    deepest: Rc<Cell<isize>>,
}

impl Listener for Balance {
    fn state_advanced(&mut self, _kernel: &Kernel, _system: &SystemState, _is_new: bool) -> ListenerResult {
        self.depth.set(self.depth.get() + 1);
        self.deepest.set(self.deepest.get().max(self.depth.get()));
        Ok(())
    }

    fn state_backtracked(&mut self, _kernel: &Kernel, _system: &SystemState) -> ListenerResult {
        self.depth.set(self.depth.get() - 1);
        if self.depth.get() < 0 {
            return Err(ListenerError::Failure(String::from("backtracked past the root")));
        }
        Ok(())
    }
}

#[test]
fn advance_and_backtrack_notifications_pair_up() {
    let mut machine = machine(Demo::GuardedCounter, 1, false);
    let listener = Balance::default();
    let depth = listener.depth.clone();
    let deepest = listener.deepest.clone();
    machine.add_listener(Box::new(listener));

    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    assert_eq!(depth.get(), 0);
    assert_eq!(deepest.get() as usize, report.statistics.max_depth);
}
