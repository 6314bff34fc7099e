use jvmc::demos::{self, Demo, DemoSize};
use jvmc::jvm::Name;
use jvmc::mc::{Config, FindingKind, Report, Search, StateStatus};
use jvmc::vm::ThreadState;

fn check(demo: Demo, threads: usize, iterations: usize, config: Config) -> Report {
    let size = DemoSize {
        threads,
        iterations,
    };
    let machine = demos::machine(demo, &size, config).unwrap();
    Search::new(machine).run().unwrap()
}

fn exhaustive() -> Config {
    let mut config = Config::new();
    config.stop_on_first_finding = false;
    config
}

#[test]
fn guarded_counter_never_loses_updates() {
    let report = check(Demo::GuardedCounter, 2, 3, exhaustive());
    assert!(report.complete);
    assert!(!report.has_findings(), "{}", report);
    assert!(report.statistics.end_states >= 1);
    assert!(report.statistics.visited_states > 0);
}

#[test]
fn guarded_counter_with_three_workers() {
    let report = check(Demo::GuardedCounter, 3, 1, exhaustive());
    assert!(report.complete);
    assert!(!report.has_findings(), "{}", report);
}

#[test]
#[ignore = "explores every interleaving of two thousand increments"]
fn guarded_counter_thousand_iterations() {
    let mut config = exhaustive();
    config.state_matching = jvmc::mc::MatchPolicy::HashOnly;
    let report = check(Demo::GuardedCounter, 2, 1000, config);
    assert!(report.complete);
    assert!(!report.has_findings(), "{}", report);
}

#[test]
fn racy_counter_loses_an_update() {
    let report = check(Demo::RacyCounter, 2, 2, Config::new());
    assert!(!report.complete);
    assert_eq!(report.findings.len(), 1);

    let finding = &report.findings[0];
    assert_eq!(finding.kind, FindingKind::UncaughtException);
    assert!(!finding.trace.is_empty());
    assert_eq!(finding.depth, finding.trace.len());
    match &finding.status {
        StateStatus::Uncaught(uncaught) => {
            assert_eq!(uncaught.class.as_str(), "java/lang/AssertionError");
            assert_eq!(uncaught.message.as_deref(), Some("counter lost an update"));
            assert!(uncaught.stack_trace[0].contains("demo/Main.main"));
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn racy_counter_findings_are_all_lost_updates() {
    let report = check(Demo::RacyCounter, 2, 1, exhaustive());
    assert!(report.complete);
    assert!(report.has_findings());
    assert!(report
        .findings
        .iter()
        .all(|finding| finding.kind == FindingKind::UncaughtException));

    // Interleavings where the increments do not overlap still end normally
    assert!(report.statistics.end_states >= 1);
}

#[test]
fn lock_order_deadlocks() {
    let report = check(Demo::LockOrder, 2, 1, Config::new());
    assert_eq!(report.findings.len(), 1);

    let finding = &report.findings[0];
    assert_eq!(finding.kind, FindingKind::Deadlock);
    assert!(finding.depth < 20);

    let threads = match &finding.status {
        StateStatus::Deadlock(threads) => threads,
        other => panic!("unexpected status {:?}", other),
    };
    let blocked: Vec<_> = threads
        .iter()
        .filter(|thread| thread.state == ThreadState::Blocked)
        .collect();
    assert_eq!(blocked.len(), 2);
    let (first, second) = (blocked[0], blocked[1]);
    assert_eq!(first.held_locks.len(), 1);
    assert_eq!(second.held_locks.len(), 1);
    assert_eq!(first.blocked_on, Some(second.held_locks[0]));
    assert_eq!(second.blocked_on, Some(first.held_locks[0]));

    // `main` is stuck joining
    assert!(threads
        .iter()
        .any(|thread| thread.state == ThreadState::Waiting && thread.held_locks.is_empty()));
}

#[test]
fn lost_notify_is_a_deadlock() {
    let report = check(Demo::LostNotify, 1, 1, Config::new());
    assert_eq!(report.findings.len(), 1);
    assert_eq!(report.findings[0].kind, FindingKind::Deadlock);
}

#[test]
fn lost_notify_with_two_waiters() {
    let report = check(Demo::LostNotify, 2, 1, exhaustive());
    assert!(report.complete);
    assert!(report
        .findings
        .iter()
        .all(|finding| finding.kind == FindingKind::Deadlock));
    assert!(report.has_findings());

    // Both waiters can be waiting before main notifies
    assert!(report.statistics.end_states >= 1);
}

#[test]
fn data_choice_divides_by_zero() {
    let report = check(Demo::DataChoice, 1, 2, exhaustive());
    assert!(report.complete);
    assert_eq!(report.findings.len(), 1);
    match &report.findings[0].status {
        StateStatus::Uncaught(uncaught) => {
            assert_eq!(uncaught.class.as_str(), "java/lang/ArithmeticException")
        }
        other => panic!("unexpected status {:?}", other),
    }

    // x = 0 with the boolean set is pruned
    assert_eq!(report.statistics.ignored_states, 1);

    // x = 0, 1, 2 without the boolean, and x = 1 with it, all end in the same state
    assert_eq!(report.statistics.end_states, 1);
    assert!(report.statistics.visited_states >= 3);
}

#[test]
fn depth_bound_stops_exploration() {
    let mut config = exhaustive();
    config.max_depth = Some(2);
    let report = check(Demo::RacyCounter, 2, 2, config);
    assert!(report.statistics.max_depth <= 2);
    assert!(!report.has_findings());
}

#[test]
fn hash_only_matches_full_compare() {
    let full = check(Demo::GuardedCounter, 2, 2, exhaustive());
    let mut config = exhaustive();
    config.state_matching = jvmc::mc::MatchPolicy::HashOnly;
    let hashed = check(Demo::GuardedCounter, 2, 2, config);
    assert_eq!(full.statistics, hashed.statistics);
}
