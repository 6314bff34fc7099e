//! Depth-first search driver
//!
//! The search goes forward as long as it reaches new, open states (and stays within the depth
//! bound), and backtracks otherwise. Findings (uncaught exceptions, deadlocks, listener
//! violations) end their branch and are collected with the trace that leads to them.

use super::{Machine, StateStatus, Trace};
use crate::vm::VmError;
use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FindingKind {
    UncaughtException,
    Deadlock,
    Violation,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FindingKind::UncaughtException => "uncaught exception",
            FindingKind::Deadlock => "deadlock",
            FindingKind::Violation => "property violation",
        })
    }
}

/// Verification finding, with the path that leads to it
#[derive(Clone, Debug)]
pub struct Finding {
    pub kind: FindingKind,

    /// Status of the state where the finding was made (this carries the unwound stack trace of
    /// an uncaught exception, or the threads of a deadlock)
    pub status: StateStatus,
    pub trace: Trace,
    pub depth: usize,
}

impl Finding {
    fn new(status: StateStatus, trace: Trace) -> Option<Finding> {
        let kind = match &status {
            StateStatus::Uncaught(_) => FindingKind::UncaughtException,
            StateStatus::Deadlock(_) => FindingKind::Deadlock,
            StateStatus::Violation(_) => FindingKind::Violation,
            _ => return None,
        };
        Some(Finding {
            kind,
            status,
            depth: trace.len(),
            trace,
        })
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at depth {}", self.kind, self.depth)?;
        match &self.status {
            StateStatus::Uncaught(uncaught) => write!(f, "\n{}", uncaught),
            StateStatus::Deadlock(threads) => {
                for thread in threads {
                    write!(f, "\n\t{}", thread)?;
                }
                Ok(())
            }
            StateStatus::Violation(message) => write!(f, ": {}", message),
            _ => Ok(()),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Distinct states reached (including the initial state)
    pub new_states: usize,

    /// Transitions that led to an already visited state
    pub visited_states: usize,
    pub end_states: usize,
    pub ignored_states: usize,
    pub max_depth: usize,
    pub transitions: usize,
    pub backtracks: usize,
}

/// Outcome of a search
#[derive(Clone, Debug)]
pub struct Report {
    pub statistics: Statistics,
    pub findings: Vec<Finding>,

    /// Was the whole (depth-bounded) state space explored?
    pub complete: bool,
}

impl Report {
    pub fn has_findings(&self) -> bool {
        !self.findings.is_empty()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = &self.statistics;
        writeln!(
            f,
            "search {}",
            if self.complete { "complete" } else { "stopped" }
        )?;
        writeln!(
            f,
            "  states:      {} new, {} visited, {} end, {} ignored",
            stats.new_states, stats.visited_states, stats.end_states, stats.ignored_states
        )?;
        writeln!(
            f,
            "  transitions: {} ({} backtracks, max depth {})",
            stats.transitions, stats.backtracks, stats.max_depth
        )?;
        write!(f, "  findings:    {}", self.findings.len())?;
        for finding in &self.findings {
            write!(f, "\n{}", finding)?;
        }
        Ok(())
    }
}

/// Depth-first exploration of a machine's state space
#[derive(Debug)]
pub struct Search {
    machine: Machine,
    statistics: Statistics,
    findings: Vec<Finding>,
}

impl Search {
    pub fn new(machine: Machine) -> Search {
        Search {
            machine,
            statistics: Statistics {
                new_states: 1,
                ..Statistics::default()
            },
            findings: vec![],
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn into_machine(self) -> Machine {
        self.machine
    }

    /// Run the search to completion (or until a limit or the first finding, as configured)
    pub fn run(&mut self) -> Result<Report, VmError> {
        let max_depth = self.machine.config().max_depth;
        let max_states = self.machine.config().max_states;
        let stop_on_first_finding = self.machine.config().stop_on_first_finding;
        log::info!("Starting search");

        let mut complete = true;
        loop {
            if self.machine.forward()? {
                let stats = &mut self.statistics;
                stats.transitions += 1;
                stats.max_depth = stats.max_depth.max(self.machine.depth());
                let is_new = self.machine.is_new_state();
                if is_new {
                    stats.new_states += 1;
                } else {
                    stats.visited_states += 1;
                }

                let mut explore = is_new;
                match self.machine.status() {
                    StateStatus::Open => {}
                    StateStatus::EndState => {
                        explore = false;
                        if is_new {
                            stats.end_states += 1;
                        }
                    }
                    StateStatus::Ignored => {
                        explore = false;
                        stats.ignored_states += 1;
                    }
                    status => {
                        explore = false;
                        if is_new {
                            if let Some(finding) =
                                Finding::new(status.clone(), self.machine.trace())
                            {
                                log::info!("Found {}", finding.kind);
                                self.findings.push(finding);
                                if stop_on_first_finding {
                                    complete = false;
                                    break;
                                }
                            }
                        }
                    }
                }

                if max_states.map_or(false, |max| self.machine.state_count() >= max) {
                    log::info!("Reached the state limit");
                    complete = false;
                    break;
                }
                let within_depth = max_depth.map_or(true, |max| self.machine.depth() < max);
                if explore && within_depth {
                    continue;
                }
            }

            if !self.machine.backtrack()? {
                break;
            }
            self.statistics.backtracks += 1;
        }

        log::info!(
            "Search done: {} states, {} findings",
            self.machine.state_count(),
            self.findings.len()
        );
        Ok(Report {
            statistics: self.statistics,
            findings: self.findings.clone(),
            complete,
        })
    }
}
