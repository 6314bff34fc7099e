//! Choice generators
//!
//! A [`ChoiceGenerator`] is one nondeterministic decision: which thread runs next, which value
//! `Verify.getInt` returns, which waiter `notify` wakes. It enumerates a fixed, ordered list of
//! choices with a cursor, so that the search can come back to it after backtracking and take the
//! next alternative.
//!
//! When an instruction asks for a second decision while being re-executed with the value of a
//! first one, the second generator is "cascaded" under the first. The generators of one state
//! are grouped in a [`ChoiceFrame`], which advances like an odometer: the last (innermost)
//! generator moves fastest, and advancing a parent drops its children so they get registered
//! afresh (and fully re-iterate) under the new parent choice. This yields the parent-major
//! cross product.

use crate::jvm::class_graph::MethodId;
use crate::jvm::code::Pc;
use crate::vm::ThreadId;
use std::fmt;

/// Kind of decision
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ChoiceKind {
    Threads,
    Ints,
    Bools,
    Notify,
}

impl ChoiceKind {
    pub fn code(self) -> u8 {
        match self {
            ChoiceKind::Threads => 0,
            ChoiceKind::Ints => 1,
            ChoiceKind::Bools => 2,
            ChoiceKind::Notify => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<ChoiceKind> {
        match code {
            0 => Some(ChoiceKind::Threads),
            1 => Some(ChoiceKind::Ints),
            2 => Some(ChoiceKind::Bools),
            3 => Some(ChoiceKind::Notify),
            _ => None,
        }
    }
}

impl fmt::Display for ChoiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChoiceKind::Threads => "threads",
            ChoiceKind::Ints => "ints",
            ChoiceKind::Bools => "bools",
            ChoiceKind::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// Instruction where a decision was requested
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Origin {
    pub thread: ThreadId,

    /// Absent for the initial scheduling decision
    pub method: Option<MethodId>,
    pub pc: Pc,
}

impl Origin {
    /// Origin of the initial decision
    pub fn root() -> Origin {
        Origin {
            thread: ThreadId::MAIN,
            method: None,
            pc: Pc::ZERO,
        }
    }
}

/// One choice
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ChoiceValue {
    Thread(ThreadId),
    Int(i32),
    Bool(bool),
}

impl fmt::Display for ChoiceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChoiceValue::Thread(thread) => write!(f, "{}", thread),
            ChoiceValue::Int(i) => write!(f, "{}", i),
            ChoiceValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Why the running thread offers the scheduler a chance to switch threads
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum SchedulingPoint {
    /// Initial decision (only the main thread exists)
    Root,
    Start,
    Lock,
    SharedAccess,
    Yield,
    Sleep,

    /// The running thread blocked or started waiting
    Blocked,
    Terminate,
}

/// Decision requested by an instruction
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ChoiceRequest {
    /// Let the scheduler pick among the runnable threads
    Threads(SchedulingPoint),

    /// Pick one of these ints (`Verify.getInt`)
    Ints(Vec<i32>),

    /// Pick `false` or `true` (`Verify.getBoolean`)
    Bools,

    /// Pick which of these waiters `notify` wakes
    Notify(Vec<ThreadId>),
}

impl ChoiceRequest {
    pub fn kind(&self) -> ChoiceKind {
        match self {
            ChoiceRequest::Threads(_) => ChoiceKind::Threads,
            ChoiceRequest::Ints(_) => ChoiceKind::Ints,
            ChoiceRequest::Bools => ChoiceKind::Bools,
            ChoiceRequest::Notify(_) => ChoiceKind::Notify,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
enum Choices {
    Threads(Vec<ThreadId>),
    Ints(Vec<i32>),
    Bools,
    Notify(Vec<ThreadId>),
}

/// Enumerable, replayable source of one decision
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ChoiceGenerator {
    origin: Origin,
    choices: Choices,

    /// Scheduling point, for thread choices
    point: Option<SchedulingPoint>,

    /// Index of the current choice (`None` before the first advance)
    cursor: Option<usize>,
}

impl ChoiceGenerator {
    /// Choice among runnable threads
    pub fn threads(point: SchedulingPoint, origin: Origin, runnable: Vec<ThreadId>) -> ChoiceGenerator {
        ChoiceGenerator {
            origin,
            choices: Choices::Threads(runnable),
            point: Some(point),
            cursor: None,
        }
    }

    /// Data (or notify) choice for a request; `None` for thread requests
    pub fn data(request: ChoiceRequest, origin: Origin) -> Option<ChoiceGenerator> {
        let choices = match request {
            ChoiceRequest::Threads(_) => return None,
            ChoiceRequest::Ints(ints) => Choices::Ints(ints),
            ChoiceRequest::Bools => Choices::Bools,
            ChoiceRequest::Notify(waiters) => Choices::Notify(waiters),
        };
        Some(ChoiceGenerator {
            origin,
            choices,
            point: None,
            cursor: None,
        })
    }

    pub fn kind(&self) -> ChoiceKind {
        match self.choices {
            Choices::Threads(_) => ChoiceKind::Threads,
            Choices::Ints(_) => ChoiceKind::Ints,
            Choices::Bools => ChoiceKind::Bools,
            Choices::Notify(_) => ChoiceKind::Notify,
        }
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn scheduling_point(&self) -> Option<SchedulingPoint> {
        self.point
    }

    /// Number of choices
    pub fn total(&self) -> usize {
        match &self.choices {
            Choices::Threads(threads) | Choices::Notify(threads) => threads.len(),
            Choices::Ints(ints) => ints.len(),
            Choices::Bools => 2,
        }
    }

    /// Index of the current choice
    pub fn index(&self) -> Option<usize> {
        self.cursor
    }

    pub fn has_more_choices(&self) -> bool {
        self.cursor.map_or(0, |idx| idx + 1) < self.total()
    }

    /// Move to the next choice, returning false if there is none
    pub fn advance(&mut self) -> bool {
        if !self.has_more_choices() {
            return false;
        }
        self.cursor = Some(self.cursor.map_or(0, |idx| idx + 1));
        true
    }

    /// Jump to a specific choice (for replaying)
    pub fn select(&mut self, idx: usize) -> bool {
        if idx >= self.total() {
            return false;
        }
        self.cursor = Some(idx);
        true
    }

    /// Go back to before the first choice
    pub fn reset(&mut self) {
        self.cursor = None;
    }

    pub fn value_at(&self, idx: usize) -> Option<ChoiceValue> {
        match &self.choices {
            Choices::Threads(threads) | Choices::Notify(threads) => {
                threads.get(idx).copied().map(ChoiceValue::Thread)
            }
            Choices::Ints(ints) => ints.get(idx).copied().map(ChoiceValue::Int),
            Choices::Bools if idx < 2 => Some(ChoiceValue::Bool(idx == 1)),
            Choices::Bools => None,
        }
    }

    /// Current choice
    pub fn next_choice(&self) -> Option<ChoiceValue> {
        self.cursor.and_then(|idx| self.value_at(idx))
    }

    /// All choices, encoded as ints (for state vectors)
    pub fn choice_codes(&self) -> Vec<i32> {
        (0..self.total())
            .filter_map(|idx| self.value_at(idx))
            .map(|value| match value {
                ChoiceValue::Thread(thread) => thread.0 as i32,
                ChoiceValue::Int(i) => i,
                ChoiceValue::Bool(b) => b as i32,
            })
            .collect()
    }
}

impl fmt::Display for ChoiceGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.kind())?;
        for idx in 0..self.total() {
            if idx > 0 {
                f.write_str(",")?;
            }
            if Some(idx) == self.cursor {
                f.write_str(">")?;
            }
            if let Some(value) = self.value_at(idx) {
                write!(f, "{}", value)?;
            }
        }
        f.write_str("]")
    }
}

/// Generators registered for one state: a parent and its cascaded children
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChoiceFrame {
    generators: Vec<ChoiceGenerator>,
}

impl ChoiceFrame {
    pub fn new(generator: ChoiceGenerator) -> ChoiceFrame {
        ChoiceFrame {
            generators: vec![generator],
        }
    }

    pub fn generators(&self) -> &[ChoiceGenerator] {
        &self.generators
    }

    pub fn generators_mut(&mut self) -> &mut [ChoiceGenerator] {
        &mut self.generators
    }

    /// Outermost generator
    pub fn root(&self) -> &ChoiceGenerator {
        &self.generators[0]
    }

    /// Generator this one is cascaded under
    pub fn cascaded_parent(&self, idx: usize) -> Option<&ChoiceGenerator> {
        idx.checked_sub(1).and_then(|parent| self.generators.get(parent))
    }

    pub fn has_more_choices(&self) -> bool {
        self.generators.iter().any(ChoiceGenerator::has_more_choices)
    }

    /// Advance to the next combination
    ///
    /// The innermost generator with choices left advances; the ones cascaded under it are
    /// dropped (their domain may depend on the new choice, so they get registered again).
    pub fn advance(&mut self) -> bool {
        match self
            .generators
            .iter()
            .rposition(ChoiceGenerator::has_more_choices)
        {
            None => false,
            Some(idx) => {
                self.generators.truncate(idx + 1);
                self.generators[idx].advance()
            }
        }
    }

    /// Add a cascaded generator, already advanced to its first choice
    pub fn push_cascaded(&mut self, mut generator: ChoiceGenerator) {
        if generator.cursor.is_none() {
            generator.advance();
        }
        self.generators.push(generator);
    }

    /// Drop cascaded children, keeping `len` generators
    pub fn truncate(&mut self, len: usize) {
        self.generators.truncate(len.max(1));
    }

    /// Thread to run in the step following this frame's choice
    ///
    /// This is the innermost thread choice, or the thread that asked for the data choice.
    pub fn running_thread(&self) -> ThreadId {
        self.generators
            .iter()
            .rev()
            .find_map(|generator| match generator.next_choice() {
                Some(ChoiceValue::Thread(thread)) if generator.kind() == ChoiceKind::Threads => {
                    Some(thread)
                }
                _ => None,
            })
            .unwrap_or(self.generators[0].origin.thread)
    }

    /// Current values with their kinds and origins
    pub fn current_values(&self) -> Vec<(ChoiceKind, Origin, ChoiceValue)> {
        self.generators
            .iter()
            .filter_map(|generator| {
                generator
                    .next_choice()
                    .map(|value| (generator.kind(), generator.origin, value))
            })
            .collect()
    }

    /// Is there a generator registered at this instruction?
    pub fn has_origin(&self, origin: Origin) -> bool {
        self.generators
            .iter()
            .any(|generator| generator.origin == origin)
    }
}

/// Choice frames of the states on the current path, outermost first
#[derive(Clone, Debug, Default)]
pub struct ChoiceStack {
    frames: Vec<ChoiceFrame>,
}

impl ChoiceStack {
    pub fn new() -> ChoiceStack {
        ChoiceStack::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn push(&mut self, frame: ChoiceFrame) {
        self.frames.push(frame);
    }

    pub fn top(&self) -> Option<&ChoiceFrame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut ChoiceFrame> {
        self.frames.last_mut()
    }

    pub fn truncate(&mut self, len: usize) -> Vec<ChoiceFrame> {
        if len >= self.frames.len() {
            return vec![];
        }
        self.frames.split_off(len)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChoiceFrame> + '_ {
        self.frames.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn origin(pc: u32) -> Origin {
        Origin {
            thread: ThreadId(1),
            method: Some(MethodId(3)),
            pc: Pc(pc),
        }
    }

    #[test]
    fn generator_enumerates_each_choice_once() {
        let mut cg = ChoiceGenerator::data(ChoiceRequest::Ints(vec![5, 6, 7]), origin(0)).unwrap();
        assert_eq!(cg.next_choice(), None);
        let mut seen = vec![];
        while cg.advance() {
            seen.push(cg.next_choice().unwrap());
        }
        assert_eq!(
            seen,
            vec![ChoiceValue::Int(5), ChoiceValue::Int(6), ChoiceValue::Int(7)]
        );
        assert!(!cg.has_more_choices());

        cg.reset();
        assert!(cg.has_more_choices());
        assert!(cg.select(2));
        assert!(!cg.select(3));
        assert_eq!(format!("{}", cg), "ints [5,6,>7]");
    }

    #[test]
    fn thread_requests_have_no_data_generator() {
        let request = ChoiceRequest::Threads(SchedulingPoint::Yield);
        assert_eq!(request.kind(), ChoiceKind::Threads);
        assert!(ChoiceGenerator::data(request, origin(0)).is_none());
    }

    #[test]
    fn cascade_is_parent_major_cross_product() {
        let parent = ChoiceGenerator::data(ChoiceRequest::Ints(vec![0, 1]), origin(4)).unwrap();
        let mut frame = ChoiceFrame::new(parent);
        let mut seen = vec![];

        while frame.advance() {
            // The child is registered again for every parent choice, like an instruction
            // re-executed with the parent value would
            if frame.generators().len() == 1 {
                let child = ChoiceGenerator::data(ChoiceRequest::Bools, origin(4)).unwrap();
                frame.push_cascaded(child);
            }
            let values: Vec<ChoiceValue> = frame
                .current_values()
                .into_iter()
                .map(|(_, _, value)| value)
                .collect();
            seen.push(values);
        }

        use ChoiceValue::{Bool, Int};
        assert_eq!(
            seen,
            vec![
                vec![Int(0), Bool(false)],
                vec![Int(0), Bool(true)],
                vec![Int(1), Bool(false)],
                vec![Int(1), Bool(true)],
            ]
        );
        assert!(frame.cascaded_parent(1).is_some());
        assert!(frame.cascaded_parent(0).is_none());
    }

    #[test]
    fn running_thread() {
        let threads = ChoiceGenerator::threads(
            SchedulingPoint::Lock,
            origin(2),
            vec![ThreadId(0), ThreadId(2)],
        );
        let mut frame = ChoiceFrame::new(threads);
        frame.advance();
        assert_eq!(frame.running_thread(), ThreadId(0));
        frame.advance();
        assert_eq!(frame.running_thread(), ThreadId(2));

        let data = ChoiceGenerator::data(ChoiceRequest::Bools, origin(2)).unwrap();
        let mut frame = ChoiceFrame::new(data);
        frame.advance();
        assert_eq!(frame.running_thread(), ThreadId(1), "data choices keep their thread");
    }
}
