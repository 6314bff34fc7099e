//! State matching
//!
//! A state is identified by a canonical vector of ints: a walk over the threads (with every
//! frame), the heap (with every object's fields and lock record), the static areas, the
//! pending choice frame, and the kind of state (open, end state, or finding), in a fixed order.
//! References are encoded by their heap index. Diagnostic attributes (messages, stack traces) are
//! left out: they never influence execution.
//!
//! The kind of state has to be part of the vector: a thread that dies of an uncaught exception
//! leaves the same threads and heap behind as one that returns normally.

use super::{ChoiceFrame, Config, MatchPolicy, StateStatus, SystemState};
use crate::jvm::Name;
use crate::vm::{Kernel, Monitor, ObjRef, SlotVec, ThreadSet};
use ahash::{AHashMap, RandomState};
use std::hash::{BuildHasher, Hash, Hasher};

/// Builds canonical state vectors
#[derive(Default)]
struct Canonicalizer {
    out: Vec<i32>,
}

impl Canonicalizer {
    fn int(&mut self, value: i32) {
        self.out.push(value);
    }

    fn len(&mut self, len: usize) {
        self.out.push(len as i32);
    }

    fn reference(&mut self, reference: Option<ObjRef>) {
        self.out.push(ObjRef::to_word(reference));
    }

    fn references(&mut self, references: &[ObjRef]) {
        self.len(references.len());
        for reference in references {
            self.reference(Some(*reference));
        }
    }

    /// Words, then reference tags packed 32 to an int
    fn slots(&mut self, slots: &SlotVec) {
        self.len(slots.len());
        self.out.extend_from_slice(slots.words());
        for chunk in slots.ref_tags().chunks(32) {
            let packed = chunk
                .iter()
                .enumerate()
                .fold(0u32, |acc, (idx, tag)| acc | ((*tag as u32) << idx));
            self.int(packed as i32);
        }
    }

    fn thread_set(&mut self, set: &ThreadSet) {
        let (bits, overflow) = set.bits();
        self.int(bits as i32);
        self.int((bits >> 32) as i32);
        self.int(overflow as i32);
    }

    fn monitor(&mut self, monitor: &Monitor) {
        self.int(monitor.owner.map_or(-1, |owner| owner.0 as i32));
        self.int(monitor.count as i32);
        self.len(monitor.blocked.len());
        self.out
            .extend(monitor.blocked.iter().map(|thread| thread.0 as i32));
        self.len(monitor.waiting.len());
        self.out
            .extend(monitor.waiting.iter().map(|thread| thread.0 as i32));
    }

    fn kernel(&mut self, kernel: &Kernel) {
        self.len(kernel.threads.len());
        for thread in kernel.all_threads() {
            self.int(thread.id.0 as i32);
            self.int(thread.state.code());
            self.reference(Some(thread.thread_object));
            self.reference(thread.blocked_on);
            self.int(thread.lock_count as i32);
            self.int(thread.interrupted as i32);
            self.reference(thread.pending_exception);
            self.references(&thread.held_locks);
            self.len(thread.frames.len());
            for frame in &thread.frames {
                self.int(frame.method.0 as i32);
                self.int(frame.pc.0 as i32);
                self.reference(frame.lock);
                self.int(frame.direct as i32);
                self.int(frame.call_done as i32);
                self.slots(&frame.locals);
                self.slots(&frame.stack);
            }
        }

        self.len(kernel.heap.count());
        for (reference, object) in kernel.heap.iter() {
            self.reference(Some(reference));
            self.int(object.class.0 as i32);
            self.int(object.array_length.map_or(-1, |len| len as i32));
            self.slots(&object.fields);
            self.monitor(&object.monitor);
            self.thread_set(&object.accessed_by);
        }
        let meta = kernel.heap.meta();
        let interned: Vec<ObjRef> = meta.interned.values().copied().collect();
        self.references(&interned);
        self.len(meta.pinned.len());
        for (reference, count) in &meta.pinned {
            self.reference(Some(*reference));
            self.int(*count as i32);
        }

        for area in kernel.statics.iter() {
            self.int(area.class.0 as i32);
            self.int(area.status.code());
            self.reference(Some(area.class_object));
            self.slots(&area.fields);
            self.thread_set(&area.accessed_by);
        }
    }

    fn status(&mut self, status: &StateStatus) {
        match status {
            StateStatus::Open => self.int(0),
            StateStatus::EndState => self.int(1),
            StateStatus::Deadlock(_) => self.int(2),
            StateStatus::Uncaught(uncaught) => {
                self.int(3);
                self.int(uncaught.thread.0 as i32);
                let class = uncaught.class.as_str().as_bytes();
                self.len(class.len());
                self.out.extend(class.iter().map(|byte| *byte as i32));
            }
            StateStatus::Violation(_) => self.int(4),
            StateStatus::Ignored => self.int(5),
        }
    }

    /// The pending choice frame, without its cursors
    fn choice_frame(&mut self, frame: &ChoiceFrame) {
        self.len(frame.generators().len());
        for generator in frame.generators() {
            let origin = generator.origin();
            self.int(generator.kind().code() as i32);
            self.int(origin.thread.0 as i32);
            self.int(origin.method.map_or(-1, |method| method.0 as i32));
            self.int(origin.pc.0 as i32);
            let codes = generator.choice_codes();
            self.len(codes.len());
            self.out.extend(codes);
        }
    }
}

/// Canonical vector of the current state
pub fn canonical_state(kernel: &Kernel, system: &SystemState) -> Vec<i32> {
    let mut canonicalizer = Canonicalizer::default();
    canonicalizer.kernel(kernel);
    canonicalizer.int(system.atomic.level as i32);
    canonicalizer.int(system.atomic.thread.map_or(-1, |thread| thread.0 as i32));
    match system.choices.top() {
        Some(frame) if system.status.is_open() => canonicalizer.choice_frame(frame),
        _ => canonicalizer.len(0),
    }
    canonicalizer.status(&system.status);
    canonicalizer.out
}

/// Set of visited states, assigning dense ids in order of discovery
#[derive(Debug)]
pub struct StateSet {
    policy: MatchPolicy,
    exact: AHashMap<Vec<i32>, usize>,
    fingerprints: AHashMap<u64, usize>,
    hasher: RandomState,
}

impl StateSet {
    pub fn new(config: &Config) -> StateSet {
        StateSet {
            policy: config.state_matching,
            exact: AHashMap::new(),
            fingerprints: AHashMap::new(),
            // Fixed seeds: fingerprints are the same on every run
            hasher: RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
        }
    }

    pub fn len(&self) -> usize {
        match self.policy {
            MatchPolicy::FullCompare => self.exact.len(),
            MatchPolicy::HashOnly => self.fingerprints.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn fingerprint(&self, state: &[i32]) -> u64 {
        let mut hasher = self.hasher.build_hasher();
        state.hash(&mut hasher);
        hasher.finish()
    }

    /// Record a state, returning its id and whether it was seen for the first time
    pub fn add(&mut self, state: Vec<i32>) -> (usize, bool) {
        let next_id = self.len();
        match self.policy {
            MatchPolicy::FullCompare => match self.exact.get(&state) {
                Some(id) => (*id, false),
                None => {
                    self.exact.insert(state, next_id);
                    (next_id, true)
                }
            },
            MatchPolicy::HashOnly => {
                let fingerprint = self.fingerprint(&state);
                match self.fingerprints.get(&fingerprint) {
                    Some(id) => (*id, false),
                    None => {
                        self.fingerprints.insert(fingerprint, next_id);
                        (next_id, true)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mc::{ChoiceGenerator, Origin, SchedulingPoint};
    use crate::jvm::BinaryName;
    use crate::vm::test_support::kernel_with_threads;
    use crate::vm::UncaughtException;

    fn system(kernel: &Kernel) -> SystemState {
        let runnable = kernel.all_threads().map(|thread| thread.id).collect();
        SystemState::new(ChoiceFrame::new(ChoiceGenerator::threads(
            SchedulingPoint::Root,
            Origin::root(),
            runnable,
        )))
    }

    #[test]
    fn equal_states_match() {
        for policy in [MatchPolicy::FullCompare, MatchPolicy::HashOnly] {
            let mut config = Config::new();
            config.state_matching = policy;
            let mut states = StateSet::new(&config);

            let (mut kernel, object, [t1, _]) = kernel_with_threads();
            let system = system(&kernel);
            let initial = canonical_state(&kernel, &system);
            assert_eq!(states.add(initial.clone()), (0, true));

            kernel.lock(t1, object, 1).unwrap();
            let locked = canonical_state(&kernel, &system);
            assert_ne!(initial, locked);
            assert_eq!(states.add(locked), (1, true));

            kernel.unlock(t1, object).unwrap();
            kernel.events.clear();
            assert_eq!(canonical_state(&kernel, &system), initial);
            assert_eq!(states.add(initial), (0, false));
            assert_eq!(states.len(), 2);
        }
    }

    #[test]
    fn uncaught_exception_is_not_an_end_state() {
        let (kernel, _, [t1, _]) = kernel_with_threads();
        let mut system = system(&kernel);
        system.status = StateStatus::EndState;
        let ended = canonical_state(&kernel, &system);

        system.status = StateStatus::Uncaught(UncaughtException {
            thread: t1,
            class: BinaryName::ARITHMETICEXCEPTION,
            message: Some(String::from("/ by zero")),
            stack_trace: vec![],
        });
        let uncaught = canonical_state(&kernel, &system);
        assert_ne!(ended, uncaught);

        // Diagnostics do not split states
        if let StateStatus::Uncaught(uncaught) = &mut system.status {
            uncaught.message = None;
        }
        assert_eq!(canonical_state(&kernel, &system), uncaught);
    }

    #[test]
    fn tags_distinguish_null_from_zero() {
        let mut int_slots = SlotVec::new();
        int_slots.push_word(0, false);
        let mut ref_slots = SlotVec::new();
        ref_slots.push_word(0, true);

        let mut a = Canonicalizer::default();
        a.slots(&int_slots);
        let mut b = Canonicalizer::default();
        b.slots(&ref_slots);
        assert_ne!(a.out, b.out);
    }
}
