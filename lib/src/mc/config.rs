/// How visited states are remembered
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchPolicy {
    /// Keep every canonical state vector (exact)
    FullCompare,

    /// Keep only 64-bit fingerprints (distinct states may be merged on collision)
    HashOnly,
}

/// Settings of the model checker
#[derive(Clone, Debug)]
pub struct Config {
    pub state_matching: MatchPolicy,

    /// Should a scheduling decision whose only option is the running thread end the step?
    pub break_on_single_choice: bool,

    /// Are field and array accesses on objects (or classes) touched by several threads
    /// scheduling points?
    pub break_on_shared_access: bool,

    /// Are `monitorenter` and synchronized method entry scheduling points?
    pub break_on_lock: bool,

    /// Collect garbage at the end of every transition (before matching the state)
    pub gc_after_transition: bool,

    /// Number of allocations within a step that triggers a collection
    pub gc_alloc_threshold: usize,

    /// Record every executed instruction in transitions
    pub record_steps: bool,

    /// Do not go deeper than this many transitions
    pub max_depth: Option<usize>,

    /// Stop after having seen this many distinct states
    pub max_states: Option<usize>,
    pub stop_on_first_finding: bool,
}

impl Config {
    pub fn new() -> Config {
        Config {
            state_matching: MatchPolicy::FullCompare,
            break_on_single_choice: false,
            break_on_shared_access: true,
            break_on_lock: true,
            gc_after_transition: true,
            gc_alloc_threshold: 1000,
            record_steps: false,
            max_depth: None,
            max_states: None,
            stop_on_first_finding: true,
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config::new()
    }
}
