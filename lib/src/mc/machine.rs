//! The model checker core
//!
//! A [`Machine`] owns the class database, the kernel, and the search-level state, and moves
//! through the state space one transition at a time:
//!
//!   - [`Machine::forward`] takes the next choice of the pending choice frame and runs the chosen
//!     thread until the step ends: a new choice generator is registered, the program ends or
//!     deadlocks, an exception goes uncaught, a listener reports a violation, or the step is
//!     ignored. The resulting state is matched against the states seen so far.
//!
//!   - [`Machine::backtrack`] restores the state before the last transition, so that the next
//!     `forward` explores the next choice from there.
//!
//! The search strategy itself lives outside (see [`super::search`]).

use super::backtrack::{Backtracker, Memento};
use super::scheduler::{thread_choice, Decision};
use super::state_matcher::{canonical_state, StateSet};
use super::{
    AtomicSection, ChoiceFrame, ChoiceGenerator, ChoiceRecord, ChoiceRequest, Config, Listener,
    ListenerError, Notifier, Origin, SchedulingPoint, StateStatus, StepRecord, SystemState, Trace,
    Transition,
};
use crate::jvm::class_graph::{parse_method_descriptor, ClassDatabase, ClassId, ClassSource, MethodId};
use crate::jvm::code::{LinkedInstruction, Pc};
use crate::jvm::{BinaryName, Name, UnqualifiedName};
use crate::vm::{
    ExecutedInsn, InsnOutcome, Interpreter, Kernel, NativeBridge, ObjRef, SlotVec, StackFrame,
    StepState, ThreadId, ThreadState, VmError,
};

pub struct Machine {
    db: ClassDatabase,
    natives: Box<dyn NativeBridge>,
    config: Config,
    kernel: Kernel,
    system: SystemState,
    backtracker: Backtracker,
    states: StateSet,
    notifier: Notifier,

    /// Transitions from the initial state to the current one
    path: Vec<Transition>,
    main_class: ClassId,
}

impl Machine {
    /// Set up the initial state: a main thread about to run `main` of the main class
    ///
    /// `main([Ljava/lang/String;)V` gets an empty array. A static `main()V` is accepted too.
    pub fn new(
        source: impl ClassSource + 'static,
        main_class: &BinaryName,
        natives: Box<dyn NativeBridge>,
        config: Config,
    ) -> Result<Machine, VmError> {
        let db = ClassDatabase::new(source);
        let mut kernel = Kernel::new();

        let thread_class = db.resolve(&BinaryName::THREAD)?;
        let thread_object = kernel.new_object(&db, thread_class);
        let main = kernel.add_thread(thread_object);
        kernel.set_thread_state(main, ThreadState::Runnable)?;

        let class = db
            .resolve(main_class)
            .map_err(|err| VmError::BadEntryPoint(err.to_string()))?;
        let (method, args) = Machine::entry_point(&db, &mut kernel, class)?;
        kernel
            .thread_mut(main)?
            .push_frame(StackFrame::new(db.method(method), args));

        let mut step = StepState::new(main, AtomicSection::default(), false);
        let mut interpreter = Interpreter {
            kernel: &mut kernel,
            db: &db,
            natives: &*natives,
            config: &config,
            step: &mut step,
        };
        if !interpreter.ensure_initialized(class)? {
            log::debug!("{} starts by initializing {}", main, main_class);
        }
        kernel.events.clear();

        let root = ChoiceGenerator::threads(SchedulingPoint::Root, Origin::root(), vec![main]);
        let states = StateSet::new(&config);
        let mut machine = Machine {
            db,
            natives,
            config,
            kernel,
            system: SystemState::new(ChoiceFrame::new(root)),
            backtracker: Backtracker::new(),
            states,
            notifier: Notifier::new(),
            path: vec![],
            main_class: class,
        };
        machine.backtracker.start(&mut machine.kernel);
        machine.match_state();
        Ok(machine)
    }

    fn entry_point(
        db: &ClassDatabase,
        kernel: &mut Kernel,
        class: ClassId,
    ) -> Result<(MethodId, SlotVec), VmError> {
        let is_static_main = |descriptor: &str| -> Result<Option<MethodId>, VmError> {
            let descriptor = parse_method_descriptor(descriptor)?;
            Ok(db
                .find_method(class, &UnqualifiedName::MAIN, &descriptor)
                .filter(|method| db.method(*method).is_static()))
        };

        if let Some(method) = is_static_main("([Ljava/lang/String;)V")? {
            let array_class = db.resolve(&BinaryName::array_of("Ljava/lang/String;"))?;
            let arguments = kernel.new_array(db, array_class, 0);
            let mut args = SlotVec::new();
            args.push_word(ObjRef::to_word(Some(arguments)), true);
            return Ok((method, args));
        }
        if let Some(method) = is_static_main("()V")? {
            return Ok((method, SlotVec::new()));
        }
        Err(VmError::BadEntryPoint(format!(
            "{} has no static main method",
            db.class(class).name
        )))
    }

    pub fn add_listener(&mut self, listener: Box<dyn Listener>) {
        self.notifier.add(listener);
    }

    pub fn db(&self) -> &ClassDatabase {
        &self.db
    }

    pub fn kernel(&self) -> &Kernel {
        &self.kernel
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn system(&self) -> &SystemState {
        &self.system
    }

    pub fn main_class(&self) -> ClassId {
        self.main_class
    }

    /// How the last transition ended
    pub fn status(&self) -> &StateStatus {
        &self.system.status
    }

    /// Was the current state reached for the first time?
    pub fn is_new_state(&self) -> bool {
        self.system.is_new
    }

    pub fn state_id(&self) -> Option<usize> {
        self.system.state_id
    }

    /// Number of transitions on the current path
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// Number of distinct states seen
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn path(&self) -> &[Transition] {
        &self.path
    }

    /// Replayable trace of the current path
    pub fn trace(&self) -> Trace {
        Trace {
            transitions: self.path.clone(),
        }
    }

    /// Run the next transition from the current state
    ///
    /// Returns false (without changing anything) if the current state is an end state, or if
    /// every choice of its pending choice frame has been explored.
    pub fn forward(&mut self) -> Result<bool, VmError> {
        self.forward_with(None)
    }

    /// Go back to the state before the last transition
    ///
    /// Returns false if the current state is the initial one.
    pub fn backtrack(&mut self) -> Result<bool, VmError> {
        let memento = match self.backtracker.pop(&mut self.kernel) {
            Some(memento) => memento,
            None => return Ok(false),
        };
        self.system.choices.truncate(memento.choice_depth);
        let live_origin = self.system.pending_origin();
        if live_origin != memento.origin {
            return Err(VmError::MementoMismatch(format!(
                "memento taken at {:?}, but the pending generator comes from {:?}",
                memento.origin, live_origin
            )));
        }
        self.system.atomic = memento.atomic;
        self.system.state_id = memento.state_id;
        self.system.is_new = false;
        self.system.status = StateStatus::Open;
        self.path.pop();
        log::debug!(
            "Backtracked to state #{} at depth {}",
            memento.state_id.map_or(-1, |id| id as i64),
            self.path.len()
        );
        self.notifier
            .state_backtracked(&self.kernel, &self.system)
            .map_err(abort)?;
        Ok(true)
    }

    /// Re-execute a recorded path from the initial state, forcing every recorded choice
    ///
    /// Returns the status of the final state.
    pub fn replay(&mut self, trace: &Trace) -> Result<StateStatus, VmError> {
        if !self.path.is_empty() {
            return Err(VmError::TraceDiverged {
                transition: 0,
                reason: String::from("replay has to start from the initial state"),
            });
        }
        for (idx, transition) in trace.transitions.iter().enumerate() {
            let diverged = |reason: String| VmError::TraceDiverged {
                transition: idx,
                reason,
            };
            if !self.system.status.is_open() {
                return Err(diverged(format!(
                    "the path already ended ({:?})",
                    self.system.status
                )));
            }
            if !self.forward_with(Some(&transition.choices))? {
                return Err(diverged(String::from("no pending choice")));
            }
            let ran = self.path.last().map(|transition| transition.thread);
            if ran != Some(transition.thread) {
                return Err(diverged(format!(
                    "expected thread {} to run, not {:?}",
                    transition.thread, ran
                )));
            }
        }
        Ok(self.system.status.clone())
    }

    fn forward_with(&mut self, forced: Option<&[ChoiceRecord]>) -> Result<bool, VmError> {
        if !self.system.status.is_open() {
            return Ok(false);
        }
        let (origin, has_more_choices) = match self.system.choices.top() {
            Some(frame) => (frame.root().origin(), frame.has_more_choices()),
            None => return Ok(false),
        };
        if forced.is_none() && !has_more_choices {
            if let Some(frame) = self.system.choices.top() {
                self.notifier
                    .choice_generator_processed(frame.root())
                    .map_err(abort)?;
            }
            return Ok(false);
        }

        let depth = self.system.choices.len();
        self.backtracker.push(
            &mut self.kernel,
            Memento::new(self.system.atomic, depth, self.system.state_id, Some(origin)),
        );

        let transition = self.path.len();
        let frame = self
            .system
            .choices
            .top_mut()
            .ok_or_else(|| VmError::MementoMismatch(String::from("no pending choice frame")))?;
        match forced {
            None => {
                frame.advance();
            }
            Some(records) => {
                frame.truncate(1);
                force(&mut frame.generators_mut()[0], records.first(), transition)?;
            }
        }
        let advanced = frame.generators().last().cloned();
        if let Some(advanced) = advanced {
            self.notifier
                .choice_generator_advanced(&advanced)
                .map_err(abort)?;
        }

        self.run_transition(depth, forced)?;
        Ok(true)
    }

    fn run_transition(
        &mut self,
        depth: usize,
        forced: Option<&[ChoiceRecord]>,
    ) -> Result<(), VmError> {
        let frame = self.executed_frame(depth)?;
        let mut step = StepState::new(
            frame.running_thread(),
            self.system.atomic,
            self.config.record_steps,
        );
        step.choices = frame.current_values();
        log::debug!(
            "Transition #{} runs {} with {:?}",
            self.path.len(),
            step.thread,
            step.choices
        );

        let mut status = self.run_step(&mut step, forced)?;
        if let Some(records) = forced {
            let generators = self.executed_frame(depth)?.generators().len();
            if generators != records.len() && status.is_open() {
                return Err(VmError::TraceDiverged {
                    transition: self.path.len(),
                    reason: format!(
                        "{} choices recorded, {} registered",
                        records.len(),
                        generators
                    ),
                });
            }
        }
        self.system.atomic = step.atomic;

        if self.config.gc_after_transition {
            self.kernel.collect_garbage(&self.db)?;
            if let Some(violation) = self.dispatch_events()? {
                status = violation;
            }
        }

        let choices = self
            .executed_frame(depth)?
            .generators()
            .iter()
            .filter_map(|generator| {
                Some(ChoiceRecord {
                    kind: generator.kind(),
                    origin: generator.origin(),
                    index: generator.index()? as u32,
                    total: generator.total() as u32,
                    value: generator.next_choice()?,
                })
            })
            .collect();
        let steps = step
            .executed
            .take()
            .unwrap_or_default()
            .into_iter()
            .map(|insn| self.step_record(insn))
            .collect();
        self.path.push(Transition {
            thread: step.thread,
            choices,
            steps,
        });

        self.system.status = status;
        self.match_state();
        if let Err(err) = self
            .notifier
            .state_advanced(&self.kernel, &self.system, self.system.is_new)
        {
            self.system.status = listener_status(err)?;
        }
        Ok(())
    }

    /// Execute instructions of the step's thread until the step ends
    fn run_step(
        &mut self,
        step: &mut StepState,
        forced: Option<&[ChoiceRecord]>,
    ) -> Result<StateStatus, VmError> {
        loop {
            let location = self.location(step.thread);
            if let Some(insn) = location {
                if let Err(err) =
                    self.notifier
                        .instruction_executing(&self.db, &self.kernel, step.thread, insn)
                {
                    return listener_status(err);
                }
            }

            let outcome = Interpreter {
                kernel: &mut self.kernel,
                db: &self.db,
                natives: &*self.natives,
                config: &self.config,
                step: &mut *step,
            }
            .execute()?;

            if let Some(violation) = self.dispatch_events()? {
                return Ok(violation);
            }
            if let Some(insn) = location {
                if let Err(err) =
                    self.notifier
                        .instruction_executed(&self.db, &self.kernel, step.thread, insn)
                {
                    return listener_status(err);
                }
            }
            if step.ignored {
                log::debug!("{} ignores the rest of the step", step.thread);
                return Ok(StateStatus::Ignored);
            }

            let ended = match outcome {
                InsnOutcome::Continue => {
                    step.first_insn = false;
                    if step.allocations >= self.config.gc_alloc_threshold {
                        self.kernel.collect_garbage(&self.db)?;
                        step.allocations = 0;
                        if let Some(violation) = self.dispatch_events()? {
                            return Ok(violation);
                        }
                    }
                    None
                }
                InsnOutcome::Choice(ChoiceRequest::Threads(point)) => self.schedule(step, point)?,
                InsnOutcome::Choice(request) => self.data_choice(step, request, forced)?,
                InsnOutcome::Blocked => self.schedule(step, SchedulingPoint::Blocked)?,
                InsnOutcome::Terminated => self.schedule(step, SchedulingPoint::Terminate)?,
                InsnOutcome::Uncaught(uncaught) => {
                    log::info!("{}", uncaught);
                    Some(StateStatus::Uncaught(uncaught))
                }
            };
            if let Some(status) = ended {
                return Ok(status);
            }
        }
    }

    /// Handle a scheduling point: `None` if the thread goes on within the step
    fn schedule(
        &mut self,
        step: &mut StepState,
        point: SchedulingPoint,
    ) -> Result<Option<StateStatus>, VmError> {
        let origin = self.origin(step.thread)?;
        match thread_choice(&self.kernel, &self.config, &step.atomic, point, origin)? {
            Decision::Skip => {
                step.first_insn = true;
                Ok(None)
            }
            Decision::EndState => {
                log::debug!("End state: no thread alive");
                Ok(Some(StateStatus::EndState))
            }
            Decision::Deadlock(threads) => {
                log::info!("Deadlock: no runnable thread among {}", threads.len());
                Ok(Some(StateStatus::Deadlock(threads)))
            }
            Decision::Register(generator) => self.register(generator).map(Some),
        }
    }

    /// Handle a data (or notify) choice: cascade it under the choices of the step if it comes from
    /// the instruction the step was started from, otherwise end the step with it
    fn data_choice(
        &mut self,
        step: &mut StepState,
        request: ChoiceRequest,
        forced: Option<&[ChoiceRecord]>,
    ) -> Result<Option<StateStatus>, VmError> {
        let origin = self.origin(step.thread)?;
        if step.atomic.is_active() {
            return Err(VmError::ChoiceInAtomic {
                thread: step.thread,
                method: origin
                    .method
                    .map(|method| self.db.method_name(method))
                    .unwrap_or_default(),
                pc: origin.pc,
            });
        }
        let generator = ChoiceGenerator::data(request, origin).ok_or_else(|| {
            VmError::BadOperand(String::from("thread choice requested as data choice"))
        })?;

        let transition = self.path.len();
        let frame = self
            .system
            .choices
            .top_mut()
            .ok_or_else(|| VmError::MementoMismatch(String::from("no pending choice frame")))?;
        if !(step.first_insn && frame.has_origin(origin)) {
            return self.register(generator).map(Some);
        }

        let position = frame.generators().len();
        frame.push_cascaded(generator);
        if let Some(records) = forced {
            force(
                &mut frame.generators_mut()[position],
                records.get(position),
                transition,
            )?;
        }
        step.choices = frame.current_values();
        let cascaded = frame.generators()[position].clone();
        log::debug!("Cascaded {} at {:?}", cascaded, origin);

        let notified = self
            .notifier
            .choice_generator_set(&cascaded)
            .and_then(|()| self.notifier.choice_generator_advanced(&cascaded));
        match notified {
            Ok(()) => Ok(None),
            Err(err) => listener_status(err).map(Some),
        }
    }

    /// End the step with a new choice frame
    fn register(&mut self, generator: ChoiceGenerator) -> Result<StateStatus, VmError> {
        log::debug!("New choice generator {}", generator);
        let notified = self.notifier.choice_generator_set(&generator);
        self.system.choices.push(ChoiceFrame::new(generator));
        match notified {
            Ok(()) => Ok(StateStatus::Open),
            Err(err) => listener_status(err),
        }
    }

    /// Hand buffered kernel events to the listeners
    fn dispatch_events(&mut self) -> Result<Option<StateStatus>, VmError> {
        let events = std::mem::take(&mut self.kernel.events);
        match self.notifier.vm_events(&self.kernel, &events) {
            Ok(()) => Ok(None),
            Err(err) => listener_status(err).map(Some),
        }
    }

    fn match_state(&mut self) {
        let state = canonical_state(&self.kernel, &self.system);
        let (id, is_new) = self.states.add(state);
        self.system.state_id = Some(id);
        self.system.is_new = is_new;
        log::debug!(
            "State #{} ({}) at depth {}",
            id,
            if is_new { "new" } else { "visited" },
            self.path.len()
        );
    }

    /// Frame the transition at this depth was taken from
    fn executed_frame(&self, depth: usize) -> Result<&ChoiceFrame, VmError> {
        depth
            .checked_sub(1)
            .and_then(|idx| self.system.choices.iter().nth(idx))
            .ok_or_else(|| VmError::MementoMismatch(format!("no choice frame at depth {}", depth)))
    }

    fn location(&self, thread: ThreadId) -> Option<ExecutedInsn> {
        let frame = self.kernel.thread(thread).ok()?.top_frame()?;
        Some(ExecutedInsn {
            method: frame.method,
            pc: frame.pc,
        })
    }

    /// Origin of a decision requested by the thread (its next instruction, if it has any)
    fn origin(&self, thread: ThreadId) -> Result<Origin, VmError> {
        let frame = self.kernel.thread(thread)?.top_frame();
        Ok(Origin {
            thread,
            method: frame.map(|frame| frame.method),
            pc: frame.map_or(Pc::ZERO, |frame| frame.pc),
        })
    }

    fn step_record(&self, insn: ExecutedInsn) -> StepRecord {
        let instruction = self
            .db
            .method(insn.method)
            .body
            .as_ref()
            .and_then(|body| body.instruction(insn.pc))
            .map_or_else(String::new, |insn| match insn {
                LinkedInstruction::Straight(insn) => format!("{:?}", insn),
                LinkedInstruction::Branch(insn) => format!("{:?}", insn),
            });
        StepRecord {
            method: self.db.method_name(insn.method),
            pc: insn.pc.0,
            instruction,
        }
    }

    /// Name of a class, for reports
    pub fn class_name(&self, class: ClassId) -> &str {
        self.db.class(class).name.as_str()
    }
}

/// Select the recorded choice of a generator being replayed
fn force(
    generator: &mut ChoiceGenerator,
    record: Option<&ChoiceRecord>,
    transition: usize,
) -> Result<(), VmError> {
    let diverged = |reason: String| VmError::TraceDiverged { transition, reason };
    let record = record.ok_or_else(|| diverged(format!("unrecorded choice {}", generator)))?;
    if record.kind != generator.kind()
        || record.origin != generator.origin()
        || record.total as usize != generator.total()
    {
        return Err(diverged(format!(
            "recorded {} choice among {} from {}, found {}",
            record.kind, record.total, record.origin.thread, generator
        )));
    }
    if !generator.select(record.index as usize) {
        return Err(diverged(format!("no choice #{} in {}", record.index, generator)));
    }
    Ok(())
}

/// Listener errors: violations end the branch, failures abort the run
fn listener_status(err: ListenerError) -> Result<StateStatus, VmError> {
    match err {
        ListenerError::Violation(message) => {
            log::info!("Violation: {}", message);
            Ok(StateStatus::Violation(message))
        }
        ListenerError::Failure(message) => Err(VmError::Listener(message)),
    }
}

/// Listener errors outside of transitions abort the run
fn abort(err: ListenerError) -> VmError {
    VmError::Listener(err.to_string())
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("depth", &self.path.len())
            .field("state_id", &self.system.state_id)
            .field("status", &self.system.status)
            .field("states", &self.states.len())
            .finish()
    }
}
