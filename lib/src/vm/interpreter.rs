//! Instruction semantics
//!
//! [`Interpreter::execute`] runs exactly one instruction of the thread scheduled for the current
//! step. Most instructions just transform the top frame. The ones that may depend on other
//! threads (locking, accesses to shared objects, thread operations) can instead end the step by
//! requesting a choice. They do that _before_ having any effect, and leave the program counter
//! where it is: once the model checker has made the decision, the same instruction executes
//! again, this time as the first instruction of the new step.
//!
//! Instructions that need a class initialized first push the `<clinit>` frames and also leave the
//! program counter alone, so that they get executed again once initialization is done.

use super::{
    Kernel, NativeBridge, ObjRef, StackFrame, ThreadId, UncaughtException, Value, VmError,
};
use crate::jvm::class_graph::{ArrayComponent, ClassDatabase, ClassId, FieldData, MethodId};
use crate::jvm::code::{
    BranchInstruction, CompareMode, ConstantData, FieldRef, Instruction, LinkedInstruction, Pc,
    ShiftType,
};
use crate::jvm::{BaseType, BinaryName, FieldType, Name, RefType};
use crate::mc::{
    AtomicSection, ChoiceKind, ChoiceRequest, ChoiceValue, Config, Origin, SchedulingPoint,
};
use crate::util::Width;

/// Result of executing one instruction
#[derive(Clone, Debug, PartialEq)]
pub enum InsnOutcome {
    /// The thread can go on with its next instruction
    Continue,

    /// The step has to end with a decision (the requesting instruction runs again afterwards,
    /// unless it has already completed)
    Choice(ChoiceRequest),

    /// The thread cannot go on (blocked on a monitor or waiting)
    Blocked,

    /// The last frame of the thread returned
    Terminated,

    /// An exception reached the bottom of the thread's stack
    Uncaught(UncaughtException),
}

/// Instruction executed during a step
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExecutedInsn {
    pub method: MethodId,
    pub pc: Pc,
}

/// Context of the step being executed, shared between the model checker and the engine
#[derive(Clone, Debug)]
pub struct StepState {
    /// Thread scheduled for the step
    pub thread: ThreadId,

    /// Is the next instruction the first of the step?
    ///
    /// This is also set when an instruction is executed again right after its scheduling choice
    /// was skipped, since the decision has been taken by then.
    pub first_insn: bool,

    /// Choices that led to this step (or were cascaded into it), with their kinds and origins
    pub choices: Vec<(ChoiceKind, Origin, ChoiceValue)>,
    pub atomic: AtomicSection,

    /// Set by `Verify.ignoreIf(true)`
    pub ignored: bool,

    /// Objects allocated since the last collection
    pub allocations: usize,

    /// Executed instructions, when recording them
    pub executed: Option<Vec<ExecutedInsn>>,
}

impl StepState {
    pub fn new(thread: ThreadId, atomic: AtomicSection, record_steps: bool) -> StepState {
        StepState {
            thread,
            first_insn: true,
            choices: vec![],
            atomic,
            ignored: false,
            allocations: 0,
            executed: if record_steps { Some(vec![]) } else { None },
        }
    }
}

/// How control continues after an instruction
#[derive(Debug)]
pub(super) enum Flow {
    /// Go on to the next instruction
    Next,

    /// Go on at a branch target
    Jump(Pc),

    /// Leave the program counters alone (a frame was pushed or popped, a handler was entered, or
    /// the instruction has to run again)
    Stay,

    /// Stop with this outcome, leaving the program counter alone
    Yield(InsnOutcome),
}

/// Early exit from an instruction
#[derive(Debug)]
pub(super) enum Exit {
    /// The instruction is over (eg. it threw, or has to wait for an initializer)
    Flow(Flow),
    Error(VmError),
}

impl From<VmError> for Exit {
    fn from(err: VmError) -> Exit {
        Exit::Error(err)
    }
}

pub(super) type Exec<T> = Result<T, Exit>;

/// Executes instructions of one thread against the kernel
pub struct Interpreter<'a> {
    pub kernel: &'a mut Kernel,
    pub db: &'a ClassDatabase,
    pub natives: &'a dyn NativeBridge,
    pub config: &'a Config,
    pub step: &'a mut StepState,
}

impl<'a> Interpreter<'a> {
    /// Execute the next instruction of the step's thread
    pub fn execute(&mut self) -> Result<InsnOutcome, VmError> {
        self.kernel.cancel_block(self.step.thread)?;
        let (method_id, pc) = self.location()?;
        let db = self.db;
        let insn = db
            .method(method_id)
            .body
            .as_ref()
            .and_then(|body| body.instruction(pc))
            .ok_or_else(|| {
                VmError::BadOperand(format!(
                    "no instruction at {}@{}",
                    db.method_name(method_id),
                    pc
                ))
            })?;
        log::trace!("{} {}@{}: {:?}", self.step.thread, db.method_name(method_id), pc, insn);
        if let Some(executed) = self.step.executed.as_mut() {
            executed.push(ExecutedInsn {
                method: method_id,
                pc,
            });
        }

        let flow = match insn {
            LinkedInstruction::Straight(insn) => self.straight(insn),
            LinkedInstruction::Branch(insn) => self.branch(insn),
        };
        let flow = match flow {
            Ok(flow) | Err(Exit::Flow(flow)) => flow,
            Err(Exit::Error(err)) => return Err(err),
        };
        match flow {
            Flow::Next => {
                self.frame()?.pc = pc.next();
                Ok(InsnOutcome::Continue)
            }
            Flow::Jump(target) => {
                self.frame()?.pc = target;
                Ok(InsnOutcome::Continue)
            }
            Flow::Stay => Ok(InsnOutcome::Continue),
            Flow::Yield(outcome) => Ok(outcome),
        }
    }

    /// Method and program counter of the instruction about to execute
    pub fn location(&self) -> Result<(MethodId, Pc), VmError> {
        let thread = self.step.thread;
        self.kernel
            .thread(thread)?
            .top_frame()
            .map(|frame| (frame.method, frame.pc))
            .ok_or(VmError::NoFrame(thread))
    }

    /// Origin of a decision requested by the instruction about to execute
    pub fn origin(&self) -> Result<Origin, VmError> {
        let (method, pc) = self.location()?;
        Ok(Origin {
            thread: self.step.thread,
            method: Some(method),
            pc,
        })
    }

    pub(super) fn frame(&mut self) -> Result<&mut StackFrame, VmError> {
        let thread = self.step.thread;
        self.kernel
            .thread_mut(thread)?
            .top_frame_mut()
            .ok_or(VmError::NoFrame(thread))
    }

    /// End the step with a scheduling decision, before the instruction has any effect
    pub(super) fn schedule(point: SchedulingPoint) -> Flow {
        Flow::Yield(InsnOutcome::Choice(ChoiceRequest::Threads(point)))
    }

    /// Record that the running thread touches an object, returning whether the object is shared
    pub(super) fn access_object(&mut self, object: ObjRef) -> Result<bool, VmError> {
        let thread = self.step.thread;
        let accessed_by = &self.kernel.heap.get(object)?.accessed_by;
        if accessed_by.contains(thread) {
            return Ok(accessed_by.is_shared());
        }
        let accessed_by = &mut self.kernel.heap.get_mut(object)?.accessed_by;
        accessed_by.insert(thread);
        Ok(accessed_by.is_shared())
    }

    /// Record that the running thread touches the statics of a class, returning whether they are
    /// shared
    fn access_statics(&mut self, class: ClassId) -> Result<bool, VmError> {
        let thread = self.step.thread;
        let area = self.kernel.static_area(self.db, class)?;
        if !area.accessed_by.contains(thread) {
            area.accessed_by.insert(thread);
        }
        Ok(area.accessed_by.is_shared())
    }

    /// Should an access to a shared location end the step?
    fn breaks_on_access(&self, shared: bool) -> bool {
        shared && self.config.break_on_shared_access && !self.step.first_insn
    }

    /// Should entering a monitor end the step?
    pub(super) fn breaks_on_lock(&self, shared: bool) -> bool {
        shared && self.config.break_on_lock && !self.step.first_insn
    }

    /// Resolve a class, throwing `NoClassDefFoundError` if that fails
    pub(super) fn resolve_class(&mut self, name: &BinaryName) -> Exec<ClassId> {
        match self.db.resolve(name) {
            Ok(class) => Ok(class),
            Err(err) => {
                log::debug!("Resolution failed: {}", err);
                let message = String::from(err.class_name().as_str());
                Err(self.raise(&BinaryName::NOCLASSDEFFOUNDERROR, Some(message)))
            }
        }
    }

    fn resolve_ref_type(&mut self, ref_type: &RefType<BinaryName>) -> Exec<ClassId> {
        self.resolve_class(&ref_type.class_name())
    }

    fn straight(&mut self, insn: &Instruction) -> Exec<Flow> {
        use Instruction::*;

        match insn {
            Nop => Ok(Flow::Next),
            AConstNull => self.push(Value::Ref(None)),
            IConstM1 => self.push(Value::Int(-1)),
            IConst0 => self.push(Value::Int(0)),
            IConst1 => self.push(Value::Int(1)),
            IConst2 => self.push(Value::Int(2)),
            IConst3 => self.push(Value::Int(3)),
            IConst4 => self.push(Value::Int(4)),
            IConst5 => self.push(Value::Int(5)),
            LConst0 => self.push(Value::Long(0)),
            LConst1 => self.push(Value::Long(1)),
            FConst0 => self.push(Value::Float(0.0)),
            FConst1 => self.push(Value::Float(1.0)),
            FConst2 => self.push(Value::Float(2.0)),
            DConst0 => self.push(Value::Double(0.0)),
            DConst1 => self.push(Value::Double(1.0)),
            BiPush(b) => self.push(Value::Int(*b as i32)),
            SiPush(s) => self.push(Value::Int(*s as i32)),
            Ldc(constant) => self.ldc(constant),

            ILoad(idx) | FLoad(idx) | ALoad(idx) => self.load(*idx, 1),
            LLoad(idx) | DLoad(idx) => self.load(*idx, 2),
            IStore(idx) | FStore(idx) | AStore(idx) => self.store(*idx, 1),
            LStore(idx) | DStore(idx) => self.store(*idx, 2),

            IALoad | FALoad | AALoad | BALoad | CALoad | SALoad => self.array_load(1),
            LALoad | DALoad => self.array_load(2),
            IAStore | FAStore | AAStore => self.array_store(1, |_, value| value),
            LAStore | DAStore => self.array_store(2, |_, value| value),
            BAStore => self.array_store(1, |component, value| match component {
                Some(ArrayComponent::Primitive(BaseType::Boolean)) => value & 1,
                _ => value as i8 as i32,
            }),
            CAStore => self.array_store(1, |_, value| value as u16 as i32),
            SAStore => self.array_store(1, |_, value| value as i16 as i32),

            Pop => self.shuffle(1, &[]),
            Pop2 => self.shuffle(2, &[]),
            Dup => self.shuffle(1, &[0, 0]),
            DupX1 => self.shuffle(2, &[0, 1, 0]),
            DupX2 => self.shuffle(3, &[0, 2, 1, 0]),
            Dup2 => self.shuffle(2, &[1, 0, 1, 0]),
            Dup2X1 => self.shuffle(3, &[1, 0, 2, 1, 0]),
            Dup2X2 => self.shuffle(4, &[1, 0, 3, 2, 1, 0]),
            Swap => self.shuffle(2, &[0, 1]),

            IAdd => self.int_op(|a, b| Some(a.wrapping_add(b))),
            ISub => self.int_op(|a, b| Some(a.wrapping_sub(b))),
            IMul => self.int_op(|a, b| Some(a.wrapping_mul(b))),
            IDiv => self.int_op(|a, b| if b == 0 { None } else { Some(a.wrapping_div(b)) }),
            IRem => self.int_op(|a, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) }),
            IAnd => self.int_op(|a, b| Some(a & b)),
            IOr => self.int_op(|a, b| Some(a | b)),
            IXor => self.int_op(|a, b| Some(a ^ b)),
            LAdd => self.long_op(|a, b| Some(a.wrapping_add(b))),
            LSub => self.long_op(|a, b| Some(a.wrapping_sub(b))),
            LMul => self.long_op(|a, b| Some(a.wrapping_mul(b))),
            LDiv => self.long_op(|a, b| if b == 0 { None } else { Some(a.wrapping_div(b)) }),
            LRem => self.long_op(|a, b| if b == 0 { None } else { Some(a.wrapping_rem(b)) }),
            LAnd => self.long_op(|a, b| Some(a & b)),
            LOr => self.long_op(|a, b| Some(a | b)),
            LXor => self.long_op(|a, b| Some(a ^ b)),
            FAdd => self.float_op(|a, b| a + b),
            FSub => self.float_op(|a, b| a - b),
            FMul => self.float_op(|a, b| a * b),
            FDiv => self.float_op(|a, b| a / b),
            FRem => self.float_op(|a, b| a % b),
            DAdd => self.double_op(|a, b| a + b),
            DSub => self.double_op(|a, b| a - b),
            DMul => self.double_op(|a, b| a * b),
            DDiv => self.double_op(|a, b| a / b),
            DRem => self.double_op(|a, b| a % b),
            INeg => {
                let frame = self.frame()?;
                let value = frame.pop_int()?;
                frame.push_int(value.wrapping_neg());
                Ok(Flow::Next)
            }
            LNeg => {
                let frame = self.frame()?;
                let value = frame.pop_long()?;
                frame.push(Value::Long(value.wrapping_neg()));
                Ok(Flow::Next)
            }
            FNeg => {
                let frame = self.frame()?;
                let value = frame.pop_float()?;
                frame.push(Value::Float(-value));
                Ok(Flow::Next)
            }
            DNeg => {
                let frame = self.frame()?;
                let value = frame.pop_double()?;
                frame.push(Value::Double(-value));
                Ok(Flow::Next)
            }
            ISh(shift) => {
                let frame = self.frame()?;
                let amount = (frame.pop_int()? & 0x1f) as u32;
                let value = frame.pop_int()?;
                frame.push_int(match shift {
                    ShiftType::Left => value.wrapping_shl(amount),
                    ShiftType::ArithmeticRight => value.wrapping_shr(amount),
                    ShiftType::LogicalRight => (value as u32).wrapping_shr(amount) as i32,
                });
                Ok(Flow::Next)
            }
            LSh(shift) => {
                let frame = self.frame()?;
                let amount = (frame.pop_int()? & 0x3f) as u32;
                let value = frame.pop_long()?;
                frame.push(Value::Long(match shift {
                    ShiftType::Left => value.wrapping_shl(amount),
                    ShiftType::ArithmeticRight => value.wrapping_shr(amount),
                    ShiftType::LogicalRight => (value as u64).wrapping_shr(amount) as i64,
                }));
                Ok(Flow::Next)
            }
            IInc(idx, delta) => {
                let frame = self.frame()?;
                let idx = *idx as usize;
                let value = frame.locals.word(idx).ok_or_else(|| bad_local(idx))?;
                frame
                    .locals
                    .set_word(idx, value.wrapping_add(*delta as i32), false);
                Ok(Flow::Next)
            }

            I2L | I2F | I2D | I2B | I2C | I2S => {
                let frame = self.frame()?;
                let value = frame.pop_int()?;
                frame.push(match insn {
                    I2L => Value::Long(value as i64),
                    I2F => Value::Float(value as f32),
                    I2D => Value::Double(value as f64),
                    I2B => Value::Int(value as i8 as i32),
                    I2C => Value::Int(value as u16 as i32),
                    _ => Value::Int(value as i16 as i32),
                });
                Ok(Flow::Next)
            }
            L2I | L2F | L2D => {
                let frame = self.frame()?;
                let value = frame.pop_long()?;
                frame.push(match insn {
                    L2I => Value::Int(value as i32),
                    L2F => Value::Float(value as f32),
                    _ => Value::Double(value as f64),
                });
                Ok(Flow::Next)
            }
            // Float to integer casts saturate and map NaN to zero, like the JVM
            F2I | F2L | F2D => {
                let frame = self.frame()?;
                let value = frame.pop_float()?;
                frame.push(match insn {
                    F2I => Value::Int(value as i32),
                    F2L => Value::Long(value as i64),
                    _ => Value::Double(value as f64),
                });
                Ok(Flow::Next)
            }
            D2I | D2L | D2F => {
                let frame = self.frame()?;
                let value = frame.pop_double()?;
                frame.push(match insn {
                    D2I => Value::Int(value as i32),
                    D2L => Value::Long(value as i64),
                    _ => Value::Float(value as f32),
                });
                Ok(Flow::Next)
            }
            LCmp => {
                let frame = self.frame()?;
                let rhs = frame.pop_long()?;
                let lhs = frame.pop_long()?;
                frame.push_int(lhs.cmp(&rhs) as i32);
                Ok(Flow::Next)
            }
            FCmp(mode) => {
                let frame = self.frame()?;
                let rhs = frame.pop_float()? as f64;
                let lhs = frame.pop_float()? as f64;
                frame.push_int(compare_floats(lhs, rhs, *mode));
                Ok(Flow::Next)
            }
            DCmp(mode) => {
                let frame = self.frame()?;
                let rhs = frame.pop_double()?;
                let lhs = frame.pop_double()?;
                frame.push_int(compare_floats(lhs, rhs, *mode));
                Ok(Flow::Next)
            }

            GetStatic(field) => self.get_static(field),
            PutStatic(field) => self.put_static(field),
            GetField(field) => self.get_field(field),
            PutField(field) => self.put_field(field),
            Invoke(kind, method) => self.invoke(*kind, method),

            New(class_name) => {
                let db = self.db;
                let class = self.resolve_class(class_name)?;
                let class_data = db.class(class);
                if class_data.is_interface() || class_data.is_abstract() || class_data.is_array() {
                    let message = format!("cannot instantiate {}", class_name);
                    return Err(self.raise(&BinaryName::INCOMPATIBLECLASSCHANGEERROR, Some(message)));
                }
                self.initialize(class)?;
                let object = self.kernel.new_object(db, class);
                self.step.allocations += 1;
                self.push(Value::Ref(Some(object)))
            }
            NewArray(base_type) => self.new_array(&FieldType::Base(*base_type)),
            ANewArray(ref_type) => self.new_array(&FieldType::Ref(ref_type.clone())),
            ArrayLength => {
                let array = match self.frame()?.pop_ref()? {
                    Some(array) => array,
                    None => return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None)),
                };
                let length = self.array_length(array)?;
                self.push(Value::Int(length as i32))
            }
            CheckCast(ref_type) => {
                let object = match self.frame()?.peek_ref(0)? {
                    Some(object) => object,
                    None => return Ok(Flow::Next),
                };
                let target = self.resolve_ref_type(ref_type)?;
                let class = self.kernel.heap.get(object)?.class;
                if self.db.is_assignable(class, target) {
                    Ok(Flow::Next)
                } else {
                    let message = format!(
                        "{} cannot be cast to {}",
                        self.db.class(class).name,
                        self.db.class(target).name
                    );
                    Err(self.raise(&BinaryName::CLASSCASTEXCEPTION, Some(message)))
                }
            }
            InstanceOf(ref_type) => {
                let object = self.frame()?.peek_ref(0)?;
                let result = match object {
                    None => false,
                    Some(object) => {
                        let target = self.resolve_ref_type(ref_type)?;
                        let class = self.kernel.heap.get(object)?.class;
                        self.db.is_assignable(class, target)
                    }
                };
                let frame = self.frame()?;
                frame.drop_slots(1)?;
                frame.push_int(result as i32);
                Ok(Flow::Next)
            }
            MonitorEnter => {
                let object = match self.frame()?.peek_ref(0)? {
                    Some(object) => object,
                    None => return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None)),
                };
                let shared = self.access_object(object)?;
                if self.breaks_on_lock(shared) {
                    return Ok(Self::schedule(SchedulingPoint::Lock));
                }
                match self.kernel.lock(self.step.thread, object, 1)? {
                    super::LockOutcome::Acquired => {
                        self.frame()?.drop_slots(1)?;
                        Ok(Flow::Next)
                    }
                    super::LockOutcome::Blocked => Ok(Flow::Yield(InsnOutcome::Blocked)),
                }
            }
            MonitorExit => {
                let object = match self.frame()?.pop_ref()? {
                    Some(object) => object,
                    None => return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None)),
                };
                let thread = self.step.thread;
                if !self.kernel.owns_monitor(thread, object)? {
                    return Err(self.raise(&BinaryName::ILLEGALMONITORSTATEEXCEPTION, None));
                }
                self.kernel.unlock(thread, object)?;
                Ok(Flow::Next)
            }
        }
    }

    fn branch(&mut self, insn: &BranchInstruction<Pc, ()>) -> Exec<Flow> {
        use BranchInstruction::*;

        let jump_if = |condition: bool, target: &Pc| {
            if condition {
                Flow::Jump(*target)
            } else {
                Flow::Next
            }
        };
        match insn {
            If(comparison, target, ()) => {
                let value = self.frame()?.pop_int()?;
                Ok(jump_if(comparison.holds(value, 0), target))
            }
            IfICmp(comparison, target, ()) => {
                let frame = self.frame()?;
                let rhs = frame.pop_int()?;
                let lhs = frame.pop_int()?;
                Ok(jump_if(comparison.holds(lhs, rhs), target))
            }
            IfACmp(comparison, target, ()) => {
                let frame = self.frame()?;
                let rhs = frame.pop_ref()?;
                let lhs = frame.pop_ref()?;
                Ok(jump_if(comparison.holds(lhs == rhs), target))
            }
            IfNull(comparison, target, ()) => {
                let value = self.frame()?.pop_ref()?;
                Ok(jump_if(comparison.holds(value.is_none()), target))
            }
            Goto(target) => Ok(Flow::Jump(*target)),
            TableSwitch {
                default,
                low,
                targets,
            } => {
                let value = self.frame()?.pop_int()?;
                let offset = value as i64 - *low as i64;
                let target = if offset >= 0 && (offset as usize) < targets.len() {
                    targets[offset as usize]
                } else {
                    *default
                };
                Ok(Flow::Jump(target))
            }
            LookupSwitch { default, targets } => {
                let value = self.frame()?.pop_int()?;
                let target = targets
                    .iter()
                    .find(|(key, _)| *key == value)
                    .map_or(*default, |(_, target)| *target);
                Ok(Flow::Jump(target))
            }
            IReturn | FReturn | AReturn => self.do_return(1),
            LReturn | DReturn => self.do_return(2),
            Return => self.do_return(0),
            AThrow => match self.frame()?.pop_ref()? {
                Some(exception) => Ok(self.throw(exception)?),
                None => Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None)),
            },
            FallThrough(()) => Ok(Flow::Next),
        }
    }

    fn push(&mut self, value: Value) -> Exec<Flow> {
        self.frame()?.push(value);
        Ok(Flow::Next)
    }

    fn ldc(&mut self, constant: &ConstantData) -> Exec<Flow> {
        let value = match constant {
            ConstantData::Integer(i) => Value::Int(*i),
            ConstantData::Long(l) => Value::Long(*l),
            ConstantData::Float(f) => Value::Float(*f),
            ConstantData::Double(d) => Value::Double(*d),
            ConstantData::String(string) => {
                Value::Ref(Some(self.kernel.intern_string(self.db, string)?))
            }
            ConstantData::Class(ref_type) => {
                let class = self.resolve_ref_type(ref_type)?;
                Value::Ref(Some(self.kernel.class_object(self.db, class)?))
            }
        };
        self.push(value)
    }

    fn load(&mut self, idx: u16, width: usize) -> Exec<Flow> {
        let frame = self.frame()?;
        for slot in idx as usize..idx as usize + width {
            let word = frame.locals.word(slot).ok_or_else(|| bad_local(slot))?;
            let is_ref = frame.locals.is_ref(slot);
            frame.stack.push_word(word, is_ref);
        }
        Ok(Flow::Next)
    }

    fn store(&mut self, idx: u16, width: usize) -> Exec<Flow> {
        let frame = self.frame()?;
        let idx = idx as usize;
        if idx + width > frame.locals.len() {
            return Err(Exit::Error(bad_local(idx + width - 1)));
        }
        for slot in (idx..idx + width).rev() {
            let (word, is_ref) = frame.pop_word()?;
            frame.locals.set_word(slot, word, is_ref);
        }
        Ok(Flow::Next)
    }

    /// Pop `count` words (0 is the top) and push them back in the order given by `pattern`
    fn shuffle(&mut self, count: usize, pattern: &[usize]) -> Exec<Flow> {
        let frame = self.frame()?;
        let mut popped = Vec::with_capacity(count);
        for _ in 0..count {
            popped.push(frame.pop_word()?);
        }
        for idx in pattern {
            let (word, is_ref) = popped[*idx];
            frame.stack.push_word(word, is_ref);
        }
        Ok(Flow::Next)
    }

    fn int_op(&mut self, op: impl FnOnce(i32, i32) -> Option<i32>) -> Exec<Flow> {
        let frame = self.frame()?;
        let rhs = frame.pop_int()?;
        let lhs = frame.pop_int()?;
        match op(lhs, rhs) {
            Some(result) => {
                frame.push_int(result);
                Ok(Flow::Next)
            }
            None => Err(self.raise(
                &BinaryName::ARITHMETICEXCEPTION,
                Some(String::from("/ by zero")),
            )),
        }
    }

    fn long_op(&mut self, op: impl FnOnce(i64, i64) -> Option<i64>) -> Exec<Flow> {
        let frame = self.frame()?;
        let rhs = frame.pop_long()?;
        let lhs = frame.pop_long()?;
        match op(lhs, rhs) {
            Some(result) => {
                frame.push(Value::Long(result));
                Ok(Flow::Next)
            }
            None => Err(self.raise(
                &BinaryName::ARITHMETICEXCEPTION,
                Some(String::from("/ by zero")),
            )),
        }
    }

    fn float_op(&mut self, op: impl FnOnce(f32, f32) -> f32) -> Exec<Flow> {
        let frame = self.frame()?;
        let rhs = frame.pop_float()?;
        let lhs = frame.pop_float()?;
        frame.push(Value::Float(op(lhs, rhs)));
        Ok(Flow::Next)
    }

    fn double_op(&mut self, op: impl FnOnce(f64, f64) -> f64) -> Exec<Flow> {
        let frame = self.frame()?;
        let rhs = frame.pop_double()?;
        let lhs = frame.pop_double()?;
        frame.push(Value::Double(op(lhs, rhs)));
        Ok(Flow::Next)
    }

    fn array_length(&self, array: ObjRef) -> Result<u32, VmError> {
        self.kernel
            .heap
            .get(array)?
            .array_length
            .ok_or_else(|| VmError::BadOperand(format!("{} is not an array", array)))
    }

    /// Check the array and index of an array access (`depth` words below the top of the stack),
    /// returning the array and the first slot of the element
    fn array_element(&mut self, depth: usize, width: usize) -> Exec<(ObjRef, usize)> {
        let operands = self.frame()?.peek_slots(depth + 2)?;
        let array = match operands.get_ref(0) {
            Some(array) => array,
            None => return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, None)),
        };
        let index = operands.get_int(1);

        let shared = self.access_object(array)?;
        if self.breaks_on_access(shared) {
            return Err(Exit::Flow(Self::schedule(SchedulingPoint::SharedAccess)));
        }
        let length = self.array_length(array)?;
        if index < 0 || index as u32 >= length {
            let message = format!("Index {} out of bounds for length {}", index, length);
            return Err(self.raise(&BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION, Some(message)));
        }
        Ok((array, index as usize * width))
    }

    fn array_load(&mut self, width: usize) -> Exec<Flow> {
        let (array, start) = self.array_element(0, width)?;
        let object = self.kernel.heap.get(array)?;
        let words: Vec<(i32, bool)> = (start..start + width)
            .map(|idx| (object.fields.words()[idx], object.fields.is_ref(idx)))
            .collect();
        let frame = self.frame()?;
        frame.drop_slots(2)?;
        for (word, is_ref) in words {
            frame.stack.push_word(word, is_ref);
        }
        Ok(Flow::Next)
    }

    fn array_store(
        &mut self,
        width: usize,
        narrow: impl FnOnce(Option<ArrayComponent>, i32) -> i32,
    ) -> Exec<Flow> {
        let (array, start) = self.array_element(width, width)?;
        let value = self.frame()?.peek_slots(width)?;
        let component = self.db.class(self.kernel.heap.get(array)?.class).component;
        let fields = &mut self.kernel.heap.get_mut(array)?.fields;
        if width == 1 {
            let word = value.get_int(0);
            let word = if value.is_ref(0) { word } else { narrow(component, word) };
            fields.set_word(start, word, value.is_ref(0));
        } else {
            for idx in 0..width {
                fields.set_word(start + idx, value.get_int(idx), value.is_ref(idx));
            }
        }
        self.frame()?.drop_slots(2 + width)?;
        Ok(Flow::Next)
    }

    fn new_array(&mut self, element: &FieldType<BinaryName>) -> Exec<Flow> {
        let length = self.frame()?.peek_slots(1)?.get_int(0);
        if length < 0 {
            return Err(self.raise(
                &BinaryName::NEGATIVEARRAYSIZEEXCEPTION,
                Some(length.to_string()),
            ));
        }
        let array_class = match self.db.resolve_array_of(element) {
            Ok(class) => class,
            Err(err) => {
                let message = String::from(err.class_name().as_str());
                return Err(self.raise(&BinaryName::NOCLASSDEFFOUNDERROR, Some(message)));
            }
        };
        let array = self.kernel.new_array(self.db, array_class, length as u32);
        self.step.allocations += 1;
        let frame = self.frame()?;
        frame.drop_slots(1)?;
        frame.push_ref(Some(array));
        Ok(Flow::Next)
    }

    /// Resolve a static field reference and make sure its class is initialized
    fn static_field(&mut self, field_ref: &FieldRef) -> Exec<&'a FieldData> {
        let db = self.db;
        let class = self.resolve_class(&field_ref.class)?;
        let field = match db.find_static_field(class, &field_ref.name) {
            Some(field) if field.descriptor == field_ref.descriptor => field,
            _ => {
                let message = format!("{}.{}", field_ref.class, field_ref.name);
                return Err(self.raise(&BinaryName::NOSUCHFIELDERROR, Some(message)));
            }
        };
        self.initialize(field.class)?;
        let shared = self.access_statics(field.class)?;
        if self.breaks_on_access(shared) {
            return Err(Exit::Flow(Self::schedule(SchedulingPoint::SharedAccess)));
        }
        Ok(field)
    }

    fn get_static(&mut self, field_ref: &FieldRef) -> Exec<Flow> {
        let field = self.static_field(field_ref)?;
        let area = self.kernel.static_area(self.db, field.class)?;
        let words = copy_words(&area.fields, field.offset, field.descriptor.width());
        let frame = self.frame()?;
        for (word, is_ref) in words {
            frame.stack.push_word(word, is_ref);
        }
        Ok(Flow::Next)
    }

    fn put_static(&mut self, field_ref: &FieldRef) -> Exec<Flow> {
        let field = self.static_field(field_ref)?;
        let width = field.descriptor.width();
        let value = self.frame()?.peek_slots(width)?;
        let area = self.kernel.static_area(self.db, field.class)?;
        for idx in 0..width {
            area.fields
                .set_word(field.offset + idx, value.get_int(idx), value.is_ref(idx));
        }
        self.frame()?.drop_slots(width)?;
        Ok(Flow::Next)
    }

    /// Resolve an instance field reference
    fn instance_field(&mut self, field_ref: &FieldRef) -> Exec<&'a FieldData> {
        let db = self.db;
        let class = self.resolve_class(&field_ref.class)?;
        match db.find_instance_field(class, &field_ref.name) {
            Some(field) if field.descriptor == field_ref.descriptor => Ok(field),
            _ => {
                let message = format!("{}.{}", field_ref.class, field_ref.name);
                Err(self.raise(&BinaryName::NOSUCHFIELDERROR, Some(message)))
            }
        }
    }

    /// Check the receiver of a field access (`depth` words below the top of the stack)
    fn field_receiver(&mut self, field: &FieldData, depth: usize) -> Exec<ObjRef> {
        let object = match self.frame()?.peek_ref(depth)? {
            Some(object) => object,
            None => {
                let message = format!("cannot access field \"{}\"", field.name);
                return Err(self.raise(&BinaryName::NULLPOINTEREXCEPTION, Some(message)));
            }
        };
        let shared = self.access_object(object)?;
        if self.breaks_on_access(shared) {
            return Err(Exit::Flow(Self::schedule(SchedulingPoint::SharedAccess)));
        }
        Ok(object)
    }

    fn get_field(&mut self, field_ref: &FieldRef) -> Exec<Flow> {
        let field = self.instance_field(field_ref)?;
        let object = self.field_receiver(field, 0)?;
        let fields = &self.kernel.heap.get(object)?.fields;
        let words = copy_words(fields, field.offset, field.descriptor.width());
        let frame = self.frame()?;
        frame.drop_slots(1)?;
        for (word, is_ref) in words {
            frame.stack.push_word(word, is_ref);
        }
        Ok(Flow::Next)
    }

    fn put_field(&mut self, field_ref: &FieldRef) -> Exec<Flow> {
        let field = self.instance_field(field_ref)?;
        let width = field.descriptor.width();
        let object = self.field_receiver(field, width)?;
        let value = self.frame()?.peek_slots(width)?;
        let fields = &mut self.kernel.heap.get_mut(object)?.fields;
        for idx in 0..width {
            fields.set_word(field.offset + idx, value.get_int(idx), value.is_ref(idx));
        }
        self.frame()?.drop_slots(width + 1)?;
        Ok(Flow::Next)
    }
}

fn copy_words(slots: &super::SlotVec, offset: usize, width: usize) -> Vec<(i32, bool)> {
    (offset..offset + width)
        .map(|idx| (slots.get_int(idx), slots.is_ref(idx)))
        .collect()
}

fn bad_local(idx: usize) -> VmError {
    VmError::BadOperand(format!("no local variable {}", idx))
}

fn compare_floats(lhs: f64, rhs: f64, mode: CompareMode) -> i32 {
    match lhs.partial_cmp(&rhs) {
        Some(ordering) => ordering as i32,
        None => match mode {
            CompareMode::L => -1,
            CompareMode::G => 1,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassDefinition, ClassSource, ProgramSource};
    use crate::jvm::code::{CodeBuilder, EqComparison, InvokeType, MethodRef, OrdComparison};
    use crate::jvm::{FieldAccessFlags, MethodAccessFlags};
    use crate::vm::{NativeRegistry, SlotVec, ThreadId, ThreadState};

    const STATIC: MethodAccessFlags = MethodAccessFlags::from_bits_truncate(
        MethodAccessFlags::PUBLIC.bits() | MethodAccessFlags::STATIC.bits(),
    );

    /// Single threaded harness running `demo/T.test()I` (or `()V`) to completion
    struct Harness {
        kernel: Kernel,
        db: ClassDatabase,
        natives: NativeRegistry,
        config: Config,
        step: StepState,
    }

    impl Harness {
        fn new(class: ClassDefinition, descriptor: &str) -> Harness {
            let mut source = ProgramSource::with_java_library().unwrap();
            source.add_class(class).unwrap();
            Harness::from_source(source, descriptor)
        }

        fn from_source(source: impl ClassSource + 'static, descriptor: &str) -> Harness {
            let db = ClassDatabase::new(source);
            let mut kernel = Kernel::new();
            let thread_class = db.resolve(&BinaryName::THREAD).unwrap();
            let thread_object = kernel.new_object(&db, thread_class);
            let thread = kernel.add_thread(thread_object);
            kernel
                .set_thread_state(thread, ThreadState::Runnable)
                .unwrap();

            let class = db.resolve(&BinaryName::from_static("demo/T").unwrap()).unwrap();
            let method = db
                .find_method(
                    class,
                    &crate::jvm::UnqualifiedName::from_static("test").unwrap(),
                    &crate::jvm::class_graph::parse_method_descriptor(descriptor).unwrap(),
                )
                .unwrap();
            kernel
                .thread_mut(thread)
                .unwrap()
                .push_frame(StackFrame::new(db.method(method), SlotVec::new()));
            let mut config = Config::new();
            config.break_on_shared_access = false;
            Harness {
                kernel,
                db,
                natives: NativeRegistry::with_java_natives(),
                config,
                step: StepState::new(thread, AtomicSection::default(), false),
            }
        }

        /// Run until the outermost frame is about to return, then pop its result
        fn run(&mut self) -> Result<InsnOutcome, VmError> {
            loop {
                let frames = self.kernel.thread(self.step.thread)?.frames.len();
                let (method, pc) = {
                    let frame = self.kernel.thread(self.step.thread)?.top_frame().unwrap();
                    (frame.method, frame.pc)
                };
                let is_return = frames == 1
                    && matches!(
                        self.db.method(method).body.as_ref().unwrap().instruction(pc),
                        Some(LinkedInstruction::Branch(
                            BranchInstruction::IReturn | BranchInstruction::Return
                        ))
                    );
                if is_return {
                    return Ok(InsnOutcome::Terminated);
                }
                let mut interpreter = Interpreter {
                    kernel: &mut self.kernel,
                    db: &self.db,
                    natives: &self.natives,
                    config: &self.config,
                    step: &mut self.step,
                };
                match interpreter.execute()? {
                    InsnOutcome::Continue => self.step.first_insn = false,
                    other => return Ok(other),
                }
            }
        }

        fn result(&self) -> i32 {
            let frame = self.kernel.thread(self.step.thread).unwrap().top_frame().unwrap();
            frame.stack.get_int(frame.stack.len() - 1)
        }
    }

    fn test_class(descriptor: &str, build: impl FnOnce(&mut CodeBuilder) -> Result<(), crate::jvm::Error>) -> ClassDefinition {
        let mut class = ClassDefinition::class("demo/T").unwrap();
        class.define_method("test", descriptor, STATIC, build).unwrap();
        class
    }

    #[test]
    fn arithmetic() {
        let class = test_class("()I", |code| {
            code.push_instruction(Instruction::BiPush(-7))?;
            code.push_instruction(Instruction::IConst2)?;
            code.push_instruction(Instruction::IDiv)?; // -3
            code.push_instruction(Instruction::Ldc(ConstantData::Long(1 << 40)))?;
            code.push_instruction(Instruction::LConst1)?;
            code.push_instruction(Instruction::LAdd)?;
            code.push_instruction(Instruction::Ldc(ConstantData::Integer(40)))?;
            code.push_instruction(Instruction::LSh(ShiftType::ArithmeticRight))?;
            code.push_instruction(Instruction::L2I)?; // 1
            code.push_instruction(Instruction::IAdd)?; // -2
            code.push_instruction(Instruction::IStore(0))?;
            code.push_instruction(Instruction::IInc(0, 100))?;
            code.push_instruction(Instruction::ILoad(0))?; // 98
            code.push_branch_instruction(BranchInstruction::IReturn)
        });
        let mut harness = Harness::new(class, "()I");
        assert_eq!(harness.run().unwrap(), InsnOutcome::Terminated);
        assert_eq!(harness.result(), 98);
    }

    #[test]
    fn division_by_zero_is_catchable() {
        let class = test_class("()I", |code| {
            let start = code.fresh_label();
            let end = code.fresh_label();
            let handler = code.fresh_label();
            code.place_label(start)?;
            code.push_instruction(Instruction::IConst1)?;
            code.push_instruction(Instruction::IConst0)?;
            code.push_instruction(Instruction::IDiv)?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.place_label(end)?;
            code.push_branch_instruction(BranchInstruction::Goto(handler))?;
            code.place_label(handler)?;
            code.push_instruction(Instruction::Pop)?;
            code.push_instruction(Instruction::BiPush(42))?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.add_exception_handler(start, end, handler, Some(BinaryName::ARITHMETICEXCEPTION));
            Ok(())
        });
        let mut harness = Harness::new(class, "()I");
        assert_eq!(harness.run().unwrap(), InsnOutcome::Terminated);
        assert_eq!(harness.result(), 42);
    }

    #[test]
    fn uncaught_null_pointer() {
        let class = test_class("()V", |code| {
            code.push_instruction(Instruction::AConstNull)?;
            code.push_instruction(Instruction::ArrayLength)?;
            code.push_instruction(Instruction::Pop)?;
            code.push_branch_instruction(BranchInstruction::Return)
        });
        let mut harness = Harness::new(class, "()V");
        match harness.run().unwrap() {
            InsnOutcome::Uncaught(uncaught) => {
                assert_eq!(uncaught.class, BinaryName::NULLPOINTEREXCEPTION);
                assert_eq!(uncaught.stack_trace.len(), 1);
                assert!(uncaught.stack_trace[0].contains("demo/T.test()V"));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        let thread = harness.kernel.thread(harness.step.thread).unwrap();
        assert_eq!(thread.state, ThreadState::Terminated);
    }

    #[test]
    fn arrays_and_bounds() {
        let class = test_class("()I", |code| {
            let caught = code.fresh_label();
            let start = code.fresh_label();
            let end = code.fresh_label();
            code.push_instruction(Instruction::IConst3)?;
            code.push_instruction(Instruction::NewArray(BaseType::Byte))?;
            code.push_instruction(Instruction::AStore(0))?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::IConst1)?;
            code.push_instruction(Instruction::SiPush(300))?;
            code.push_instruction(Instruction::BAStore)?; // stored as 44
            code.place_label(start)?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::IConst3)?;
            code.push_instruction(Instruction::BALoad)?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.place_label(end)?;
            code.push_branch_instruction(BranchInstruction::Goto(caught))?;
            code.place_label(caught)?;
            code.push_instruction(Instruction::Pop)?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::IConst1)?;
            code.push_instruction(Instruction::BALoad)?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.add_exception_handler(
                start,
                end,
                caught,
                Some(BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION),
            );
            Ok(())
        });
        let mut harness = Harness::new(class, "()I");
        assert_eq!(harness.run().unwrap(), InsnOutcome::Terminated);
        assert_eq!(harness.result(), 44);
    }

    #[test]
    fn static_initializer_runs_first() {
        let mut class = test_class("()I", |code| {
            code.push_instruction(Instruction::GetStatic(
                FieldRef::parse("demo/T", "x", "I").unwrap(),
            ))?;
            code.push_branch_instruction(BranchInstruction::IReturn)
        });
        class
            .define_field("x", "I", FieldAccessFlags::STATIC)
            .unwrap();
        class
            .define_method("<clinit>", "()V", MethodAccessFlags::STATIC, |code| {
                code.push_instruction(Instruction::BiPush(17))?;
                code.push_instruction(Instruction::PutStatic(
                    FieldRef::parse("demo/T", "x", "I").unwrap(),
                ))?;
                code.push_branch_instruction(BranchInstruction::Return)
            })
            .unwrap();
        let mut harness = Harness::new(class, "()I");
        assert_eq!(harness.run().unwrap(), InsnOutcome::Terminated);
        assert_eq!(harness.result(), 17);
        let class = harness.db.lookup(&BinaryName::from_static("demo/T").unwrap()).unwrap();
        assert_eq!(
            harness.kernel.statics.get(class).unwrap().status,
            super::super::InitStatus::Initialized
        );
    }

    #[test]
    fn virtual_dispatch_and_casts() {
        // String.length() through invokevirtual on a constant, then a failing cast
        let class = test_class("()I", |code| {
            let caught = code.fresh_label();
            let start = code.fresh_label();
            let end = code.fresh_label();
            code.push_instruction(Instruction::Ldc(ConstantData::String("hello".into())))?;
            code.push_instruction(Instruction::Invoke(
                InvokeType::Virtual,
                MethodRef::parse("java/lang/String", "length", "()I").unwrap(),
            ))?;
            code.push_instruction(Instruction::IStore(0))?;
            code.place_label(start)?;
            code.push_instruction(Instruction::Ldc(ConstantData::String("x".into())))?;
            code.push_instruction(Instruction::CheckCast(RefType::Object(BinaryName::THREAD)))?;
            code.push_instruction(Instruction::Pop)?;
            code.push_instruction(Instruction::IConst0)?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.place_label(end)?;
            code.push_branch_instruction(BranchInstruction::Goto(caught))?;
            code.place_label(caught)?;
            code.push_instruction(Instruction::InstanceOf(RefType::Object(
                BinaryName::RUNTIMEEXCEPTION,
            )))?;
            code.push_branch_instruction(BranchInstruction::If(OrdComparison::EQ, end, ()))?;
            code.push_instruction(Instruction::ILoad(0))?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.add_exception_handler(start, end, caught, None);
            Ok(())
        });
        let mut harness = Harness::new(class, "()I");
        assert_eq!(harness.run().unwrap(), InsnOutcome::Terminated);
        assert_eq!(harness.result(), 5);
    }

    #[test]
    fn null_comparisons() {
        let class = test_class("()I", |code| {
            let is_null = code.fresh_label();
            code.push_instruction(Instruction::AConstNull)?;
            code.push_branch_instruction(BranchInstruction::IfNull(EqComparison::EQ, is_null, ()))?;
            code.push_instruction(Instruction::IConst0)?;
            code.push_branch_instruction(BranchInstruction::IReturn)?;
            code.place_label(is_null)?;
            code.push_instruction(Instruction::IConst1)?;
            code.push_branch_instruction(BranchInstruction::IReturn)
        });
        let mut harness = Harness::new(class, "()I");
        harness.run().unwrap();
        assert_eq!(harness.result(), 1);
    }

    #[test]
    fn lock_breaks_need_a_shared_monitor() {
        let class = test_class("()V", |code| {
            code.push_branch_instruction(BranchInstruction::Return)
        });
        let mut harness = Harness::new(class, "()V");
        let object_class = harness.db.resolve(&BinaryName::OBJECT).unwrap();
        let object = harness.kernel.new_object(&harness.db, object_class);
        harness.step.first_insn = false;

        let mut interpreter = Interpreter {
            kernel: &mut harness.kernel,
            db: &harness.db,
            natives: &harness.natives,
            config: &harness.config,
            step: &mut harness.step,
        };
        let shared = interpreter.access_object(object).unwrap();
        assert!(!shared);
        assert!(!interpreter.breaks_on_lock(shared));

        interpreter
            .kernel
            .heap
            .get_mut(object)
            .unwrap()
            .accessed_by
            .insert(ThreadId(7));
        let shared = interpreter.access_object(object).unwrap();
        assert!(shared);
        assert!(interpreter.breaks_on_lock(shared));

        // The instruction that ended the previous step runs without breaking again
        interpreter.step.first_insn = true;
        assert!(!interpreter.breaks_on_lock(shared));
    }

    #[test]
    fn float_comparison_modes() {
        assert_eq!(compare_floats(1.0, 2.0, CompareMode::G), -1);
        assert_eq!(compare_floats(2.0, 2.0, CompareMode::G), 0);
        assert_eq!(compare_floats(f64::NAN, 2.0, CompareMode::G), 1);
        assert_eq!(compare_floats(f64::NAN, 2.0, CompareMode::L), -1);
    }
}
