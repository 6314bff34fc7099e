use jvmc::jvm::class_graph::{parse_class_name, ClassDefinition, ProgramSource};
use jvmc::jvm::code::{
    BranchInstruction, FieldRef, Instruction, InvokeType, MethodRef, OrdComparison,
};
use jvmc::jvm::{Error, FieldAccessFlags, MethodAccessFlags, Name};
use jvmc::mc::*;
use jvmc::vm::{NativeContext, NativeOutcome, NativeRegistry, Value, VmError};
use std::cell::RefCell;
use std::rc::Rc;

const STATIC: MethodAccessFlags = MethodAccessFlags::from_bits_truncate(
    MethodAccessFlags::PUBLIC.bits() | MethodAccessFlags::STATIC.bits(),
);

/// `test/Main` whose `main()V` stores what `push_value` leaves on the stack in `result`
fn main_class(
    push_value: impl FnOnce(&mut jvmc::jvm::code::CodeBuilder) -> Result<(), Error>,
) -> ClassDefinition {
    let result = FieldRef::parse("test/Main", "result", "I").unwrap();
    let mut class = ClassDefinition::class("test/Main").unwrap();
    class
        .define_field(
            "result",
            "I",
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
        )
        .unwrap();
    class
        .define_method("main", "()V", STATIC, |code| {
            push_value(code)?;
            code.push_instruction(Instruction::PutStatic(result))?;
            code.push_branch_instruction(BranchInstruction::Return)
        })
        .unwrap();
    class
}

fn verify(name: &str, descriptor: &str) -> Instruction {
    Instruction::Invoke(
        InvokeType::Static,
        MethodRef::parse("jvmc/Verify", name, descriptor).unwrap(),
    )
}

fn machine(classes: Vec<ClassDefinition>, natives: NativeRegistry) -> Machine {
    let mut program = ProgramSource::with_java_library().unwrap();
    for class in classes {
        program.add_class(class).unwrap();
    }
    let mut config = Config::new();
    config.stop_on_first_finding = false;
    Machine::new(
        program,
        &parse_class_name("test/Main").unwrap(),
        Box::new(natives),
        config,
    )
    .unwrap()
}

/// Records every generator registered (or cascaded)
#[derive(Default)]
struct GeneratorLog {
    set: Rc<RefCell<Vec<(ChoiceKind, Origin, usize)>>>,
}

impl Listener for GeneratorLog {
    fn choice_generator_set(&mut self, generator: &ChoiceGenerator) -> ListenerResult {
        self.set
            .borrow_mut()
            .push((generator.kind(), generator.origin(), generator.total()));
        Ok(())
    }
}

/// `result = Verify.getInt(0, 2) * 2 + (Verify.getBoolean() ? 1 : 0)`
#[test]
fn every_data_combination_is_explored() {
    let main = main_class(|code| {
        code.push_instruction(Instruction::IConst0)?;
        code.push_instruction(Instruction::IConst2)?;
        code.push_instruction(verify("getInt", "(II)I"))?;
        code.push_instruction(Instruction::IConst2)?;
        code.push_instruction(Instruction::IMul)?;
        code.push_instruction(verify("getBoolean", "()Z"))?;
        code.push_instruction(Instruction::IAdd)
    });
    let mut machine = machine(vec![main], NativeRegistry::with_java_natives());
    let log = GeneratorLog::default();
    let set = log.set.clone();
    machine.add_listener(Box::new(log));

    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    assert!(!report.has_findings());
    assert_eq!(report.statistics.end_states, 6);

    // getInt ends the first step, getBoolean a step for each of its values
    assert_eq!(report.statistics.max_depth, 3);
    let set = set.borrow();
    let kinds: Vec<ChoiceKind> = set.iter().map(|(kind, _, _)| *kind).collect();
    assert_eq!(kinds.iter().filter(|kind| **kind == ChoiceKind::Ints).count(), 1);
    assert_eq!(kinds.iter().filter(|kind| **kind == ChoiceKind::Bools).count(), 3);
    assert!(set
        .iter()
        .all(|(kind, _, total)| *total == if *kind == ChoiceKind::Ints { 3 } else { 2 }));
}

/// Native asking for an int and then a boolean in the same call
fn pick(ctx: &mut NativeContext<'_>, _args: &[Value]) -> Result<NativeOutcome, VmError> {
    let int = match ctx.current_choice(ChoiceKind::Ints) {
        Some(ChoiceValue::Int(value)) => value,
        _ => return Ok(NativeOutcome::Choice(ChoiceRequest::Ints(vec![0, 1, 2]))),
    };
    let flag = match ctx.current_choice(ChoiceKind::Bools) {
        Some(ChoiceValue::Bool(value)) => value,
        _ => return Ok(NativeOutcome::Choice(ChoiceRequest::Bools)),
    };
    Ok(NativeOutcome::Return(Some(Value::Int(int * 2 + flag as i32))))
}

#[test]
fn cascaded_choices_share_a_transition() {
    let mut picker = ClassDefinition::class("test/Pick").unwrap();
    picker
        .declare_method("pick", "()I", STATIC | MethodAccessFlags::NATIVE)
        .unwrap();
    let main = main_class(|code| {
        code.push_instruction(Instruction::Invoke(
            InvokeType::Static,
            MethodRef::parse("test/Pick", "pick", "()I")?,
        ))
    });
    let mut natives = NativeRegistry::with_java_natives();
    natives.register("test/Pick", "pick", "()I", pick);

    let mut machine = machine(vec![picker, main], natives);
    let log = GeneratorLog::default();
    let set = log.set.clone();
    machine.add_listener(Box::new(log));

    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    assert_eq!(report.statistics.end_states, 6);

    // The boolean is chosen in the same transition as the int it cascades from
    assert_eq!(report.statistics.max_depth, 2);
    let set = set.borrow();
    let (_, ints_origin, _) = set[0];
    assert_eq!(set[0].0, ChoiceKind::Ints);
    assert_eq!(set.len(), 4);
    assert!(set[1..]
        .iter()
        .all(|(kind, origin, _)| *kind == ChoiceKind::Bools && *origin == ints_origin));
}

#[test]
fn cascaded_trace_records_both_choices() {
    let mut picker = ClassDefinition::class("test/Pick").unwrap();
    picker
        .declare_method("pick", "()I", STATIC | MethodAccessFlags::NATIVE)
        .unwrap();
    let main = main_class(|code| {
        code.push_instruction(Instruction::Invoke(
            InvokeType::Static,
            MethodRef::parse("test/Pick", "pick", "()I")?,
        ))
    });
    let mut natives = NativeRegistry::with_java_natives();
    natives.register("test/Pick", "pick", "()I", pick);
    let mut machine = machine(vec![picker, main], natives);

    assert!(machine.forward().unwrap());
    assert!(machine.forward().unwrap());
    assert_eq!(machine.status(), &StateStatus::EndState);

    let trace = machine.trace();
    let last = &trace.transitions[1];
    let kinds: Vec<ChoiceKind> = last.choices.iter().map(|choice| choice.kind).collect();
    assert_eq!(kinds, vec![ChoiceKind::Ints, ChoiceKind::Bools]);
    assert_eq!(last.choices[0].value, ChoiceValue::Int(0));
    assert_eq!(last.choices[1].value, ChoiceValue::Bool(false));
}

#[test]
fn data_choice_inside_atomic_section_is_an_error() {
    let main = main_class(|code| {
        code.push_instruction(verify("beginAtomic", "()V"))?;
        code.push_instruction(verify("getBoolean", "()Z"))
    });
    let machine = machine(vec![main], NativeRegistry::with_java_natives());
    match Search::new(machine).run() {
        Err(VmError::ChoiceInAtomic { method, .. }) => {
            assert_eq!(method, "test/Main.main()V")
        }
        other => panic!("unexpected outcome {:?}", other.map(|report| report.findings.len())),
    }
}

/// `if (Verify.getBoolean()) { 1 / 0; } result = 0;`
///
/// Both branches leave the same threads and heap behind: only the exception tells them apart.
#[test]
fn exception_is_reported_where_the_normal_end_looks_alike() {
    let main = main_class(|code| {
        let done = code.fresh_label();
        code.push_instruction(verify("getBoolean", "()Z"))?;
        code.push_branch_instruction(BranchInstruction::If(OrdComparison::EQ, done, ()))?;
        code.push_instruction(Instruction::IConst1)?;
        code.push_instruction(Instruction::IConst0)?;
        code.push_instruction(Instruction::IDiv)?;
        code.push_instruction(Instruction::Pop)?;
        code.place_label(done)?;
        code.push_instruction(Instruction::IConst0)
    });
    let machine = machine(vec![main], NativeRegistry::with_java_natives());
    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    assert_eq!(report.statistics.end_states, 1);
    assert_eq!(report.findings.len(), 1);
    match &report.findings[0].status {
        StateStatus::Uncaught(uncaught) => {
            assert_eq!(uncaught.class.as_str(), "java/lang/ArithmeticException")
        }
        other => panic!("unexpected status {:?}", other),
    }
}
