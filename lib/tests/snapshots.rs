use jvmc::jvm::class_graph::{
    parse_class_name, parse_member_name, ClassDatabase, ClassDefinition, ClassId, ProgramSource,
};
use jvmc::jvm::code::{BranchInstruction, FieldRef, Instruction, InvokeType, MethodRef};
use jvmc::jvm::{BinaryName, FieldAccessFlags, MethodAccessFlags};
use jvmc::mc::*;
use jvmc::vm::{Kernel, NativeRegistry, ObjRef, ThreadId, ThreadState};
use std::rc::Rc;

/// `test/Node { int value; test/Node next; }`
fn database() -> (ClassDatabase, ClassId) {
    let mut node = ClassDefinition::class("test/Node").unwrap();
    node.define_field("value", "I", FieldAccessFlags::PUBLIC)
        .unwrap();
    node.define_field("next", "Ltest/Node;", FieldAccessFlags::PUBLIC)
        .unwrap();
    let mut program = ProgramSource::with_java_library().unwrap();
    program.add_class(node).unwrap();
    let db = ClassDatabase::new(program);
    let class = db.resolve(&parse_class_name("test/Node").unwrap()).unwrap();
    (db, class)
}

fn offset(db: &ClassDatabase, class: ClassId, name: &str) -> usize {
    db.find_instance_field(class, &parse_member_name(name).unwrap())
        .unwrap()
        .offset
}

fn system() -> SystemState {
    SystemState::new(ChoiceFrame::new(ChoiceGenerator::threads(
        SchedulingPoint::Root,
        Origin::root(),
        vec![ThreadId::MAIN],
    )))
}

fn memento(depth: usize) -> Memento {
    Memento::new(AtomicSection::default(), depth, Some(depth), None)
}

fn value(kernel: &Kernel, object: ObjRef, offset: usize) -> i32 {
    kernel.heap.get(object).unwrap().fields.get_int(offset)
}

#[test]
fn backtracking_restores_the_canonical_state() {
    let (db, class) = database();
    let value_offset = offset(&db, class, "value");
    let next_offset = offset(&db, class, "next");
    let system = system();

    let mut kernel = Kernel::new();
    let thread_class = db.resolve(&BinaryName::THREAD).unwrap();
    let thread_object = kernel.new_object(&db, thread_class);
    let main = kernel.add_thread(thread_object);
    kernel.set_thread_state(main, ThreadState::Runnable).unwrap();
    let first = kernel.new_object(&db, class);

    let mut backtracker = Backtracker::new();
    backtracker.start(&mut kernel);
    let initial = canonical_state(&kernel, &system);

    backtracker.push(&mut kernel, memento(0));
    kernel
        .heap
        .get_mut(first)
        .unwrap()
        .fields
        .set_int(value_offset, 1);
    let second = kernel.new_object(&db, class);
    let after_one = canonical_state(&kernel, &system);

    backtracker.push(&mut kernel, memento(1));
    kernel
        .heap
        .get_mut(first)
        .unwrap()
        .fields
        .set_ref(next_offset, Some(second));
    kernel
        .heap
        .get_mut(second)
        .unwrap()
        .fields
        .set_int(value_offset, 2);
    kernel.set_thread_state(main, ThreadState::Sleeping).unwrap();
    assert_ne!(canonical_state(&kernel, &system), after_one);

    assert_eq!(backtracker.pop(&mut kernel).unwrap().choice_depth, 1);
    assert_eq!(canonical_state(&kernel, &system), after_one);
    assert_eq!(value(&kernel, first, value_offset), 1);
    assert_eq!(value(&kernel, second, value_offset), 0);
    assert_eq!(kernel.thread(main).unwrap().state, ThreadState::Runnable);

    assert_eq!(backtracker.pop(&mut kernel).unwrap().choice_depth, 0);
    assert_eq!(canonical_state(&kernel, &system), initial);
    assert!(!kernel.heap.contains(second));
    assert_eq!(value(&kernel, first, value_offset), 0);
    assert!(kernel.events.is_empty());
}

#[test]
fn snapshots_share_untouched_objects() {
    let (db, class) = database();
    let value_offset = offset(&db, class, "value");
    let mut kernel = Kernel::new();
    let touched = kernel.new_object(&db, class);
    let untouched = kernel.new_object(&db, class);

    let mut backtracker = Backtracker::new();
    backtracker.start(&mut kernel);
    let snapshot = kernel.clone();
    let old_touched = Rc::clone(kernel.heap.get_shared(touched).unwrap());

    backtracker.push(&mut kernel, memento(0));
    kernel
        .heap
        .get_mut(touched)
        .unwrap()
        .fields
        .set_int(value_offset, 42);

    // The write went to a fresh copy: the snapshot and the old cell are unchanged
    assert_eq!(value(&kernel, touched, value_offset), 42);
    assert_eq!(value(&snapshot, touched, value_offset), 0);
    assert_eq!(old_touched.fields.get_int(value_offset), 0);
    assert!(!Rc::ptr_eq(
        kernel.heap.get_shared(touched).unwrap(),
        snapshot.heap.get_shared(touched).unwrap()
    ));
    assert!(Rc::ptr_eq(
        kernel.heap.get_shared(untouched).unwrap(),
        snapshot.heap.get_shared(untouched).unwrap()
    ));

    backtracker.pop(&mut kernel).unwrap();
    assert!(Rc::ptr_eq(
        kernel.heap.get_shared(touched).unwrap(),
        &old_touched
    ));
}

#[test]
fn equal_states_are_matched() {
    let (db, class) = database();
    let value_offset = offset(&db, class, "value");
    let system = system();
    let mut kernel = Kernel::new();
    let object = kernel.new_object(&db, class);

    for policy in [MatchPolicy::FullCompare, MatchPolicy::HashOnly] {
        let mut config = Config::new();
        config.state_matching = policy;
        let mut states = StateSet::new(&config);
        let (first_id, is_new) = states.add(canonical_state(&kernel, &system));
        assert!(is_new);

        let mut changed = kernel.clone();
        changed
            .heap
            .get_mut(object)
            .unwrap()
            .fields
            .set_int(value_offset, 7);
        let (changed_id, is_new) = states.add(canonical_state(&changed, &system));
        assert!(is_new);
        assert_ne!(changed_id, first_id);

        assert_eq!(states.add(canonical_state(&kernel.clone(), &system)), (first_id, false));
        assert_eq!(states.len(), 2);
    }
}

#[test]
fn resolution_is_idempotent() {
    let (db, node) = database();
    let count = db.class_count();
    let name = parse_class_name("test/Node").unwrap();
    assert_eq!(db.resolve(&name).unwrap(), node);
    assert_eq!(db.lookup(&name), Some(node));
    assert_eq!(db.class_count(), count);

    let thread = db.resolve(&BinaryName::THREAD).unwrap();
    let again = db.resolve(&BinaryName::THREAD).unwrap();
    assert_eq!(thread, again);

    let missing = parse_class_name("test/Missing").unwrap();
    assert!(db.resolve(&missing).is_err());
    assert!(db.resolve(&missing).is_err());
    assert_eq!(db.lookup(&missing), None);
}

/// `int a = Verify.getBoolean(); new Object(); result = a + Verify.getBoolean();`
///
/// Every step allocates a temporary that the collector frees at the end of the transition, at
/// the highest heap index. Backtracking has to bring those cells back in the right order.
#[test]
fn collected_temporaries_survive_backtracking() {
    let get_boolean = Instruction::Invoke(
        InvokeType::Static,
        MethodRef::parse("jvmc/Verify", "getBoolean", "()Z").unwrap(),
    );
    let object_init = MethodRef::parse("java/lang/Object", "<init>", "()V").unwrap();
    let result = FieldRef::parse("test/Main", "result", "I").unwrap();

    let mut main = ClassDefinition::class("test/Main").unwrap();
    main.define_field(
        "result",
        "I",
        FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC,
    )
    .unwrap();
    main.define_method(
        "main",
        "()V",
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        |code| {
            code.push_instruction(get_boolean.clone())?;
            code.push_instruction(Instruction::New(BinaryName::OBJECT))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::Invoke(InvokeType::Special, object_init))?;
            code.push_instruction(Instruction::Pop)?;
            code.push_instruction(get_boolean)?;
            code.push_instruction(Instruction::IAdd)?;
            code.push_instruction(Instruction::PutStatic(result))?;
            code.push_branch_instruction(BranchInstruction::Return)
        },
    )
    .unwrap();
    let mut program = ProgramSource::with_java_library().unwrap();
    program.add_class(main).unwrap();

    let mut config = Config::new();
    config.stop_on_first_finding = false;
    let machine = Machine::new(
        program,
        &parse_class_name("test/Main").unwrap(),
        Box::new(NativeRegistry::with_java_natives()),
        config,
    )
    .unwrap();
    let report = Search::new(machine).run().unwrap();
    assert!(report.complete);
    assert!(!report.has_findings());

    // result is 0, 1 or 2
    assert_eq!(report.statistics.end_states, 3);
    assert_eq!(report.statistics.transitions, 7);
}
