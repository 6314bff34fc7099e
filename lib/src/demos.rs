//! Built-in demo programs
//!
//! Small concurrent programs, assembled directly as class definitions, that exercise the
//! different kinds of findings the checker reports. Every program has a `demo/Main` class whose
//! `main` starts the worker threads.

use crate::jvm::class_graph::{parse_class_name, ClassDefinition, ProgramSource};
use crate::jvm::code::{
    BranchInstruction, CodeBuilder, ConstantData, FieldRef, Instruction, InvokeType, MethodRef,
    OrdComparison,
};
use crate::jvm::{BinaryName, Error, FieldAccessFlags, MethodAccessFlags};
use crate::mc::{Config, Machine};
use crate::vm::{NativeRegistry, VmError};
use std::fmt;

pub const MAIN_CLASS: &str = "demo/Main";
const WORKER_CLASS: &str = "demo/Worker";

const PUBLIC: MethodAccessFlags = MethodAccessFlags::PUBLIC;
const PUBLIC_STATIC: MethodAccessFlags = MethodAccessFlags::from_bits_truncate(
    MethodAccessFlags::PUBLIC.bits() | MethodAccessFlags::STATIC.bits(),
);
const STATIC_FIELD: FieldAccessFlags = FieldAccessFlags::from_bits_truncate(
    FieldAccessFlags::PUBLIC.bits() | FieldAccessFlags::STATIC.bits(),
);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Demo {
    /// Workers increment a shared counter while holding a common lock
    GuardedCounter,

    /// Same as [`Demo::GuardedCounter`], without the lock
    RacyCounter,

    /// Two threads take the same two locks in opposite orders
    LockOrder,

    /// Waiters wait without checking a condition, so a notification can come too early
    LostNotify,

    /// `Verify.getInt`/`Verify.getBoolean` pick the divisor of a division
    DataChoice,
}

impl Demo {
    pub const ALL: [Demo; 5] = [
        Demo::GuardedCounter,
        Demo::RacyCounter,
        Demo::LockOrder,
        Demo::LostNotify,
        Demo::DataChoice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Demo::GuardedCounter => "guarded-counter",
            Demo::RacyCounter => "racy-counter",
            Demo::LockOrder => "lock-order",
            Demo::LostNotify => "lost-notify",
            Demo::DataChoice => "data-choice",
        }
    }

    pub fn from_name(name: &str) -> Option<Demo> {
        Demo::ALL.into_iter().find(|demo| demo.name() == name)
    }
}

impl fmt::Display for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Size parameters of a demo
///
/// `threads` is the number of worker threads (the lock order demo always uses two) and
/// `iterations` the number of increments per worker, or the upper bound of the data choice.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DemoSize {
    pub threads: usize,
    pub iterations: usize,
}

impl Default for DemoSize {
    fn default() -> DemoSize {
        DemoSize {
            threads: 2,
            iterations: 2,
        }
    }
}

/// Classes of a demo program, next to the built-in library
pub fn program(demo: Demo, size: &DemoSize) -> Result<ProgramSource, Error> {
    let threads = u16::try_from(size.threads.max(1)).unwrap_or(u16::MAX - 2);
    let iterations = i32::try_from(size.iterations).unwrap_or(i32::MAX);
    let classes = match demo {
        Demo::GuardedCounter => counter(threads, iterations, true)?,
        Demo::RacyCounter => counter(threads, iterations, false)?,
        Demo::LockOrder => lock_order()?,
        Demo::LostNotify => lost_notify(threads)?,
        Demo::DataChoice => vec![data_choice(iterations)?],
    };

    let mut program = ProgramSource::with_java_library()?;
    for class in classes {
        program.add_class(class)?;
    }
    Ok(program)
}

/// Machine about to run a demo, with the built-in natives
pub fn machine(demo: Demo, size: &DemoSize, config: Config) -> Result<Machine, VmError> {
    log::debug!("Assembling demo {} ({:?})", demo, size);
    let program = program(demo, size)?;
    let main_class = parse_class_name(MAIN_CLASS)?;
    Machine::new(
        program,
        &main_class,
        Box::new(NativeRegistry::with_java_natives()),
        config,
    )
}

fn push_int(code: &mut CodeBuilder, value: i32) -> Result<(), Error> {
    let insn = match value {
        -1 => Instruction::IConstM1,
        0 => Instruction::IConst0,
        1 => Instruction::IConst1,
        2 => Instruction::IConst2,
        3 => Instruction::IConst3,
        4 => Instruction::IConst4,
        5 => Instruction::IConst5,
        _ => match i8::try_from(value) {
            Ok(byte) => Instruction::BiPush(byte),
            Err(_) => Instruction::Ldc(ConstantData::Integer(value)),
        },
    };
    code.push_instruction(insn)
}

fn call_super_init(code: &mut CodeBuilder, superclass: &BinaryName) -> Result<(), Error> {
    code.push_instruction(Instruction::ALoad(0))?;
    code.push_instruction(Instruction::Invoke(
        InvokeType::Special,
        MethodRef::parse(superclass.as_ref(), "<init>", "()V")?,
    ))
}

/// `throw new AssertionError(message)`
fn throw_assertion(code: &mut CodeBuilder, message: &'static str) -> Result<(), Error> {
    code.push_instruction(Instruction::New(BinaryName::ASSERTIONERROR))?;
    code.push_instruction(Instruction::Dup)?;
    code.push_instruction(Instruction::Ldc(ConstantData::String(message.into())))?;
    code.push_instruction(Instruction::Invoke(
        InvokeType::Special,
        MethodRef::parse("java/lang/AssertionError", "<init>", "(Ljava/lang/String;)V")?,
    ))?;
    code.push_branch_instruction(BranchInstruction::AThrow)
}

/// `for (int i = 0; i < count; i++) { body }`, with `i` in local `local`
fn counted_loop(
    code: &mut CodeBuilder,
    local: u16,
    count: i32,
    body: impl FnOnce(&mut CodeBuilder) -> Result<(), Error>,
) -> Result<(), Error> {
    let check = code.fresh_label();
    let done = code.fresh_label();
    code.push_instruction(Instruction::IConst0)?;
    code.push_instruction(Instruction::IStore(local))?;
    code.place_label(check)?;
    code.push_instruction(Instruction::ILoad(local))?;
    push_int(code, count)?;
    code.push_branch_instruction(BranchInstruction::IfICmp(OrdComparison::GE, done, ()))?;
    body(code)?;
    code.push_instruction(Instruction::IInc(local, 1))?;
    code.push_branch_instruction(BranchInstruction::Goto(check))?;
    code.place_label(done)
}

/// Start then join the threads stored in locals `first..first + count`
fn start_and_join(code: &mut CodeBuilder, first: u16, count: u16) -> Result<(), Error> {
    let start = MethodRef::parse("java/lang/Thread", "start", "()V")?;
    let join = MethodRef::parse("java/lang/Thread", "join", "()V")?;
    for method in [start, join] {
        for local in first..first + count {
            code.push_instruction(Instruction::ALoad(local))?;
            code.push_instruction(Instruction::Invoke(InvokeType::Virtual, method.clone()))?;
        }
    }
    Ok(())
}

/// Workers that bump `Main.count`, then a check of the total once they are joined
///
/// ```java,ignore,no_run
/// class Worker extends Thread {
///     public void run() {
///         for (int i = 0; i < ITERATIONS; i++) {
///             synchronized (Main.LOCK) { Main.count = Main.count + 1; }
///         }
///     }
/// }
/// ```
fn counter(threads: u16, iterations: i32, guarded: bool) -> Result<Vec<ClassDefinition>, Error> {
    let count = FieldRef::parse(MAIN_CLASS, "count", "I")?;
    let lock = FieldRef::parse(MAIN_CLASS, "LOCK", "Ljava/lang/Object;")?;
    let expected = iterations.saturating_mul(i32::from(threads));

    let mut worker = ClassDefinition::class(WORKER_CLASS)?.extends(BinaryName::THREAD);
    worker.define_method("<init>", "()V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::THREAD)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    worker.define_method("run", "()V", PUBLIC, |code| {
        counted_loop(code, 1, iterations, |code| {
            if guarded {
                code.push_instruction(Instruction::GetStatic(lock.clone()))?;
                code.push_instruction(Instruction::Dup)?;
                code.push_instruction(Instruction::AStore(2))?;
                code.push_instruction(Instruction::MonitorEnter)?;
            }
            code.push_instruction(Instruction::GetStatic(count.clone()))?;
            code.push_instruction(Instruction::IConst1)?;
            code.push_instruction(Instruction::IAdd)?;
            code.push_instruction(Instruction::PutStatic(count.clone()))?;
            if guarded {
                code.push_instruction(Instruction::ALoad(2))?;
                code.push_instruction(Instruction::MonitorExit)?;
            }
            Ok(())
        })?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    let mut main = ClassDefinition::class(MAIN_CLASS)?;
    main.define_field("count", "I", STATIC_FIELD)?;
    main.define_field("LOCK", "Ljava/lang/Object;", STATIC_FIELD)?;
    main.define_method("main", "([Ljava/lang/String;)V", PUBLIC_STATIC, |code| {
        code.push_instruction(Instruction::New(BinaryName::OBJECT))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::Invoke(
            InvokeType::Special,
            MethodRef::parse("java/lang/Object", "<init>", "()V")?,
        ))?;
        code.push_instruction(Instruction::PutStatic(lock.clone()))?;

        let worker_init = MethodRef::parse(WORKER_CLASS, "<init>", "()V")?;
        for local in 1..=threads {
            code.push_instruction(Instruction::New(parse_class_name(WORKER_CLASS)?))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::Invoke(InvokeType::Special, worker_init.clone()))?;
            code.push_instruction(Instruction::AStore(local))?;
        }
        start_and_join(code, 1, threads)?;

        let ok = code.fresh_label();
        code.push_instruction(Instruction::GetStatic(count.clone()))?;
        push_int(code, expected)?;
        code.push_branch_instruction(BranchInstruction::IfICmp(OrdComparison::EQ, ok, ()))?;
        throw_assertion(code, "counter lost an update")?;
        code.place_label(ok)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    Ok(vec![worker, main])
}

/// Two workers locking the same pair of objects, in opposite orders
fn lock_order() -> Result<Vec<ClassDefinition>, Error> {
    let first = FieldRef::parse(WORKER_CLASS, "first", "Ljava/lang/Object;")?;
    let second = FieldRef::parse(WORKER_CLASS, "second", "Ljava/lang/Object;")?;

    let mut worker = ClassDefinition::class(WORKER_CLASS)?.extends(BinaryName::THREAD);
    worker.define_field("first", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)?;
    worker.define_field("second", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)?;
    worker.define_method(
        "<init>",
        "(Ljava/lang/Object;Ljava/lang/Object;)V",
        PUBLIC,
        |code| {
            call_super_init(code, &BinaryName::THREAD)?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::ALoad(1))?;
            code.push_instruction(Instruction::PutField(first.clone()))?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::ALoad(2))?;
            code.push_instruction(Instruction::PutField(second.clone()))?;
            code.push_branch_instruction(BranchInstruction::Return)
        },
    )?;

    // synchronized (first) { synchronized (second) { } }
    worker.define_method("run", "()V", PUBLIC, |code| {
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(first.clone()))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::AStore(1))?;
        code.push_instruction(Instruction::MonitorEnter)?;
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(second.clone()))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::AStore(2))?;
        code.push_instruction(Instruction::MonitorEnter)?;
        code.push_instruction(Instruction::ALoad(2))?;
        code.push_instruction(Instruction::MonitorExit)?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::MonitorExit)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    let mut main = ClassDefinition::class(MAIN_CLASS)?;
    main.define_method("main", "([Ljava/lang/String;)V", PUBLIC_STATIC, |code| {
        let object_init = MethodRef::parse("java/lang/Object", "<init>", "()V")?;
        for local in [1, 2] {
            code.push_instruction(Instruction::New(BinaryName::OBJECT))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::Invoke(InvokeType::Special, object_init.clone()))?;
            code.push_instruction(Instruction::AStore(local))?;
        }

        let worker_init = MethodRef::parse(
            WORKER_CLASS,
            "<init>",
            "(Ljava/lang/Object;Ljava/lang/Object;)V",
        )?;
        for (local, (a, b)) in [(3, (1, 2)), (4, (2, 1))] {
            code.push_instruction(Instruction::New(parse_class_name(WORKER_CLASS)?))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::ALoad(a))?;
            code.push_instruction(Instruction::ALoad(b))?;
            code.push_instruction(Instruction::Invoke(InvokeType::Special, worker_init.clone()))?;
            code.push_instruction(Instruction::AStore(local))?;
        }
        start_and_join(code, 3, 2)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    Ok(vec![worker, main])
}

/// Waiters calling `LOCK.wait()` unconditionally while `main` sends one `notify` per waiter
///
/// A notification sent before its waiter waits is lost, leaving that waiter (and `main`, joining
/// it) stuck.
fn lost_notify(threads: u16) -> Result<Vec<ClassDefinition>, Error> {
    let lock = FieldRef::parse(MAIN_CLASS, "LOCK", "Ljava/lang/Object;")?;
    let wait = MethodRef::parse("java/lang/Object", "wait", "()V")?;
    let notify = MethodRef::parse("java/lang/Object", "notify", "()V")?;

    let mut waiter = ClassDefinition::class(WORKER_CLASS)?.extends(BinaryName::THREAD);
    waiter.define_method("<init>", "()V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::THREAD)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    // synchronized (Main.LOCK) { Main.LOCK.wait(); }
    waiter.define_method("run", "()V", PUBLIC, |code| {
        code.push_instruction(Instruction::GetStatic(lock.clone()))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::AStore(1))?;
        code.push_instruction(Instruction::MonitorEnter)?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::Invoke(InvokeType::Virtual, wait.clone()))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::MonitorExit)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    let mut main = ClassDefinition::class(MAIN_CLASS)?;
    main.define_field("LOCK", "Ljava/lang/Object;", STATIC_FIELD)?;
    main.define_method("main", "([Ljava/lang/String;)V", PUBLIC_STATIC, |code| {
        code.push_instruction(Instruction::New(BinaryName::OBJECT))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::Invoke(
            InvokeType::Special,
            MethodRef::parse("java/lang/Object", "<init>", "()V")?,
        ))?;
        code.push_instruction(Instruction::PutStatic(lock.clone()))?;

        let waiter_init = MethodRef::parse(WORKER_CLASS, "<init>", "()V")?;
        let start = MethodRef::parse("java/lang/Thread", "start", "()V")?;
        let join = MethodRef::parse("java/lang/Thread", "join", "()V")?;
        for local in 1..=threads {
            code.push_instruction(Instruction::New(parse_class_name(WORKER_CLASS)?))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::Invoke(InvokeType::Special, waiter_init.clone()))?;
            code.push_instruction(Instruction::Dup)?;
            code.push_instruction(Instruction::AStore(local))?;
            code.push_instruction(Instruction::Invoke(InvokeType::Virtual, start.clone()))?;
        }

        let lock_local = threads + 1;
        code.push_instruction(Instruction::GetStatic(lock.clone()))?;
        code.push_instruction(Instruction::Dup)?;
        code.push_instruction(Instruction::AStore(lock_local))?;
        code.push_instruction(Instruction::MonitorEnter)?;
        for _ in 0..threads {
            code.push_instruction(Instruction::ALoad(lock_local))?;
            code.push_instruction(Instruction::Invoke(InvokeType::Virtual, notify.clone()))?;
        }
        code.push_instruction(Instruction::ALoad(lock_local))?;
        code.push_instruction(Instruction::MonitorExit)?;

        for local in 1..=threads {
            code.push_instruction(Instruction::ALoad(local))?;
            code.push_instruction(Instruction::Invoke(InvokeType::Virtual, join.clone()))?;
        }
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    Ok(vec![waiter, main])
}

/// Single threaded program whose behaviour depends on data choices
///
/// ```java,ignore,no_run
/// int x = Verify.getInt(0, BOUND);
/// if (Verify.getBoolean()) {
///     Verify.ignoreIf(x == 0);
///     int y = 10 / (BOUND - x);
/// }
/// ```
fn data_choice(bound: i32) -> Result<ClassDefinition, Error> {
    let mut main = ClassDefinition::class(MAIN_CLASS)?;
    main.define_method("main", "([Ljava/lang/String;)V", PUBLIC_STATIC, |code| {
        code.push_instruction(Instruction::IConst0)?;
        push_int(code, bound)?;
        code.push_instruction(Instruction::Invoke(
            InvokeType::Static,
            MethodRef::parse("jvmc/Verify", "getInt", "(II)I")?,
        ))?;
        code.push_instruction(Instruction::IStore(1))?;

        let done = code.fresh_label();
        code.push_instruction(Instruction::Invoke(
            InvokeType::Static,
            MethodRef::parse("jvmc/Verify", "getBoolean", "()Z")?,
        ))?;
        code.push_branch_instruction(BranchInstruction::If(OrdComparison::EQ, done, ()))?;

        let nonzero = code.fresh_label();
        let ignore = code.fresh_label();
        code.push_instruction(Instruction::ILoad(1))?;
        code.push_branch_instruction(BranchInstruction::If(OrdComparison::NE, nonzero, ()))?;
        code.push_instruction(Instruction::IConst1)?;
        code.push_branch_instruction(BranchInstruction::Goto(ignore))?;
        code.place_label(nonzero)?;
        code.push_instruction(Instruction::IConst0)?;
        code.place_label(ignore)?;
        code.push_instruction(Instruction::Invoke(
            InvokeType::Static,
            MethodRef::parse("jvmc/Verify", "ignoreIf", "(Z)V")?,
        ))?;

        push_int(code, 10)?;
        push_int(code, bound)?;
        code.push_instruction(Instruction::ILoad(1))?;
        code.push_instruction(Instruction::ISub)?;
        code.push_instruction(Instruction::IDiv)?;
        code.push_instruction(Instruction::IStore(2))?;
        code.place_label(done)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    Ok(main)
}
