//! Built-in library classes
//!
//! This is the small slice of `java.lang` (and friends) that programs under test can use. Most of
//! it is ordinary bytecode; the parts that need to reach into the virtual machine (threads,
//! monitors, the garbage collector, nondeterministic choices) are `native` and get bound by the
//! native registry of the execution engine.

use super::ClassDefinition;
use crate::jvm::code::{
    BranchInstruction, CodeBuilder, EqComparison, FieldRef, Instruction, InvokeType, MethodRef,
    OrdComparison,
};
use crate::jvm::{BinaryName, ClassAccessFlags, Error, FieldAccessFlags, MethodAccessFlags};

const PUBLIC: MethodAccessFlags = MethodAccessFlags::PUBLIC;
const PUBLIC_NATIVE: MethodAccessFlags = MethodAccessFlags::from_bits_truncate(
    MethodAccessFlags::PUBLIC.bits() | MethodAccessFlags::NATIVE.bits(),
);
const STATIC_NATIVE: MethodAccessFlags = MethodAccessFlags::from_bits_truncate(
    MethodAccessFlags::PUBLIC.bits()
        | MethodAccessFlags::STATIC.bits()
        | MethodAccessFlags::NATIVE.bits(),
);

/// Throwables with the superclass they extend, in an order where superclasses come first
const THROWABLES: [(BinaryName, BinaryName); 20] = [
    (BinaryName::EXCEPTION, BinaryName::THROWABLE),
    (BinaryName::ERROR, BinaryName::THROWABLE),
    (BinaryName::RUNTIMEEXCEPTION, BinaryName::EXCEPTION),
    (BinaryName::INTERRUPTEDEXCEPTION, BinaryName::EXCEPTION),
    (BinaryName::ARITHMETICEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::NULLPOINTEREXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::ARRAYINDEXOUTOFBOUNDSEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::NEGATIVEARRAYSIZEEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::CLASSCASTEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::ILLEGALMONITORSTATEEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::ILLEGALTHREADSTATEEXCEPTION, BinaryName::RUNTIMEEXCEPTION),
    (BinaryName::ASSERTIONERROR, BinaryName::ERROR),
    (BinaryName::LINKAGEERROR, BinaryName::ERROR),
    (BinaryName::NOCLASSDEFFOUNDERROR, BinaryName::LINKAGEERROR),
    (BinaryName::UNSATISFIEDLINKERROR, BinaryName::LINKAGEERROR),
    (BinaryName::EXCEPTIONININITIALIZERERROR, BinaryName::LINKAGEERROR),
    (BinaryName::INCOMPATIBLECLASSCHANGEERROR, BinaryName::LINKAGEERROR),
    (BinaryName::NOSUCHFIELDERROR, BinaryName::INCOMPATIBLECLASSCHANGEERROR),
    (BinaryName::NOSUCHMETHODERROR, BinaryName::INCOMPATIBLECLASSCHANGEERROR),
    (BinaryName::ABSTRACTMETHODERROR, BinaryName::INCOMPATIBLECLASSCHANGEERROR),
];

/// Definitions of all built-in library classes
pub fn java_library_classes() -> Result<Vec<ClassDefinition>, Error> {
    let mut classes = vec![
        object()?,
        ClassDefinition::new(
            BinaryName::CLASS,
            Some(BinaryName::OBJECT),
            ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
        ),
        ClassDefinition::interface(BinaryName::CLONEABLE),
        ClassDefinition::interface(BinaryName::SERIALIZABLE),
        string()?,
        runnable()?,
        thread()?,
        throwable()?,
        weak_reference()?,
        system()?,
        verify()?,
    ];
    for (name, superclass) in THROWABLES {
        classes.push(throwable_subclass(name, superclass)?);
    }
    Ok(classes)
}

/// Emit `aload_0; invokespecial <superclass>.<init>()V`
fn call_super_init(code: &mut CodeBuilder, superclass: &BinaryName) -> Result<(), Error> {
    code.push_instruction(Instruction::ALoad(0))?;
    code.push_instruction(Instruction::Invoke(
        InvokeType::Special,
        MethodRef::parse(superclass.as_ref(), "<init>", "()V")?,
    ))
}

fn object() -> Result<ClassDefinition, Error> {
    let mut class = ClassDefinition::new(
        BinaryName::OBJECT,
        None,
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
    );
    class.define_method("<init>", "()V", PUBLIC, |code| {
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.declare_method("wait", "()V", PUBLIC_NATIVE | MethodAccessFlags::FINAL)?;
    class.declare_method("wait", "(J)V", PUBLIC_NATIVE | MethodAccessFlags::FINAL)?;
    class.declare_method("notify", "()V", PUBLIC_NATIVE | MethodAccessFlags::FINAL)?;
    class.declare_method("notifyAll", "()V", PUBLIC_NATIVE | MethodAccessFlags::FINAL)?;
    class.declare_method("hashCode", "()I", PUBLIC_NATIVE)?;
    Ok(class)
}

fn string() -> Result<ClassDefinition, Error> {
    let mut class = ClassDefinition::new(
        BinaryName::STRING,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
    )
    .implements(BinaryName::SERIALIZABLE);
    class.define_field("value", "[C", FieldAccessFlags::PRIVATE | FieldAccessFlags::FINAL)?;
    class.define_method("length", "()I", PUBLIC, |code| {
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(FieldRef::parse(
            "java/lang/String",
            "value",
            "[C",
        )?))?;
        code.push_instruction(Instruction::ArrayLength)?;
        code.push_branch_instruction(BranchInstruction::IReturn)
    })?;
    Ok(class)
}

fn runnable() -> Result<ClassDefinition, Error> {
    let mut class = ClassDefinition::interface(BinaryName::RUNNABLE);
    class.declare_method("run", "()V", PUBLIC | MethodAccessFlags::ABSTRACT)?;
    Ok(class)
}

fn thread() -> Result<ClassDefinition, Error> {
    let target = FieldRef::parse("java/lang/Thread", "target", "Ljava/lang/Runnable;")?;
    let mut class = ClassDefinition::new(
        BinaryName::THREAD,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
    )
    .implements(BinaryName::RUNNABLE);
    class.define_field("target", "Ljava/lang/Runnable;", FieldAccessFlags::PRIVATE)?;

    class.define_method("<init>", "()V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::OBJECT)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.define_method("<init>", "(Ljava/lang/Runnable;)V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::OBJECT)?;
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::PutField(target.clone()))?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    // if (target != null) target.run();
    class.define_method("run", "()V", PUBLIC, |code| {
        let done = code.fresh_label();
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(target.clone()))?;
        code.push_instruction(Instruction::AStore(1))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_branch_instruction(BranchInstruction::IfNull(EqComparison::EQ, done, ()))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::Invoke(
            InvokeType::Interface,
            MethodRef::parse("java/lang/Runnable", "run", "()V")?,
        ))?;
        code.place_label(done)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;

    // while (isAlive()) wait();
    class.define_method(
        "join",
        "()V",
        PUBLIC | MethodAccessFlags::FINAL | MethodAccessFlags::SYNCHRONIZED,
        |code| {
            let check = code.fresh_label();
            let done = code.fresh_label();
            code.place_label(check)?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::Invoke(
                InvokeType::Virtual,
                MethodRef::parse("java/lang/Thread", "isAlive", "()Z")?,
            ))?;
            code.push_branch_instruction(BranchInstruction::If(OrdComparison::EQ, done, ()))?;
            code.push_instruction(Instruction::ALoad(0))?;
            code.push_instruction(Instruction::Invoke(
                InvokeType::Virtual,
                MethodRef::parse("java/lang/Object", "wait", "()V")?,
            ))?;
            code.push_branch_instruction(BranchInstruction::Goto(check))?;
            code.place_label(done)?;
            code.push_branch_instruction(BranchInstruction::Return)
        },
    )?;

    class.declare_method("start", "()V", PUBLIC_NATIVE)?;
    class.declare_method("isAlive", "()Z", PUBLIC_NATIVE | MethodAccessFlags::FINAL)?;
    class.declare_method("interrupt", "()V", PUBLIC_NATIVE)?;
    class.declare_method("isInterrupted", "()Z", PUBLIC_NATIVE)?;
    class.declare_method("yield", "()V", STATIC_NATIVE)?;
    class.declare_method("sleep", "(J)V", STATIC_NATIVE)?;
    class.declare_method("currentThread", "()Ljava/lang/Thread;", STATIC_NATIVE)?;
    Ok(class)
}

fn throwable() -> Result<ClassDefinition, Error> {
    let detail = FieldRef::parse("java/lang/Throwable", "detailMessage", "Ljava/lang/String;")?;
    let mut class = ClassDefinition::new(
        BinaryName::THROWABLE,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
    )
    .implements(BinaryName::SERIALIZABLE);
    class.define_field("detailMessage", "Ljava/lang/String;", FieldAccessFlags::PRIVATE)?;
    class.define_method("<init>", "()V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::OBJECT)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.define_method("<init>", "(Ljava/lang/String;)V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::OBJECT)?;
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::PutField(detail.clone()))?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.define_method("getMessage", "()Ljava/lang/String;", PUBLIC, |code| {
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(detail.clone()))?;
        code.push_branch_instruction(BranchInstruction::AReturn)
    })?;
    Ok(class)
}

/// Throwable subclass with just the two usual constructors
fn throwable_subclass(name: BinaryName, superclass: BinaryName) -> Result<ClassDefinition, Error> {
    let super_init = MethodRef::parse(superclass.as_ref(), "<init>", "(Ljava/lang/String;)V")?;
    let mut class = ClassDefinition::new(
        name,
        Some(superclass.clone()),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
    );
    class.define_method("<init>", "()V", PUBLIC, |code| {
        call_super_init(code, &superclass)?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.define_method("<init>", "(Ljava/lang/String;)V", PUBLIC, |code| {
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::Invoke(InvokeType::Special, super_init.clone()))?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    Ok(class)
}

fn weak_reference() -> Result<ClassDefinition, Error> {
    let referent = FieldRef::parse("java/lang/ref/WeakReference", "referent", "Ljava/lang/Object;")?;
    let mut class = ClassDefinition::new(
        BinaryName::WEAKREFERENCE,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
    );
    class.define_field("referent", "Ljava/lang/Object;", FieldAccessFlags::PRIVATE)?;
    class.define_method("<init>", "(Ljava/lang/Object;)V", PUBLIC, |code| {
        call_super_init(code, &BinaryName::OBJECT)?;
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::ALoad(1))?;
        code.push_instruction(Instruction::PutField(referent.clone()))?;
        code.push_branch_instruction(BranchInstruction::Return)
    })?;
    class.define_method("get", "()Ljava/lang/Object;", PUBLIC, |code| {
        code.push_instruction(Instruction::ALoad(0))?;
        code.push_instruction(Instruction::GetField(referent.clone()))?;
        code.push_branch_instruction(BranchInstruction::AReturn)
    })?;
    Ok(class)
}

fn system() -> Result<ClassDefinition, Error> {
    let mut class = ClassDefinition::new(
        BinaryName::SYSTEM,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
    );
    class.declare_method("gc", "()V", STATIC_NATIVE)?;
    Ok(class)
}

/// Checker API visible to programs: nondeterministic data choices, atomic sections, and pruning
fn verify() -> Result<ClassDefinition, Error> {
    let mut class = ClassDefinition::new(
        BinaryName::VERIFY,
        Some(BinaryName::OBJECT),
        ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL | ClassAccessFlags::SUPER,
    );
    class.declare_method("getInt", "(II)I", STATIC_NATIVE)?;
    class.declare_method("getBoolean", "()Z", STATIC_NATIVE)?;
    class.declare_method("beginAtomic", "()V", STATIC_NATIVE)?;
    class.declare_method("endAtomic", "()V", STATIC_NATIVE)?;
    class.declare_method("ignoreIf", "(Z)V", STATIC_NATIVE)?;
    Ok(class)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_graph::{ClassDatabase, ProgramSource};
    use crate::jvm::Name;

    #[test]
    fn library_builds() {
        let classes = java_library_classes().unwrap();
        assert_eq!(classes.len(), 11 + THROWABLES.len());
    }

    #[test]
    fn every_library_class_resolves() {
        let db = ClassDatabase::new(ProgramSource::with_java_library().unwrap());
        for class in java_library_classes().unwrap() {
            let id = db.resolve(&class.name).unwrap();
            assert_eq!(db.class(id).name.as_str(), class.name.as_str());
        }
        let npe = db.lookup(&BinaryName::NULLPOINTEREXCEPTION).unwrap();
        assert!(db.is_throwable(npe));
        let thread = db.lookup(&BinaryName::THREAD).unwrap();
        assert!(!db.is_throwable(thread));
    }
}
