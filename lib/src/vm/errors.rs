use super::{ObjRef, ThreadId};
use crate::jvm;
use crate::jvm::class_graph::ResolveError;
use crate::jvm::code::Pc;
use std::fmt;

/// Internal errors of the checker
///
/// These are consistency violations (defects in the checker or a misbehaving native/observer),
/// never findings about the program under test. They abort the run.
#[derive(Debug)]
pub enum VmError {
    /// Class definitions could not be built
    Definition(jvm::Error),

    /// A monitor was released by a thread that does not own it
    UnownedMonitor { thread: ThreadId, object: ObjRef },

    /// An instruction popped more operands than the frame holds
    StackUnderflow { method: String, pc: Pc },

    /// A class the engine itself relies on (eg. `java/lang/String`) is unavailable
    Resolve(ResolveError),

    /// A thread without frames was asked to execute
    NoFrame(ThreadId),

    /// A reference does not point to a live object
    InvalidReference(ObjRef),

    /// A slot was read with the wrong shape (eg. an array access on a plain object)
    BadOperand(String),

    /// Mementos and the choice stack disagree
    MementoMismatch(String),

    /// A data choice was requested inside an atomic section
    ChoiceInAtomic { thread: ThreadId, method: String, pc: Pc },

    /// A replayed trace does not match the program
    TraceDiverged { transition: usize, reason: String },

    /// The main class could not be set up
    BadEntryPoint(String),

    /// A listener asked to abort the run
    Listener(String),

    /// Persisting or loading a trace failed
    Io(std::io::Error),
}

impl From<jvm::Error> for VmError {
    fn from(err: jvm::Error) -> VmError {
        VmError::Definition(err)
    }
}

impl From<ResolveError> for VmError {
    fn from(err: ResolveError) -> VmError {
        VmError::Resolve(err)
    }
}

impl From<std::io::Error> for VmError {
    fn from(err: std::io::Error) -> VmError {
        VmError::Io(err)
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::Definition(err) => write!(f, "bad class definition: {}", err),
            VmError::UnownedMonitor { thread, object } => write!(
                f,
                "thread {} released monitor of {} without owning it",
                thread, object
            ),
            VmError::StackUnderflow { method, pc } => {
                write!(f, "operand stack underflow in {} at {}", method, pc)
            }
            VmError::Resolve(err) => write!(f, "{}", err),
            VmError::NoFrame(thread) => write!(f, "thread {} has no frame to execute", thread),
            VmError::InvalidReference(obj) => write!(f, "dangling reference {}", obj),
            VmError::BadOperand(msg) => write!(f, "bad operand: {}", msg),
            VmError::MementoMismatch(msg) => write!(f, "memento mismatch: {}", msg),
            VmError::ChoiceInAtomic { thread, method, pc } => write!(
                f,
                "thread {} requested a data choice inside an atomic section ({} at {})",
                thread, method, pc
            ),
            VmError::TraceDiverged { transition, reason } => {
                write!(f, "trace diverged at transition {}: {}", transition, reason)
            }
            VmError::BadEntryPoint(msg) => write!(f, "bad entry point: {}", msg),
            VmError::Listener(msg) => write!(f, "listener failure: {}", msg),
            VmError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for VmError {}
