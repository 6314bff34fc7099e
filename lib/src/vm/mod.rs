//! Execution engine
//!
//! This is the part of the checker that knows how to run managed bytecode. The restorable state
//! of the virtual machine is the [`Kernel`]: the [`Heap`], the threads with their stacks of
//! [`StackFrame`]s, and the static areas of the classes in use. Every piece of it lives in
//! copy-on-write cells ([`CowVec`]), so that a saved state costs only the cells written since.
//!
//! The [`Interpreter`] executes one instruction of one thread at a time against the kernel. It
//! never decides anything nondeterministic by itself: when the next step depends on a choice
//! (which thread runs, which value `Verify.getInt` returns, which waiter `notify` wakes), the
//! instruction reports a [`ChoiceRequest`](crate::mc::ChoiceRequest) and gets executed again once
//! the model checker has picked a choice.
//!
//! ### References and slots
//!
//! Objects are addressed by their index in the heap ([`ObjRef`]), never by host pointers. In
//! locals, operand stacks and fields, references are stored as `index + 1` so that `0` is `null`,
//! and each word carries a tag saying whether it holds a reference. `long` and `double` values
//! take two words (high word first).

mod cow;
mod errors;
mod exceptions;
mod frame;
mod gc;
mod heap;
mod interpreter;
mod invoke;
mod java_natives;
mod kernel;
mod monitor;
mod natives;
mod statics;
mod thread;
mod value;

pub use cow::*;
pub use errors::*;
pub use exceptions::UncaughtException;
pub use frame::*;
pub use heap::*;
pub use interpreter::*;
pub use kernel::*;
pub use monitor::*;
pub use natives::*;
pub use statics::*;
pub use thread::*;
pub use value::*;

#[cfg(test)]
pub(crate) mod test_support {
    use super::{Kernel, ObjRef, SlotVec, ThreadId, ThreadState};
    use crate::jvm::class_graph::ClassId;

    /// Kernel with one plain object and two runnable threads (without frames)
    pub fn kernel_with_threads() -> (Kernel, ObjRef, [ThreadId; 2]) {
        let mut kernel = Kernel::new();
        let object = kernel.heap.alloc(ClassId(0), SlotVec::zeroed(0), None);
        let t1_object = kernel.heap.alloc(ClassId(0), SlotVec::zeroed(0), None);
        let t2_object = kernel.heap.alloc(ClassId(0), SlotVec::zeroed(0), None);
        let t1 = kernel.add_thread(t1_object);
        let t2 = kernel.add_thread(t2_object);
        for thread in [t1, t2] {
            kernel
                .set_thread_state(thread, ThreadState::Runnable)
                .unwrap();
        }
        kernel.events.clear();
        (kernel, object, [t1, t2])
    }
}
