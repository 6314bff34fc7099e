//! Bytecode representation and generation
//!
//! ### Structure
//!
//! Method bodies are essentially just a CFG of basic blocks, with an operand stack and an array
//! of local variables. We split up the [list of bytecode instructions][0] into two groups:
//!
//!   - [`Instruction`] for straight-line instructions (the body of the basic blocks)
//!   - [`BranchInstruction`] for instructions that may branch (the end of the basic blocks)
//!
//! With these, we can literally represent the method [`Code`] as an ordered sequence of
//! [`BasicBlock`]s. Before execution, [`Code::link`] flattens the blocks into a [`MethodBody`]
//! indexed by program counter ([`Pc`]).
//!
//! ### Code generation
//!
//! [`CodeBuilder`] provides an interface for generating method code from top to bottom, taking
//! care of labels, block boundaries, and the size of the locals array.
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se18/html/jvms-6.html#jvms-6.5

mod basic_block;
mod code;
mod code_builder;
mod instructions;
mod label;

pub use basic_block::*;
pub use code::*;
pub use code_builder::*;
pub use instructions::*;
pub use label::*;
