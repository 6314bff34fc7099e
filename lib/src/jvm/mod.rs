//! Describe and resolve JVM classes
//!
//! Programs are handed to the checker as [`class_graph::ClassDefinition`]s, whose method bodies
//! are built with a [`code::CodeBuilder`]. The [`class_graph::ClassDatabase`] resolves them
//! lazily (linking method bodies and laying out fields) as execution first needs them.
//!
//! ### Simple example
//!
//! Consider the following simple Java class:
//!
//! ```java,ignore,no_run
//! public class Point {
//!     public int x;
//!     public int y;
//!
//!     public Point(int x, int y) {
//!         this.x = x;
//!         this.y = y;
//!     }
//! }
//! ```
//!
//! Defining and resolving an analogous class can be done as follows:
//!
//! ```
//! use jvmc::jvm::class_graph::*;
//! use jvmc::jvm::code::{BranchInstruction::*, FieldRef, Instruction::*, InvokeType, MethodRef};
//! use jvmc::jvm::*;
//!
//! # fn define_class() -> Result<(), Error> {
//! let mut point = ClassDefinition::class("me/alec/Point")?;
//! point.define_field("x", "I", FieldAccessFlags::PUBLIC)?;
//! point.define_field("y", "I", FieldAccessFlags::PUBLIC)?;
//! point.define_method("<init>", "(II)V", MethodAccessFlags::PUBLIC, |code| {
//!     code.push_instruction(ALoad(0))?;
//!     code.push_instruction(Invoke(
//!         InvokeType::Special,
//!         MethodRef::parse("java/lang/Object", "<init>", "()V")?,
//!     ))?;
//!     code.push_instruction(ALoad(0))?;
//!     code.push_instruction(ILoad(1))?;
//!     code.push_instruction(PutField(FieldRef::parse("me/alec/Point", "x", "I")?))?;
//!     code.push_instruction(ALoad(0))?;
//!     code.push_instruction(ILoad(2))?;
//!     code.push_instruction(PutField(FieldRef::parse("me/alec/Point", "y", "I")?))?;
//!     code.push_branch_instruction(Return)
//! })?;
//!
//! // Add the class next to the built-in library classes, then resolve it
//! let mut program = ProgramSource::with_java_library()?;
//! program.add_class(point)?;
//! let database = ClassDatabase::new(program);
//! let class = database
//!     .resolve(&parse_class_name("me/alec/Point")?)
//!     .expect("class resolves");
//! assert_eq!(database.class(class).instance_slots, 2);
//! # Ok(())
//! # }
//! # define_class().unwrap();
//! ```

mod access_flags;
pub mod class_graph;
pub mod code;
mod descriptors;
mod errors;
mod names;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
