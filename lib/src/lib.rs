//! Explicit-state model checker for JVM-style bytecode
//!
//! Programs are given as in-memory class definitions (see [`jvm::class_graph`]), with method
//! bodies assembled with [`jvm::code::CodeBuilder`]. The checker interprets them itself
//! ([`vm`]), turning every nondeterministic decision (thread scheduling, `jvmc/Verify` data
//! choices, which waiter `notify` wakes) into an explicit choice that the search ([`mc`])
//! enumerates exhaustively, backtracking through copy-on-write snapshots of the heap and threads.
//!
//! ```no_run
//! use jvmc::demos::{self, Demo};
//! use jvmc::mc::{Config, Search};
//!
//! let machine = demos::machine(Demo::LockOrder, &demos::DemoSize::default(), Config::new())?;
//! let report = Search::new(machine).run()?;
//! assert!(report.has_findings());
//! # Ok::<(), jvmc::vm::VmError>(())
//! ```

pub mod demos;
pub mod jvm;
pub mod mc;
pub mod util;
pub mod vm;
