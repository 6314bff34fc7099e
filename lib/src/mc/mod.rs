//! Model checking
//!
//! Everything above the execution engine: choice generators and the frames grouping them,
//! scheduling, backtracking, state matching, observers, traces, and the search itself. The
//! [`Machine`] ties these together around a [`Kernel`](crate::vm::Kernel), and [`Search`]
//! explores its state space depth-first.

mod backtrack;
mod choice;
mod config;
mod listener;
mod machine;
mod scheduler;
pub mod search;
mod state_matcher;
mod system_state;
mod trace;

pub use backtrack::*;
pub use choice::*;
pub use config::*;
pub use listener::*;
pub use machine::*;
pub use scheduler::*;
pub use search::*;
pub use state_matcher::*;
pub use system_state::*;
pub use trace::*;
