//! Top-level controller
//!
//! Turns button presses (or Enter on stdin in manual mode) into
//! conversation sessions and keeps the indicator in step with them.

mod machine;
mod manual;

pub use machine::{Controller, Exit};
pub use manual::spawn_stdin_reader;
