//! Console front end: the line-oriented host that drives a [`Session`](crate::Session).

pub mod console;
pub mod status;

pub use console::run_console;
