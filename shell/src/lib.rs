//! The process execution and job-control core of a small interactive shell.
//!
//! A command line arrives as tokens and goes through [`dispatch::dispatch`],
//! which chooses between a pipeline, a redirected command, a built-in run
//! in-process, or a plain external program started with fork/exec.
//! Background programs are tracked in the [`jobs::JobTable`] owned by the
//! [`Session`]; the [`signals`] module only counts signal deliveries so that
//! all reaping happens synchronously in the main loop.
//!
//! The main entry point is [`Interpreter`], which owns the session and runs
//! the interactive loop on top of these pieces.

pub mod builtin;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
mod interpreter;
pub mod jobs;
pub mod launcher;
pub mod lexer;
pub mod pipeline;
pub mod redirect;
pub mod session;
pub mod signals;

/// Just a convenient re-export of the interactive shell.
///
/// See [`Interpreter`] for the high-level API.
pub use interpreter::{Interpreter, INTERRUPT_ADVISORY, SUSPEND_ADVISORY};

pub use config::ShellConfig;
pub use error::ShellError;
pub use session::Session;
