use crate::error::ShellError;
use crate::session::Session;
use anyhow::Result;
use std::fmt;
use std::io::{Read, Write};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

pub const SUCCESS: ExitCode = 0;
pub const FAILURE: ExitCode = 1;
pub const PERMISSION_DENIED: ExitCode = 126;
pub const NOT_FOUND: ExitCode = 127;
/// Added to the signal number when a child is killed by a signal.
pub const SIGNAL_BASE: ExitCode = 128;

/// One argument vector ready for execution.
///
/// `argv[0]` is the program or built-in name. The vector is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    argv: Vec<String>,
}

impl Command {
    pub fn new(argv: Vec<String>) -> Result<Self, ShellError> {
        if argv.is_empty() {
            return Err(ShellError::Usage("empty command".to_string()));
        }
        Ok(Self { argv })
    }

    pub fn name(&self) -> &str {
        &self.argv[0]
    }

    pub fn args(&self) -> &[String] {
        &self.argv[1..]
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv.join(" "))
    }
}

/// Standard input and output as seen by in-process commands.
///
/// External programs always use real descriptors; built-ins read and write
/// through these handles so that redirection can swap them for the duration
/// of a single call.
pub struct Streams<'a> {
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
}

impl<'a> Streams<'a> {
    pub fn new(stdin: &'a mut dyn Read, stdout: &'a mut dyn Write) -> Self {
        Self { stdin, stdout }
    }

    /// Borrow these streams with either side optionally replaced.
    ///
    /// The originals are untouched and become usable again as soon as the
    /// returned value is dropped, whatever the command did in between.
    pub fn scoped<'b>(
        &'b mut self,
        stdin: Option<&'b mut dyn Read>,
        stdout: Option<&'b mut dyn Write>,
    ) -> Streams<'b> {
        Streams {
            stdin: match stdin {
                Some(r) => r,
                None => &mut *self.stdin,
            },
            stdout: match stdout {
                Some(w) => w,
                None => &mut *self.stdout,
            },
        }
    }
}

/// Object-safe trait for any command executed inside the shell process.
pub trait ExecutableCommand {
    /// Executes the command.
    fn execute(self: Box<Self>, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode>;
}

/// Factory that tries to create a command from a name and its arguments.
///
/// Returns `None` when the factory doesn't recognize the `name`.
pub trait CommandFactory {
    /// The name this factory answers to.
    fn name(&self) -> &'static str;

    /// Attempt to create a command instance for the provided name and arguments.
    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>>;
}
