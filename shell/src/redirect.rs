//! Input/output redirection with `<`, `>` and `>>`.

use crate::builtin::Builtins;
use crate::command::{Command, ExitCode, Streams};
use crate::dispatch::{APPEND, READ_FROM, WRITE_TO};
use crate::error::{report, ShellError};
use crate::launcher::launch;
use crate::session::Session;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where standard output goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub path: PathBuf,
    /// `>>` rather than `>`.
    pub append: bool,
}

/// A command with its redirection operators pulled out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectionSpec {
    pub command: Vec<String>,
    pub input: Option<PathBuf>,
    pub output: Option<OutputTarget>,
}

impl RedirectionSpec {
    /// Separate `tokens` into the command and its redirections.
    ///
    /// A later operator of the same direction replaces an earlier one, so only
    /// the last target per stream is ever opened.
    pub fn parse(tokens: &[String]) -> Result<Self, ShellError> {
        let mut command = Vec::new();
        let mut input = None;
        let mut output = None;

        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            let op = token.as_str();
            if op != READ_FROM && op != WRITE_TO && op != APPEND {
                command.push(token.clone());
                continue;
            }
            let target = iter
                .next()
                .ok_or_else(|| ShellError::Usage(format!("missing file name after '{op}'")))?;
            let path = PathBuf::from(target);
            if op == READ_FROM {
                input = Some(path);
            } else {
                output = Some(OutputTarget {
                    path,
                    append: op == APPEND,
                });
            }
        }

        if command.is_empty() {
            return Err(ShellError::Usage("missing command before redirection".to_string()));
        }
        Ok(Self { command, input, output })
    }

    fn open_input(&self) -> Result<Option<File>, ShellError> {
        self.input
            .as_deref()
            .map(|path| File::open(path).map_err(|e| resource(path, e)))
            .transpose()
    }

    fn open_output(&self) -> Result<Option<File>, ShellError> {
        self.output
            .as_ref()
            .map(|target| {
                let mut options = OpenOptions::new();
                options.create(true);
                if target.append {
                    options.append(true);
                } else {
                    options.write(true).truncate(true);
                }
                options.open(&target.path).map_err(|e| resource(&target.path, e))
            })
            .transpose()
    }
}

fn resource(path: &Path, source: io::Error) -> ShellError {
    ShellError::Resource {
        path: path.display().to_string(),
        source,
    }
}

/// Run a command whose tokens contain redirection operators.
///
/// Targets are opened before anything runs; if one fails the command is not
/// started. Opened files are closed when this returns.
pub fn run_redirected(
    session: &mut Session,
    builtins: &Builtins,
    tokens: &[String],
    io: &mut Streams<'_>,
) -> ExitCode {
    match redirect(session, builtins, tokens, io) {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            err.status()
        }
    }
}

fn redirect(
    session: &mut Session,
    builtins: &Builtins,
    tokens: &[String],
    io: &mut Streams<'_>,
) -> Result<ExitCode, ShellError> {
    let spec = RedirectionSpec::parse(tokens)?;
    let mut input = spec.open_input()?;
    let mut output = spec.open_output()?;
    debug!(input = ?spec.input, output = ?spec.output, "redirecting");

    let command = Command::new(spec.command)?;
    if builtins.contains(command.name()) {
        let mut scoped = io.scoped(
            input.as_mut().map(|f| f as &mut dyn Read),
            output.as_mut().map(|f| f as &mut dyn Write),
        );
        let code = builtins.run(&command, &mut scoped, session);
        scoped.stdout.flush()?;
        return Ok(code);
    }

    io.stdout.flush()?;
    let outcome = launch(
        session,
        &command,
        input.as_ref().map(|f| f.as_fd()),
        output.as_ref().map(|f| f.as_fd()),
        false,
        &mut *io.stdout,
    );
    Ok(outcome.status())
}
