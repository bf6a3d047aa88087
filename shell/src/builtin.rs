use crate::command::{
    Command, CommandFactory, ExecutableCommand, ExitCode, Streams, FAILURE, NOT_FOUND, SUCCESS,
};
use crate::error::{report, ShellError};
use crate::session::Session;
use anyhow::{anyhow, bail, Result};
use argh::{EarlyExit, FromArgs};
use std::io::ErrorKind;
use std::iter;
use std::marker::PhantomData;
use std::path::PathBuf;

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Rewrite raw arguments before they reach `argh`.
    ///
    /// By default everything after the name is positional, so words like `-`
    /// or `help` reach the command instead of being taken as flags. A lone
    /// `--help` still prints usage.
    fn normalize_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
        if args == ["--help"] {
            return args.to_vec();
        }
        iter::once("--").chain(args.iter().copied()).collect()
    }

    /// Executes the command using provided IO streams and session.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(self: Box<Self>, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        match <T as BuiltinCommand>::execute(*self, io, session) {
            Ok(x) => Ok(x),
            Err(e) => {
                report(e);
                Ok(FAILURE)
            }
        }
    }
}

/// Stand-in produced when `argh` refuses the arguments or was asked for help.
struct InvalidArgs {
    name: &'static str,
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(self: Box<Self>, io: &mut Streams<'_>, _session: &mut Session) -> Result<ExitCode> {
        if self.is_error {
            report(format_args!("{}: {}", self.name, self.output.trim_end()));
            return Ok(FAILURE);
        }
        io.stdout.write_all(self.output.as_bytes())?;
        Ok(SUCCESS)
    }
}

/// Factory allows creating instances of ExecutableCommand.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name != T::name() {
            return None;
        }
        let args = T::normalize_args(args);
        Some(match T::from_args(&[T::name()], &args) {
            Ok(cmd) => Box::new(cmd),
            Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                name: T::name(),
                output,
                is_error: status.is_err(),
            }),
        })
    }
}

/// The set of built-in commands the dispatcher checks before launching programs.
pub struct Builtins {
    factories: Vec<Box<dyn CommandFactory>>,
}

impl Builtins {
    /// Whether `name` is handled in-process.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.iter().any(|f| f.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.iter().map(|f| f.name())
    }

    /// Run a built-in against the given streams.
    ///
    /// Failures are reported on standard error and turned into a status.
    pub fn run(&self, command: &Command, io: &mut Streams<'_>, session: &mut Session) -> ExitCode {
        let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
        for factory in &self.factories {
            if let Some(cmd) = factory.try_create(command.name(), &args) {
                return match cmd.execute(io, session) {
                    Ok(code) => code,
                    Err(e) => {
                        report(e);
                        FAILURE
                    }
                };
            }
        }
        report(ShellError::NotFound(command.name().to_string()));
        NOT_FOUND
    }
}

impl Default for Builtins {
    /// All ten built-ins: `pwd`, `cd`, `help`, `jobs`, `history`, `echo`,
    /// `export`, `unset`, `alias` and `exit`.
    fn default() -> Self {
        Self {
            factories: vec![
                Box::new(Factory::<Pwd>::default()),
                Box::new(Factory::<Cd>::default()),
                Box::new(Factory::<Help>::default()),
                Box::new(Factory::<Jobs>::default()),
                Box::new(Factory::<History>::default()),
                Box::new(Factory::<Echo>::default()),
                Box::new(Factory::<Export>::default()),
                Box::new(Factory::<Unset>::default()),
                Box::new(Factory::<Alias>::default()),
                Box::new(Factory::<Exit>::default()),
            ],
        }
    }
}

/// Strip one layer of surrounding quotes from an assigned value.
fn unquote(value: &str) -> &str {
    value.trim_matches(|c| c == '\'' || c == '"')
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        writeln!(io.stdout, "{}", session.current_dir.to_string_lossy())?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, changes to the directory specified by the HOME environment variable.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to, or `-` for the previous one. Defaults to $HOME when omitted.
    pub args: Vec<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        let (target, announce) = match self.args.as_slice() {
            [] => (session.home_dir().ok_or_else(|| anyhow!("cd: HOME not set"))?, false),
            [dash] if dash == "-" => (
                session
                    .previous_dir
                    .clone()
                    .ok_or_else(|| anyhow!("cd: OLDPWD not set"))?,
                true,
            ),
            [dir] => (PathBuf::from(dir), false),
            _ => bail!("cd: too many arguments"),
        };

        session.change_dir(&target).map_err(|e| match e.kind() {
            ErrorKind::NotFound => anyhow!("cd: no such file or directory: {}", target.display()),
            _ => anyhow!("cd: {}: {e}", target.display()),
        })?;
        if announce {
            writeln!(io.stdout, "{}", session.current_dir.display())?;
        }
        Ok(SUCCESS)
    }
}

const HELP_TEXT: &str = "\
Available commands:
  exit [code]      - Exit the shell with optional exit code
  cd [directory]   - Change current directory (default: home)
  cd -             - Change to previous directory
  pwd              - Print current working directory
  help             - Show this help message
  jobs             - List active background jobs
  history          - Show command history
  echo [-n] [text] - Print text to stdout (-n: no newline)
  export [VAR=val] - Set environment variable or list all
  unset VAR        - Remove environment variable
  alias [name=cmd] - Create or list command aliases

Special operators:
  &                - Run command in background
  |                - Pipe output between commands
  >, >>, <         - I/O redirection
  Ctrl+C           - Interrupt (doesn't exit shell)
  Ctrl+D           - Exit shell";

#[derive(FromArgs)]
/// Show the built-in commands and operators.
pub struct Help {}

impl BuiltinCommand for Help {
    fn name() -> &'static str {
        "help"
    }

    fn execute(self, io: &mut Streams<'_>, _session: &mut Session) -> Result<ExitCode> {
        writeln!(io.stdout, "{HELP_TEXT}")?;
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// List background jobs that have not been reported as finished yet.
pub struct Jobs {}

impl BuiltinCommand for Jobs {
    fn name() -> &'static str {
        "jobs"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        if session.jobs.is_empty() {
            writeln!(io.stdout, "No active background jobs.")?;
            return Ok(SUCCESS);
        }
        writeln!(io.stdout, "Active background jobs:")?;
        for job in session.jobs.iter() {
            writeln!(io.stdout, "[{}] {} {}    {}", job.index, job.pid, job.status, job.command)?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Show the most recent command lines.
pub struct History {}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        if session.history.is_empty() {
            writeln!(io.stdout, "No commands in history.")?;
            return Ok(SUCCESS);
        }
        let skip = session.history.len().saturating_sub(session.history_limit);
        writeln!(io.stdout, "Command history:")?;
        for (i, line) in session.history.iter().skip(skip).enumerate() {
            writeln!(io.stdout, "  {:2}  {line}", i + 1)?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// write the arguments to standard output, separated by spaces.
/// by default, a trailing newline is printed.
pub struct Echo {
    #[argh(switch, short = 'n')]
    /// do not output the trailing newline.
    pub no_newline: bool,

    #[argh(positional, greedy)]
    /// values to print as-is, separated by spaces.
    pub args: Vec<String>,
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    /// Only a leading `-n` is a flag; everything else is printed verbatim.
    fn normalize_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
        match args.split_first() {
            Some((&"-n", rest)) => ["-n", "--"].into_iter().chain(rest.iter().copied()).collect(),
            _ => iter::once("--").chain(args.iter().copied()).collect(),
        }
    }

    fn execute(self, io: &mut Streams<'_>, _session: &mut Session) -> Result<ExitCode> {
        let s = self.args.join(" ");
        if self.no_newline {
            write!(io.stdout, "{}", s)?;
        } else {
            writeln!(io.stdout, "{}", s)?;
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Set variables passed to launched programs, or list them all.
pub struct Export {
    #[argh(positional, greedy)]
    /// assignments of the form name=value, or names of variables that already exist.
    pub args: Vec<String>,
}

impl BuiltinCommand for Export {
    fn name() -> &'static str {
        "export"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        if self.args.is_empty() {
            let mut vars: Vec<_> = session.vars.iter().collect();
            vars.sort();
            for (key, value) in vars {
                writeln!(io.stdout, "export {key}='{value}'")?;
            }
            return Ok(SUCCESS);
        }
        for arg in &self.args {
            match arg.split_once('=') {
                Some((name, value)) if !name.is_empty() => session.set_var(name, unquote(value)),
                Some(_) => bail!("export: invalid argument: {arg}"),
                None if session.get_var(arg).is_some() => {}
                None => bail!("export: invalid argument: {arg}"),
            }
        }
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Remove a variable.
pub struct Unset {
    #[argh(positional, greedy)]
    /// the variable name.
    pub args: Vec<String>,
}

impl BuiltinCommand for Unset {
    fn name() -> &'static str {
        "unset"
    }

    fn execute(self, _io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        let [name] = self.args.as_slice() else {
            bail!("unset: usage: unset VAR");
        };
        session.remove_var(name);
        Ok(SUCCESS)
    }
}

#[derive(FromArgs)]
/// Define a command alias, or list the defined ones.
pub struct Alias {
    #[argh(positional, greedy)]
    /// a single name=value definition.
    pub args: Vec<String>,
}

impl BuiltinCommand for Alias {
    fn name() -> &'static str {
        "alias"
    }

    fn execute(self, io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        match self.args.as_slice() {
            [] => {
                for (name, value) in &session.aliases {
                    writeln!(io.stdout, "alias {name}='{value}'")?;
                }
                Ok(SUCCESS)
            }
            [definition] => match definition.split_once('=') {
                Some((name, value)) if !name.is_empty() => {
                    session.aliases.insert(name.to_string(), unquote(value).to_string());
                    Ok(SUCCESS)
                }
                _ => bail!("alias: usage: alias [name=value]"),
            },
            _ => bail!("alias: usage: alias [name=value]"),
        }
    }
}

#[derive(FromArgs)]
/// Exit the shell with an optional status code.
pub struct Exit {
    #[argh(positional, greedy)]
    /// status to exit with, 0 when omitted. Extra arguments are ignored.
    pub args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(self, _io: &mut Streams<'_>, session: &mut Session) -> Result<ExitCode> {
        session.should_exit = true;
        match self.args.first() {
            None => Ok(SUCCESS),
            Some(raw) => raw
                .parse::<ExitCode>()
                .map_err(|_| anyhow!("Invalid exit code: {raw}")),
        }
    }
}
