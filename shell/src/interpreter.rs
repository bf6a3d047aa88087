use crate::builtin::Builtins;
use crate::command::{ExitCode, Streams, FAILURE};
use crate::config::ShellConfig;
use crate::dispatch;
use crate::error::report;
use crate::lexer::Lexer;
use crate::session::Session;
use crate::signals::SignalBridge;
use gethostname::gethostname;
use nix::unistd::{getuid, User};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, trace};

pub const INTERRUPT_ADVISORY: &str = "Use 'exit' to quit the shell.";
pub const SUSPEND_ADVISORY: &str = "Shell suspension disabled. Use 'exit' to quit.";

/// An interactive shell: session state, built-ins and the signal bridge.
///
/// The interpreter owns the [`Session`] and passes it explicitly to every
/// command. Lines go through [`Interpreter::run_line`]; already tokenized
/// commands can be handed to [`Interpreter::dispatch`] directly.
///
/// Example
/// ```no_run
/// use jobsh::{Interpreter, ShellConfig};
/// let mut sh = Interpreter::new(ShellConfig::default()).unwrap();
/// let code = sh.run_line("echo hello world | tr a-z A-Z");
/// assert_eq!(code, 0);
/// std::process::exit(sh.shutdown());
/// ```
pub struct Interpreter {
    session: Session,
    builtins: Builtins,
    lexer: Lexer,
    signals: Option<SignalBridge>,
    config: ShellConfig,
}

impl Interpreter {
    /// Set up the session and, unless disabled, install the signal handlers.
    pub fn new(config: ShellConfig) -> anyhow::Result<Self> {
        let mut session = Session::new()?;
        session.history_limit = config.history_limit;
        let signals = if config.no_signals {
            None
        } else {
            Some(SignalBridge::install()?)
        };
        Ok(Self {
            session,
            builtins: Builtins::default(),
            lexer: Lexer::new()?,
            signals,
            config,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// False once `exit` has run.
    pub fn is_running(&self) -> bool {
        !self.session.should_exit
    }

    /// Run already tokenized arguments with the process's own stdin/stdout.
    pub fn dispatch(&mut self, tokens: &[String]) -> ExitCode {
        let stdin = io::stdin();
        let mut stdin = stdin.lock();
        let mut stdout = io::stdout();
        let mut io = Streams::new(&mut stdin, &mut stdout);
        self.dispatch_with(tokens, &mut io)
    }

    /// Run already tokenized arguments against the given streams and record the status.
    pub fn dispatch_with(&mut self, tokens: &[String], io: &mut Streams<'_>) -> ExitCode {
        let code = dispatch::dispatch(&mut self.session, &self.builtins, tokens, io);
        self.session.last_status = code;
        code
    }

    /// Run one raw command line with the process's own stdin/stdout.
    pub fn run_line(&mut self, line: &str) -> ExitCode {
        let stdin = io::stdin();
        let mut stdin = stdin.lock();
        let mut stdout = io::stdout();
        let mut io = Streams::new(&mut stdin, &mut stdout);
        self.run_line_with(line, &mut io)
    }

    /// Record, tokenize, alias-expand and dispatch one raw command line.
    ///
    /// Blank and comment-only lines leave the last status unchanged.
    pub fn run_line_with(&mut self, line: &str, io: &mut Streams<'_>) -> ExitCode {
        let line = line.trim();
        if line.is_empty() {
            return self.session.last_status;
        }
        self.session.history.push(line.to_string());

        let session = &self.session;
        let tokens = self.lexer.split_into_tokens(line, |name| {
            if name == "?" {
                Some(session.last_status.to_string())
            } else {
                session.get_var(name).map(str::to_owned)
            }
        });
        let tokens = match tokens {
            Ok(tokens) => tokens,
            Err(err) => {
                report(err);
                self.session.last_status = FAILURE;
                return FAILURE;
            }
        };
        if tokens.is_empty() {
            return self.session.last_status;
        }

        let tokens = expand_alias(&self.session.aliases, tokens);
        trace!(?tokens, "dispatching");
        self.dispatch_with(&tokens, io)
    }

    /// Handle everything that happened since the last call: pending signals
    /// and finished background jobs.
    ///
    /// Called before every prompt. Writes advisories and completion notices to `out`.
    pub fn service_background(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if let Some(signals) = &self.signals {
            let pending = signals.take();
            if !pending.is_empty() {
                trace!(?pending, "signals delivered");
            }
            if pending.interrupts > 0 {
                writeln!(out, "\n{INTERRUPT_ADVISORY}")?;
            }
            if pending.stops > 0 {
                writeln!(out, "\n{SUSPEND_ADVISORY}")?;
            }
        }
        for job in self.session.jobs.reap() {
            writeln!(out, "{}", job.completion_notice())?;
        }
        out.flush()
    }

    /// `user@host:path$ ` for the current session.
    pub fn prompt(&self) -> String {
        let user = User::from_uid(getuid())
            .ok()
            .flatten()
            .map(|u| u.name)
            .or_else(|| self.session.get_var("USER").map(str::to_owned))
            .unwrap_or_else(|| "user".to_string());
        let host = gethostname().to_string_lossy().into_owned();
        let home = self.session.home_dir();
        format!(
            "{user}@{host}:{}$ ",
            shorten_home(&self.session.current_dir, home.as_deref())
        )
    }

    /// The interactive loop, until `exit` or end of input.
    pub fn repl(&mut self) -> anyhow::Result<()> {
        let mut rl = DefaultEditor::new()?;

        while self.is_running() {
            self.service_background(&mut io::stdout())?;
            match rl.readline(&self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        rl.add_history_entry(line.as_str())?;
                    }
                    self.run_line(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{INTERRUPT_ADVISORY}");
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Tear the shell down and return the status the process should exit with.
    ///
    /// Still-running background jobs get SIGTERM, then SIGKILL after the
    /// configured grace interval.
    pub fn shutdown(self) -> ExitCode {
        self.shutdown_with(&mut io::stdout())
    }

    /// [`Interpreter::shutdown`], writing notices and the teardown report to `out`.
    ///
    /// Jobs that finished since the last prompt still get their completion
    /// notice, whatever the verbosity.
    pub fn shutdown_with(mut self, out: &mut dyn Write) -> ExitCode {
        let verbose = !self.config.quiet && self.config.command.is_none();
        if verbose {
            let _ = writeln!(out, "Cleaning up shell resources...");
            if !self.session.jobs.is_empty() {
                let _ = writeln!(out, "Terminating background processes...");
            }
        }
        let teardown = self.session.jobs.terminate_all(self.config.grace());
        for job in &teardown.finished {
            let _ = writeln!(out, "{}", job.completion_notice());
        }
        debug!(count = teardown.signalled.len(), "terminated background jobs");
        self.signals = None;

        let status = self.session.last_status;
        if verbose {
            let _ = writeln!(out, "Shell exited with status: {status}");
        }
        let _ = out.flush();
        status
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        if !self.session.jobs.is_empty() {
            self.session.jobs.terminate_all(self.config.grace());
        }
    }
}

/// Replace a leading alias name with its definition, split on whitespace.
///
/// Only one level: the definition itself is not looked up again.
fn expand_alias(aliases: &BTreeMap<String, String>, mut tokens: Vec<String>) -> Vec<String> {
    let Some(value) = tokens.first().and_then(|first| aliases.get(first)) else {
        return tokens;
    };
    let mut expanded: Vec<String> = value.split_whitespace().map(String::from).collect();
    if expanded.is_empty() {
        return tokens;
    }
    expanded.extend(tokens.drain(1..));
    expanded
}

fn shorten_home(cwd: &Path, home: Option<&Path>) -> String {
    match home.and_then(|h| cwd.strip_prefix(h).ok()) {
        Some(rest) if rest.as_os_str().is_empty() => "~".to_string(),
        Some(rest) => format!("~/{}", rest.display()),
        None => cwd.display().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_current_dir;
    use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
    use std::fs;
    use std::io::Cursor;
    use std::thread;
    use std::time::{Duration, Instant};

    fn no_signals() -> Interpreter {
        Interpreter::new(ShellConfig {
            no_signals: true,
            ..ShellConfig::default()
        })
        .unwrap()
    }

    fn run(sh: &mut Interpreter, line: &str) -> (ExitCode, String) {
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let code = {
            let mut io = Streams::new(&mut input, &mut out);
            sh.run_line_with(line, &mut io)
        };
        (code, String::from_utf8(out).unwrap())
    }

    fn toks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn alias_expansion_is_one_level() {
        let mut aliases = BTreeMap::new();
        aliases.insert("ll".to_string(), "ls -l".to_string());
        aliases.insert("ls".to_string(), "ls --color".to_string());

        assert_eq!(expand_alias(&aliases, toks(&["ll", "/tmp"])), toks(&["ls", "-l", "/tmp"]));
        assert_eq!(expand_alias(&aliases, toks(&["echo", "ll"])), toks(&["echo", "ll"]));
    }

    #[test]
    fn home_is_shortened_in_prompt_path() {
        let home = Path::new("/home/u");
        assert_eq!(shorten_home(Path::new("/home/u"), Some(home)), "~");
        assert_eq!(shorten_home(Path::new("/home/u/src/x"), Some(home)), "~/src/x");
        assert_eq!(shorten_home(Path::new("/home/user2"), Some(home)), "/home/user2");
        assert_eq!(shorten_home(Path::new("/tmp"), None), "/tmp");
    }

    #[test]
    fn prompt_ends_with_dollar() {
        let sh = no_signals();
        let prompt = sh.prompt();
        assert!(prompt.contains('@'));
        assert!(prompt.ends_with("$ "));
    }

    #[test]
    fn run_line_records_history_and_status() {
        let mut sh = no_signals();
        assert_eq!(run(&mut sh, "echo hi"), (0, "hi\n".into()));
        assert_eq!(run(&mut sh, "false").0, 1);
        assert_eq!(sh.session().last_status, 1);
        assert_eq!(run(&mut sh, "echo $?"), (0, "1\n".into()));
        assert_eq!(run(&mut sh, "   ").0, 0);
        assert_eq!(sh.session().history, toks(&["echo hi", "false", "echo $?"]));
    }

    #[test]
    fn dispatch_uses_process_streams() {
        let mut sh = no_signals();
        assert_eq!(sh.dispatch(&toks(&["sh", "-c", "exit 2"])), 2);
        assert_eq!(sh.session().last_status, 2);
        assert_eq!(sh.dispatch(&toks(&["true"])), 0);
    }

    #[test]
    fn lexing_errors_fail_the_line() {
        let mut sh = no_signals();
        assert_eq!(run(&mut sh, "echo 'unterminated").0, 1);
        assert_eq!(sh.session().last_status, 1);
    }

    #[test]
    fn aliases_apply_to_the_first_word() {
        let mut sh = no_signals();
        assert_eq!(run(&mut sh, "alias greet='echo hello'").0, 0);
        assert_eq!(run(&mut sh, "greet world"), (0, "hello world\n".into()));
    }

    #[test]
    fn exported_variables_reach_children() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("env.txt");
        let mut sh = no_signals();

        assert_eq!(run(&mut sh, "export JOBSH_TEST_VALUE=visible").0, 0);
        let line = format!("sh -c 'echo $JOBSH_TEST_VALUE' > {}", out.display());
        assert_eq!(run(&mut sh, &line).0, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "visible\n");

        assert_eq!(run(&mut sh, "unset JOBSH_TEST_VALUE").0, 0);
        assert_eq!(run(&mut sh, &line).0, 0);
        assert_eq!(fs::read_to_string(&out).unwrap(), "\n");
    }

    #[test]
    fn cd_and_back_through_run_line() {
        let _lock = lock_current_dir();
        let orig = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = fs::canonicalize(tmp.path()).unwrap();

        let mut sh = no_signals();
        let start = fs::canonicalize(&sh.session().current_dir).unwrap();
        assert_eq!(run(&mut sh, &format!("cd {}", target.display())).0, 0);
        assert_eq!(run(&mut sh, "pwd"), (0, format!("{}\n", target.display())));
        assert_eq!(run(&mut sh, "cd -").0, 0);
        assert_eq!(sh.session().current_dir, start);

        std::env::set_current_dir(orig).unwrap();
    }

    #[test]
    fn background_job_is_reported_exactly_once() {
        let mut sh = no_signals();
        let (code, started) = run(&mut sh, "sh -c 'exit 4' &");
        assert_eq!(code, 0);
        assert!(started.ends_with("started in background\n"), "{started}");
        assert_eq!(sh.session().jobs.len(), 1);

        let deadline = Instant::now() + Duration::from_secs(10);
        let mut notices = Vec::new();
        while sh.session().jobs.len() == 1 && Instant::now() < deadline {
            sh.service_background(&mut notices).unwrap();
            thread::sleep(Duration::from_millis(10));
        }
        sh.service_background(&mut notices).unwrap();

        let notices = String::from_utf8(notices).unwrap();
        assert_eq!(notices.lines().count(), 1, "{notices}");
        assert!(notices.contains("Done (exit status: 4)"), "{notices}");
        assert!(sh.session().jobs.is_empty());
    }

    #[test]
    fn exit_stops_the_loop_and_sets_status() {
        let mut sh = no_signals();
        assert!(sh.is_running());
        assert_eq!(run(&mut sh, "exit 5").0, 5);
        assert!(!sh.is_running());
        let quiet = ShellConfig {
            quiet: true,
            ..ShellConfig::default()
        };
        sh.config = quiet;
        assert_eq!(sh.shutdown(), 5);
    }

    #[test]
    fn shutdown_terminates_running_jobs() {
        let mut sh = Interpreter::new(ShellConfig {
            no_signals: true,
            quiet: true,
            grace_ms: 20,
            ..ShellConfig::default()
        })
        .unwrap();
        run(&mut sh, "sleep 30 &");
        let pid = sh.session().jobs.iter().next().unwrap().pid;

        let started = Instant::now();
        assert_eq!(sh.shutdown(), 0);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(nix::sys::signal::kill(pid, None).is_err());
    }

    #[test]
    fn shutdown_reports_jobs_finished_since_last_prompt() {
        let mut sh = Interpreter::new(ShellConfig {
            no_signals: true,
            quiet: true,
            grace_ms: 20,
            ..ShellConfig::default()
        })
        .unwrap();
        run(&mut sh, "sh -c 'exit 2' &");
        let pid = sh.session().jobs.iter().next().unwrap().pid;
        // not collected here, so only teardown can report it
        let deadline = Instant::now() + Duration::from_secs(10);
        let peek = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        while !matches!(waitid(Id::Pid(pid), peek), Ok(WaitStatus::Exited(..))) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let mut out = Vec::new();
        assert_eq!(sh.shutdown_with(&mut out), 0);
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, format!("[1] {pid} Done (exit status: 2)    sh -c exit 2\n"));
    }
}
