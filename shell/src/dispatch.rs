//! Picks how a tokenized command line is run.

use crate::builtin::Builtins;
use crate::command::{Command, ExitCode, Streams, FAILURE};
use crate::error::report;
use crate::launcher::launch;
use crate::pipeline::run_pipeline;
use crate::redirect::run_redirected;
use crate::session::Session;
use tracing::debug;

pub const BACKGROUND: &str = "&";
pub const PIPE: &str = "|";
pub const READ_FROM: &str = "<";
pub const WRITE_TO: &str = ">";
pub const APPEND: &str = ">>";

fn is_redirection(token: &str) -> bool {
    token == READ_FROM || token == WRITE_TO || token == APPEND
}

/// Run one tokenized command line and return its status.
///
/// Checked in this order: a trailing `&`, a pipe anywhere, any redirection,
/// a built-in name, and finally an external program. Background only applies
/// to a plain command; a pipeline or redirected command with `&` runs in the
/// foreground.
pub fn dispatch(
    session: &mut Session,
    builtins: &Builtins,
    tokens: &[String],
    io: &mut Streams<'_>,
) -> ExitCode {
    let (tokens, background) = match tokens.split_last() {
        Some((last, rest)) if last == BACKGROUND => (rest, true),
        _ => (tokens, false),
    };
    if tokens.is_empty() {
        return FAILURE;
    }

    let code = if tokens.iter().any(|t| t == PIPE) {
        if background {
            debug!("background marker ignored for pipeline");
        }
        run_pipeline(session, tokens)
    } else if tokens.iter().any(|t| is_redirection(t)) {
        if background {
            debug!("background marker ignored for redirected command");
        }
        run_redirected(session, builtins, tokens, io)
    } else {
        match Command::new(tokens.to_vec()) {
            Ok(command) if builtins.contains(command.name()) => {
                // Built-ins always run in the shell itself, even with `&`.
                builtins.run(&command, io, session)
            }
            Ok(command) => launch(session, &command, None, None, background, &mut *io.stdout).status(),
            Err(err) => {
                report(&err);
                err.status()
            }
        }
    };
    let _ = io.stdout.flush();
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn toks(line: &str) -> Vec<String> {
        line.split_whitespace().map(String::from).collect()
    }

    fn run(session: &mut Session, tokens: &[String]) -> (ExitCode, String) {
        let mut input = Cursor::new(Vec::new());
        let mut out = Vec::new();
        let code = {
            let mut io = Streams::new(&mut input, &mut out);
            dispatch(session, &Builtins::default(), tokens, &mut io)
        };
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn empty_line_is_failure() {
        let mut session = Session::new().unwrap();
        assert_eq!(run(&mut session, &[]).0, 1);
        assert_eq!(run(&mut session, &toks("&")).0, 1);
    }

    #[test]
    fn echo_is_a_builtin() {
        let mut session = Session::new().unwrap();
        assert_eq!(run(&mut session, &toks("echo hello world")), (0, "hello world\n".into()));
        assert_eq!(run(&mut session, &toks("echo -n hello")), (0, "hello".into()));
    }

    #[test]
    fn missing_program_is_127() {
        let mut session = Session::new().unwrap();
        assert_eq!(run(&mut session, &toks("false_missing_cmd")).0, 127);
    }

    #[test]
    fn external_exit_status_is_returned() {
        let mut session = Session::new().unwrap();
        assert_eq!(run(&mut session, &toks("false")).0, 1);
        assert_eq!(run(&mut session, &toks("true")).0, 0);
    }

    #[test]
    fn trailing_ampersand_backgrounds_plain_commands() {
        let mut session = Session::new().unwrap();
        let (code, printed) = run(&mut session, &toks("sleep 0.1 &"));
        assert_eq!(code, 0);
        assert!(printed.starts_with("[1] "), "{printed}");
        assert!(printed.ends_with(" started in background\n"), "{printed}");
        assert_eq!(session.jobs.len(), 1);

        let pid = session.jobs.iter().next().unwrap().pid;
        crate::launcher::wait_foreground(pid);
        session.jobs.remove(pid);
    }

    #[test]
    fn pipeline_with_ampersand_runs_in_foreground() {
        let mut session = Session::new().unwrap();
        assert_eq!(run(&mut session, &toks("true | false &")).0, 1);
        assert!(session.jobs.is_empty());
    }

    #[test]
    fn builtin_with_ampersand_runs_in_shell() {
        let mut session = Session::new().unwrap();
        let (code, printed) = run(&mut session, &toks("echo hi &"));
        assert_eq!((code, printed.as_str()), (0, "hi\n"));
        assert!(session.jobs.is_empty());
    }

    #[test]
    fn pipe_takes_priority_over_redirection() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out.txt");
        let mut session = Session::new().unwrap();
        let line = format!("echo piped | cat > {}", out.display());
        let (code, _) = run(&mut session, &toks(&line));
        // the whole `cat > path` stage is handed to the pipeline untouched
        assert_eq!(code, 1);
        assert!(!out.exists());
    }
}
