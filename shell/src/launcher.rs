//! Launching external programs with fork/exec.

use crate::command::{Command, ExitCode, FAILURE, NOT_FOUND, PERMISSION_DENIED, SIGNAL_BASE, SUCCESS};
use crate::error::{report, ShellError, ERROR_PREFIX};
use crate::session::Session;
use crate::signals;
use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execve, fork, ForkResult, Pid};
use std::borrow::Cow;
use std::ffi::{CString, OsStr};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// What became of a launched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Ran in the foreground (or failed to start) with this status.
    Completed(ExitCode),
    /// Left running; tracked in the job table under `index`.
    Background { index: usize, pid: Pid },
}

impl ExecutionOutcome {
    /// Status reported to the caller; background launches count as success.
    pub fn status(&self) -> ExitCode {
        match self {
            ExecutionOutcome::Completed(code) => *code,
            ExecutionOutcome::Background { .. } => SUCCESS,
        }
    }
}

/// Run `command` as a new process.
///
/// `stdin`/`stdout` of `None` inherit the shell's own descriptors. Foreground
/// launches block until the child terminates; background launches register
/// the child in the job table, announce it on `notices` and return at once.
pub fn launch(
    session: &mut Session,
    command: &Command,
    stdin: Option<BorrowedFd<'_>>,
    stdout: Option<BorrowedFd<'_>>,
    background: bool,
    notices: &mut dyn Write,
) -> ExecutionOutcome {
    let pid = match spawn(session, command, stdin, stdout) {
        Ok(pid) => pid,
        Err(err) => {
            report(&err);
            return ExecutionOutcome::Completed(err.status());
        }
    };
    if background {
        let job = session.jobs.add(pid, command.to_string());
        let index = job.index;
        let _ = writeln!(notices, "[{index}] {pid} started in background");
        let _ = notices.flush();
        return ExecutionOutcome::Background { index, pid };
    }
    ExecutionOutcome::Completed(wait_foreground(pid))
}

/// Everything the child needs, converted and formatted before fork.
///
/// The child still goes through `nix::unistd::execve`, which builds its
/// pointer arrays on the heap. That is the only allocation after fork.
struct Prepared {
    path: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    not_found: Vec<u8>,
    denied: Vec<u8>,
    generic: Vec<u8>,
}

impl Prepared {
    fn new(session: &Session, command: &Command, resolved: &Path) -> Result<Self, ShellError> {
        let nul = |_| ShellError::Usage(format!("{}: argument contains a NUL byte", command.name()));
        let path = CString::new(resolved.as_os_str().as_bytes()).map_err(nul)?;
        let argv = command
            .argv()
            .iter()
            .map(|a| CString::new(a.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(nul)?;
        let name = command.name();
        Ok(Self {
            path,
            argv,
            envp: session.exec_env(),
            not_found: format!("{ERROR_PREFIX}{name}: command not found\n").into_bytes(),
            denied: format!("{ERROR_PREFIX}{name}: permission denied\n").into_bytes(),
            generic: format!("{ERROR_PREFIX}{name}: ").into_bytes(),
        })
    }
}

/// Fork and exec `command` without waiting for it.
///
/// The program is looked up in `PATH` first, so a missing program or one
/// that is not an executable file is reported here without creating a process.
pub fn spawn(
    session: &Session,
    command: &Command,
    stdin: Option<BorrowedFd<'_>>,
    stdout: Option<BorrowedFd<'_>>,
) -> Result<Pid, ShellError> {
    let search_paths = session.get_var("PATH").unwrap_or_default();
    let resolved = find_command_path(OsStr::new(search_paths), Path::new(command.name()))
        .ok_or_else(|| ShellError::NotFound(command.name().to_string()))?;
    if !is_executable_file(&resolved) {
        return Err(ShellError::PermissionDenied(command.name().to_string()));
    }
    let prepared = Prepared::new(session, command, &resolved)?;

    // Anything still buffered would otherwise show up after the child's output.
    let _ = io::stdout().flush();

    // SAFETY: the child only calls async-signal-safe functions before exec or _exit.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => exec_child(&prepared, stdin, stdout),
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = %child, program = %resolved.display(), "spawned");
            Ok(child)
        }
        Err(source) => Err(ShellError::Launch {
            program: command.name().to_string(),
            source,
        }),
    }
}

fn exec_child(prepared: &Prepared, stdin: Option<BorrowedFd<'_>>, stdout: Option<BorrowedFd<'_>>) -> ! {
    signals::reset_for_child();
    if let Some(fd) = stdin {
        if bind(fd.as_raw_fd(), libc::STDIN_FILENO).is_err() {
            child_exit(FAILURE);
        }
    }
    if let Some(fd) = stdout {
        if bind(fd.as_raw_fd(), libc::STDOUT_FILENO).is_err() {
            child_exit(FAILURE);
        }
    }

    let errno = match execve(&prepared.path, &prepared.argv, &prepared.envp) {
        Ok(never) => match never {},
        Err(errno) => errno,
    };
    match errno {
        Errno::ENOENT | Errno::ENOTDIR => {
            write_stderr(&prepared.not_found);
            child_exit(NOT_FOUND)
        }
        Errno::EACCES | Errno::EPERM | Errno::EISDIR => {
            write_stderr(&prepared.denied);
            child_exit(PERMISSION_DENIED)
        }
        other => {
            write_stderr(&prepared.generic);
            write_stderr(other.desc().as_bytes());
            write_stderr(b"\n");
            child_exit(FAILURE)
        }
    }
}

/// Make `fd` the descriptor `target` in this process, keeping it across exec.
fn bind(fd: RawFd, target: RawFd) -> nix::Result<()> {
    if fd == target {
        fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty()))?;
    } else {
        dup2(fd, target)?;
    }
    Ok(())
}

fn write_stderr(bytes: &[u8]) {
    // SAFETY: plain write(2) on a borrowed buffer.
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

fn child_exit(code: ExitCode) -> ! {
    // SAFETY: _exit skips atexit handlers and stdio buffers inherited from the shell.
    unsafe { libc::_exit(code) }
}

/// Block until `pid` terminates and translate how it ended.
///
/// Interrupted waits are retried. If the child was already collected
/// elsewhere the wait counts as success.
pub fn wait_foreground(pid: Pid) -> ExitCode {
    loop {
        match waitpid(pid, None) {
            Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                let code = status_code(status);
                debug!(%pid, code, "foreground child finished");
                return code;
            }
            Ok(other) => trace!(%pid, ?other, "non-terminal wait status"),
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => {
                debug!(%pid, "child already reaped");
                return SUCCESS;
            }
            Err(e) => {
                warn!(%pid, error = %e, "waitpid failed");
                return FAILURE;
            }
        }
    }
}

/// Shell exit status for a terminal wait status.
pub fn status_code(status: WaitStatus) -> ExitCode {
    match status {
        WaitStatus::Exited(_, code) => code,
        WaitStatus::Signaled(_, signal, _) => SIGNAL_BASE + signal as i32,
        _ => FAILURE,
    }
}

/// Resolve a command path the way a typical shell would.
///
/// Behavior:
/// - Absolute path: returns it if it exists.
/// - Relative with multiple components (e.g., `bin/sh`) or `./foo`: returns it if it exists.
/// - Single path component (no separators): search each directory in `search_paths` (PATH)
///   and return the first executable match, or failing that the first existing one.
/// - Empty path: returns `None`.
///
/// Returns either a borrowed reference to the provided `path` or an owned `PathBuf`
/// when the result is discovered via PATH lookup.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    if path.is_absolute() {
        return find_by_path(path).map(Cow::Borrowed);
    }

    let mut components = path.components();
    let first = components.next();
    let second = components.next();
    match (first, second) {
        // Empty path -> not found
        (None, None) => None,
        // Single component -> search in PATH
        (Some(x), None) => find_in_path(search_paths, x.as_os_str()).map(Cow::Owned),
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    let mut fallback = None;
    for dir in std::env::split_paths(search_paths) {
        let path = dir.join(cmd);
        if is_executable_file(&path) {
            return Some(path);
        }
        if fallback.is_none() && path.exists() {
            fallback = Some(path);
        }
    }
    fallback
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if path.exists() { Some(path) } else { None }
}

fn is_executable_file(path: &Path) -> bool {
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
