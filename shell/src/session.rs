use crate::command::{ExitCode, SUCCESS};
use crate::error::ShellError;
use crate::jobs::JobTable;
use std::collections::{BTreeMap, HashMap};
use std::env as stdenv;
use std::ffi::CString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Process-wide state of one interactive shell.
///
/// Created once at startup and handed explicitly to everything that needs it.
/// Fields are public like the rest of the crate's plain data; the job table is
/// only changed through its own add/remove/reap operations.
#[derive(Debug)]
pub struct Session {
    /// Variables exported to launched programs (e.g., PATH, HOME).
    pub vars: HashMap<String, String>,
    /// The shell's working directory; kept equal to the process working directory.
    pub current_dir: PathBuf,
    /// Where `cd -` goes back to.
    pub previous_dir: Option<PathBuf>,
    /// Status of the last foreground command, for `$?`.
    pub last_status: ExitCode,
    /// When set to true, the interactive loop stops after the current line.
    pub should_exit: bool,
    pub jobs: JobTable,
    pub history: Vec<String>,
    pub aliases: BTreeMap<String, String>,
    /// How many entries the `history` built-in shows.
    pub history_limit: usize,
}

impl Session {
    /// Capture the current process state into a new session.
    ///
    /// Fails only when the working directory cannot be determined.
    pub fn new() -> Result<Self, ShellError> {
        let current_dir = stdenv::current_dir().map_err(|e| {
            ShellError::FatalStartup(format!("cannot determine working directory: {e}"))
        })?;
        Ok(Self {
            vars: stdenv::vars().collect(),
            current_dir,
            previous_dir: None,
            last_status: SUCCESS,
            should_exit: false,
            jobs: JobTable::new(),
            history: Vec::new(),
            aliases: BTreeMap::new(),
            history_limit: 20,
        })
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    pub fn remove_var(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn home_dir(&self) -> Option<PathBuf> {
        self.get_var("HOME").filter(|h| !h.is_empty()).map(PathBuf::from)
    }

    /// Move the shell (and the process) to `target`.
    ///
    /// Relative targets are resolved against the current directory. On failure
    /// nothing changes; on success the old directory becomes `previous_dir`.
    pub fn change_dir(&mut self, target: &Path) -> io::Result<()> {
        let joined = if target.is_absolute() {
            target.to_path_buf()
        } else {
            self.current_dir.join(target)
        };
        let canonical = fs::canonicalize(&joined)?;
        stdenv::set_current_dir(&canonical)?;
        debug!(from = %self.current_dir.display(), to = %canonical.display(), "changed directory");
        let old = std::mem::replace(&mut self.current_dir, canonical);
        self.set_var("OLDPWD", old.to_string_lossy());
        self.set_var("PWD", self.current_dir.to_string_lossy().into_owned());
        self.previous_dir = Some(old);
        Ok(())
    }

    /// `KEY=value` strings for `execve`, skipping anything with a NUL byte.
    pub fn exec_env(&self) -> Vec<CString> {
        self.vars
            .iter()
            .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::lock_current_dir;

    #[test]
    fn set_get_and_remove_var() {
        let mut session = Session::new().unwrap();
        assert_eq!(session.get_var("SOME_RANDOM_ENV_VAR_12345"), None);
        session.set_var("KEY", "VALUE");
        assert_eq!(session.get_var("KEY"), Some("VALUE"));
        assert_eq!(session.remove_var("KEY").as_deref(), Some("VALUE"));
        assert_eq!(session.get_var("KEY"), None);
    }

    #[test]
    fn reads_from_process_env() {
        let session = Session::new().unwrap();
        assert!(session.get_var("PATH").is_some());
    }

    #[test]
    fn exec_env_has_key_value_pairs() {
        let mut session = Session::new().unwrap();
        session.vars.clear();
        session.set_var("A", "1");
        let env = session.exec_env();
        assert_eq!(env, vec![CString::new("A=1").unwrap()]);
    }

    #[test]
    fn change_dir_failure_leaves_state_alone() {
        let _lock = lock_current_dir();
        let mut session = Session::new().unwrap();
        let before = session.current_dir.clone();
        assert!(session.change_dir(Path::new("/definitely/not/here")).is_err());
        assert_eq!(session.current_dir, before);
        assert!(session.previous_dir.is_none());
    }

    #[test]
    fn change_dir_records_previous() {
        let _lock = lock_current_dir();
        let orig = stdenv::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = fs::canonicalize(tmp.path()).unwrap();

        let mut session = Session::new().unwrap();
        let before = session.current_dir.clone();
        session.change_dir(&target).unwrap();

        assert_eq!(session.current_dir, target);
        assert_eq!(session.previous_dir.as_deref(), Some(before.as_path()));
        assert_eq!(fs::canonicalize(stdenv::current_dir().unwrap()).unwrap(), target);

        stdenv::set_current_dir(orig).unwrap();
    }
}
