use argh::FromArgs;
use std::time::Duration;

#[derive(FromArgs, Debug, Clone, PartialEq, Eq)]
/// An interactive shell with pipelines, redirection and background jobs.
pub struct ShellConfig {
    #[argh(option, short = 'c')]
    /// run this command line, then exit with its status.
    pub command: Option<String>,

    #[argh(option, default = "100")]
    /// milliseconds background jobs get between SIGTERM and SIGKILL at exit.
    pub grace_ms: u64,

    #[argh(option, default = "20")]
    /// number of entries shown by the `history` built-in.
    pub history_limit: usize,

    #[argh(switch)]
    /// do not print the startup banner or the exit report.
    pub quiet: bool,

    #[argh(switch)]
    /// leave SIGINT, SIGTSTP and SIGCHLD dispositions untouched.
    pub no_signals: bool,
}

impl ShellConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            command: None,
            grace_ms: 100,
            history_limit: 20,
            quiet: false,
            no_signals: false,
        }
    }
}
