//! Background job bookkeeping.
//!
//! The table is the only owner of job records. Termination can be noticed
//! from two places (a child-exit notification or the per-prompt poll) and
//! both go through [`JobTable::reap`], which removes a job and hands it back
//! exactly once.

use crate::command::ExitCode;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::fmt;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Last known state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Done(ExitCode),
    Signaled(i32),
}

impl JobStatus {
    fn from_wait(status: WaitStatus) -> Option<JobStatus> {
        match status {
            WaitStatus::Exited(_, code) => Some(JobStatus::Done(code)),
            WaitStatus::Signaled(_, signal, _) => Some(JobStatus::Signaled(signal as i32)),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Done(code) => write!(f, "Done (exit status: {code})"),
            JobStatus::Signaled(signal) => write!(f, "Terminated by signal {signal}"),
        }
    }
}

/// A background job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// 1-based number shown to the user, fixed for the life of the job.
    pub index: usize,
    pub pid: Pid,
    /// The command line, for listings.
    pub command: String,
    pub status: JobStatus,
}

impl Job {
    /// The line printed once the job has finished.
    pub fn completion_notice(&self) -> String {
        format!("[{}] {} {}    {}", self.index, self.pid, self.status, self.command)
    }
}

/// What [`JobTable::terminate_all`] found and did.
#[derive(Debug, Default)]
pub struct Teardown {
    /// Jobs that had already finished; still owed a completion notice.
    pub finished: Vec<Job>,
    /// Jobs that were still running and got SIGTERM.
    pub signalled: Vec<Job>,
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a freshly launched process.
    ///
    /// Numbers are reused once the table drains, like other shells do.
    pub fn add(&mut self, pid: Pid, command: impl Into<String>) -> &Job {
        let index = self.jobs.iter().map(|j| j.index).max().unwrap_or(0) + 1;
        debug!(index, %pid, "tracking background job");
        self.jobs.push(Job {
            index,
            pid,
            command: command.into(),
            status: JobStatus::Running,
        });
        &self.jobs[self.jobs.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Remove `pid` if it is still tracked.
    ///
    /// Returns `None` when some other path already removed it, so callers
    /// report only when they actually won the removal.
    pub fn remove(&mut self, pid: Pid) -> Option<Job> {
        let pos = self.jobs.iter().position(|j| j.pid == pid)?;
        Some(self.jobs.remove(pos))
    }

    /// Record a terminal wait status for `pid` and remove it.
    pub fn complete(&mut self, pid: Pid, status: WaitStatus) -> Option<Job> {
        let status = JobStatus::from_wait(status)?;
        let mut job = self.remove(pid)?;
        job.status = status;
        Some(job)
    }

    /// Collect every tracked job that has terminated, without blocking.
    ///
    /// Safe to call at any time; when nothing changed it returns an empty list.
    pub fn reap(&mut self) -> Vec<Job> {
        let pids: Vec<Pid> = self.jobs.iter().map(|j| j.pid).collect();
        let mut finished = Vec::new();
        for pid in pids {
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status) => {
                    if let Some(job) = self.complete(pid, status) {
                        debug!(index = job.index, %pid, status = %job.status, "reaped background job");
                        finished.push(job);
                    }
                }
                Err(Errno::EINTR) => {}
                Err(Errno::ECHILD) => {
                    // Not our child any more; nothing left to report.
                    debug!(%pid, "background job vanished");
                    self.remove(pid);
                }
                Err(e) => {
                    warn!(%pid, error = %e, "waitpid failed for background job");
                    self.remove(pid);
                }
            }
        }
        finished
    }

    /// Stop every job that is still alive: SIGTERM first, SIGKILL after `grace`.
    ///
    /// Jobs that finished on their own are handed back in
    /// [`Teardown::finished`] so they can still be reported. The table is
    /// empty afterwards.
    pub fn terminate_all(&mut self, grace: Duration) -> Teardown {
        let finished = self.reap();
        let mut signalled = Vec::new();
        for job in &self.jobs {
            match kill(job.pid, Signal::SIGTERM) {
                Ok(()) => signalled.push(job.clone()),
                Err(e) => debug!(pid = %job.pid, error = %e, "SIGTERM failed"),
            }
        }
        if !signalled.is_empty() {
            thread::sleep(grace);
        }
        for job in std::mem::take(&mut self.jobs) {
            match waitpid(job.pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {
                    debug!(pid = %job.pid, "job ignored SIGTERM, killing");
                    let _ = kill(job.pid, Signal::SIGKILL);
                    let _ = waitpid(job.pid, None);
                }
                Ok(_) | Err(_) => {}
            }
        }
        Teardown { finished, signalled }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_sh;
    use nix::sys::wait::{waitid, Id};
    use std::time::Instant;

    fn wait_until_reaped(table: &mut JobTable) -> Vec<Job> {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let done = table.reap();
            if !done.is_empty() || Instant::now() > deadline {
                return done;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn indices_are_one_based_and_reused_after_drain() {
        let mut table = JobTable::new();
        assert_eq!(table.add(Pid::from_raw(100), "a").index, 1);
        assert_eq!(table.add(Pid::from_raw(101), "b").index, 2);
        table.remove(Pid::from_raw(100));
        assert_eq!(table.add(Pid::from_raw(102), "c").index, 3);
        table.remove(Pid::from_raw(101));
        table.remove(Pid::from_raw(102));
        assert_eq!(table.add(Pid::from_raw(103), "d").index, 1);
    }

    #[test]
    fn removal_happens_once() {
        let mut table = JobTable::new();
        table.add(Pid::from_raw(4242), "sleep 5");
        assert!(table.remove(Pid::from_raw(4242)).is_some());
        assert!(table.remove(Pid::from_raw(4242)).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn complete_ignores_non_terminal_statuses() {
        let mut table = JobTable::new();
        let pid = Pid::from_raw(777);
        table.add(pid, "x");
        assert!(table.complete(pid, WaitStatus::StillAlive).is_none());
        assert_eq!(table.len(), 1);
        let job = table.complete(pid, WaitStatus::Exited(pid, 3)).unwrap();
        assert_eq!(job.status, JobStatus::Done(3));
        assert!(table.complete(pid, WaitStatus::Exited(pid, 3)).is_none());
    }

    #[test]
    fn reap_reports_exit_code_exactly_once() {
        let mut table = JobTable::new();
        let pid = spawn_sh("exit 7");
        table.add(pid, "sh -c 'exit 7'");

        let done = wait_until_reaped(&mut table);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, JobStatus::Done(7));
        assert!(table.is_empty());
        assert!(table.reap().is_empty());
    }

    #[test]
    fn reap_reports_signal() {
        let mut table = JobTable::new();
        let pid = spawn_sh("kill -TERM $$");
        table.add(pid, "suicide");

        let done = wait_until_reaped(&mut table);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].status, JobStatus::Signaled(Signal::SIGTERM as i32));
        assert!(done[0].completion_notice().contains("Terminated by signal 15"));
    }

    #[test]
    fn terminate_all_stops_long_running_jobs() {
        let mut table = JobTable::new();
        let pid = spawn_sh("sleep 30");
        table.add(pid, "sleep 30");

        let started = Instant::now();
        let teardown = table.terminate_all(Duration::from_millis(50));
        assert_eq!(teardown.signalled.len(), 1);
        assert!(teardown.finished.is_empty());
        assert!(table.is_empty());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    }

    #[test]
    fn terminate_all_hands_back_jobs_that_already_finished() {
        let mut table = JobTable::new();
        let pid = spawn_sh("exit 4");
        table.add(pid, "sh -c 'exit 4'");
        // wait for it to exit without collecting it
        let deadline = Instant::now() + Duration::from_secs(10);
        let peek = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
        while !matches!(waitid(Id::Pid(pid), peek), Ok(WaitStatus::Exited(..))) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }

        let teardown = table.terminate_all(Duration::from_millis(20));
        assert!(teardown.signalled.is_empty());
        assert_eq!(teardown.finished.len(), 1);
        assert_eq!(teardown.finished[0].status, JobStatus::Done(4));
        assert!(table.is_empty());
    }

    #[test]
    fn terminate_all_kills_jobs_that_ignore_sigterm() {
        let mut table = JobTable::new();
        let pid = spawn_sh("trap '' TERM; sleep 30");
        table.add(pid, "stubborn");
        // give the trap time to be installed
        thread::sleep(Duration::from_millis(200));

        table.terminate_all(Duration::from_millis(50));
        assert!(table.is_empty());
        assert_eq!(waitpid(pid, Some(WaitPidFlag::WNOHANG)), Err(Errno::ECHILD));
    }
}
