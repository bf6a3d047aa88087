//! Pipelines: `a | b | c` with every stage running at the same time.

use crate::command::{Command, ExitCode, FAILURE};
use crate::dispatch::PIPE;
use crate::error::{report, ShellError};
use crate::launcher::{spawn, wait_foreground};
use crate::session::Session;
use nix::fcntl::OFlag;
use nix::unistd::{pipe2, Pid};
use std::os::fd::{AsFd, OwnedFd};
use tracing::debug;

/// Split `tokens` on the pipe operator into stage commands.
///
/// Empty segments are skipped; fewer than two remaining stages is a usage error.
pub fn split_stages(tokens: &[String]) -> Result<Vec<Command>, ShellError> {
    let stages = tokens
        .split(|t| t == PIPE)
        .filter(|segment| !segment.is_empty())
        .map(|segment| Command::new(segment.to_vec()))
        .collect::<Result<Vec<_>, _>>()?;
    if stages.len() < 2 {
        return Err(ShellError::Usage("invalid pipeline".to_string()));
    }
    Ok(stages)
}

/// Run a pipeline and return the status of its last stage.
pub fn run_pipeline(session: &mut Session, tokens: &[String]) -> ExitCode {
    let stages = match split_stages(tokens) {
        Ok(stages) => stages,
        Err(err) => {
            report(&err);
            return err.status();
        }
    };

    let mut pids: Vec<Pid> = Vec::with_capacity(stages.len());
    let mut aborted: Option<ExitCode> = None;
    // read end of the pipe feeding the next stage
    let mut upstream: Option<OwnedFd> = None;

    for (i, stage) in stages.iter().enumerate() {
        let is_last = i + 1 == stages.len();
        let (reader, writer) = if is_last {
            (None, None)
        } else {
            match pipe2(OFlag::O_CLOEXEC) {
                Ok((r, w)) => (Some(r), Some(w)),
                Err(e) => {
                    report(ShellError::from(e));
                    aborted = Some(FAILURE);
                    break;
                }
            }
        };

        let spawned = spawn(
            session,
            stage,
            upstream.as_ref().map(|fd| fd.as_fd()),
            writer.as_ref().map(|fd| fd.as_fd()),
        );
        // The parent must not keep either end once the stage owns it, or the
        // reader downstream never sees end of input.
        drop(writer);
        drop(upstream.take());

        match spawned {
            Ok(pid) => {
                debug!(stage = i, %pid, "pipeline stage started");
                pids.push(pid);
            }
            Err(err) => {
                report(&err);
                aborted = Some(err.status());
                break;
            }
        }
        upstream = reader;
    }
    drop(upstream);

    let statuses: Vec<ExitCode> = pids.iter().map(|&pid| wait_foreground(pid)).collect();
    debug!(?statuses, "pipeline finished");

    match aborted {
        Some(code) => code,
        None => statuses.last().copied().unwrap_or(FAILURE),
    }
}
