//! Background runner for state command batches
//!
//! Pause and resume must not block the caller while state commands run, so
//! batches are queued on a channel and executed in order by one thread.

use crate::env::Environment;
use crate::process::{self, LaunchCommand};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One command line of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub cmd: String,
    pub elevated: bool,
}

/// A batch of commands with the environment they run in.
#[derive(Debug, Clone)]
pub struct CommandJob {
    /// Shown in logs
    pub label: String,
    pub commands: Vec<QueuedCommand>,
    pub env: Environment,
    pub working_dir: Option<PathBuf>,
}

/// Completion handle for a submitted job.
pub struct JobTicket {
    done: Receiver<usize>,
}

impl JobTicket {
    /// Wait for the job. Returns how many commands succeeded.
    pub fn wait(&self, timeout: Duration) -> Option<usize> {
        match self.done.recv_timeout(timeout) {
            Ok(succeeded) => Some(succeeded),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

struct Envelope {
    job: CommandJob,
    done: Sender<usize>,
}

/// Single worker thread fed by a channel.
pub struct CommandWorker {
    sender: Option<Sender<Envelope>>,
    handle: Option<JoinHandle<()>>,
}

impl CommandWorker {
    pub fn spawn() -> Self {
        let (sender, receiver) = unbounded::<Envelope>();
        let spawned = thread::Builder::new()
            .name("state-commands".into())
            .spawn(move || {
                debug!("Command worker started");
                for envelope in receiver.iter() {
                    let succeeded = run_job(&envelope.job);
                    let _ = envelope.done.send(succeeded);
                }
                debug!("Command worker stopped");
            });

        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Failed to start command worker: {}", e);
                None
            }
        };

        Self {
            sender: Some(sender),
            handle,
        }
    }

    /// Queue a job. Returns `None` if the worker is gone.
    pub fn submit(&self, job: CommandJob) -> Option<JobTicket> {
        if job.commands.is_empty() {
            let (done, receiver) = bounded(1);
            let _ = done.send(0);
            return Some(JobTicket { done: receiver });
        }

        self.handle.as_ref()?;
        let sender = self.sender.as_ref()?;
        let (done, receiver) = bounded(1);
        match sender.send(Envelope { job, done }) {
            Ok(()) => Some(JobTicket { done: receiver }),
            Err(e) => {
                warn!("Command worker unavailable, dropping {}", e.0.job.label);
                None
            }
        }
    }

    /// Finish queued jobs and stop the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CommandWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_job(job: &CommandJob) -> usize {
    info!("Running {} ({} commands)", job.label, job.commands.len());
    let mut succeeded = 0;
    for queued in &job.commands {
        let mut launch = LaunchCommand::new(&queued.cmd, &job.env);
        launch.working_dir = job.working_dir.as_deref();
        launch.elevated = queued.elevated;
        match process::run(&launch) {
            Ok(_) => succeeded += 1,
            Err(e) => warn!("{}: {}", job.label, e),
        }
    }
    succeeded
}
