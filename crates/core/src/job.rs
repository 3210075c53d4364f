//! Job records: execution status and concurrent-safe output
//!
//! A [`Job`] is one execution attempt. Its status transitions are
//! linearizable (exactly one winner for any race to a terminal state) and its
//! output log is owned by a dedicated writer task: every writer holds a
//! [`JobOutput`] handle and sends whole chunks over a channel, so appends
//! never tear, never block the caller for unbounded time, and keep working
//! after the job reaches a terminal status. Late-arriving output from
//! asynchronous hooks is expected and must not be dropped.

use crate::deploy::User;
use crate::errors::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, not started
    Pending,
    /// Command sequence in flight
    Running,
    /// All commands exited zero
    Succeeded,
    /// A command exited non-zero or timed out
    Failed,
    /// A command could not be invoked at all
    Errored,
    /// Stopped by a user before completion
    Cancelled,
}

impl JobStatus {
    /// Get the status as string
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Errored => "errored",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a status from its string form.
    pub fn parse(s: &str) -> Option<JobStatus> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "errored" => Some(JobStatus::Errored),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether this status is terminal. Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Errored | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages understood by the output-owning writer task.
enum OutputMsg {
    Append(String),
    Snapshot(oneshot::Sender<String>),
}

/// Cloneable handle to a job's append-only output log.
///
/// The log itself lives on a dedicated task; handles communicate with it via
/// an unbounded channel. Each handle's chunks appear in the order that handle
/// sent them; interleaving between independent handles is unspecified beyond
/// "whole chunks, no lost writes".
#[derive(Debug, Clone)]
pub struct JobOutput {
    tx: mpsc::UnboundedSender<OutputMsg>,
}

impl JobOutput {
    /// Spawn the writer task and return a handle to it.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut log = String::new();
            while let Some(msg) = rx.recv().await {
                match msg {
                    OutputMsg::Append(chunk) => log.push_str(&chunk),
                    OutputMsg::Snapshot(reply) => {
                        let _ = reply.send(log.clone());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Append a chunk to the log.
    ///
    /// Never fails and never blocks: terminal job status does not close the
    /// log, and a handle outliving the runtime simply drops the chunk.
    pub fn append(&self, chunk: impl Into<String>) {
        let _ = self.tx.send(OutputMsg::Append(chunk.into()));
    }

    /// Read the current contents of the log.
    pub async fn snapshot(&self) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(OutputMsg::Snapshot(reply_tx)).is_err() {
            return String::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// Mutable status cell, serialized under one mutex so transition races have
/// exactly one winner.
#[derive(Debug)]
struct StatusCell {
    status: JobStatus,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

/// One execution attempt: status, timestamps, owner, and output.
#[derive(Debug)]
pub struct Job {
    id: String,
    owner: User,
    cell: Mutex<StatusCell>,
    output: JobOutput,
}

impl Job {
    /// Create a pending job owned by `owner`.
    ///
    /// Must be called within a tokio runtime (the output log task is spawned
    /// here).
    pub fn new(owner: User) -> Self {
        Self {
            id: format!("{:016x}", fastrand::u64(..)),
            owner,
            cell: Mutex::new(StatusCell {
                status: JobStatus::Pending,
                started_at: None,
                finished_at: None,
            }),
            output: JobOutput::spawn(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner(&self) -> &User {
        &self.owner
    }

    pub fn status(&self) -> JobStatus {
        self.cell.lock().unwrap().status
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.cell.lock().unwrap().started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.cell.lock().unwrap().finished_at
    }

    /// Cloneable handle to this job's output log.
    pub fn output(&self) -> JobOutput {
        self.output.clone()
    }

    /// Append a chunk to the job output.
    ///
    /// Legal in every status, including terminal ones: asynchronous hook
    /// consumers append trailing output after the job has finished.
    pub fn append_output(&self, chunk: impl Into<String>) {
        self.output.append(chunk);
    }

    /// Read the current output log.
    pub async fn output_snapshot(&self) -> String {
        self.output.snapshot().await
    }

    /// Atomically move to `new_status`, recording timestamps.
    ///
    /// Fails with [`JobError::InvalidTransition`] when the current status is
    /// already terminal. Concurrent callers are serialized; in a race to set
    /// a terminal status exactly one wins and the losers observe the error.
    pub fn transition(&self, new_status: JobStatus) -> Result<(), JobError> {
        let mut cell = self.cell.lock().unwrap();
        if cell.status.is_terminal() {
            return Err(JobError::InvalidTransition {
                from: cell.status,
                to: new_status,
            });
        }

        debug!(job = %self.id, from = %cell.status, to = %new_status, "Job transition");
        cell.status = new_status;
        let now = Utc::now();
        match new_status {
            JobStatus::Running => cell.started_at = Some(now),
            s if s.is_terminal() => cell.finished_at = Some(now),
            _ => {}
        }
        Ok(())
    }
}
