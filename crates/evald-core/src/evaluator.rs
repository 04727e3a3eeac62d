//! Capability-scoped evaluator.
//!
//! The interpreter lives on a dedicated worker thread that owns the Session
//! exclusively; callers talk to it through a command channel and await
//! replies with a timeout. Nothing escapes the evaluator boundary as a
//! transport fault: syntax errors, denied commands and timeouts all come
//! back as `is_error = true` data.

use crate::capability::{CapabilityGate, Decision};
use crate::error::{EvaldError, Result};
use crate::interpreter::{EvaluationResult, Interpreter};
use crate::session::SessionSnapshot;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// What one evaluation did to the session.
#[derive(Debug, Clone)]
pub struct EvalOutcome {
    pub result: EvaluationResult,
    /// Session content after the evaluation.
    pub snapshot: SessionSnapshot,
    /// Session content before the evaluation, so callers can realign the
    /// session when recording the mutation fails.
    pub before: SessionSnapshot,
    /// Change summary, present only when the evaluation mutated state.
    pub changes: Option<String>,
}

impl EvalOutcome {
    pub fn mutated(&self) -> bool {
        self.changes.is_some()
    }
}

enum WorkerCommand {
    Eval {
        code: String,
        is_admin: bool,
        reply: oneshot::Sender<EvalOutcome>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Restore {
        snapshot: SessionSnapshot,
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Handle to the evaluator worker thread.
pub struct EvaluatorHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
    thread_handle: Option<thread::JoinHandle<()>>,
    timeout: Duration,
}

impl EvaluatorHandle {
    /// Spawns the worker thread around an interpreter.
    pub fn spawn(
        interpreter: Box<dyn Interpreter>,
        gate: CapabilityGate,
        timeout: Duration,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel();

        let thread_handle = thread::spawn(move || {
            EvaluatorWorker { interpreter, gate }.run(command_rx);
        });

        info!(timeout_ms = timeout.as_millis() as u64, "evaluator worker spawned");

        Self {
            command_tx,
            thread_handle: Some(thread_handle),
            timeout,
        }
    }

    /// Evaluates code under the given capability tier.
    ///
    /// Never fails for evaluation-internal reasons; a timeout is reported
    /// as `is_error = true` with no mutation recorded (session content is
    /// then only as trustworthy as the interpreter's atomicity guarantee).
    pub async fn eval(&self, code: String, is_admin: bool) -> Result<EvalOutcome> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(WorkerCommand::Eval {
            code,
            is_admin,
            reply,
        })?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(EvaldError::session("evaluator worker dropped the reply")),
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "evaluation timed out; worker may still be busy"
                );
                Ok(EvalOutcome {
                    result: EvaluationResult::error(format!(
                        "error: evaluation timed out after {}ms",
                        self.timeout.as_millis()
                    )),
                    snapshot: SessionSnapshot::default(),
                    before: SessionSnapshot::default(),
                    changes: None,
                })
            }
        }
    }

    /// Captures the current session content.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(WorkerCommand::Snapshot { reply })?;
        reply_rx
            .await
            .map_err(|_| EvaldError::session("evaluator worker dropped the reply"))
    }

    /// Replaces the session content wholesale (rollback path).
    pub async fn restore(&self, snapshot: SessionSnapshot) -> Result<()> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(WorkerCommand::Restore { snapshot, reply })?;
        reply_rx
            .await
            .map_err(|_| EvaldError::session("evaluator worker dropped the reply"))
    }

    fn send(&self, command: WorkerCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| EvaldError::session("evaluator worker is gone"))
    }

    /// Stops the worker and joins its thread.
    pub fn shutdown(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for EvaluatorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct EvaluatorWorker {
    interpreter: Box<dyn Interpreter>,
    gate: CapabilityGate,
}

impl EvaluatorWorker {
    fn run(mut self, command_rx: mpsc::Receiver<WorkerCommand>) {
        debug!("evaluator worker started");

        for command in command_rx {
            match command {
                WorkerCommand::Eval {
                    code,
                    is_admin,
                    reply,
                } => {
                    let _ = reply.send(self.handle_eval(&code, is_admin));
                }
                WorkerCommand::Snapshot { reply } => {
                    let _ = reply.send(self.interpreter.snapshot());
                }
                WorkerCommand::Restore { snapshot, reply } => {
                    self.interpreter.restore(&snapshot);
                    let _ = reply.send(());
                }
                WorkerCommand::Shutdown => {
                    debug!("evaluator worker shutting down");
                    break;
                }
            }
        }
    }

    fn handle_eval(&mut self, code: &str, is_admin: bool) -> EvalOutcome {
        // Pre-dispatch capability scan on the submitted text. The
        // interpreter checks the tier again at dispatch time, for names
        // that only reach command position after substitution.
        if !is_admin {
            if let Decision::Deny { command } = self.gate.check(code) {
                debug!(command = %command, "denied non-admin evaluation");
                let snapshot = self.interpreter.snapshot();
                return EvalOutcome {
                    result: EvaluationResult::error(CapabilityGate::denial_message(&command)),
                    snapshot: snapshot.clone(),
                    before: snapshot,
                    changes: None,
                };
            }
        }

        let before = self.interpreter.snapshot();
        let result = match self.interpreter.eval(code, is_admin) {
            Ok(output) => EvaluationResult::ok(output),
            Err(message) => EvaluationResult::error(format!("error: {}", message)),
        };
        let after = self.interpreter.snapshot();

        let diff = before.diff(&after);
        let changes = diff.has_changes().then(|| diff.summary());

        EvalOutcome {
            result,
            snapshot: after,
            before,
            changes,
        }
    }
}
