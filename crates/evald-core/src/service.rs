//! The evaluation service: one serialization domain per evaluation stream.
//!
//! `EvalService` wires the evaluator, the pagination buffer and the history
//! store together. Evaluate, NextPage and Rollback all pass through one
//! tokio `Mutex`, so at most one session mutation is in flight and a fresh
//! evaluation can never race a half-drained page. History reads bypass the
//! lock; the store guards its own interior.

use crate::capability::CapabilityGate;
use crate::error::{EvaldError, Result};
use crate::evaluator::EvaluatorHandle;
use crate::history::{HistoryEntry, HistoryStore};
use crate::interpreter::Interpreter;
use crate::pagination::{OutputPager, Page};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// When an evaluation earns a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitPolicy {
    /// Only evaluations that mutate session content (default).
    Mutations,
    /// Every successful evaluation, pure reads included.
    All,
}

impl Default for CommitPolicy {
    fn default() -> Self {
        CommitPolicy::Mutations
    }
}

/// Per-request context: who is evaluating and at which trust tier.
#[derive(Debug, Clone)]
pub struct EvalContext {
    pub author: String,
    pub is_admin: bool,
}

impl EvalContext {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            is_admin: false,
        }
    }

    pub fn with_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }
}

/// Reply to an evaluation request: first output page plus commit info.
#[derive(Debug, Clone)]
pub struct EvalReply {
    pub output: Vec<String>,
    pub is_error: bool,
    pub more_available: bool,
    pub commit: Option<HistoryEntry>,
}

/// Tunables for [`EvalService::start`].
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub page_size: usize,
    pub eval_timeout: Duration,
    pub commit_policy: CommitPolicy,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            page_size: 25,
            eval_timeout: Duration::from_secs(5),
            commit_policy: CommitPolicy::default(),
        }
    }
}

/// State guarded by the session lock.
struct SessionDomain {
    evaluator: EvaluatorHandle,
    pager: OutputPager,
}

/// The session execution and versioned-output service.
pub struct EvalService {
    session: Mutex<SessionDomain>,
    store: Arc<dyn HistoryStore>,
    commit_policy: CommitPolicy,
}

impl EvalService {
    /// Starts the service: spawns the evaluator worker and restores session
    /// content from the history head, so current content always equals the
    /// latest history entry.
    pub async fn start(
        interpreter: Box<dyn Interpreter>,
        gate: CapabilityGate,
        store: Arc<dyn HistoryStore>,
        options: ServiceOptions,
    ) -> Result<Self> {
        let pager = OutputPager::new(options.page_size)?;
        let evaluator = EvaluatorHandle::spawn(interpreter, gate, options.eval_timeout);

        if let Some(head) = store.head()? {
            let snapshot = store.checkout(&head.commit_id)?;
            evaluator.restore(snapshot).await?;
            info!(commit_id = %head.commit_id, "session restored from history head");
        }

        Ok(Self {
            session: Mutex::new(SessionDomain { evaluator, pager }),
            store,
            commit_policy: options.commit_policy,
        })
    }

    /// Evaluates code, commits the result when history-worthy, and returns
    /// the first page of output.
    pub async fn eval(&self, code: &str, ctx: &EvalContext) -> Result<EvalReply> {
        let mut domain = self.session.lock().await;

        let outcome = domain.evaluator.eval(code.to_string(), ctx.is_admin).await?;

        let commit = if self.should_commit(&outcome.changes, outcome.result.is_error) {
            let message = format_commit_message(code, outcome.changes.as_deref());
            match self.store.commit(&outcome.snapshot, &ctx.author, &message) {
                Ok(entry) => {
                    debug!(commit_id = %entry.commit_id, author = %ctx.author, "evaluation committed");
                    Some(entry)
                }
                Err(err) => {
                    // Recorded history stays authoritative: undo the
                    // uncommitted mutation and drop any pending cursor.
                    warn!(error = %err, "commit failed; realigning session");
                    domain.evaluator.restore(outcome.before).await?;
                    domain.pager.invalidate();
                    return Err(err);
                }
            }
        } else {
            None
        };

        let is_error = outcome.result.is_error;
        let page = domain.pager.start_page(outcome.result.output);

        Ok(EvalReply {
            output: page.lines,
            is_error,
            more_available: page.more_available,
            commit,
        })
    }

    /// Drains the next page of the live cursor.
    pub async fn more(&self) -> Result<Page> {
        let mut domain = self.session.lock().await;
        domain.pager.next_page()
    }

    /// Most recent `limit` history entries, newest first. Runs outside the
    /// session lock.
    pub fn history(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        self.store.log(limit)
    }

    /// Restores session content to a prior entry's snapshot and records the
    /// rollback as a new forward-only history entry.
    ///
    /// Any pending page is invalidated: buffered output refers to
    /// pre-rollback state. Fails with [`EvaldError::UnknownCommit`] when the
    /// id matches no entry.
    pub async fn rollback(&self, commit_id: &str, ctx: &EvalContext) -> Result<HistoryEntry> {
        let mut domain = self.session.lock().await;

        let snapshot = self.store.checkout(commit_id)?;
        domain.evaluator.restore(snapshot.clone()).await?;
        domain.pager.invalidate();

        let message = format!("Rollback to {}", short_id(commit_id));
        let entry = self.store.commit(&snapshot, &ctx.author, &message)?;
        info!(target_id = %commit_id, commit_id = %entry.commit_id, "session rolled back");
        Ok(entry)
    }

    fn should_commit(&self, changes: &Option<String>, is_error: bool) -> bool {
        match self.commit_policy {
            CommitPolicy::Mutations => changes.is_some(),
            CommitPolicy::All => changes.is_some() || !is_error,
        }
    }
}

/// Commit message: the evaluated code (truncated) plus what changed.
fn format_commit_message(code: &str, changes: Option<&str>) -> String {
    let code_display: String = if code.chars().count() > 100 {
        let prefix: String = code.chars().take(100).collect();
        format!("{}...", prefix)
    } else {
        code.to_string()
    };
    let first_line = code_display.lines().next().unwrap_or("").to_string();

    match changes {
        Some(summary) => format!("Evaluated {} [{}]", first_line, summary),
        None => format!("Evaluated {}", first_line),
    }
}

fn short_id(commit_id: &str) -> String {
    commit_id.chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryStore, MemoryHistoryStore};
    use crate::interpreter::ScriptInterpreter;
    use crate::session::SessionSnapshot;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Delegates to a memory store but refuses commits on demand.
    struct FlakyStore {
        inner: MemoryHistoryStore,
        fail_commits: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryHistoryStore::new(),
                fail_commits: AtomicBool::new(false),
            }
        }
    }

    impl HistoryStore for FlakyStore {
        fn commit(
            &self,
            snapshot: &SessionSnapshot,
            author: &str,
            message: &str,
        ) -> crate::error::Result<HistoryEntry> {
            if self.fail_commits.load(Ordering::SeqCst) {
                return Err(EvaldError::storage("commit refused"));
            }
            self.inner.commit(snapshot, author, message)
        }

        fn log(&self, limit: usize) -> crate::error::Result<Vec<HistoryEntry>> {
            self.inner.log(limit)
        }

        fn checkout(&self, commit_id: &str) -> crate::error::Result<SessionSnapshot> {
            self.inner.checkout(commit_id)
        }

        fn head(&self) -> crate::error::Result<Option<HistoryEntry>> {
            self.inner.head()
        }
    }

    async fn service_with(options: ServiceOptions) -> (EvalService, Arc<MemoryHistoryStore>) {
        let store = Arc::new(MemoryHistoryStore::new());
        let service = EvalService::start(
            Box::new(ScriptInterpreter::new()),
            CapabilityGate::default(),
            store.clone(),
            options,
        )
        .await
        .unwrap();
        (service, store)
    }

    async fn service() -> (EvalService, Arc<MemoryHistoryStore>) {
        service_with(ServiceOptions::default()).await
    }

    fn ctx() -> EvalContext {
        EvalContext::new("tester")
    }

    #[tokio::test]
    async fn test_mutating_eval_commits_once() {
        let (service, store) = service().await;

        let reply = service.eval("set x 1", &ctx()).await.unwrap();
        assert!(!reply.is_error);
        assert_eq!(reply.output, vec!["1"]);
        let commit = reply.commit.expect("mutation must commit");
        assert_eq!(commit.author, "tester");
        assert!(commit.message.contains("set x 1"));
        assert_eq!(store.log(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pure_read_does_not_commit() {
        let (service, store) = service().await;
        service.eval("set x 1", &ctx()).await.unwrap();

        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["1"]);
        assert!(reply.commit.is_none());
        assert_eq!(store.log(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_policy_all_commits_reads() {
        let (service, store) = service_with(ServiceOptions {
            commit_policy: CommitPolicy::All,
            ..ServiceOptions::default()
        })
        .await;
        service.eval("set x 1", &ctx()).await.unwrap();

        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert!(reply.commit.is_some());
        assert_eq!(store.log(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_denied_eval_is_error_without_commit() {
        let (service, store) = service().await;
        let reply = service
            .eval("exec ls", &EvalContext::new("eve"))
            .await
            .unwrap();
        assert!(reply.is_error);
        assert!(reply.commit.is_none());
        assert!(store.log(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_denied_command_via_proc_argument_does_not_mutate() {
        let (service, store) = service().await;
        service.eval("set x 1", &ctx()).await.unwrap();
        service.eval("proc f {c} {$c}", &ctx()).await.unwrap();

        let reply = service.eval("f reset", &ctx()).await.unwrap();
        assert!(reply.is_error);
        assert!(reply.output[0].contains("requires the admin capability"));
        assert!(reply.commit.is_none());

        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["1"]);
        // set x 1 + proc definition, nothing else
        assert_eq!(store.log(10).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_commit_realigns_session_and_drops_cursor() {
        let store = Arc::new(FlakyStore::new());
        let service = EvalService::start(
            Box::new(ScriptInterpreter::new()),
            CapabilityGate::default(),
            store.clone(),
            ServiceOptions {
                page_size: 10,
                ..ServiceOptions::default()
            },
        )
        .await
        .unwrap();

        service.eval("set x 1", &ctx()).await.unwrap();
        // Leave a partially drained cursor live.
        service.eval("repeat 30 {puts x}", &ctx()).await.unwrap();

        store.fail_commits.store(true, Ordering::SeqCst);
        let err = service.eval("set x 2", &ctx()).await.unwrap_err();
        assert!(err.is_storage());

        // The stale cursor must not serve output against realigned state.
        assert!(matches!(
            service.more().await.unwrap_err(),
            EvaldError::NoActivePage
        ));

        // Session content matches the last recorded entry.
        store.fail_commits.store(false, Ordering::SeqCst);
        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["1"]);
        assert_eq!(store.log(10).unwrap().len(), 1);
    }

    #[test]
    fn test_short_id_respects_char_boundaries() {
        assert_eq!(short_id("deadbeefcafebabe"), "deadbeef");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("αβγδεζηθικλ"), "αβγδεζηθ");
    }

    #[tokio::test]
    async fn test_pagination_scenario_50_lines_page_20() {
        let (service, _) = service_with(ServiceOptions {
            page_size: 20,
            ..ServiceOptions::default()
        })
        .await;

        service.eval("set n 0", &ctx()).await.unwrap();
        let reply = service
            .eval("repeat 50 {incr n; puts line-$n}", &ctx())
            .await
            .unwrap();
        assert_eq!(reply.output.len(), 20);
        assert!(reply.more_available);

        let second = service.more().await.unwrap();
        assert_eq!(second.lines.len(), 20);
        assert!(second.more_available);

        let third = service.more().await.unwrap();
        assert_eq!(third.lines.len(), 10);
        assert!(!third.more_available);

        assert!(matches!(
            service.more().await.unwrap_err(),
            EvaldError::NoActivePage
        ));
    }

    #[tokio::test]
    async fn test_new_eval_supersedes_pending_page() {
        let (service, _) = service_with(ServiceOptions {
            page_size: 10,
            ..ServiceOptions::default()
        })
        .await;
        service.eval("repeat 30 {puts x}", &ctx()).await.unwrap();

        let reply = service.eval("puts fresh", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["fresh"]);
        assert!(!reply.more_available);

        assert!(matches!(
            service.more().await.unwrap_err(),
            EvaldError::NoActivePage
        ));
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let (service, _) = service().await;
        service.eval("set a 1", &ctx()).await.unwrap();
        service.eval("set b 2", &ctx()).await.unwrap();
        let last = service.eval("set c 3", &ctx()).await.unwrap();

        let history = service.history(2).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0], last.commit.unwrap());
    }

    #[tokio::test]
    async fn test_rollback_restores_content_and_appends_entry() {
        let (service, store) = service().await;
        let first = service.eval("set x 1", &ctx()).await.unwrap();
        service.eval("set x 2", &ctx()).await.unwrap();
        let target = first.commit.unwrap();

        let entry = service.rollback(&target.commit_id, &ctx()).await.unwrap();
        assert!(entry.message.contains("Rollback"));
        // History grew, never shrank.
        assert_eq!(store.log(10).unwrap().len(), 3);

        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["1"]);
    }

    #[tokio::test]
    async fn test_rollback_invalidates_pending_page() {
        let (service, _) = service_with(ServiceOptions {
            page_size: 10,
            ..ServiceOptions::default()
        })
        .await;
        let first = service.eval("set x 1", &ctx()).await.unwrap();
        let target = first.commit.unwrap();
        service.eval("repeat 30 {puts x}", &ctx()).await.unwrap();

        service.rollback(&target.commit_id, &ctx()).await.unwrap();
        assert!(matches!(
            service.more().await.unwrap_err(),
            EvaldError::NoActivePage
        ));
    }

    #[tokio::test]
    async fn test_rollback_twice_is_state_idempotent_not_history_idempotent() {
        let (service, store) = service().await;
        let first = service.eval("set x 1", &ctx()).await.unwrap();
        service.eval("set x 2", &ctx()).await.unwrap();
        let target = first.commit.unwrap();

        let a = service.rollback(&target.commit_id, &ctx()).await.unwrap();
        let content_a = service.eval("set x", &ctx()).await.unwrap().output;
        let b = service.rollback(&target.commit_id, &ctx()).await.unwrap();
        let content_b = service.eval("set x", &ctx()).await.unwrap().output;

        assert_ne!(a.commit_id, b.commit_id);
        assert_eq!(content_a, content_b);
        // Two mutations + two rollback entries
        assert_eq!(store.log(10).unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_rollback_unknown_commit() {
        let (service, _) = service().await;
        let err = service.rollback("nope", &ctx()).await.unwrap_err();
        assert!(matches!(err, EvaldError::UnknownCommit { .. }));
    }

    #[tokio::test]
    async fn test_startup_restores_from_head() {
        let store = Arc::new(MemoryHistoryStore::new());
        {
            let service = EvalService::start(
                Box::new(ScriptInterpreter::new()),
                CapabilityGate::default(),
                store.clone(),
                ServiceOptions::default(),
            )
            .await
            .unwrap();
            service.eval("set x 42", &ctx()).await.unwrap();
        }

        // A fresh service over the same store sees the committed content.
        let service = EvalService::start(
            Box::new(ScriptInterpreter::new()),
            CapabilityGate::default(),
            store,
            ServiceOptions::default(),
        )
        .await
        .unwrap();
        let reply = service.eval("set x", &ctx()).await.unwrap();
        assert_eq!(reply.output, vec!["42"]);
    }
}
