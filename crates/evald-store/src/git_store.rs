//! Git-backed implementation of the history store.
//!
//! Snapshots are laid out as one blob per variable under `vars/` and one per
//! procedure under `procs/`, so `git log -p` on the state repository shows
//! exactly what each evaluation changed. History is strictly linear: every
//! operation, rollback included, lands as a new commit on HEAD. Nothing here
//! ever rewinds or rewrites existing commits.

use evald_core::error::{EvaldError, Result};
use evald_core::history::{HistoryEntry, HistoryStore};
use evald_core::session::{ProcDef, SessionSnapshot};
use git2::{Commit, Oid, Repository, Signature, Sort, Tree};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

/// Identity used for the initial commit.
const SERVICE_AUTHOR: &str = "evald";

/// History store persisting snapshots to a local git repository.
pub struct GitHistoryStore {
    // git2::Repository is not Sync; all access goes through this lock, which
    // also gives log() a consistent view against in-flight commits.
    repo: Mutex<Repository>,
    path: PathBuf,
}

impl GitHistoryStore {
    /// Opens the repository at `path`, initializing it with an empty initial
    /// commit when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let repo = match Repository::open(&path) {
            Ok(repo) => repo,
            Err(_) => {
                std::fs::create_dir_all(&path)?;
                let repo = Repository::init(&path).map_err(git_fault)?;
                info!(path = %path.display(), "initialized state repository");
                repo
            }
        };

        let store = Self {
            repo: Mutex::new(repo),
            path,
        };
        store.ensure_initial_commit()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Repository>> {
        self.repo
            .lock()
            .map_err(|_| EvaldError::storage("state repository lock poisoned"))
    }

    /// A fresh repository gets one empty commit so HEAD always resolves and
    /// the first evaluation has a parent.
    fn ensure_initial_commit(&self) -> Result<()> {
        let repo = self.lock()?;
        if repo.head().is_ok() {
            return Ok(());
        }

        let tree_id = repo.treebuilder(None).map_err(git_fault)?.write().map_err(git_fault)?;
        let tree = repo.find_tree(tree_id).map_err(git_fault)?;
        let sig = signature(SERVICE_AUTHOR)?;
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])
            .map_err(git_fault)?;

        debug!("created initial empty commit");
        Ok(())
    }

    fn write_snapshot_tree<'repo>(
        repo: &'repo Repository,
        snapshot: &SessionSnapshot,
    ) -> Result<Tree<'repo>> {
        let mut root = repo.treebuilder(None).map_err(git_fault)?;

        if !snapshot.vars.is_empty() {
            let mut vars = repo.treebuilder(None).map_err(git_fault)?;
            for (name, value) in &snapshot.vars {
                let blob = repo.blob(value.as_bytes()).map_err(git_fault)?;
                vars.insert(entry_name(name)?, blob, 0o100644)
                    .map_err(git_fault)?;
            }
            root.insert("vars", vars.write().map_err(git_fault)?, 0o040000)
                .map_err(git_fault)?;
        }

        if !snapshot.procs.is_empty() {
            let mut procs = repo.treebuilder(None).map_err(git_fault)?;
            for (name, def) in &snapshot.procs {
                let blob = repo.blob(encode_proc(def).as_bytes()).map_err(git_fault)?;
                procs
                    .insert(entry_name(name)?, blob, 0o100644)
                    .map_err(git_fault)?;
            }
            root.insert("procs", procs.write().map_err(git_fault)?, 0o040000)
                .map_err(git_fault)?;
        }

        let tree_id = root.write().map_err(git_fault)?;
        repo.find_tree(tree_id).map_err(git_fault)
    }

    fn read_snapshot_tree(repo: &Repository, tree: &Tree<'_>) -> Result<SessionSnapshot> {
        let mut snapshot = SessionSnapshot::default();

        if let Some(entry) = tree.get_name("vars") {
            let vars = repo.find_tree(entry.id()).map_err(git_fault)?;
            for item in vars.iter() {
                let name = item
                    .name()
                    .ok_or_else(|| EvaldError::storage("non-utf8 entry name in vars tree"))?
                    .to_string();
                let blob = repo.find_blob(item.id()).map_err(git_fault)?;
                let value = String::from_utf8_lossy(blob.content()).into_owned();
                snapshot.vars.insert(name, value);
            }
        }

        if let Some(entry) = tree.get_name("procs") {
            let procs = repo.find_tree(entry.id()).map_err(git_fault)?;
            for item in procs.iter() {
                let name = item
                    .name()
                    .ok_or_else(|| EvaldError::storage("non-utf8 entry name in procs tree"))?
                    .to_string();
                let blob = repo.find_blob(item.id()).map_err(git_fault)?;
                let content = String::from_utf8_lossy(blob.content()).into_owned();
                snapshot.procs.insert(name, decode_proc(&content));
            }
        }

        Ok(snapshot)
    }

    fn entry_for_commit(commit: &Commit<'_>) -> HistoryEntry {
        HistoryEntry {
            commit_id: commit.id().to_string(),
            author: commit
                .author()
                .name()
                .unwrap_or(SERVICE_AUTHOR)
                .to_string(),
            message: commit.summary().unwrap_or("").to_string(),
            timestamp: commit.time().seconds(),
        }
    }
}

impl HistoryStore for GitHistoryStore {
    fn commit(
        &self,
        snapshot: &SessionSnapshot,
        author: &str,
        message: &str,
    ) -> Result<HistoryEntry> {
        let repo = self.lock()?;

        let tree = Self::write_snapshot_tree(&repo, snapshot)?;
        let parent = repo
            .head()
            .and_then(|head| head.peel_to_commit())
            .map_err(git_fault)?;
        let sig = signature(author)?;

        let oid = repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])
            .map_err(git_fault)?;
        let commit = repo.find_commit(oid).map_err(git_fault)?;

        // Keep the working directory in step with HEAD for manual inspection.
        if !repo.is_bare() {
            let mut checkout = git2::build::CheckoutBuilder::new();
            checkout.force().remove_untracked(true);
            let _ = repo.checkout_head(Some(&mut checkout));
        }

        debug!(commit_id = %oid, author = %author, "snapshot committed");
        Ok(Self::entry_for_commit(&commit))
    }

    fn log(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let repo = self.lock()?;

        let mut revwalk = repo.revwalk().map_err(git_fault)?;
        revwalk.push_head().map_err(git_fault)?;
        // Timestamps have second resolution; topological order keeps
        // same-second commits newest-first.
        revwalk
            .set_sorting(Sort::TOPOLOGICAL | Sort::TIME)
            .map_err(git_fault)?;

        let mut entries = Vec::new();
        for oid in revwalk.take(limit) {
            let oid = oid.map_err(git_fault)?;
            let commit = repo.find_commit(oid).map_err(git_fault)?;
            entries.push(Self::entry_for_commit(&commit));
        }
        Ok(entries)
    }

    fn checkout(&self, commit_id: &str) -> Result<SessionSnapshot> {
        let repo = self.lock()?;

        // A malformed id matches no entry, same as an unknown one.
        let oid =
            Oid::from_str(commit_id).map_err(|_| EvaldError::unknown_commit(commit_id))?;
        let commit = repo
            .find_commit(oid)
            .map_err(|_| EvaldError::unknown_commit(commit_id))?;
        let tree = commit.tree().map_err(git_fault)?;

        Self::read_snapshot_tree(&repo, &tree)
    }

    fn head(&self) -> Result<Option<HistoryEntry>> {
        let repo = self.lock()?;
        match repo.head() {
            Ok(head) => {
                let commit = head.peel_to_commit().map_err(git_fault)?;
                Ok(Some(Self::entry_for_commit(&commit)))
            }
            Err(_) => Ok(None),
        }
    }
}

fn git_fault(err: git2::Error) -> EvaldError {
    EvaldError::storage(format!("git: {}", err.message()))
}

fn signature(author: &str) -> Result<Signature<'static>> {
    let email = format!("{}@evald", author);
    Signature::now(author, &email)
        .or_else(|_| Signature::now(SERVICE_AUTHOR, "evald@localhost"))
        .map_err(git_fault)
}

/// Tree entry names must be plain path components.
fn entry_name(name: &str) -> Result<&str> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(EvaldError::storage(format!(
            "name not representable in state repository: \"{}\"",
            name
        )));
    }
    Ok(name)
}

/// Proc file format: first line holds the parameter list, the rest the body.
fn encode_proc(def: &ProcDef) -> String {
    format!("{}\n{}", def.params.join(" "), def.body)
}

fn decode_proc(content: &str) -> ProcDef {
    let (params_line, body) = content.split_once('\n').unwrap_or((content, ""));
    ProcDef {
        params: params_line
            .split_whitespace()
            .map(|s| s.to_string())
            .collect(),
        body: body.to_string(),
    }
}
