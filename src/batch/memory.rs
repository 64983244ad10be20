//! In-memory transactional repository
//!
//! A small store for tests, benches and local experiments. Every session
//! stages its writes and publishes them on commit; commits can be made to
//! fail on demand. Queries match committed paths, either by `prefix` or by
//! `regex`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail};
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;

use super::resource::{QueryResults, ResourceProvider, TransactionalResource};

/// Query language matching paths that start with the statement
pub const PREFIX_LANGUAGE: &str = "prefix";

/// Query language matching paths against a regular expression
pub const REGEX_LANGUAGE: &str = "regex";

#[derive(Debug, Default)]
struct RepositoryState {
    committed: RwLock<BTreeMap<String, Value>>,
    failing_commits: AtomicUsize,
    commit_count: AtomicUsize,
    next_session: AtomicU64,
    closed_sessions: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

/// Shared in-memory store acting as a batch's base resource
#[derive(Debug, Clone, Default)]
pub struct MemoryRepository {
    state: Arc<RepositoryState>,
}

impl MemoryRepository {
    /// Empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a committed value, bypassing sessions
    pub fn insert(&self, path: impl Into<String>, value: Value) {
        self.state.committed.write().insert(path.into(), value);
    }

    /// Committed value at `path`
    pub fn committed(&self, path: &str) -> Option<Value> {
        self.state.committed.read().get(path).cloned()
    }

    /// Number of committed paths
    pub fn len(&self) -> usize {
        self.state.committed.read().len()
    }

    /// True when nothing is committed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next `count` commits fail
    pub fn fail_next_commits(&self, count: usize) {
        self.state.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Successful commits across all sessions
    pub fn commit_count(&self) -> usize {
        self.state.commit_count.load(Ordering::SeqCst)
    }

    /// Sessions minted so far
    pub fn sessions_derived(&self) -> u64 {
        self.state.next_session.load(Ordering::SeqCst)
    }

    /// Ids of closed sessions, in closing order
    pub fn closed_sessions(&self) -> Vec<u64> {
        self.state.closed_sessions.lock().clone()
    }

    /// Whether the batch closed the repository
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

impl ResourceProvider for MemoryRepository {
    type Resource = MemorySession;

    fn derive(&self) -> anyhow::Result<MemorySession> {
        if self.is_closed() {
            bail!("repository is closed");
        }
        let id = self.state.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemorySession {
            id,
            state: Arc::clone(&self.state),
            staged: BTreeMap::new(),
            live: true,
        })
    }

    fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

/// A session on a [`MemoryRepository`] with its own staged writes
#[derive(Debug)]
pub struct MemorySession {
    id: u64,
    state: Arc<RepositoryState>,
    staged: BTreeMap<String, Option<Value>>,
    live: bool,
}

impl MemorySession {
    /// Id assigned when the session was derived
    pub fn session_id(&self) -> u64 {
        self.id
    }

    /// Read a value, seeing this session's staged writes first
    pub fn get(&self, path: &str) -> Option<Value> {
        match self.staged.get(path) {
            Some(staged) => staged.clone(),
            None => self.state.committed.read().get(path).cloned(),
        }
    }

    /// Stage a write
    pub fn put(&mut self, path: &str, value: Value) {
        self.staged.insert(path.to_string(), Some(value));
    }

    /// Stage a removal
    pub fn remove(&mut self, path: &str) {
        self.staged.insert(path.to_string(), None);
    }

    /// Whether anything is staged
    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Mark the session as no longer usable without closing it
    pub fn invalidate(&mut self) {
        self.live = false;
    }
}

impl TransactionalResource for MemorySession {
    fn commit(&mut self) -> anyhow::Result<()> {
        if !self.is_live() {
            bail!("session {} is not live", self.id);
        }
        let rejected = self
            .state
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            let discarded = std::mem::take(&mut self.staged).len();
            bail!("commit rejected, {discarded} staged change(s) discarded");
        }

        let mut committed = self.state.committed.write();
        for (path, value) in std::mem::take(&mut self.staged) {
            match value {
                Some(value) => committed.insert(path, value),
                None => committed.remove(&path),
            };
        }
        self.state.commit_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if self.live {
            self.live = false;
            self.staged.clear();
            self.state.closed_sessions.lock().push(self.id);
        }
    }

    fn is_live(&self) -> bool {
        self.live && !self.state.closed.load(Ordering::SeqCst)
    }

    fn query(&mut self, statement: &str, language: &str) -> anyhow::Result<QueryResults<'_>> {
        let committed = self.state.committed.read();
        let paths: Vec<String> = match language {
            PREFIX_LANGUAGE => committed
                .keys()
                .filter(|path| path.starts_with(statement))
                .cloned()
                .collect(),
            REGEX_LANGUAGE => {
                let pattern = Regex::new(statement)
                    .map_err(|e| anyhow!("invalid query '{statement}': {e}"))?;
                committed
                    .keys()
                    .filter(|path| pattern.is_match(path))
                    .cloned()
                    .collect()
            }
            other => bail!("unsupported query language '{other}'"),
        };
        Ok(Box::new(paths.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_staged_writes_visible_after_commit() {
        let repo = MemoryRepository::new();
        let mut session = repo.derive().unwrap();
        session.put("/a", json!("x"));

        assert_eq!(session.get("/a"), Some(json!("x")));
        assert_eq!(repo.committed("/a"), None);

        session.commit().unwrap();
        assert_eq!(repo.committed("/a"), Some(json!("x")));
        assert_eq!(repo.commit_count(), 1);
    }

    #[test]
    fn test_rejected_commit_discards_changes() {
        let repo = MemoryRepository::new();
        let mut session = repo.derive().unwrap();
        session.put("/a", json!(1));
        repo.fail_next_commits(1);

        assert!(session.commit().is_err());
        assert!(!session.has_changes());
        session.commit().unwrap();
        assert_eq!(repo.committed("/a"), None);
    }

    #[test]
    fn test_query_languages() {
        let repo = MemoryRepository::new();
        for path in ["/content/a", "/content/b", "/etc/c"] {
            repo.insert(path, json!({}));
        }
        let mut session = repo.derive().unwrap();

        let by_prefix: Vec<String> = session
            .query("/content", PREFIX_LANGUAGE)
            .unwrap()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(by_prefix, vec!["/content/a", "/content/b"]);

        let by_regex: Vec<String> = session
            .query(r"/(a|c)$", REGEX_LANGUAGE)
            .unwrap()
            .collect::<anyhow::Result<_>>()
            .unwrap();
        assert_eq!(by_regex, vec!["/content/a", "/etc/c"]);

        assert!(session.query("x", "xpath").is_err());
    }

    #[test]
    fn test_closed_repository_refuses_sessions() {
        let repo = MemoryRepository::new();
        let session = repo.derive().unwrap();
        repo.close();

        assert!(!session.is_live());
        assert!(repo.derive().is_err());
    }
}
