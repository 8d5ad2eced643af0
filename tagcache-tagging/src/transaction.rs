//! Transaction and savepoint scopes.
//!
//! Each session owns a stack of scopes. The first scope pushed is the root
//! transaction; anything pushed on top of it is a savepoint that shares the
//! root's id and start time but keeps its own tag set.
//!
//! Every tag touched while scopes are open is recorded in all of them, so
//! the root always knows every tag touched by its savepoints. Only the root
//! releases tags when it finishes; finishing a savepoint just pops it. With
//! no scope open, touching tags records nothing and acquires nothing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tagcache_core::{ContextId, KeyVersion, TagCacheResult, TagVersion, Timestamp};

use crate::lock::TagLock;

/// Kind of an open scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Outermost scope; releases tags when finished.
    Transaction,
    /// Nested scope; finishing it releases nothing.
    SavePoint,
}

#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    start_time: Timestamp,
    dependencies: HashMap<KeyVersion, BTreeSet<String>>,
}

impl Scope {
    fn new(kind: ScopeKind) -> Self {
        Self {
            kind,
            start_time: Utc::now(),
            dependencies: HashMap::new(),
        }
    }
}

/// Per-session stack of transaction scopes bound to an isolation lock.
pub struct TransactionManager {
    lock: Arc<dyn TagLock>,
    id: ContextId,
    scopes: Vec<Scope>,
}

impl TransactionManager {
    pub fn new(lock: Arc<dyn TagLock>, id: ContextId) -> Self {
        Self {
            lock,
            id,
            scopes: Vec::new(),
        }
    }

    /// Open a scope: the root transaction if none is open, a savepoint otherwise.
    pub fn begin(&mut self) -> ScopeKind {
        let kind = if self.scopes.is_empty() {
            ScopeKind::Transaction
        } else {
            ScopeKind::SavePoint
        };
        self.scopes.push(Scope::new(kind));
        tracing::trace!(id = %self.id, ?kind, depth = self.scopes.len(), "Transaction scope begun");
        kind
    }

    /// Record tag keys in every open scope and acquire them.
    ///
    /// Outside a transaction this does nothing.
    pub async fn add_dependency(&mut self, tag_keys: &[String], version: KeyVersion) -> TagCacheResult<()> {
        if self.scopes.is_empty() || tag_keys.is_empty() {
            return Ok(());
        }
        for scope in &mut self.scopes {
            scope
                .dependencies
                .entry(version)
                .or_default()
                .extend(tag_keys.iter().cloned());
        }
        self.lock.acquire(tag_keys, &self.id, version).await
    }

    /// Close the innermost scope.
    ///
    /// Finishing the root releases every tag it recorded, per version. Returns
    /// the kind of the closed scope, or `None` if nothing was open.
    ///
    /// The scope is popped even when a release fails; every version is still
    /// attempted and the first error is returned.
    pub async fn finish(&mut self) -> TagCacheResult<Option<ScopeKind>> {
        let Some(scope) = self.scopes.pop() else {
            return Ok(None);
        };
        tracing::trace!(id = %self.id, kind = ?scope.kind, depth = self.scopes.len(), "Transaction scope finished");

        if scope.kind == ScopeKind::SavePoint {
            return Ok(Some(scope.kind));
        }

        let mut first_error = None;
        for (version, tags) in scope.dependencies {
            if tags.is_empty() {
                continue;
            }
            let tag_keys: Vec<String> = tags.into_iter().collect();
            if let Err(e) = self.lock.release(&tag_keys, &self.id, version).await {
                tracing::warn!(id = %self.id, ?version, error = %e, "Tag release failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(Some(scope.kind)),
        }
    }

    /// Finish every open scope, innermost first.
    pub async fn flush(&mut self) -> TagCacheResult<()> {
        let mut first_error = None;
        while !self.scopes.is_empty() {
            if let Err(e) = self.finish().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Resolve tag versions through the lock, as of the root's start time.
    pub async fn resolve(
        &self,
        tag_keys: &[String],
        version: KeyVersion,
    ) -> TagCacheResult<HashMap<String, TagVersion>> {
        self.lock
            .resolve(tag_keys, self.start_time(), &self.id, version)
            .await
    }

    /// Start time of the root transaction, or now when none is open.
    pub fn start_time(&self) -> Timestamp {
        self.scopes
            .first()
            .map(|scope| scope.start_time)
            .unwrap_or_else(Utc::now)
    }

    /// Transaction id; shared by the root and all its savepoints.
    pub fn current_id(&self) -> &ContextId {
        &self.id
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_active(&self) -> bool {
        !self.scopes.is_empty()
    }

    /// Kind of the innermost open scope.
    pub fn current_kind(&self) -> Option<ScopeKind> {
        self.scopes.last().map(|scope| scope.kind)
    }

    /// Tag keys recorded by the scope at `depth` (0 = root) for `version`.
    pub fn recorded(&self, depth: usize, version: KeyVersion) -> BTreeSet<String> {
        self.scopes
            .get(depth)
            .and_then(|scope| scope.dependencies.get(&version))
            .cloned()
            .unwrap_or_default()
    }

    pub fn lock(&self) -> &Arc<dyn TagLock> {
        &self.lock
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("isolation_level", &self.lock.isolation_level())
            .field("id", &self.id)
            .field("scopes", &self.scopes)
            .finish()
    }
}
