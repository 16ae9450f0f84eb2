//! Program-scoped mutual exclusion.
//!
//! Merges, scheduler runs and escalation writes for one program serialize on
//! that program's lock; different programs proceed in parallel.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::model::ProgramId;

/// Registry of per-program locks.
#[derive(Debug, Default)]
pub struct ProgramLocks {
    locks: Mutex<HashMap<ProgramId, Arc<Mutex<()>>>>,
    imports: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProgramLocks {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `program`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if a previous holder panicked, or
    /// whatever `f` returns.
    pub fn with_program<T>(&self, program: &ProgramId, f: impl FnOnce() -> Result<T>) -> Result<T> {
        hold(&self.locks, program, f)
    }

    /// Runs `f` while holding the import lock for a program's external id.
    ///
    /// A program has no [`ProgramId`] until its first import lands, so
    /// imports serialize on the source key. Always taken before the
    /// program lock, never inside it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockPoisoned`] if a previous holder panicked, or
    /// whatever `f` returns.
    pub fn with_import<T>(&self, external_id: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        hold(&self.imports, &external_id.to_string(), f)
    }
}

fn hold<K, T>(
    registry: &Mutex<HashMap<K, Arc<Mutex<()>>>>,
    key: &K,
    f: impl FnOnce() -> Result<T>,
) -> Result<T>
where
    K: Clone + Eq + Hash + Display,
{
    let lock = {
        let mut registry =
            registry.lock().map_err(|_| Error::LockPoisoned("lock registry".into()))?;
        Arc::clone(registry.entry(key.clone()).or_default())
    };
    let _guard = lock.lock().map_err(|_| Error::LockPoisoned(format!("lock {key}")))?;
    f()
}
