use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::apply::abandoned_call;
use crate::error::{Error, Result};

/// Live cloud target
///
/// Renders call the cloud handle directly. Writes go through [`mutate`],
/// which serializes them, counts them for the run report and refuses them
/// once the calling render has timed out.
///
/// [`mutate`]: ApiTarget::mutate
#[derive(Debug, Default)]
pub struct ApiTarget {
    write_lock: Mutex<()>,
    mutations: AtomicUsize,
}

impl ApiTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one cloud write
    pub fn mutate<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = abandoned_call() {
            log::warn!("{task}: late write refused");
            return Err(Error::Abandoned { task });
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(f())
    }

    /// Number of writes issued so far
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }
}
