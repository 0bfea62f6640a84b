//! Units of work that change the content cache
//!
//! An update is either *complete* (it rebuilds the whole cache from the
//! authoritative source) or *partial* (it applies one incremental change).
//! The controller decides when and against which cache an update runs; the
//! update only knows how to change the cache it is handed.

use crate::content::ContentCache;
use sos_common::Result;
use std::fmt;

/// A change to the content cache
///
/// `execute` may be called more than once for the same partial update: once
/// against the live cache and again when it is replayed on the result of a
/// complete update that was running concurrently. Partial updates must
/// therefore be idempotent. `reset` is called before every run.
pub trait ContentCacheUpdate: Send + Sync + fmt::Debug {
    /// Whether this update rebuilds the whole cache
    fn is_complete_update(&self) -> bool {
        false
    }

    /// Forget per-run state left over from a previous `execute`
    fn reset(&self) {}

    /// Apply the change to `cache`
    ///
    /// Complete updates receive a private copy of the current cache and
    /// must leave the rebuilt content in it.
    fn execute(&self, cache: &mut ContentCache) -> Result<()>;
}

type UpdateFn = dyn Fn(&mut ContentCache) -> Result<()> + Send + Sync;

/// Update backed by a closure
pub struct FnUpdate {
    name: String,
    complete: bool,
    apply: Box<UpdateFn>,
}

impl FnUpdate {
    /// A partial update running `apply` against the live cache
    pub fn partial<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut ContentCache) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            complete: false,
            apply: Box::new(apply),
        }
    }

    /// A complete update rebuilding the cache with `apply`
    pub fn complete<F>(name: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&mut ContentCache) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            complete: true,
            apply: Box::new(apply),
        }
    }
}

impl fmt::Debug for FnUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUpdate")
            .field("name", &self.name)
            .field("complete", &self.complete)
            .finish_non_exhaustive()
    }
}

impl ContentCacheUpdate for FnUpdate {
    fn is_complete_update(&self) -> bool {
        self.complete
    }

    fn execute(&self, cache: &mut ContentCache) -> Result<()> {
        (self.apply)(cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sos_common::Error;

    #[test]
    fn test_fn_update_kind_and_execution() {
        let partial = FnUpdate::partial("add-offering", |cache| {
            cache.add_offering("A");
            Ok(())
        });
        let complete = FnUpdate::complete("rebuild", |cache| {
            cache.clear();
            Err(Error::datasource("unreachable"))
        });

        assert!(!partial.is_complete_update());
        assert!(complete.is_complete_update());

        let mut cache = ContentCache::default();
        partial.execute(&mut cache).unwrap();
        assert!(cache.has_offering("A"));

        assert!(complete.execute(&mut cache).is_err());
        assert!(cache.is_empty());
        assert!(format!("{complete:?}").contains("rebuild"));
    }
}
