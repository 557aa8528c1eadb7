use std::collections::HashSet;
use std::sync::Mutex;

/// Reentrancy filter keyed by operation name.
///
/// A key that is already held is refused instead of waited on, so a replay
/// that loops back into the mirror for the same operation is dropped.
#[derive(Debug, Default)]
pub struct RecursionGuard {
    active: Mutex<HashSet<&'static str>>,
}

/// Held key; released when dropped.
#[must_use = "the key is released as soon as the scope is dropped"]
#[derive(Debug)]
pub struct RecursionScope<'a> {
    guard: &'a RecursionGuard,
    key: &'static str,
}

impl RecursionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`, or `None` when it is already held.
    pub fn try_enter(&self, key: &'static str) -> Option<RecursionScope<'_>> {
        let mut active = match self.active.lock() {
            Ok(active) => active,
            Err(_) => {
                log::warn!("[RecursionGuard] Lock poisoned, refusing {}", key);
                return None;
            }
        };
        if !active.insert(key) {
            tracing::trace!("[RecursionGuard] Reentry refused for {}", key);
            return None;
        }
        Some(RecursionScope { guard: self, key })
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.active
            .lock()
            .map(|active| active.contains(key))
            .unwrap_or(false)
    }
}

impl RecursionScope<'_> {
    pub fn key(&self) -> &'static str {
        self.key
    }
}

impl Drop for RecursionScope<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.guard.active.lock() {
            active.remove(self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_is_refused() {
        let guard = RecursionGuard::new();
        let scope = guard.try_enter("instance.start");
        assert!(scope.is_some());
        assert!(guard.try_enter("instance.start").is_none());
        assert!(guard.is_active("instance.start"));
    }

    #[test]
    fn test_release_readmits() {
        let guard = RecursionGuard::new();
        {
            let _scope = guard.try_enter("instance.set_volume");
        }
        assert!(!guard.is_active("instance.set_volume"));
        assert!(guard.try_enter("instance.set_volume").is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let guard = RecursionGuard::new();
        let _start = guard.try_enter("instance.start");
        assert!(guard.try_enter("instance.stop").is_some());
    }

    #[test]
    fn test_scope_released_on_early_return() {
        fn replay(guard: &RecursionGuard, fail: bool) -> Result<(), ()> {
            let _scope = guard.try_enter("instance.release").ok_or(())?;
            if fail {
                return Err(());
            }
            Ok(())
        }

        let guard = RecursionGuard::new();
        assert!(replay(&guard, true).is_err());
        assert!(replay(&guard, false).is_ok());
        assert!(!guard.is_active("instance.release"));
    }
}
