//! Per-run cancellation tokens with group fan-out.
//!
//! Each running turn loop gets an [`al_domain::CancelToken`]. Calling
//! [`CancelMap::cancel`] on a run key signals the turn controller to stop
//! cleanly. Groups cascade: cancelling a parent run cancels every child
//! registered under it (used when a run spawns sub-runs).

use al_domain::cancel::{CancelReason, CancelToken};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Tracks active cancellation tokens per run key, with group support for
/// cascading parent-to-child cancellation.
pub struct CancelMap {
    tokens: Mutex<HashMap<String, CancelToken>>,
    groups: Mutex<HashMap<String, HashSet<String>>>,
}

impl Default for CancelMap {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelMap {
    pub fn new() -> Self {
        Self { tokens: Mutex::new(HashMap::new()), groups: Mutex::new(HashMap::new()) }
    }

    /// Create and register a new cancel token for `run_key`.
    pub fn register(&self, run_key: &str) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_key.to_owned(), token.clone());
        token
    }

    /// Cancel a running turn loop. Cascades to every child in its group.
    /// Returns true if a token was found for `run_key`.
    pub fn cancel(&self, run_key: &str, reason: CancelReason) -> bool {
        let found = if let Some(token) = self.tokens.lock().get(run_key) {
            token.cancel(reason);
            true
        } else {
            false
        };

        if let Some(children) = self.groups.lock().get(run_key) {
            let tokens = self.tokens.lock();
            for child_key in children {
                if let Some(child_token) = tokens.get(child_key) {
                    child_token.cancel(reason);
                }
            }
        }

        found
    }

    /// Remove the token for `run_key` (called when the run completes).
    pub fn remove(&self, run_key: &str) {
        self.tokens.lock().remove(run_key);
        self.groups.lock().remove(run_key);
    }

    pub fn is_running(&self, run_key: &str) -> bool {
        self.tokens.lock().contains_key(run_key)
    }

    pub fn add_to_group(&self, parent_key: &str, child_key: &str) {
        self.groups.lock().entry(parent_key.to_owned()).or_default().insert(child_key.to_owned());
    }

    pub fn remove_from_group(&self, parent_key: &str, child_key: &str) {
        let mut groups = self.groups.lock();
        if let Some(children) = groups.get_mut(parent_key) {
            children.remove(child_key);
            if children.is_empty() {
                groups.remove(parent_key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_cancel() {
        let map = CancelMap::new();
        let token = map.register("s1");
        assert!(!token.is_canceled());
        assert!(map.is_running("s1"));

        assert!(map.cancel("s1", CancelReason::Canceled));
        assert!(token.is_canceled());

        map.remove("s1");
        assert!(!map.is_running("s1"));
        assert!(!map.cancel("s1", CancelReason::Canceled));
    }

    #[test]
    fn cancel_cascades_to_children() {
        let map = CancelMap::new();
        let parent = map.register("parent");
        let child1 = map.register("child1");
        let child2 = map.register("child2");

        map.add_to_group("parent", "child1");
        map.add_to_group("parent", "child2");

        map.cancel("parent", CancelReason::TimedOut);
        assert!(parent.is_canceled());
        assert!(child1.is_canceled());
        assert!(child2.is_canceled());
    }

    #[test]
    fn remove_from_group_prevents_cascade() {
        let map = CancelMap::new();
        let _parent = map.register("p");
        let child = map.register("c");

        map.add_to_group("p", "c");
        map.remove_from_group("p", "c");

        map.cancel("p", CancelReason::Canceled);
        assert!(!child.is_canceled());
    }

    #[test]
    fn cancel_nonexistent_run_returns_false() {
        let map = CancelMap::new();
        assert!(!map.cancel("does_not_exist", CancelReason::Canceled));
    }

    #[test]
    fn group_cleaned_up_on_parent_remove() {
        let map = CancelMap::new();
        let _parent = map.register("parent");
        let child = map.register("child");
        map.add_to_group("parent", "child");
        map.remove("parent");

        assert!(map.is_running("child"));
        assert!(!child.is_canceled());
    }
}
