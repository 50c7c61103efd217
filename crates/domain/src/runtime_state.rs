use crate::config::TodoPolicyMode;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Per-run, never-persisted state. Owned exclusively by the turn
/// controller; no other component mutates it.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub objective_digest: String,
    ledger: HashMap<String, LedgerEntry>,
    completed_facts: BoundedFifo<String>,
    blocked_facts: BoundedFifo<String>,
    recent_errors: BoundedFifo<String>,
    no_progress_signatures: BoundedFifo<String>,
    mistake_window: BoundedFifo<i32>,
    pub todo: TodoSnapshot,
    pub todo_policy: TodoPolicyMode,
    pub todo_minimum_items: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerEntry {
    Proposed,
    Dispatched,
    Completed,
    Failed,
    Aborted,
}

impl LedgerEntry {
    fn is_terminal(self) -> bool {
        matches!(self, LedgerEntry::Completed | LedgerEntry::Failed | LedgerEntry::Aborted)
    }
}

/// Snapshot of todo-list tracking state, owned by an external collaborator
/// but mirrored here so guards can read it without a round-trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TodoSnapshot {
    pub enabled: bool,
    pub total: usize,
    pub open: usize,
    pub in_progress: usize,
    pub version: u64,
    pub last_updated_round: u64,
}

/// A fixed-capacity FIFO: pushing past capacity evicts the oldest entry.
#[derive(Debug, Clone)]
pub struct BoundedFifo<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T> Default for BoundedFifo<T> {
    fn default() -> Self {
        Self { cap: usize::MAX, items: VecDeque::new() }
    }
}

impl<T> BoundedFifo<T> {
    pub fn new(cap: usize) -> Self {
        Self { cap, items: VecDeque::with_capacity(cap.min(64)) }
    }

    pub fn push(&mut self, item: T) {
        if self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl BoundedFifo<i32> {
    pub fn sum(&self) -> i32 {
        self.items.iter().sum()
    }
}

impl RuntimeState {
    pub fn new(
        completed_facts_cap: usize,
        blocked_facts_cap: usize,
        recent_errors_cap: usize,
        no_progress_signatures_cap: usize,
        mistake_window_cap: usize,
        todo_policy: TodoPolicyMode,
        todo_minimum_items: usize,
    ) -> Self {
        Self {
            objective_digest: String::new(),
            ledger: HashMap::new(),
            completed_facts: BoundedFifo::new(completed_facts_cap),
            blocked_facts: BoundedFifo::new(blocked_facts_cap),
            recent_errors: BoundedFifo::new(recent_errors_cap),
            no_progress_signatures: BoundedFifo::new(no_progress_signatures_cap),
            mistake_window: BoundedFifo::new(mistake_window_cap),
            todo: TodoSnapshot::default(),
            todo_policy,
            todo_minimum_items,
        }
    }

    /// Record a ledger transition for `call_id`. Panics in debug builds if
    /// the call-id already reached a terminal state (§3 invariant:
    /// `completed`/`aborted`/`failed` are terminal).
    pub fn record_ledger(&mut self, call_id: &str, entry: LedgerEntry) {
        if let Some(prev) = self.ledger.get(call_id) {
            debug_assert!(!prev.is_terminal(), "ledger transition after terminal state for {call_id}");
        }
        self.ledger.insert(call_id.to_string(), entry);
    }

    pub fn ledger_state(&self, call_id: &str) -> Option<LedgerEntry> {
        self.ledger.get(call_id).copied()
    }

    pub fn push_completed_fact(&mut self, fact: String) {
        self.completed_facts.push(fact);
    }

    pub fn push_blocked_fact(&mut self, fact: String) {
        self.blocked_facts.push(fact);
    }

    pub fn push_recent_error(&mut self, err: String) {
        self.recent_errors.push(err);
    }

    pub fn push_no_progress_signature(&mut self, sig: String) {
        self.no_progress_signatures.push(sig);
    }

    pub fn push_mistake(&mut self, delta: i32) {
        self.mistake_window.push(delta);
    }

    pub fn mistake_sum(&self) -> i32 {
        self.mistake_window.sum()
    }

    pub fn recent_errors(&self) -> impl Iterator<Item = &String> {
        self.recent_errors.iter()
    }

    pub fn completed_facts(&self) -> impl Iterator<Item = &String> {
        self.completed_facts.iter()
    }

    pub fn blocked_facts(&self) -> impl Iterator<Item = &String> {
        self.blocked_facts.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_fifo_evicts_oldest() {
        let mut fifo = BoundedFifo::new(3);
        fifo.push(1);
        fifo.push(2);
        fifo.push(3);
        fifo.push(4);
        assert_eq!(fifo.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn mistake_window_sums_pushed_values() {
        let mut state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        state.push_mistake(1);
        state.push_mistake(2);
        assert_eq!(state.mistake_sum(), 3);
    }

    #[test]
    fn ledger_records_transitions() {
        let mut state = RuntimeState::new(12, 12, 6, 8, 8, TodoPolicyMode::None, 0);
        state.record_ledger("c1", LedgerEntry::Proposed);
        state.record_ledger("c1", LedgerEntry::Dispatched);
        state.record_ledger("c1", LedgerEntry::Completed);
        assert_eq!(state.ledger_state("c1"), Some(LedgerEntry::Completed));
    }

    #[test]
    fn completed_and_blocked_facts_are_bounded() {
        let mut state = RuntimeState::new(2, 2, 6, 8, 8, TodoPolicyMode::None, 0);
        state.push_completed_fact("a".into());
        state.push_completed_fact("b".into());
        state.push_completed_fact("c".into());
        assert_eq!(state.completed_facts().count(), 2);
    }
}
