use std::collections::HashMap;
use std::sync::RwLock;

/// Per-service execution history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionState {
    pub last_execution_ms: Option<u64>,
    pub run_count: u64,
}

impl ExecutionState {
    pub fn is_cold(&self) -> bool {
        self.run_count == 0
    }
}

/// In-memory execution history keyed by service name. Never persisted.
#[derive(Debug, Default)]
pub struct ExecutionStateStore {
    states: RwLock<HashMap<String, ExecutionState>>,
}

impl ExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, service: &str) -> Option<ExecutionState> {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(service).copied())
    }

    /// Current state for a run about to begin, inserting a fresh entry if absent.
    pub fn begin(&self, service: &str) -> ExecutionState {
        match self.states.write() {
            Ok(mut states) => *states.entry(service.to_string()).or_default(),
            Err(_) => ExecutionState::default(),
        }
    }

    /// Record a completed run.
    pub fn record(&self, service: &str, duration_ms: u64) {
        if let Ok(mut states) = self.states.write() {
            let state = states.entry(service.to_string()).or_default();
            state.last_execution_ms = Some(duration_ms);
            state.run_count += 1;
        }
    }

    /// Record a completed run only if the service already has state.
    pub fn update_existing(&self, service: &str, duration_ms: u64) -> bool {
        let Ok(mut states) = self.states.write() else {
            return false;
        };
        match states.get_mut(service) {
            Some(state) => {
                state.last_execution_ms = Some(duration_ms);
                state.run_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn last_execution_ms(&self, service: &str) -> Option<u64> {
        self.get(service).and_then(|s| s.last_execution_ms)
    }

    pub fn reset(&self, service: &str) -> bool {
        self.states
            .write()
            .map(|mut states| states.remove(service).is_some())
            .unwrap_or(false)
    }

    pub fn reset_all(&self) {
        if let Ok(mut states) = self.states.write() {
            states.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_existing_never_inserts() {
        let store = ExecutionStateStore::new();
        assert!(!store.update_existing("hello", 10));
        assert!(store.get("hello").is_none());

        store.begin("hello");
        assert!(store.update_existing("hello", 12));
        assert_eq!(
            store.get("hello"),
            Some(ExecutionState {
                last_execution_ms: Some(12),
                run_count: 1
            })
        );
    }

    #[test]
    fn test_record_and_reset() {
        let store = ExecutionStateStore::new();
        assert!(store.get("hello").is_none());
        assert!(store.begin("hello").is_cold());
        assert_eq!(store.get("hello"), Some(ExecutionState::default()));

        store.record("hello", 120);
        store.record("hello", 80);
        let state = store.get("hello").unwrap();
        assert_eq!(state.run_count, 2);
        assert_eq!(state.last_execution_ms, Some(80));
        assert!(!store.begin("hello").is_cold());

        assert!(store.reset("hello"));
        assert!(!store.reset("hello"));
        assert!(store.last_execution_ms("hello").is_none());
    }

    #[test]
    fn test_reset_all() {
        let store = ExecutionStateStore::new();
        store.record("a", 1);
        store.record("b", 2);
        store.reset_all();
        assert!(store.get("a").is_none());
        assert!(store.get("b").is_none());
    }
}
