// Call recording for hand-written test doubles

use parking_lot::Mutex;
use std::sync::Arc;

/// Shared, ordered log of calls made to a test double.
///
/// Clones share the same log, so a double can hold one copy and the test
/// another.
#[derive(Clone, Default)]
pub struct CallRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Number of recorded calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls equal to `call`
    pub fn count_of(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    /// All recorded calls, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Check if a call was recorded
    pub fn was_called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| c == call)
    }

    /// Position of the first matching call
    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c == call)
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_is_shared_between_clones() {
        let recorder = CallRecorder::new();
        let double = recorder.clone();

        double.record("prepare:accounts");
        double.record("prepare:billing");
        double.record("prepare:billing");

        assert_eq!(recorder.call_count(), 3);
        assert_eq!(recorder.count_of("prepare:billing"), 2);
        assert_eq!(recorder.position("prepare:billing"), Some(1));
        assert!(recorder.was_called("prepare:accounts"));

        recorder.clear();
        assert_eq!(double.call_count(), 0);
    }
}
