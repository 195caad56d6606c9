//! Recording event sink.

use std::sync::{Mutex, MutexGuard};

use cellmesh_events::{Event, EventRecorder, ObjectRef};

/// Keeps every recorded event in memory.
#[derive(Default)]
pub struct RecordingRecorder {
    events: Mutex<Vec<(ObjectRef, Event)>>,
}

impl RecordingRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ObjectRef, Event)>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All events, oldest first.
    pub fn events(&self) -> Vec<(ObjectRef, Event)> {
        self.lock().clone()
    }

    /// Reasons of all events, oldest first.
    pub fn reasons(&self) -> Vec<String> {
        self.lock().iter().map(|(_, e)| e.reason.clone()).collect()
    }

    /// Warning events only.
    pub fn warnings(&self) -> Vec<Event> {
        self.lock()
            .iter()
            .filter(|(_, e)| e.is_warning())
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Number of events with the given reason.
    pub fn count(&self, reason: &str) -> usize {
        self.lock().iter().filter(|(_, e)| e.reason == reason).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl EventRecorder for RecordingRecorder {
    fn record(&self, regarding: &ObjectRef, event: Event) {
        self.lock().push((regarding.clone(), event));
    }
}
