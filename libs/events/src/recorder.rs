//! The recorder seam.

use tracing::{info, warn};

use crate::envelope::{Event, ObjectRef};

/// Sink for reconcile events.
///
/// `record` must not block: implementations that talk to the cluster buffer
/// the event and deliver it in the background.
pub trait EventRecorder: Send + Sync {
    /// Record an event regarding `regarding`.
    fn record(&self, regarding: &ObjectRef, event: Event);
}

/// Recorder that only writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, regarding: &ObjectRef, event: Event) {
        if event.is_warning() {
            warn!(
                regarding = %regarding,
                reason = %event.reason,
                "{}",
                event.message
            );
        } else {
            info!(
                regarding = %regarding,
                reason = %event.reason,
                "{}",
                event.message
            );
        }
    }
}

/// Fans a single event out to several recorders.
pub struct Fanout {
    sinks: Vec<Box<dyn EventRecorder>>,
}

impl Fanout {
    /// Create a fan-out over the given recorders.
    pub fn new(sinks: Vec<Box<dyn EventRecorder>>) -> Self {
        Self { sinks }
    }
}

impl EventRecorder for Fanout {
    fn record(&self, regarding: &ObjectRef, event: Event) {
        for sink in &self.sinks {
            sink.record(regarding, event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone, Default)]
    struct Counting(Arc<Mutex<usize>>);

    impl EventRecorder for Counting {
        fn record(&self, _regarding: &ObjectRef, _event: Event) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_fanout_delivers_to_every_sink() {
        let a = Counting::default();
        let b = Counting::default();
        let fanout = Fanout::new(vec![Box::new(a.clone()), Box::new(b.clone()), Box::new(TracingRecorder)]);

        let target = ObjectRef {
            api_version: "v1".to_string(),
            kind: "Cell".to_string(),
            namespace: "default".to_string(),
            name: "hr".to_string(),
            uid: String::new(),
        };
        fanout.record(&target, Event::normal("Created", "created"));

        assert_eq!(*a.0.lock().unwrap(), 1);
        assert_eq!(*b.0.lock().unwrap(), 1);
    }
}
