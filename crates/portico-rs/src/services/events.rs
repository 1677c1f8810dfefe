//! Event bus with synchronous fire-and-forget delivery.
//!
//! Observers run on the emitting call site. An observer that panics or
//! misbehaves is logged and never fails the request that triggered the
//! event.

use crate::models::event::GatewayEvent;
use log::{debug, error};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Receiver of gateway events.
///
/// Implementations must be cheap: delivery is synchronous. Anything slow
/// (network shipping, disk) should hand off to its own channel internally.
pub trait EventObserver: Send + Sync {
    fn on_event(&self, event: &GatewayEvent);
}

/// Built-in observer that mirrors every event to the debug log.
pub struct LogObserver;

impl EventObserver for LogObserver {
    fn on_event(&self, event: &GatewayEvent) {
        debug!(
            "event {} backend={} tenant={} data={}",
            event.name,
            event.backend.as_deref().unwrap_or("-"),
            event.tenant.as_deref().unwrap_or("-"),
            event.data
        );
    }
}

/// Fan-out point for all gateway events.
///
/// The observer list is fixed after construction; emission never blocks on
/// locks.
pub struct EventBus {
    observers: Vec<Arc<dyn EventObserver>>,
}

impl EventBus {
    pub fn new(observers: Vec<Arc<dyn EventObserver>>) -> Self {
        Self { observers }
    }

    /// Bus with only the log observer attached.
    pub fn with_logging() -> Self {
        Self::new(vec![Arc::new(LogObserver)])
    }

    /// Delivers an event to every observer. Observer panics are caught,
    /// logged, and swallowed.
    pub fn emit(&self, event: GatewayEvent) {
        for observer in &self.observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.on_event(&event)));
            if result.is_err() {
                error!("event observer panicked while handling {}", event.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    impl EventObserver for Counter {
        fn on_event(&self, _event: &GatewayEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Panicker;

    impl EventObserver for Panicker {
        fn on_event(&self, _event: &GatewayEvent) {
            panic!("observer bug");
        }
    }

    #[test]
    fn panicking_observer_does_not_stop_delivery() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let bus = EventBus::new(vec![Arc::new(Panicker), counter.clone()]);

        bus.emit(GatewayEvent::new("request.received"));
        bus.emit(GatewayEvent::new("request.proxied"));

        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }
}
