//! Verifies that circuit transitions are reported through `tracing`.

#![allow(clippy::expect_used)]

use std::sync::{Arc, Mutex};

use trustcore_storage::{ResilientStore, ResilientStoreConfig, testutil::FlakyBackend};
use tracing::{Subscriber, field::Visit};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records event messages as they are emitted
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct EventCollector {
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor(Option<String>);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = Some(format!("{value:?}"));
        }
    }
}

impl<S> tracing_subscriber::Layer<S> for EventCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = MessageVisitor(None);
        event.record(&mut visitor);
        if let Some(message) = visitor.0 {
            self.messages.lock().expect("lock poisoned").push(message);
        }
    }
}

#[tokio::test]
async fn opening_the_circuit_emits_warning() {
    let collector = EventCollector::default();
    let messages = Arc::clone(&collector.messages);

    let subscriber = tracing_subscriber::registry().with(collector);
    let _guard = tracing::subscriber::set_default(subscriber);

    let backend = FlakyBackend::new();
    let store =
        ResilientStore::new(Arc::new(backend.clone()), "flaky", ResilientStoreConfig::default());
    backend.fail();
    for _ in 0..5 {
        let _ = store.get("k").await;
    }

    let recorded = messages.lock().expect("lock poisoned");
    assert!(
        recorded.iter().any(|m| m == "circuit breaker opened"),
        "expected an 'opened' event, got: {recorded:?}"
    );
    assert!(recorded.iter().filter(|m| *m == "backend call failed").count() >= 5);
}
