//! Test fixtures and engine helpers.
//!
//! Provides convenience functions for setting up engines and common test
//! scenarios.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use treesync_core::{Event, EventSink, EventType, Node, Path, SinkError};
use treesync_engine::{EngineConfig, MockTransport, SyncEngine};

/// Engine type used throughout the tests.
pub type TestEngine = SyncEngine<MockTransport>;

/// Parses a path, panicking on invalid input.
pub fn path(s: &str) -> Path {
    Path::parse(s).expect("Invalid test path")
}

/// Builds a node from JSON, panicking on invalid input.
pub fn json_node(value: Value) -> Node {
    Node::from_json(&value).expect("Invalid test node")
}

/// Creates a disconnected engine with the default configuration.
pub fn engine() -> TestEngine {
    SyncEngine::new(EngineConfig::default(), MockTransport::new())
}

/// Creates an engine that has already connected.
pub fn connected_engine(config: EngineConfig) -> TestEngine {
    let engine = SyncEngine::new(config, MockTransport::new());
    engine.on_connecting().expect("Failed to start connecting");
    engine.on_connected().expect("Failed to connect");
    engine
}

/// Sink that records events into a shared buffer.
///
/// Clones share the buffer, so a test keeps one clone and hands the other to
/// the engine.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the recorded events.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Returns and clears the recorded events.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Returns the recorded event types.
    pub fn types(&self) -> Vec<EventType> {
        self.events.lock().iter().map(Event::event_type).collect()
    }

    /// Returns the node of the last recorded `value` event.
    pub fn last_value(&self) -> Option<Node> {
        self.events.lock().iter().rev().find_map(|event| match event {
            Event::Value { node, .. } => Some(node.clone()),
            _ => None,
        })
    }
}

impl EventSink for RecordingSink {
    fn on_event(&mut self, event: &Event) -> Result<(), SinkError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treesync_core::{ListenMode, QueryFilter};
    use treesync_engine::ConnectionState;

    #[test]
    fn connected_engine_is_connected() {
        let engine = connected_engine(EngineConfig::default());
        assert_eq!(engine.connection_state(), ConnectionState::Connected);
        assert_eq!(engine.stats().connections, 1);
    }

    #[test]
    fn recording_sink_shares_its_buffer() {
        let engine = connected_engine(EngineConfig::default());
        let sink = RecordingSink::new();
        engine
            .subscribe(
                path("/a"),
                QueryFilter::default(),
                ListenMode::Value,
                sink.clone(),
            )
            .unwrap();
        engine
            .on_server_update(path("/a"), json_node(serde_json::json!("hello")))
            .unwrap();

        assert_eq!(sink.types(), vec![EventType::Value]);
        assert_eq!(sink.last_value(), Some(Node::from("hello")));
        assert_eq!(sink.take().len(), 1);
        assert!(sink.events().is_empty());
    }
}
