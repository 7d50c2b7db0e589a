// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A tracker that records every event in memory.
//!
//! External collaborators (signal dumpers, statistics printers) drain the
//! recorded stream after a run; tests use it to assert on object movement.

use std::sync::Mutex;

use crate::tracker::{EntityManager, Track, TraceState};
use crate::Tag;

/// A single recorded track event, timestamped with the simulated time at
/// which it was emitted.
#[derive(Clone, Debug, PartialEq)]
pub enum TrackEvent {
    /// An object entered an entity.
    Enter {
        /// Simulated time in ns.
        time_ns: f64,
        /// The entity entered.
        entity: Tag,
        /// The object that entered.
        object: Tag,
    },
    /// An object left an entity.
    Exit {
        /// Simulated time in ns.
        time_ns: f64,
        /// The entity left.
        entity: Tag,
        /// The object that left.
        object: Tag,
    },
    /// An object or entity was created.
    Create {
        /// Simulated time in ns.
        time_ns: f64,
        /// The creating entity.
        created_by: Tag,
        /// The created object.
        object: Tag,
        /// Payload size of the created object.
        num_bytes: usize,
        /// Display name of the created object.
        name: String,
    },
    /// An object or entity was destroyed.
    Destroy {
        /// Simulated time in ns.
        time_ns: f64,
        /// The destroying entity.
        destroyed_by: Tag,
        /// The destroyed object.
        object: Tag,
    },
    /// Two entities were connected.
    Connect {
        /// The upstream entity.
        from: Tag,
        /// The downstream entity.
        to: Tag,
    },
    /// A log message.
    Log {
        /// Simulated time in ns.
        time_ns: f64,
        /// The emitting entity.
        entity: Tag,
        /// Message level.
        level: log::Level,
        /// Formatted message.
        message: String,
    },
}

/// A tracker that keeps all events in memory.
pub struct InMemoryTracker {
    entity_manager: EntityManager,
    events: Mutex<Vec<TrackEvent>>,
    entities: Mutex<Vec<(Tag, String)>>,
}

impl InMemoryTracker {
    /// Create a tracker with everything enabled at `Trace` level.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entity_manager: EntityManager::new(TraceState::Enabled, log::Level::Trace),
            events: Mutex::new(Vec::new()),
            entities: Mutex::new(Vec::new()),
        }
    }

    /// Create a tracker with a preconfigured [`EntityManager`].
    #[must_use]
    pub fn with_manager(entity_manager: EntityManager) -> Self {
        Self {
            entity_manager,
            events: Mutex::new(Vec::new()),
            entities: Mutex::new(Vec::new()),
        }
    }

    /// Take all recorded events, leaving the recorder empty.
    pub fn take_events(&self) -> Vec<TrackEvent> {
        std::mem::take(&mut self.events.lock().unwrap())
    }

    /// Number of recorded events.
    pub fn num_events(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Look up the full name registered for an entity tag.
    pub fn entity_name(&self, tag: Tag) -> Option<String> {
        self.entities
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, name)| name.clone())
    }

    fn record(&self, event: TrackEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn now_ns(&self) -> f64 {
        self.entity_manager.time()
    }
}

impl Default for InMemoryTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Track for InMemoryTracker {
    fn unique_tag(&self) -> Tag {
        self.entity_manager.unique_tag()
    }

    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool {
        self.entity_manager.is_enabled(tag, level)
    }

    fn add_entity(&self, tag: Tag, entity_name: &str) {
        self.entity_manager.add_entity(tag, entity_name);
        self.entities
            .lock()
            .unwrap()
            .push((tag, String::from(entity_name)));
    }

    fn enter(&self, tag: Tag, object: Tag) {
        self.record(TrackEvent::Enter {
            time_ns: self.now_ns(),
            entity: tag,
            object,
        });
    }

    fn exit(&self, tag: Tag, object: Tag) {
        self.record(TrackEvent::Exit {
            time_ns: self.now_ns(),
            entity: tag,
            object,
        });
    }

    fn create(&self, created_by: Tag, tag: Tag, num_bytes: usize, name: &str) {
        self.record(TrackEvent::Create {
            time_ns: self.now_ns(),
            created_by,
            object: tag,
            num_bytes,
            name: String::from(name),
        });
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.record(TrackEvent::Destroy {
            time_ns: self.now_ns(),
            destroyed_by,
            object: tag,
        });
    }

    fn connect(&self, connect_from: Tag, connect_to: Tag) {
        self.record(TrackEvent::Connect {
            from: connect_from,
            to: connect_to,
        });
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.record(TrackEvent::Log {
            time_ns: self.now_ns(),
            entity: tag,
            level,
            message: format!("{msg}"),
        });
    }

    fn time(&self, _set_by: Tag, time_ns: f64) {
        self.entity_manager.set_time(time_ns);
    }

    fn shutdown(&self) {}
}
