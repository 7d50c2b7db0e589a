// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Define the [`Track`] trait and a number of [`Tracker`]s.

/// Include the /dev/null tracker.
pub mod dev_null;
/// Include the in-memory tracker.
pub mod in_memory;
/// Include the text-based tracker.
pub mod text;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use dev_null::DevNullTracker;
pub use in_memory::InMemoryTracker;
use regex::Regex;
pub use text::TextTracker;

use crate::{Tag, ROOT};

/// Whether trace events are recorded for an entity.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TraceState {
    /// Trace events are recorded.
    Enabled,
    /// Trace events are suppressed.
    Disabled,
}

/// This is the interface that is supported by all [`Tracker`]s.
pub trait Track {
    /// Allocate a new global tag
    fn unique_tag(&self) -> Tag;

    /// Determine whether an entity has trace enabled or is logging at the
    /// given level.
    fn is_entity_enabled(&self, tag: Tag, level: log::Level) -> bool;

    /// Register an entity (by its full hierarchical name) against its tag.
    fn add_entity(&self, tag: Tag, entity_name: &str);

    /// Track when an object with the given tag arrives.
    fn enter(&self, enter_into: Tag, enter_obj: Tag);

    /// Track when an object with the given tag leaves.
    fn exit(&self, exit_from: Tag, exit_obj: Tag);

    /// Track when an object with the given tag is created.
    fn create(&self, created_by: Tag, created_obj: Tag, num_bytes: usize, name: &str);

    /// Track when an object with the given tag is destroyed.
    fn destroy(&self, destroyed_by: Tag, destroyed_obj: Tag);

    /// Track a connection between two entities.
    fn connect(&self, connect_from: Tag, connect_to: Tag);

    /// Track a log message of the given level.
    fn log(&self, msg_by: Tag, level: log::Level, msg: std::fmt::Arguments);

    /// Advance the time to the time specified in `ns`.
    fn time(&self, set_by: Tag, time_ns: f64);

    /// Flush any buffered output.
    fn shutdown(&self);
}

/// The type of a [`Tracker`] that is shared across entities.
pub type Tracker = Arc<dyn Track + Send + Sync>;

/// Create a [`Tracker`] that prints all track events to `stdout`.
pub fn stdout_tracker() -> Tracker {
    let entity_manager = EntityManager::new(TraceState::Enabled, log::Level::Warn);
    let stdout_writer = Box::new(io::BufWriter::new(io::stdout()));
    let tracker: Tracker = Arc::new(TextTracker::new(entity_manager, stdout_writer));
    tracker
}

/// Create a [`Tracker`] that suppresses all track events.
pub fn dev_null_tracker() -> Tracker {
    let tracker: Tracker = Arc::new(DevNullTracker {});
    tracker
}

/// The [`EntityManager`] is responsible for determining entity log / trace
/// enable states.
///
/// This is shared by the concrete trackers. The manager is also used to
/// allocate unique [`Tag`] values and keep the current simulated time for
/// trackers that timestamp their events.
pub struct EntityManager {
    /// Whether trace events are enabled for entities with no matching filter.
    default_trace_enabled: bool,

    /// Level of _log_ events to output for entities with no matching filter.
    default_log_level: log::Level,

    /// List of regular expressions mapping entity names to trace
    /// enable/disable.
    regex_to_trace_enabled: Vec<(Regex, bool)>,

    /// List of regular expressions mapping entity names to log levels.
    regex_to_log_level: Vec<(Regex, log::Level)>,

    /// Resolved (trace, level) enables per registered entity tag.
    entity_enables: Mutex<HashMap<u64, (bool, log::Level)>>,

    /// Used to assign unique tags.
    unique_tag: AtomicU64,

    /// Keep track of the current time.
    current_time: Mutex<f64>,
}

impl EntityManager {
    /// Constructor with [`TraceState`] and [`log::Level`] defaults.
    pub fn new(default_trace_enabled: TraceState, default_log_level: log::Level) -> Self {
        Self {
            default_trace_enabled: default_trace_enabled == TraceState::Enabled,
            default_log_level,
            regex_to_trace_enabled: Vec::new(),
            regex_to_log_level: Vec::new(),
            entity_enables: Mutex::new(HashMap::new()),
            unique_tag: AtomicU64::new(ROOT.0 + 1),
            current_time: Mutex::new(0.0),
        }
    }

    pub(crate) fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag(tag)
    }

    fn trace_enabled_for(&self, entity_name: &str) -> bool {
        for (regex, enabled) in self.regex_to_trace_enabled.iter() {
            if regex.is_match(entity_name) {
                return *enabled;
            }
        }
        self.default_trace_enabled
    }

    fn log_level_for(&self, entity_name: &str) -> log::Level {
        for (regex, level) in self.regex_to_log_level.iter() {
            if regex.is_match(entity_name) {
                return *level;
            }
        }
        self.default_log_level
    }

    /// Register an entity name against its tag, resolving its enables.
    pub fn add_entity(&self, tag: Tag, entity_name: &str) {
        let enables = (
            self.trace_enabled_for(entity_name),
            self.log_level_for(entity_name),
        );
        self.entity_enables.lock().unwrap().insert(tag.0, enables);
    }

    /// Determine whether an entity has trace/logging enabled.
    ///
    /// `Trace` level checks the trace enable; all other levels compare
    /// against the entity's log level. Tags that were never registered (for
    /// example object tags) use the defaults.
    pub fn is_enabled(&self, tag: Tag, level: log::Level) -> bool {
        let enables = self.entity_enables.lock().unwrap();
        let (trace_enabled, log_level) = enables
            .get(&tag.0)
            .copied()
            .unwrap_or((self.default_trace_enabled, self.default_log_level));
        if level == log::Level::Trace {
            trace_enabled
        } else {
            level <= log_level
        }
    }

    /// Add a log filter regular expression.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ssd_track::tracker::{EntityManager, TraceState};
    /// let mut manager = EntityManager::new(TraceState::Disabled, log::Level::Warn);
    /// manager.add_log_filter(".*dram.*", log::Level::Trace);
    /// ```
    pub fn add_log_filter(&mut self, regex_str: &str, level: crate::log::Level) {
        match Regex::new(regex_str) {
            Ok(regex) => self.regex_to_log_level.push((regex, level)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{}\n", e),
        };
    }

    /// Add a filter regular expression for enabling/disabling trace for
    /// matching entities.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ssd_track::tracker::{EntityManager, TraceState};
    /// let mut manager = EntityManager::new(TraceState::Disabled, log::Level::Warn);
    /// manager.add_trace_filter(".*cache.*", TraceState::Enabled);
    /// ```
    pub fn add_trace_filter(&mut self, regex_str: &str, enabled: TraceState) {
        match Regex::new(regex_str) {
            Ok(regex) => self
                .regex_to_trace_enabled
                .push((regex, enabled == TraceState::Enabled)),
            Err(e) => panic!("Failed to parse regex {regex_str}:\n{}\n", e),
        };
    }

    fn time(&self) -> f64 {
        *self.current_time.lock().unwrap()
    }

    fn set_time(&self, new_time: f64) {
        let mut time_guard = self.current_time.lock().unwrap();
        assert!(new_time >= *time_guard);
        *time_guard = new_time;
    }
}
