// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! This module provides helper functions for testing logging output
//!
//! The aim of this module is to provide commonly-used functions that enable
//! the testing of the output that should appear from logging macros.

use core::sync::atomic::Ordering;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use regex::Regex;

use crate::tracker::{EntityManager, TraceState};
use crate::{Tag, Track, Tracker};

/// A tracker that keeps track events as formatted strings for checking.
pub struct TestTracker {
    events: Mutex<Vec<String>>,

    unique_tag: AtomicU64,
}

impl TestTracker {
    /// Create a new [`Tracker`](crate::Tracker) for the tests.
    ///
    /// This keeps the track events in memory for checking later.
    #[must_use]
    pub fn new(initial_tag: u64) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            unique_tag: AtomicU64::new(initial_tag),
        }
    }

    fn add_event(&self, event: String) {
        println!("{event}");
        let mut events = self.events.lock().unwrap();
        events.push(event);
    }
}

impl Track for TestTracker {
    fn unique_tag(&self) -> Tag {
        let tag = self.unique_tag.fetch_add(1, Ordering::SeqCst);
        Tag(tag)
    }

    fn is_entity_enabled(&self, _tag: Tag, _level: log::Level) -> bool {
        true
    }

    fn add_entity(&self, _tag: Tag, _entity_name: &str) {
        // Do nothing
    }

    fn enter(&self, tag: Tag, item: Tag) {
        self.add_event(format!("{tag}: {item} entered"));
    }

    fn exit(&self, tag: Tag, item: Tag) {
        self.add_event(format!("{tag}: {item} exited"));
    }

    fn create(&self, created_by: Tag, tag: Tag, num_bytes: usize, name: &str) {
        self.add_event(format!(
            "{created_by}: created {tag}, {name}, {num_bytes} bytes"
        ));
    }

    fn destroy(&self, destroyed_by: Tag, tag: Tag) {
        self.add_event(format!("{destroyed_by}: destroyed {tag}"));
    }

    fn connect(&self, connect_from: Tag, connect_to: Tag) {
        self.add_event(format!("{connect_from}: connect to {connect_to}"));
    }

    fn log(&self, tag: Tag, level: log::Level, msg: std::fmt::Arguments) {
        self.add_event(format!("{tag}:{level}: {msg}"));
    }

    fn time(&self, set_by: Tag, time_ns: f64) {
        self.add_event(format!("{set_by}: set time {time_ns:.1}ns"));
    }

    fn shutdown(&self) {
        // Do nothing
    }
}

/// Initialise the tracking system for tests
///
/// Creates a [`TestTracker`] that records all track events, returning both
/// the concrete tracker (for checking) and the type-erased [`Tracker`] to
/// build entities with.
///
/// # Arguments
///
/// * `start_tag` - The tag value to be set as the starting value
#[macro_export]
macro_rules! test_init {
    ($start_tag:expr) => {{
        let test_tracker = std::sync::Arc::new($crate::test_helpers::TestTracker::new($start_tag));
        let tracker: $crate::Tracker = test_tracker.clone();
        (test_tracker, tracker)
    }};
}

/// Check and clear the _trace_ and _log_ output
///
/// This function asserts that the logging output lines seen since the start
/// or the last time this function was called match the expected regular
/// expressions, then clears the recorded output.
pub fn check_and_clear(tracker: &TestTracker, expected: &[&str]) {
    let mut log_contents_ref = tracker.events.lock().unwrap();

    println!("Checking {:?} matches {:?}", expected, *log_contents_ref);

    // Check that there are the same number of strings produced as expected
    let num_strings = expected.len();
    assert_eq!(num_strings, log_contents_ref.len());

    for i in 0..num_strings {
        let log_expect = expected[i];
        let re = Regex::new(log_expect).unwrap();
        let actual = &(*log_contents_ref[i]);
        println!("Checking {i}: {log_expect:?} matches {actual:?}");
        assert!(re.is_match(actual));
    }

    log_contents_ref.clear();
}

/// Create the standard tracker used by tests.
///
/// Tests are quiet by default: trace events are suppressed and only warnings
/// and errors reach stdout. Raise the default here locally when debugging a
/// failing test.
#[must_use]
pub fn create_tracker(_full_filepath: &str) -> Tracker {
    let manager = EntityManager::new(TraceState::Disabled, log::Level::Warn);
    let writer = Box::new(std::io::BufWriter::new(std::io::stdout()));
    let tracker: Tracker = std::sync::Arc::new(crate::tracker::TextTracker::new(manager, writer));
    tracker
}
