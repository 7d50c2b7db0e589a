// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use ssd_track::entity::toplevel;
use ssd_track::test_helpers::check_and_clear;
use ssd_track::tracker::in_memory::{InMemoryTracker, TrackEvent};
use ssd_track::{create_tag, enter, exit, info, test_init, Tracker};

#[test]
fn entity_creation_tracked() {
    let (test_tracker, tracker) = test_init!(10);
    let top = toplevel(&tracker, "top");
    check_and_clear(&test_tracker, &["0: created 10, top, 0 bytes"]);

    let child = ssd_track::entity::Entity::new(&top, "ssd");
    check_and_clear(&test_tracker, &["10: created 11, top::ssd, 0 bytes"]);
    assert_eq!(child.full_name(), "top::ssd");
}

#[test]
fn log_and_movement_macros() {
    let (test_tracker, tracker) = test_init!(20);
    let top = toplevel(&tracker, "top");
    check_and_clear(&test_tracker, &["0: created 20, top, 0 bytes"]);

    let tag = create_tag!(top);
    enter!(top ; tag);
    info!(top ; "hello {}", 42);
    exit!(top ; tag);

    check_and_clear(
        &test_tracker,
        &["20: 21 entered", "20:INFO: hello 42", "20: 21 exited"],
    );
}

#[test]
fn in_memory_records_movement() {
    let in_memory = std::sync::Arc::new(InMemoryTracker::new());
    let tracker: Tracker = in_memory.clone();
    let top = toplevel(&tracker, "top");

    let tag = create_tag!(top);
    enter!(top ; tag);
    exit!(top ; tag);

    let events = in_memory.take_events();
    // Creation of `top` plus the enter/exit pair
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], TrackEvent::Enter { .. }));
    assert!(matches!(events[2], TrackEvent::Exit { .. }));
    assert_eq!(in_memory.entity_name(top.tag).as_deref(), Some("top"));
}
