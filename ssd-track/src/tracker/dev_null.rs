// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! A tracker that discards every event.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::tracker::Track;
use crate::{Tag, ROOT};

/// A tracker that suppresses all events but still issues unique tags.
pub struct DevNullTracker {}

static UNIQUE_TAG: AtomicU64 = AtomicU64::new(ROOT.0 + 1);

impl Track for DevNullTracker {
    fn unique_tag(&self) -> Tag {
        Tag(UNIQUE_TAG.fetch_add(1, Ordering::SeqCst))
    }

    fn is_entity_enabled(&self, _tag: Tag, _level: log::Level) -> bool {
        false
    }

    fn add_entity(&self, _tag: Tag, _entity_name: &str) {}

    fn enter(&self, _tag: Tag, _object: Tag) {}

    fn exit(&self, _tag: Tag, _object: Tag) {}

    fn create(&self, _created_by: Tag, _tag: Tag, _num_bytes: usize, _name: &str) {}

    fn destroy(&self, _destroyed_by: Tag, _tag: Tag) {}

    fn connect(&self, _connect_from: Tag, _connect_to: Tag) {}

    fn log(&self, _tag: Tag, _level: log::Level, _msg: std::fmt::Arguments) {}

    fn time(&self, _set_by: Tag, _time_ns: f64) {}

    fn shutdown(&self) {}
}
