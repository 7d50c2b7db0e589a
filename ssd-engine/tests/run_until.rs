// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use ssd_engine::events::all_of::AllOf;
use ssd_engine::test_helpers::start_test;

mod common;
use common::{create_once_event_at_delay, spawn_activity};

#[test]
fn run_until_once() {
    let mut engine = start_test(file!());

    let once = create_once_event_at_delay(&mut engine, 5, 1);

    spawn_activity(&mut engine);
    engine.run_until(once).unwrap();

    assert_eq!(engine.time_now_ns(), 5.0);
}

#[test]
fn run_until_allof_5_10() {
    let mut engine = start_test(file!());

    let ev_1 = create_once_event_at_delay(&mut engine, 5, 1);
    let ev_2 = create_once_event_at_delay(&mut engine, 10, 2);
    let allof = Box::new(AllOf::new(vec![ev_1, ev_2]));

    spawn_activity(&mut engine);
    engine.run_until(allof).unwrap();

    assert_eq!(engine.time_now_ns(), 10.0);
}

#[test]
fn run_until_allof_10_5() {
    let mut engine = start_test(file!());

    let ev_1 = create_once_event_at_delay(&mut engine, 10, 1);
    let ev_2 = create_once_event_at_delay(&mut engine, 5, 2);
    let allof = Box::new(AllOf::new(vec![ev_1, ev_2]));

    spawn_activity(&mut engine);
    engine.run_until(allof).unwrap();

    assert_eq!(engine.time_now_ns(), 10.0);
}
