// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use ssd_components::delay::Delay;
use ssd_components::sink::Sink;
use ssd_components::source::Source;
use ssd_components::{connect_port, option_box_repeat};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;

#[test]
fn source_delay_sink() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    let delay_ticks = 3;
    let num_puts = 30;

    let top = engine.top();
    let source = Source::new_and_register(&engine, top, "source", option_box_repeat!(500 ; num_puts))
        .unwrap();
    let delay: Rc<Delay<i32>> =
        Delay::new_and_register(&engine, &clock, top, "delay", delay_ticks).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();

    connect_port!(source, tx => delay, rx).unwrap();
    connect_port!(delay, tx => sink, rx).unwrap();

    run_simulation!(engine);

    assert_eq!(sink.num_sunk(), num_puts);
    // Every value spends at least `delay_ticks` inside the delay
    assert!(engine.time_now_ns() >= delay_ticks as f64);
}

#[test]
fn delay_cannot_change_after_start() {
    let mut engine = start_test(file!());
    let clock = engine.default_clock();

    let top = engine.top();
    let source = Source::new_and_register(&engine, top, "source", option_box_repeat!(1 ; 1)).unwrap();
    let delay: Rc<Delay<i32>> = Delay::new_and_register(&engine, &clock, top, "delay", 2).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();

    connect_port!(source, tx => delay, rx).unwrap();
    connect_port!(delay, tx => sink, rx).unwrap();

    assert!(delay.set_delay(5).is_ok());
    run_simulation!(engine);
    assert!(delay.set_delay(7).is_err());
}
