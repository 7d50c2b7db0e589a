// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use ssd_components::connect_port;
use ssd_components::router::{DefaultRouter, Route, Router};
use ssd_components::sink::Sink;
use ssd_components::source::Source;
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_engine::traits::Routable;
use ssd_engine::types::SimError;

#[test]
fn routes_by_destination() {
    let mut engine = start_test(file!());

    let top = engine.top();
    // i32 routes by its own value
    let source = Source::new_and_register(
        &engine,
        top,
        "source",
        Some(Box::new([0, 1, 1, 0, 1].into_iter())),
    )
    .unwrap();
    let router: Rc<Router<i32>> =
        Router::new_and_register(&engine, top, "router", 2, Box::new(DefaultRouter {})).unwrap();
    let sink0 = Sink::new_and_register(&engine, top, "sink0").unwrap();
    let sink1 = Sink::new_and_register(&engine, top, "sink1").unwrap();

    connect_port!(source, tx => router, rx).unwrap();
    connect_port!(router, tx, 0 => sink0, rx).unwrap();
    connect_port!(router, tx, 1 => sink1, rx).unwrap();

    run_simulation!(engine);

    assert_eq!(sink0.num_sunk(), 2);
    assert_eq!(sink1.num_sunk(), 3);
}

struct ModuloRouter {
    num_egress: usize,
}

impl<T> Route<T> for ModuloRouter
where
    T: Routable,
{
    fn route(&self, object: &T) -> Result<usize, SimError> {
        Ok(object.destination() as usize % self.num_egress)
    }
}

#[test]
fn custom_policy() {
    let mut engine = start_test(file!());

    let top = engine.top();
    let source = Source::new_and_register(
        &engine,
        top,
        "source",
        Some(Box::new((0..9_i32).collect::<Vec<_>>().into_iter())),
    )
    .unwrap();
    let router: Rc<Router<i32>> = Router::new_and_register(
        &engine,
        top,
        "router",
        3,
        Box::new(ModuloRouter { num_egress: 3 }),
    )
    .unwrap();
    let sinks: Vec<_> = (0..3)
        .map(|i| Sink::new_and_register(&engine, top, format!("sink{i}").as_str()).unwrap())
        .collect();

    connect_port!(source, tx => router, rx).unwrap();
    for (i, sink) in sinks.iter().enumerate() {
        router.connect_port_tx_i(i, sink.port_rx()).unwrap();
    }

    run_simulation!(engine);

    for sink in &sinks {
        assert_eq!(sink.num_sunk(), 3);
    }
}
