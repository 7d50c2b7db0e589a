// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use ssd_components::sink::Sink;
use ssd_engine::port::InPort;
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_engine::types::AccessType;
use ssd_models::traffic_gen::{TrafficConfig, TrafficGen, TrafficPattern, WorkloadTemplate};
use ssd_models::{ns_to_ticks, PS_CLOCK_GHZ};

#[test]
fn emits_exact_transaction_count() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);

    let config = TrafficConfig {
        num_transactions: 5,
        interval_ticks: ns_to_ticks(10.0),
        write_percentage: 0,
        locality_percentage: 100,
        ..TrafficConfig::default()
    };
    let top = engine.top();
    let tg = TrafficGen::new_and_register(&engine, &clock, top, "tg", config).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();
    tg.connect_port_tx(sink.port_rx()).unwrap();

    run_simulation!(engine);

    assert_eq!(sink.num_sunk(), 5);
    let stats = tg.stats();
    assert_eq!(stats.generated, 5);
    assert_eq!(stats.reads, 5);
    assert_eq!(stats.writes, 0);
    // One CONSTANT interval follows each of the five emissions
    assert_eq!(engine.time_now_ns(), 50.0);
}

#[test]
fn sequential_cursor_wraps() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);

    let config = TrafficConfig {
        num_transactions: 4,
        interval_ticks: 0,
        locality_percentage: 100,
        write_percentage: 0,
        start_address: 0,
        end_address: 0x2F,
        address_increment: 0x10,
        ..TrafficConfig::default()
    };
    let top = engine.top();
    let tg = TrafficGen::new_and_register(&engine, &clock, top, "tg", config).unwrap();

    let rx = InPort::new(top, "rx");
    tg.connect_port_tx(rx.state()).unwrap();

    let addresses = Rc::new(RefCell::new(Vec::new()));
    {
        let addresses = addresses.clone();
        engine.spawn(async move {
            for _ in 0..4 {
                let packet = rx.get()?.await;
                addresses.borrow_mut().push(packet.address());
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    // The cursor wraps back to the window start after exceeding the end
    assert_eq!(*addresses.borrow(), vec![0x00, 0x10, 0x20, 0x00]);
}

#[test]
fn write_percentage_is_respected() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);

    let config = TrafficConfig {
        num_transactions: 20,
        interval_ticks: 0,
        write_percentage: 100,
        ..TrafficConfig::default()
    };
    let top = engine.top();
    let tg = TrafficGen::new_and_register(&engine, &clock, top, "tg", config).unwrap();

    let rx = InPort::new(top, "rx");
    tg.connect_port_tx(rx.state()).unwrap();
    engine.spawn(async move {
        for _ in 0..20 {
            let packet = rx.get()?.await;
            assert_eq!(packet.command(), AccessType::Write);
            // Writes carry a drawn data word
            assert!(packet.data() >= 0 && packet.data() < 0x1000);
        }
        Ok(())
    });

    run_simulation!(engine);
    assert_eq!(tg.stats().writes, 20);
}

#[test]
fn outstanding_gate_holds() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);

    let max_outstanding = 2;
    let num_transactions = 6;
    let config = TrafficConfig {
        num_transactions,
        interval_ticks: 0,
        max_outstanding,
        ..TrafficConfig::default()
    };
    let top = engine.top();
    let tg = TrafficGen::new_and_register(&engine, &clock, top, "tg", config).unwrap();

    let rx = InPort::new(top, "rx");
    tg.connect_port_tx(rx.state()).unwrap();

    let outstanding = tg.outstanding_handle();
    let completion = tg.completion_event();
    {
        let clock = clock.clone();
        engine.spawn(async move {
            for _ in 0..num_transactions {
                let _packet = rx.get()?.await;
                assert!(outstanding.get() <= max_outstanding);
                clock.wait_ticks(100).await;
                outstanding.set(outstanding.get() - 1);
                completion.notify()?;
            }
            Ok(())
        });
    }

    run_simulation!(engine);
    assert_eq!(tg.stats().generated, num_transactions);
}

#[test]
fn burst_pattern_paces_in_groups() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);

    let config = TrafficConfig {
        num_transactions: 4,
        pattern: TrafficPattern::Burst,
        burst_size: 2,
        burst_interval_ticks: ns_to_ticks(1.0),
        idle_time_ticks: ns_to_ticks(50.0),
        ..TrafficConfig::default()
    };
    let top = engine.top();
    let tg = TrafficGen::new_and_register(&engine, &clock, top, "tg", config).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();
    tg.connect_port_tx(sink.port_rx()).unwrap();

    run_simulation!(engine);

    // burst(1ns) idle(50ns) burst(1ns) idle(50ns)
    assert_eq!(engine.time_now_ns(), 102.0);
    assert_eq!(sink.num_sunk(), 4);
}

#[test]
fn templates_override_pattern() {
    let config = TrafficConfig::default().with_template(WorkloadTemplate::WebServer);
    assert_eq!(config.pattern, TrafficPattern::Poisson);
    assert_eq!(config.write_percentage, 10);

    let config = TrafficConfig::default().with_template(WorkloadTemplate::MlInference);
    assert_eq!(config.write_percentage, 0);
    assert_eq!(config.locality_percentage, 100);
}

#[test]
fn invalid_percentage_is_rejected() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let config = TrafficConfig {
        write_percentage: 101,
        ..TrafficConfig::default()
    };
    let top = engine.top();
    assert!(TrafficGen::new_and_register(&engine, &clock, top, "tg", config).is_err());
    engine.run().unwrap();
}
