// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use ssd_components::sink::Sink;
use ssd_engine::port::{InPort, OutPort};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_models::profiler::{ProfilerBw, ProfilerLatency};
use ssd_models::test_helpers::create_read;
use ssd_models::{ns_to_ticks, PS_CLOCK_GHZ};

#[test]
fn bandwidth_accumulates_payload_bytes() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();

    let profiler =
        ProfilerBw::new_and_register(&engine, &clock, top, "bw", ns_to_ticks(1000.0)).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(profiler.port_rx()).unwrap();
    profiler.connect_port_tx(sink.port_rx()).unwrap();

    {
        let top = top.clone();
        engine.spawn(async move {
            for i in 0..10 {
                driver.put(create_read(&top, i * 0x40, 64, i as i32))?.await;
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = profiler.stats();
    assert_eq!(stats.total_packets, 10);
    assert_eq!(stats.total_bytes, 640);
    assert_eq!(sink.num_sunk(), 10);
}

#[test]
fn bandwidth_reports_reset_period() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();

    let period = ns_to_ticks(100.0);
    let profiler = ProfilerBw::new_and_register(&engine, &clock, top, "bw", period).unwrap();
    let sink = Sink::new_and_register(&engine, top, "sink").unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(profiler.port_rx()).unwrap();
    profiler.connect_port_tx(sink.port_rx()).unwrap();

    {
        let top = top.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            driver.put(create_read(&top, 0, 64, 0))?.await;
            // Hold the simulation open across one reporting period
            clock.wait_ticks(period + 1000).await;
            driver.put(create_read(&top, 0x40, 32, 1))?.await;
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = profiler.stats();
    assert_eq!(stats.total_bytes, 96);
    assert!(stats.num_reports >= 1);
    // The period counters were reset by the report between the packets
    assert_eq!(stats.period_bytes, 32);
}

#[test]
fn latency_percentiles_interpolate() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();

    let profiler =
        ProfilerLatency::new_and_register(&engine, &clock, top, "lat", ns_to_ticks(1_000_000.0))
            .unwrap();

    let mut req_driver = OutPort::new(top, "req_driver");
    req_driver.connect(profiler.port_req_rx()).unwrap();
    let req_out = InPort::new(top, "req_out");
    profiler.connect_port_req_tx(req_out.state()).unwrap();

    let mut rsp_driver = OutPort::new(top, "rsp_driver");
    rsp_driver.connect(profiler.port_rsp_rx()).unwrap();
    let rsp_out = InPort::new(top, "rsp_out");
    profiler.connect_port_rsp_tx(rsp_out.state()).unwrap();

    // Ten requests whose responses land 10ns, 20ns, ... 100ns later
    {
        let top = top.clone();
        let clock = clock.clone();
        engine.spawn(async move {
            let mut pending = Vec::new();
            for i in 0..10 {
                req_driver.put(create_read(&top, i * 0x40, 64, i as i32))?.await;
                pending.push(req_out.get()?.await);
            }
            for (i, packet) in pending.into_iter().enumerate() {
                // Absolute response times 10, 20, ... from t=0
                let target = ns_to_ticks(10.0 * (i + 1) as f64);
                let now = clock.tick_now().tick();
                if target > now {
                    clock.wait_ticks(target - now).await;
                }
                rsp_driver.put(packet)?.await;
                let _ = rsp_out.get()?.await;
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = profiler.stats();
    assert_eq!(stats.total_requests, 10);
    assert_eq!(stats.total_responses, 10);
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.min_ns, 10.0);
    assert_eq!(stats.max_ns, 100.0);
    assert_eq!(stats.avg_ns(), 55.0);
    // Linear interpolation between neighbouring ranks
    assert_eq!(stats.p50_ns, 55.0);
    assert!((stats.p95_ns - 95.5).abs() < 1e-9);
    assert!((stats.p99_ns - 99.1).abs() < 1e-9);
}

#[test]
fn unmatched_response_is_counted() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();

    let profiler =
        ProfilerLatency::new_and_register(&engine, &clock, top, "lat", ns_to_ticks(1000.0))
            .unwrap();

    let mut req_driver = OutPort::new(top, "req_driver");
    req_driver.connect(profiler.port_req_rx()).unwrap();
    let req_out = InPort::new(top, "req_out");
    profiler.connect_port_req_tx(req_out.state()).unwrap();

    let mut rsp_driver = OutPort::new(top, "rsp_driver");
    rsp_driver.connect(profiler.port_rsp_rx()).unwrap();
    let rsp_out = InPort::new(top, "rsp_out");
    profiler.connect_port_rsp_tx(rsp_out.state()).unwrap();

    {
        let top = top.clone();
        engine.spawn(async move {
            // A response whose index was never requested
            rsp_driver.put(create_read(&top, 0, 64, 42))?.await;
            let _ = rsp_out.get()?.await;
            // Keep the request side exercised too
            req_driver.put(create_read(&top, 0, 64, 1))?.await;
            let _ = req_out.get()?.await;
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = profiler.stats();
    assert_eq!(stats.unmatched_responses, 1);
    assert_eq!(stats.total_responses, 0);
    assert_eq!(stats.pending_requests, 1);
}
