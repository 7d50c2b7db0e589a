// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::cell::RefCell;
use std::rc::Rc;

use ssd_engine::port::{InPort, OutPort};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_models::error::{ErrorKind, ErrorLog};
use ssd_models::host::index_allocator::IndexAllocator;
use ssd_models::test_helpers::create_read;
use ssd_models::PS_CLOCK_GHZ;

#[test]
fn assigns_smallest_free_tag() {
    let mut engine = start_test(file!());
    let top = engine.top();
    let error_log = ErrorLog::new();

    let allocator =
        IndexAllocator::new_and_register(&engine, top, "alloc", 8, error_log.clone()).unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(allocator.port_rx()).unwrap();
    let out_rx = InPort::new(top, "out_rx");
    allocator.connect_port_tx(out_rx.state()).unwrap();
    let mut release_driver = OutPort::new(top, "release_driver");
    release_driver.connect(allocator.port_release_rx()).unwrap();

    let indices = Rc::new(RefCell::new(Vec::new()));
    {
        let top = top.clone();
        engine.spawn(async move {
            for i in 0..3 {
                driver.put(create_read(&top, i * 0x40, 64, -1))?.await;
            }
            Ok(())
        });
    }
    {
        let indices = indices.clone();
        let top = top.clone();
        engine.spawn(async move {
            let mut held = Vec::new();
            for _ in 0..3 {
                let packet = out_rx.get()?.await;
                indices.borrow_mut().push(packet.index());
                held.push(packet);
            }

            // Release tag 1 and allocate again: the smallest free tag is 1
            release_driver.put(held.remove(1))?.await;
            Ok(())
        });
    }

    run_simulation!(engine);

    assert_eq!(*indices.borrow(), vec![0, 1, 2]);
    assert_eq!(allocator.num_allocated(), 2);
    assert_eq!(allocator.stats().total_released, 1);
}

#[test]
fn allocate_release_is_idempotent() {
    let mut engine = start_test(file!());
    let top = engine.top();
    let error_log = ErrorLog::new();

    let allocator =
        IndexAllocator::new_and_register(&engine, top, "alloc", 4, error_log.clone()).unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(allocator.port_rx()).unwrap();
    let out_rx = InPort::new(top, "out_rx");
    allocator.connect_port_tx(out_rx.state()).unwrap();
    let mut release_driver = OutPort::new(top, "release_driver");
    release_driver.connect(allocator.port_release_rx()).unwrap();

    {
        let top = top.clone();
        engine.spawn(async move {
            driver.put(create_read(&top, 0, 64, -1))?.await;
            Ok(())
        });
    }
    engine.spawn(async move {
        let packet = out_rx.get()?.await;
        assert_eq!(packet.index(), 0);
        release_driver.put(packet)?.await;
        Ok(())
    });

    run_simulation!(engine);

    // Allocating then releasing returns the allocator to an equivalent state
    assert_eq!(allocator.num_allocated(), 0);
    assert_eq!(allocator.stats().total_allocated, 1);
    assert_eq!(allocator.stats().total_released, 1);
    assert_eq!(allocator.stats().release_errors, 0);
}

/// max_index = 4 with 10 requests; the outstanding set
/// never exceeds 4 and every request is eventually tagged.
#[test]
fn back_pressure_with_reuse() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let error_log = ErrorLog::new();

    let max_index = 4;
    let num_requests = 10;
    let allocator =
        IndexAllocator::new_and_register(&engine, top, "alloc", max_index, error_log.clone())
            .unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(allocator.port_rx()).unwrap();
    let out_rx = InPort::new(top, "out_rx");
    allocator.connect_port_tx(out_rx.state()).unwrap();
    let mut release_driver = OutPort::new(top, "release_driver");
    release_driver.connect(allocator.port_release_rx()).unwrap();

    {
        let top = top.clone();
        engine.spawn(async move {
            for i in 0..num_requests {
                driver.put(create_read(&top, i * 0x40, 64, -1))?.await;
            }
            Ok(())
        });
    }

    // A device that holds each request briefly, checking the in-flight
    // bound, then releases its tag.
    {
        let allocator = allocator.clone();
        engine.spawn(async move {
            for _ in 0..num_requests {
                let packet = out_rx.get()?.await;
                assert!(allocator.num_allocated() <= max_index as usize);
                assert!(packet.index() >= 0 && (packet.index() as u32) < max_index);
                clock.wait_ticks(500).await;
                release_driver.put(packet)?.await;
            }
            Ok(())
        });
    }

    run_simulation!(engine);

    let stats = allocator.stats();
    assert_eq!(stats.total_allocated, num_requests as usize);
    assert_eq!(stats.total_released, num_requests as usize);
    assert_eq!(allocator.num_allocated(), 0);
}

#[test]
fn releasing_unallocated_tag_is_surfaced() {
    let mut engine = start_test(file!());
    let top = engine.top();
    let error_log = ErrorLog::new();

    let allocator =
        IndexAllocator::new_and_register(&engine, top, "alloc", 4, error_log.clone()).unwrap();

    // The forward path must be connected even though it is not driven
    let out_rx = InPort::new(top, "out_rx");
    allocator.connect_port_tx(out_rx.state()).unwrap();
    let mut driver = OutPort::new(top, "driver");
    driver.connect(allocator.port_rx()).unwrap();

    let mut release_driver = OutPort::new(top, "release_driver");
    release_driver.connect(allocator.port_release_rx()).unwrap();
    {
        let top = top.clone();
        engine.spawn(async move {
            // Tag 3 was never allocated
            release_driver.put(create_read(&top, 0, 64, 3))?.await;
            Ok(())
        });
    }

    run_simulation!(engine);

    assert_eq!(allocator.stats().release_errors, 1);
    assert_eq!(error_log.count_of(ErrorKind::ResourceExhausted), 1);
}
