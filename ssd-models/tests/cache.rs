// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use ssd_engine::engine::Engine;
use ssd_engine::port::{InPort, OutPort};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_models::cache::{CacheConfig, L1Cache, ReplacementPolicy, WritePolicy};
use ssd_models::packet::Packet;
use ssd_models::test_helpers::{create_read, create_write};
use ssd_models::PS_CLOCK_GHZ;

const HIT_TICKS: u64 = 1000;
const MISS_TICKS: u64 = 10_000;

fn build_cache(
    engine: &mut Engine,
    config: CacheConfig,
) -> (Rc<L1Cache>, OutPort<Packet>, InPort<Packet>) {
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let cache = L1Cache::new_and_register(engine, &clock, top, "cache", config).unwrap();

    let mut cpu_driver = OutPort::new(top, "cpu_driver");
    cpu_driver.connect(cache.port_cpu_rx()).unwrap();
    let cpu_recv = InPort::new(top, "cpu_recv");
    cache.connect_port_cpu_tx(cpu_recv.state()).unwrap();

    // A memory that echoes every request straight back
    let mem_recv = InPort::new(top, "mem_recv");
    cache.connect_port_mem_tx(mem_recv.state()).unwrap();
    let mut mem_driver = OutPort::new(top, "mem_driver");
    mem_driver.connect(cache.port_mem_rx()).unwrap();
    engine.spawn(async move {
        loop {
            let request = mem_recv.get()?.await;
            mem_driver.put(request)?.await;
        }
    });

    (cache, cpu_driver, cpu_recv)
}

fn small_config() -> CacheConfig {
    CacheConfig {
        size_kb: 8,
        line_size: 64,
        associativity: 4,
        hit_latency_ticks: HIT_TICKS,
        miss_latency_ticks: MISS_TICKS,
        ..CacheConfig::default()
    }
}

/// 8KB with 64B lines and 4 ways is 32 sets: address 0x1000 decodes to
/// set 0, tag 2.
#[test]
fn address_decode() {
    let mut engine = start_test(file!());
    let (cache, _driver, _recv) = build_cache(&mut engine, small_config());

    assert_eq!(cache.decode(0x1000), (0, 2));
    assert_eq!(cache.decode(0x0040), (1, 0));
    assert_eq!(cache.decode(0x0000), (0, 0));
}

/// A pure read in a cold cache populates the line; an immediate repeat of
/// the same address is a hit.
#[test]
fn cold_read_then_hit() {
    let mut engine = start_test(file!());
    let (cache, cpu_driver, cpu_recv) = build_cache(&mut engine, small_config());
    let top = engine.top().clone();

    engine.spawn(async move {
        cpu_driver.put(create_read(&top, 0x40, 64, 1))?.await;
        let response = cpu_recv.get()?.await;
        assert_eq!(response.address(), 0x40);

        cpu_driver.put(create_read(&top, 0x40, 64, 2))?.await;
        let response = cpu_recv.get()?.await;
        assert_eq!(response.address(), 0x40);
        Ok(())
    });

    run_simulation!(engine);

    let stats = cache.stats();
    assert_eq!(stats.accesses, 2);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.accesses, stats.hits + stats.misses);
    assert!(cache.holds(0x40));

    // One miss latency plus two hit/fill service points
    assert!(engine.time_now_ns() >= (MISS_TICKS + HIT_TICKS) as f64 / 1000.0);
}

#[test]
fn lru_evicts_oldest_line() {
    let mut engine = start_test(file!());
    let config = CacheConfig {
        size_kb: 1,
        line_size: 64,
        associativity: 2,
        replacement_policy: ReplacementPolicy::Lru,
        hit_latency_ticks: HIT_TICKS,
        miss_latency_ticks: MISS_TICKS,
        ..CacheConfig::default()
    };
    // 1KB / 64B / 2 ways = 8 sets; stride to stay in set 0
    let stride = 64 * 8;
    let (cache, cpu_driver, cpu_recv) = build_cache(&mut engine, config);
    let top = engine.top().clone();

    engine.spawn(async move {
        let a = 0;
        let b = stride;
        let c = 2 * stride;

        for (index, address) in [a, b].iter().enumerate() {
            cpu_driver
                .put(create_read(&top, *address, 64, index as i32))?
                .await;
            let _ = cpu_recv.get()?.await;
        }

        // Touch A so that B becomes the LRU way
        cpu_driver.put(create_read(&top, a, 64, 2))?.await;
        let _ = cpu_recv.get()?.await;

        cpu_driver.put(create_read(&top, c, 64, 3))?.await;
        let _ = cpu_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = cache.stats();
    assert_eq!(stats.evictions, 1);
    assert!(cache.holds(0));
    assert!(cache.holds(2 * stride));
    assert!(!cache.holds(stride));
}

#[test]
fn write_back_marks_dirty_and_counts_writebacks() {
    let mut engine = start_test(file!());
    let config = CacheConfig {
        size_kb: 1,
        line_size: 64,
        associativity: 2,
        write_policy: WritePolicy::WriteBack,
        hit_latency_ticks: HIT_TICKS,
        miss_latency_ticks: MISS_TICKS,
        ..CacheConfig::default()
    };
    let stride = 64 * 8;
    let (cache, cpu_driver, cpu_recv) = build_cache(&mut engine, config);
    let top = engine.top().clone();

    engine.spawn(async move {
        // Dirty fill in way 0, clean fills push it out
        cpu_driver.put(create_write(&top, 0, 7, 64, 0))?.await;
        let _ = cpu_recv.get()?.await;
        cpu_driver.put(create_read(&top, stride, 64, 1))?.await;
        let _ = cpu_recv.get()?.await;
        cpu_driver.put(create_read(&top, 2 * stride, 64, 2))?.await;
        let _ = cpu_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = cache.stats();
    assert_eq!(stats.misses, 3);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.writebacks, 1);
    assert!(stats.writebacks <= stats.evictions);
}

#[test]
fn write_through_forwards_copy_on_hit() {
    let mut engine = start_test(file!());
    let config = CacheConfig {
        write_policy: WritePolicy::WriteThrough,
        ..small_config()
    };
    let (cache, cpu_driver, cpu_recv) = build_cache(&mut engine, config);
    let top = engine.top().clone();

    engine.spawn(async move {
        // Fill the line
        cpu_driver.put(create_read(&top, 0x80, 64, 0))?.await;
        let _ = cpu_recv.get()?.await;

        // Write hit forwards a copy downstream without waiting for it
        cpu_driver.put(create_write(&top, 0x80, 9, 64, 1))?.await;
        let _ = cpu_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    // The echoed write-through copy had no waiting miss
    assert_eq!(stats.absorbed_acks, 1);
}

#[test]
fn write_around_bypasses_the_cache() {
    let mut engine = start_test(file!());
    let config = CacheConfig {
        write_policy: WritePolicy::WriteAround,
        ..small_config()
    };
    let (cache, cpu_driver, cpu_recv) = build_cache(&mut engine, config);
    let top = engine.top().clone();

    engine.spawn(async move {
        cpu_driver.put(create_write(&top, 0xC0, 5, 64, 0))?.await;
        let _ = cpu_recv.get()?.await;
        Ok(())
    });

    run_simulation!(engine);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    // No allocation happened
    assert!(!cache.holds(0xC0));
}

#[test]
fn invalid_geometry_is_rejected() {
    let mut engine = start_test(file!());
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let config = CacheConfig {
        line_size: 48,
        ..CacheConfig::default()
    };
    assert!(L1Cache::new_and_register(&engine, &clock, top, "cache", config).is_err());
    engine.run().unwrap();
}
