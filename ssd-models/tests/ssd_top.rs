// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use ssd_engine::engine::Engine;
use ssd_engine::port::{InPort, OutPort};
use ssd_engine::run_simulation;
use ssd_engine::test_helpers::start_test;
use ssd_models::cache::CacheConfig;
use ssd_models::dram::DramConfig;
use ssd_models::error::ErrorLog;
use ssd_models::flash::{FlashConfig, FlashTiming, NandConfig};
use ssd_models::host::{HostConfig, HostSystem};
use ssd_models::packet::Packet;
use ssd_models::pcie::{PcieLink, PcieLinkConfig};
use ssd_models::ssd::{SsdTop, SsdTopConfig};
use ssd_models::test_helpers::create_read;
use ssd_models::traffic_gen::TrafficConfig;
use ssd_models::{ns_to_ticks, PS_CLOCK_GHZ};

/// A small, fast device for the end-to-end tests.
fn small_ssd_config() -> SsdTopConfig {
    SsdTopConfig {
        cache: CacheConfig {
            size_kb: 8,
            ..CacheConfig::default()
        },
        dram: DramConfig {
            num_banks: 2,
            refresh_enable: false,
            ..DramConfig::default()
        },
        flash: FlashConfig {
            num_channels: 2,
            dies_per_channel: 1,
            command_queue_depth: 4,
            pages_per_block: 64,
            blocks_per_die: 32,
            enable_wear_leveling: false,
            ..FlashConfig::default()
        },
        nand: NandConfig {
            num_planes: 1,
            blocks_per_plane: 32,
            wordlines_per_block: 1,
            program_failure_prob: 0.0,
            erase_failure_prob: 0.0,
            wearout_failure_prob: 0.0,
            timing: FlashTiming {
                t_r_ns: 500.0,
                t_prog_ns: 1000.0,
                t_erase_ns: 2000.0,
                ..FlashTiming::default()
            },
            ..NandConfig::default()
        },
        ..SsdTopConfig::default()
    }
}

fn build_ssd(engine: &mut Engine) -> (Rc<SsdTop>, OutPort<Packet>, InPort<Packet>) {
    let clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let top = engine.top();
    let error_log = ErrorLog::new();
    let ssd = SsdTop::new_and_register(
        engine,
        &clock,
        top,
        "ssd",
        small_ssd_config(),
        error_log,
    )
    .unwrap();

    let mut driver = OutPort::new(top, "driver");
    driver.connect(ssd.port_pcie_rx()).unwrap();
    let recv = InPort::new(top, "recv");
    ssd.connect_port_pcie_tx(recv.state()).unwrap();

    (ssd, driver, recv)
}

/// One cold read misses the
/// cache, is serviced by DRAM and lands in NAND; the response fills the
/// cache line and a repeat of the same address is a hit that never leaves
/// the cache.
#[test]
fn cold_read_traverses_hierarchy_then_hits() {
    let mut engine = start_test(file!());
    let (ssd, driver, recv) = build_ssd(&mut engine);
    let top = engine.top().clone();

    engine.spawn(async move {
        driver.put(create_read(&top, 0x0040, 64, 0))?.await;
        let response = recv.get()?.await;
        assert_eq!(response.address(), 0x0040);

        driver.put(create_read(&top, 0x0040, 64, 1))?.await;
        let response = recv.get()?.await;
        assert_eq!(response.address(), 0x0040);
        Ok(())
    });

    run_simulation!(engine);

    let stats = ssd.statistics();
    assert_eq!(stats.controller.total_commands, 2);
    assert_eq!(stats.controller.completed_commands, 2);
    assert_eq!(stats.cache.accesses, 2);
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.cache.hits, 1);
    // Only the miss reached DRAM and NAND
    assert_eq!(stats.dram.total_requests, 1);
    let nand_reads: u64 = stats.nand.iter().map(|nand| nand.total_reads).sum();
    assert_eq!(nand_reads, 1);
}

/// Distinct lines all miss and spread over the hierarchy; every request
/// completes and the counters line up layer by layer.
#[test]
fn counters_line_up_across_layers() {
    let mut engine = start_test(file!());
    let (ssd, driver, recv) = build_ssd(&mut engine);
    let top = engine.top().clone();

    let num_requests = 8;
    engine.spawn(async move {
        for index in 0..num_requests {
            driver
                .put(create_read(&top, index as u32 * 0x40, 64, index))?
                .await;
            let _ = recv.get()?.await;
        }
        Ok(())
    });

    run_simulation!(engine);

    let stats = ssd.statistics();
    assert_eq!(stats.controller.completed_commands, num_requests as u64);
    assert_eq!(stats.cache.accesses, num_requests as u64);
    assert_eq!(stats.cache.misses, num_requests as u64);
    assert_eq!(stats.cache.accesses, stats.cache.hits + stats.cache.misses);
    assert_eq!(stats.dram.total_requests, num_requests as u64);
    assert_eq!(
        stats.dram.total_requests,
        stats.dram.read_requests + stats.dram.write_requests
    );
    assert!(
        stats.dram.row_hits + stats.dram.row_misses + stats.dram.page_empty_hits
            >= stats.dram.total_requests
    );
    assert_eq!(stats.flash.total_commands, num_requests as u64);
    assert_eq!(stats.flash.completed_commands, num_requests as u64);
    let nand_reads: u64 = stats.nand.iter().map(|nand| nand.total_reads).sum();
    assert_eq!(nand_reads, num_requests as u64);
}

/// The full system: host, both PCIe links and the device. Every transaction
/// is tagged, completes, and reclaims its tag.
#[test]
fn full_system_end_to_end() {
    let mut engine = start_test(file!());
    let ps_clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let ns_clock = engine.clock_ghz(1.0);
    let top = engine.top();
    let error_log = ErrorLog::new();

    let num_transactions = 6;
    let host_config = HostConfig {
        max_index: 4,
        traffic: TrafficConfig {
            num_transactions,
            interval_ticks: ns_to_ticks(20.0),
            locality_percentage: 100,
            write_percentage: 0,
            start_address: 0,
            end_address: 0xFFFF,
            address_increment: 0x40,
            databyte_value: 64,
            max_outstanding: 4,
            ..TrafficConfig::default()
        },
        ..HostConfig::default()
    };

    let host = HostSystem::new_and_register(
        &engine,
        &ps_clock,
        top,
        "host",
        host_config,
        error_log.clone(),
    )
    .unwrap();
    let downstream = PcieLink::new_and_register(
        &engine,
        &ns_clock,
        top,
        "pcie_down",
        PcieLinkConfig {
            enable_crc_simulation: false,
            ..PcieLinkConfig::default()
        },
        error_log.clone(),
    )
    .unwrap();
    let upstream = PcieLink::new_and_register(
        &engine,
        &ns_clock,
        top,
        "pcie_up",
        PcieLinkConfig {
            enable_crc_simulation: false,
            ..PcieLinkConfig::default()
        },
        error_log.clone(),
    )
    .unwrap();
    let ssd = SsdTop::new_and_register(
        &engine,
        &ps_clock,
        top,
        "ssd",
        small_ssd_config(),
        error_log.clone(),
    )
    .unwrap();

    host.connect_port_out(downstream.port_rx()).unwrap();
    downstream.connect_port_tx(ssd.port_pcie_rx()).unwrap();
    ssd.connect_port_pcie_tx(upstream.port_rx()).unwrap();
    upstream.connect_port_tx(host.port_release_rx()).unwrap();

    run_simulation!(engine);

    let host_stats = host.stats();
    assert_eq!(host_stats.traffic.generated, num_transactions);
    assert_eq!(host_stats.allocator.total_allocated, num_transactions);
    assert_eq!(host_stats.allocator.total_released, num_transactions);
    assert_eq!(host_stats.allocator.release_errors, 0);
    assert_eq!(host.num_outstanding(), 0);
    assert_eq!(
        host_stats.latency.total_responses,
        num_transactions as u64
    );
    // Real latencies were extracted from the profiler
    assert!(host_stats.latency.min_ns > 0.0);
    assert!(host_stats.latency.p50_ns >= host_stats.latency.min_ns);
    assert!(host_stats.latency.max_ns >= host_stats.latency.p99_ns);

    let ssd_stats = ssd.statistics();
    assert_eq!(ssd_stats.controller.completed_commands, num_transactions as u64);
    assert_eq!(ssd_stats.cache.accesses, num_transactions as u64);

    assert_eq!(downstream.stats().packets_processed, num_transactions as u64);
    assert_eq!(upstream.stats().packets_processed, num_transactions as u64);
    assert!(error_log.is_empty());
}
