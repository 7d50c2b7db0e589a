// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulate a host driving an SSD over a PCIe link.
//!
//! The model is host -> PCIe downstream -> SSD (controller, L1 cache, DRAM
//! controller, flash controller, NAND arrays) -> PCIe upstream -> host.
//!
//! # Examples
//!
//! Run with the bundled configuration directory:
//! ```text
//! cargo run --bin sim_ssd --release -- config
//! ```
//!
//! Exit codes: 0 on success, 1 on a configuration error, 2 on a runtime
//! error.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use ssd_engine::engine::Engine;
use ssd_engine::events::once::Once;
use ssd_models::error::ErrorLog;
use ssd_models::host::HostSystem;
use ssd_models::pcie::PcieLink;
use ssd_models::ssd::SsdTop;
use ssd_models::{ns_to_ticks, PS_CLOCK_GHZ};
use ssd_track::tracker::{EntityManager, TextTracker, TraceState};
use ssd_track::Tracker;

use config::SimConfigFile;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "sim_ssd", about = "SSD storage stack simulator")]
struct Cli {
    /// Directory containing `sim_config.json`.
    config_dir: Option<PathBuf>,

    /// Level of log message to display.
    #[arg(long, default_value = "Warn")]
    stdout_level: log::Level,

    /// Set a regular expression for which entities should have logging level
    /// set to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,
}

fn build_tracker(cli: &Cli, config: &SimConfigFile) -> Tracker {
    let mut manager = if cli.stdout_filter_regex.is_empty() {
        EntityManager::new(TraceState::Disabled, cli.stdout_level)
    } else {
        EntityManager::new(TraceState::Disabled, log::Level::Error)
    };
    if !cli.stdout_filter_regex.is_empty() {
        manager.add_log_filter(&cli.stdout_filter_regex, cli.stdout_level);
    }
    if config.host_system.debug_enable {
        manager.add_log_filter(r".*host.*", log::Level::Debug);
    }
    let writer = Box::new(std::io::BufWriter::new(std::io::stdout()));
    Arc::new(TextTracker::new(manager, writer))
}

fn load_config(cli: &Cli) -> Result<SimConfigFile, String> {
    let Some(config_dir) = &cli.config_dir else {
        return Ok(SimConfigFile::default());
    };
    let path = config_dir.join("sim_config.json");
    let contents = std::fs::read_to_string(&path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    serde_json::from_str(&contents).map_err(|e| format!("cannot parse {}: {e}", path.display()))
}

fn run(cli: &Cli, config: &SimConfigFile) -> Result<(), String> {
    let tracker = build_tracker(cli, config);
    let mut engine = Engine::new(&tracker);
    let ps_clock = engine.clock_ghz(PS_CLOCK_GHZ);
    let ns_clock = engine.clock_ghz(1.0);
    let top = engine.top().clone();
    let error_log = ErrorLog::new();

    let pcie_config = config.pcie_config()?;

    type Assembled = (
        std::rc::Rc<HostSystem>,
        std::rc::Rc<PcieLink>,
        std::rc::Rc<PcieLink>,
        std::rc::Rc<SsdTop>,
    );
    let build = || -> Result<Assembled, ssd_engine::types::SimError> {
        let host = HostSystem::new_and_register(
            &engine,
            &ps_clock,
            &top,
            "host",
            config.host_config(),
            error_log.clone(),
        )?;
        let downstream = PcieLink::new_and_register(
            &engine,
            &ns_clock,
            &top,
            "pcie_down",
            pcie_config.clone(),
            error_log.clone(),
        )?;
        let upstream = PcieLink::new_and_register(
            &engine,
            &ns_clock,
            &top,
            "pcie_up",
            pcie_config.clone(),
            error_log.clone(),
        )?;
        let ssd = SsdTop::new_and_register(
            &engine,
            &ps_clock,
            &top,
            "ssd",
            config.ssd_config(),
            error_log.clone(),
        )?;

        host.connect_port_out(downstream.port_rx())?;
        downstream.connect_port_tx(ssd.port_pcie_rx())?;
        ssd.connect_port_pcie_tx(upstream.port_rx())?;
        upstream.connect_port_tx(host.port_release_rx())?;

        Ok((host, downstream, upstream, ssd))
    };
    let (host, downstream, upstream, ssd) =
        build().map_err(|e| format!("configuration error: {e}"))?;

    // Bound the simulated time when requested; otherwise run until the
    // traffic drains.
    let result = match config.simulation.simulation_time_sec {
        Some(seconds) => {
            let deadline = Once::default();
            {
                let deadline = deadline.clone();
                let clock = ps_clock.clone();
                engine.spawn(async move {
                    clock.wait_ticks(ns_to_ticks(seconds * 1e9)).await;
                    deadline.notify()?;
                    Ok(())
                });
            }
            engine.run_until(Box::new(deadline))
        }
        None => engine.run(),
    };
    result.map_err(|e| format!("runtime error: {e}"))?;

    print_report(&engine, &host, &downstream, &upstream, &ssd, &error_log);
    Ok(())
}

fn print_report(
    engine: &Engine,
    host: &HostSystem,
    downstream: &PcieLink,
    upstream: &PcieLink,
    ssd: &SsdTop,
    error_log: &ErrorLog,
) {
    let host_stats = host.stats();
    let ssd_stats = ssd.statistics();

    println!("======== Simulation Report ========");
    println!("Simulated time: {:.1} ns", engine.time_now_ns());
    println!();

    println!("Host:");
    println!("  Requests generated: {}", host_stats.traffic.generated);
    println!(
        "  Reads/Writes: {}/{}",
        host_stats.traffic.reads, host_stats.traffic.writes
    );
    println!(
        "  Tags allocated/released: {}/{}",
        host_stats.allocator.total_allocated, host_stats.allocator.total_released
    );
    println!(
        "  Bytes transferred: {} in {} packets",
        host_stats.bandwidth.total_bytes, host_stats.bandwidth.total_packets
    );
    println!(
        "  Latency avg/min/max: {:.1}/{:.1}/{:.1} ns",
        host_stats.latency.avg_ns(),
        host_stats.latency.min_ns,
        host_stats.latency.max_ns
    );
    println!(
        "  Latency p50/p95/p99: {:.1}/{:.1}/{:.1} ns",
        host_stats.latency.p50_ns, host_stats.latency.p95_ns, host_stats.latency.p99_ns
    );
    println!();

    for (name, link_stats) in [
        ("PCIe downstream", downstream.stats()),
        ("PCIe upstream", upstream.stats()),
    ] {
        println!("{name}:");
        println!("  Packets: {}", link_stats.packets_processed);
        println!(
            "  CRC errors/retries/dropped: {}/{}/{}",
            link_stats.crc_errors, link_stats.retries, link_stats.dropped_packets
        );
        println!(
            "  Utilisation current/avg: {:.3}/{:.3}",
            link_stats.current_utilization, link_stats.average_utilization
        );
        println!(
            "  Avg processing time: {:.1} ns",
            link_stats.avg_processing_ns()
        );
    }
    println!();

    println!("SSD controller:");
    println!(
        "  Commands total/completed/errors: {}/{}/{}",
        ssd_stats.controller.total_commands,
        ssd_stats.controller.completed_commands,
        ssd_stats.controller.error_commands
    );
    println!(
        "  Bytes transferred: {}",
        ssd_stats.controller.total_bytes_transferred
    );
    println!(
        "  Avg latency: {:.1} ns",
        ssd_stats.controller.avg_latency_ns()
    );
    println!();

    println!("L1 cache:");
    println!(
        "  Accesses/hits/misses: {}/{}/{} ({:.1}% hit rate)",
        ssd_stats.cache.accesses,
        ssd_stats.cache.hits,
        ssd_stats.cache.misses,
        ssd_stats.cache.hit_rate() * 100.0
    );
    println!(
        "  Evictions/writebacks: {}/{}",
        ssd_stats.cache.evictions, ssd_stats.cache.writebacks
    );
    println!();

    println!("DRAM:");
    println!(
        "  Requests total/read/write: {}/{}/{}",
        ssd_stats.dram.total_requests,
        ssd_stats.dram.read_requests,
        ssd_stats.dram.write_requests
    );
    println!(
        "  Row hits/misses/page-empty: {}/{}/{} ({:.1}% hit rate)",
        ssd_stats.dram.row_hits,
        ssd_stats.dram.row_misses,
        ssd_stats.dram.page_empty_hits,
        ssd_stats.dram.row_hit_rate() * 100.0
    );
    println!(
        "  Bank conflicts: {}, refresh cycles: {}, refresh conflicts: {}",
        ssd_stats.dram.bank_conflicts,
        ssd_stats.dram.refresh_cycles,
        ssd_stats.dram.refresh_conflicts
    );
    println!(
        "  Avg read/write latency: {:.1}/{:.1} ns",
        ssd_stats.dram.avg_read_latency_ns(),
        ssd_stats.dram.avg_write_latency_ns()
    );
    println!();

    println!("Flash controller:");
    println!(
        "  Commands total/completed: {}/{}",
        ssd_stats.flash.total_commands, ssd_stats.flash.completed_commands
    );
    println!(
        "  Read/write/erase: {}/{}/{}",
        ssd_stats.flash.read_commands,
        ssd_stats.flash.write_commands,
        ssd_stats.flash.erase_commands
    );
    println!(
        "  Channel conflicts: {}",
        ssd_stats.flash.channel_conflicts
    );
    for (channel, channel_stats) in ssd_stats.flash.channels.iter().enumerate() {
        println!(
            "  Channel {channel}: {} ops (R:{} W:{} E:{})",
            channel_stats.total_operations,
            channel_stats.read_operations,
            channel_stats.write_operations,
            channel_stats.erase_operations
        );
    }
    println!();

    println!("NAND:");
    for (channel, nand_stats) in ssd_stats.nand.iter().enumerate() {
        println!(
            "  Channel {channel}: reads {}, programs {} ({} failed), erases {} ({} failed), bad blocks {}",
            nand_stats.total_reads,
            nand_stats.total_programs,
            nand_stats.failed_programs,
            nand_stats.total_erases,
            nand_stats.failed_erases,
            nand_stats.bad_block_count
        );
    }

    if !error_log.is_empty() {
        println!();
        println!("Operational errors: {}", error_log.len());
        for error in error_log.snapshot().iter().take(10) {
            println!("  {error}");
        }
        if error_log.len() > 10 {
            println!("  ... and {} more", error_log.len() - 10);
        }
    }
    println!("===================================");
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!("sim_ssd: {message}");
            return ExitCode::from(1);
        }
    };

    match run(&cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("sim_ssd: {message}");
            if message.starts_with("configuration error") {
                ExitCode::from(1)
            } else {
                ExitCode::from(2)
            }
        }
    }
}
