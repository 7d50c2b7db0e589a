// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The host side of the simulation.
//!
//! Composes the traffic generator, the index allocator and the profilers:
//!
//! ```text
//!  traffic_gen -> index_allocator -> bw_profiler -> latency(req) -> out
//!  release_rx  -> latency(rsp)    -> index_allocator.release
//! ```
//!
//! Responses reclaim their tag, decrement the outstanding counter shared
//! with the traffic generator and notify its completion event.
//!
//! # Ports
//!
//!  - One [input port](ssd_engine::port::InPort): `release_rx`
//!  - One [output port](ssd_engine::port::OutPort): `out`

pub mod index_allocator;

use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_engine::engine::Engine;
use ssd_engine::port::PortStateResult;
use ssd_engine::time::clock::Clock;
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::{EntityDisplay, Runnable};
use ssd_track::entity::Entity;

use ssd_components::connect_port;

use crate::error::ErrorLog;
use crate::ns_to_ticks;
use crate::packet::Packet;
use crate::profiler::{BwStats, LatencyStats, ProfilerBw, ProfilerLatency};
use crate::traffic_gen::{TrafficConfig, TrafficGen, TrafficStats};
use index_allocator::{IndexAllocator, IndexAllocatorStats};

/// Host configuration.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Number of outstanding transaction tags.
    pub max_index: u32,
    pub traffic: TrafficConfig,
    /// Profiler reporting period in ps ticks.
    pub reporting_period_ticks: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            max_index: 64,
            traffic: TrafficConfig::default(),
            reporting_period_ticks: ns_to_ticks(10_000.0),
        }
    }
}

/// Aggregate host statistics snapshot.
#[derive(Clone, Debug)]
pub struct HostStats {
    pub traffic: TrafficStats,
    pub allocator: IndexAllocatorStats,
    pub bandwidth: BwStats,
    pub latency: LatencyStats,
}

#[derive(EntityDisplay, Runnable)]
pub struct HostSystem {
    pub entity: Arc<Entity>,
    traffic_gen: Rc<TrafficGen>,
    index_allocator: Rc<IndexAllocator>,
    bw_profiler: Rc<ProfilerBw>,
    latency_profiler: Rc<ProfilerLatency>,
}

impl HostSystem {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: HostConfig,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, name));

        let traffic_gen =
            TrafficGen::new_and_register(engine, clock, &entity, "traffic_gen", config.traffic)?;
        let index_allocator = IndexAllocator::new_and_register(
            engine,
            &entity,
            "index_allocator",
            config.max_index,
            error_log,
        )?;
        let bw_profiler = ProfilerBw::new_and_register(
            engine,
            clock,
            &entity,
            "bw_profiler",
            config.reporting_period_ticks,
        )?;
        let latency_profiler = ProfilerLatency::new_and_register(
            engine,
            clock,
            &entity,
            "latency_profiler",
            config.reporting_period_ticks,
        )?;

        index_allocator.set_completion_hooks(
            traffic_gen.outstanding_handle(),
            traffic_gen.completion_event(),
        );

        connect_port!(traffic_gen, tx => index_allocator, rx)?;
        connect_port!(index_allocator, tx => bw_profiler, rx)?;
        connect_port!(bw_profiler, tx => latency_profiler, req_rx)?;
        connect_port!(latency_profiler, rsp_tx => index_allocator, release_rx)?;

        let rc_self = Rc::new(Self {
            entity,
            traffic_gen,
            index_allocator,
            bw_profiler,
            latency_profiler,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// The request stream towards the device.
    pub fn connect_port_out(&self, port_state: PortStateResult<Packet>) -> SimResult {
        self.latency_profiler.connect_port_req_tx(port_state)
    }

    /// Responses from the device enter here.
    pub fn port_release_rx(&self) -> PortStateResult<Packet> {
        self.latency_profiler.port_rsp_rx()
    }

    #[must_use]
    pub fn num_outstanding(&self) -> usize {
        self.index_allocator.num_allocated()
    }

    #[must_use]
    pub fn stats(&self) -> HostStats {
        HostStats {
            traffic: self.traffic_gen.stats(),
            allocator: self.index_allocator.stats(),
            bandwidth: self.bw_profiler.stats(),
            latency: self.latency_profiler.stats(),
        }
    }
}
