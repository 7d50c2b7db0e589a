// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Pass-through profilers.
//!
//! Both profilers sit invisibly on a channel: every packet is forwarded
//! unchanged while counters accumulate. A background task reports each
//! `reporting_period` and resets the period counters.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_components::{connect_tx, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::Runnable;
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::{info, warn};

use crate::packet::Packet;

/// Bandwidth counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct BwStats {
    pub total_bytes: u64,
    pub total_packets: u64,
    pub period_bytes: u64,
    pub period_packets: u64,
    pub num_reports: u64,
}

/// Pass-through bandwidth profiler.
///
/// # Ports
///
///  - One [input port](ssd_engine::port::InPort): `rx`
///  - One [output port](ssd_engine::port::OutPort): `tx`
#[derive(EntityDisplay)]
pub struct ProfilerBw {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,
    reporting_period_ticks: u64,

    rx: RefCell<Option<InPort<Packet>>>,
    tx: RefCell<Option<OutPort<Packet>>>,

    stats: Rc<RefCell<BwStats>>,
}

impl ProfilerBw {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        reporting_period_ticks: u64,
    ) -> Result<Rc<Self>, SimError> {
        if reporting_period_ticks == 0 {
            return ssd_engine::sim_error!(format!("{name}: reporting period must be non-zero"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            clock: clock.clone(),
            reporting_period_ticks,
            rx: RefCell::new(Some(rx)),
            tx: RefCell::new(Some(tx)),
            stats: Rc::new(RefCell::new(BwStats::default())),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    pub fn port_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> BwStats {
        *self.stats.borrow()
    }
}

#[async_trait(?Send)]
impl Runnable for ProfilerBw {
    async fn run(&self) -> SimResult {
        // Periodic reporting task
        {
            let entity = self.entity.clone();
            let clock = self.clock.clone();
            let stats = self.stats.clone();
            let period = self.reporting_period_ticks;
            self.spawner.spawn(async move {
                loop {
                    clock.wait_ticks_or_exit(period).await;
                    let mut stats = stats.borrow_mut();
                    if stats.period_packets > 0 {
                        let period_ns = clock.to_ns(
                            &ssd_engine::time::clock::ClockTick::new().set_tick(period),
                        );
                        let bytes_per_ns = stats.period_bytes as f64 / period_ns;
                        info!(entity ; "throughput {:.3} GB/s ({} bytes, {} packets)",
                            bytes_per_ns, stats.period_bytes, stats.period_packets);
                    }
                    stats.period_bytes = 0;
                    stats.period_packets = 0;
                    stats.num_reports += 1;
                }
            });
        }

        let rx = take_option!(self.rx);
        let tx = take_option!(self.tx);
        loop {
            let packet = rx.get()?.await;
            let databyte = packet.attribute("databyte") as u64;
            {
                let mut stats = self.stats.borrow_mut();
                stats.total_bytes += databyte;
                stats.total_packets += 1;
                stats.period_bytes += databyte;
                stats.period_packets += 1;
            }
            tx.put(packet)?.await;
        }
    }
}

/// Latency counters and percentiles.
#[derive(Clone, Debug, Default)]
pub struct LatencyStats {
    pub total_requests: u64,
    pub total_responses: u64,
    pub unmatched_responses: u64,
    pub pending_requests: u64,
    pub sum_ns: f64,
    pub min_ns: f64,
    pub max_ns: f64,
    pub p50_ns: f64,
    pub p95_ns: f64,
    pub p99_ns: f64,
}

impl LatencyStats {
    #[must_use]
    pub fn avg_ns(&self) -> f64 {
        if self.total_responses > 0 {
            self.sum_ns / self.total_responses as f64
        } else {
            0.0
        }
    }
}

struct LatencyState {
    request_times: RefCell<HashMap<u32, f64>>,
    samples: RefCell<Vec<f64>>,
    period_samples: RefCell<Vec<f64>>,
    total_requests: RefCell<u64>,
    total_responses: RefCell<u64>,
    unmatched_responses: RefCell<u64>,
    sum_ns: RefCell<f64>,
    min_ns: RefCell<f64>,
    max_ns: RefCell<f64>,
}

impl LatencyState {
    fn new() -> Self {
        Self {
            request_times: RefCell::new(HashMap::new()),
            samples: RefCell::new(Vec::new()),
            period_samples: RefCell::new(Vec::new()),
            total_requests: RefCell::new(0),
            total_responses: RefCell::new(0),
            unmatched_responses: RefCell::new(0),
            sum_ns: RefCell::new(0.0),
            min_ns: RefCell::new(f64::MAX),
            max_ns: RefCell::new(0.0),
        }
    }
}

/// A percentile over sorted samples with linear interpolation between
/// neighbouring ranks.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let low = rank.floor() as usize;
    let high = rank.ceil() as usize;
    if low == high {
        sorted[low]
    } else {
        let weight = rank - low as f64;
        sorted[low] * (1.0 - weight) + sorted[high] * weight
    }
}

/// Request-to-response latency profiler.
///
/// Taps the request channel (recording the emission time keyed by `index`)
/// and the response channel (computing the round-trip time); both taps are
/// pass-through.
///
/// # Ports
///
///  - Two [input ports](ssd_engine::port::InPort): `req_rx`, `rsp_rx`
///  - Two [output ports](ssd_engine::port::OutPort): `req_tx`, `rsp_tx`
#[derive(EntityDisplay)]
pub struct ProfilerLatency {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,
    reporting_period_ticks: u64,

    req_rx: RefCell<Option<InPort<Packet>>>,
    req_tx: RefCell<Option<OutPort<Packet>>>,
    rsp_rx: RefCell<Option<InPort<Packet>>>,
    rsp_tx: RefCell<Option<OutPort<Packet>>>,

    state: Rc<LatencyState>,
}

impl ProfilerLatency {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        reporting_period_ticks: u64,
    ) -> Result<Rc<Self>, SimError> {
        if reporting_period_ticks == 0 {
            return ssd_engine::sim_error!(format!("{name}: reporting period must be non-zero"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let req_rx = InPort::new(&entity, "req_rx");
        let req_tx = OutPort::new(&entity, "req_tx");
        let rsp_rx = InPort::new(&entity, "rsp_rx");
        let rsp_tx = OutPort::new(&entity, "rsp_tx");
        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            clock: clock.clone(),
            reporting_period_ticks,
            req_rx: RefCell::new(Some(req_rx)),
            req_tx: RefCell::new(Some(req_tx)),
            rsp_rx: RefCell::new(Some(rsp_rx)),
            rsp_tx: RefCell::new(Some(rsp_tx)),
            state: Rc::new(LatencyState::new()),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_req_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.req_tx, connect ; port_state)
    }

    pub fn connect_port_rsp_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.rsp_tx, connect ; port_state)
    }

    pub fn port_req_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.req_rx, state)
    }

    pub fn port_rsp_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.rsp_rx, state)
    }

    /// Snapshot of the counters with percentiles over all samples so far.
    #[must_use]
    pub fn stats(&self) -> LatencyStats {
        let mut sorted = self.state.samples.borrow().clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let total_responses = *self.state.total_responses.borrow();
        LatencyStats {
            total_requests: *self.state.total_requests.borrow(),
            total_responses,
            unmatched_responses: *self.state.unmatched_responses.borrow(),
            pending_requests: self.state.request_times.borrow().len() as u64,
            sum_ns: *self.state.sum_ns.borrow(),
            min_ns: if total_responses > 0 {
                *self.state.min_ns.borrow()
            } else {
                0.0
            },
            max_ns: *self.state.max_ns.borrow(),
            p50_ns: percentile(&sorted, 50.0),
            p95_ns: percentile(&sorted, 95.0),
            p99_ns: percentile(&sorted, 99.0),
        }
    }
}

#[async_trait(?Send)]
impl Runnable for ProfilerLatency {
    async fn run(&self) -> SimResult {
        // Request tap
        {
            let req_rx = take_option!(self.req_rx);
            let req_tx = take_option!(self.req_tx);
            let clock = self.clock.clone();
            let state = self.state.clone();
            self.spawner.spawn(async move {
                loop {
                    let packet = req_rx.get()?.await;
                    let index = packet.attribute("index") as u32;
                    state
                        .request_times
                        .borrow_mut()
                        .insert(index, clock.time_now_ns());
                    *state.total_requests.borrow_mut() += 1;
                    req_tx.put(packet)?.await;
                }
            });
        }

        // Periodic reporting task
        {
            let entity = self.entity.clone();
            let clock = self.clock.clone();
            let state = self.state.clone();
            let period = self.reporting_period_ticks;
            self.spawner.spawn(async move {
                loop {
                    clock.wait_ticks_or_exit(period).await;
                    let mut period_samples = state.period_samples.borrow_mut();
                    if !period_samples.is_empty() {
                        period_samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
                        info!(entity ; "latency p50 {:.1}ns p95 {:.1}ns p99 {:.1}ns over {} samples",
                            percentile(&period_samples, 50.0),
                            percentile(&period_samples, 95.0),
                            percentile(&period_samples, 99.0),
                            period_samples.len());
                        period_samples.clear();
                    }
                }
            });
        }

        // Response tap
        let rsp_rx = take_option!(self.rsp_rx);
        let rsp_tx = take_option!(self.rsp_tx);
        loop {
            let packet = rsp_rx.get()?.await;
            let index = packet.attribute("index") as u32;
            let now_ns = self.clock.time_now_ns();
            match self.state.request_times.borrow_mut().remove(&index) {
                Some(start_ns) => {
                    let latency = now_ns - start_ns;
                    *self.state.total_responses.borrow_mut() += 1;
                    *self.state.sum_ns.borrow_mut() += latency;
                    {
                        let mut min_ns = self.state.min_ns.borrow_mut();
                        if latency < *min_ns {
                            *min_ns = latency;
                        }
                    }
                    {
                        let mut max_ns = self.state.max_ns.borrow_mut();
                        if latency > *max_ns {
                            *max_ns = latency;
                        }
                    }
                    self.state.samples.borrow_mut().push(latency);
                    self.state.period_samples.borrow_mut().push(latency);
                }
                None => {
                    *self.state.unmatched_responses.borrow_mut() += 1;
                    warn!(self.entity ; "response without matching request, index={index}");
                }
            }
            rsp_tx.put(packet)?.await;
        }
    }
}
