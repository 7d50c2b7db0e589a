// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! PCIe link delay line.
//!
//! Applies generation/lane-dependent transmission time, CRC processing
//! delay, probabilistic CRC retries and utilisation-driven congestion delay
//! to every packet passing through. Packets that are not already TLPs are
//! wrapped on ingress.
//!
//! The link paces itself on a 1GHz clock: transmission times are whole
//! nanoseconds computed by the rate limiter from the framed packet size and
//! the per-lane bandwidth of the configured generation.
//!
//! # Ports
//!
//!  - One [input port](ssd_engine::port::InPort): `rx`
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use ssd_components::flow_controls::rate_limiter::RateLimiter;
use ssd_components::{connect_tx, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::Runnable;
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::trace;

use crate::error::{ErrorKind, ErrorLog};
use crate::model_error;
use crate::packet::{Packet, PcieGeneration, PciePacket, TlpType};

/// Retry penalty per CRC error.
const RETRY_PENALTY_NS: u64 = 100;
/// Retries before the packet is dropped.
const MAX_RETRIES: u32 = 3;
/// Exponential smoothing factor for the utilisation moving average.
const UTILIZATION_ALPHA: f64 = 0.1;

/// PCIe link configuration.
#[derive(Clone, Debug)]
pub struct PcieLinkConfig {
    pub generation: PcieGeneration,
    pub lanes: u8,
    /// Utilisation above which congestion delay applies.
    pub congestion_threshold: f64,
    pub max_congestion_delay_ns: f64,
    pub enable_crc_simulation: bool,
    pub enable_congestion_model: bool,
    pub seed: u64,
}

impl Default for PcieLinkConfig {
    fn default() -> Self {
        Self {
            generation: PcieGeneration::Gen3,
            lanes: 8,
            congestion_threshold: 0.8,
            max_congestion_delay_ns: 1000.0,
            enable_crc_simulation: true,
            enable_congestion_model: true,
            seed: 1,
        }
    }
}

/// Link utilisation tracking with exponential smoothing.
#[derive(Clone, Copy, Debug, Default)]
struct LinkUtilization {
    current: f64,
    average: f64,
    last_update_ns: Option<f64>,
    total_bytes: u64,
}

impl LinkUtilization {
    fn update(&mut self, packet_bytes: u32, transmission_ns: f64, now_ns: f64) {
        self.total_bytes += packet_bytes as u64;
        if let Some(last_ns) = self.last_update_ns {
            let window_ns = now_ns - last_ns;
            if window_ns > 0.0 {
                self.current = (transmission_ns / window_ns).min(1.0);
                self.average =
                    UTILIZATION_ALPHA * self.current + (1.0 - UTILIZATION_ALPHA) * self.average;
            }
        }
        self.last_update_ns = Some(now_ns);
    }
}

/// Link counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcieLinkStats {
    pub packets_processed: u64,
    pub crc_errors: u64,
    pub retries: u64,
    pub dropped_packets: u64,
    pub total_processing_ns: f64,
    pub current_utilization: f64,
    pub average_utilization: f64,
}

impl PcieLinkStats {
    #[must_use]
    pub fn avg_processing_ns(&self) -> f64 {
        if self.packets_processed > 0 {
            self.total_processing_ns / self.packets_processed as f64
        } else {
            0.0
        }
    }
}

#[derive(EntityDisplay)]
pub struct PcieLink {
    pub entity: Arc<Entity>,
    clock: Clock,
    config: PcieLinkConfig,
    limiter: RateLimiter<Packet>,

    rx: RefCell<Option<InPort<Packet>>>,
    tx: RefCell<Option<OutPort<Packet>>>,

    utilization: RefCell<LinkUtilization>,
    rng: RefCell<Xoshiro256PlusPlus>,
    stats: RefCell<PcieLinkStats>,
    error_log: ErrorLog,
}

impl PcieLink {
    /// Create a link on the given clock, which must tick at 1GHz so that
    /// rate-limited transfers come out in nanoseconds.
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: PcieLinkConfig,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        if config.lanes == 0 {
            return ssd_engine::sim_error!(format!("{name}: lane count must be non-zero"));
        }
        if !(0.0..=1.0).contains(&config.congestion_threshold) {
            return ssd_engine::sim_error!(format!(
                "{name}: congestion threshold must be within 0.0-1.0"
            ));
        }

        let bits_per_tick = (config.generation.link_speed_gbps() * config.lanes as f64)
            .round()
            .max(1.0) as usize;
        let limiter = RateLimiter::new(clock.clone(), bits_per_tick);

        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed ^ 0x7063_6965);
        let rc_self = Rc::new(Self {
            entity,
            clock: clock.clone(),
            config,
            limiter,
            rx: RefCell::new(Some(rx)),
            tx: RefCell::new(Some(tx)),
            utilization: RefCell::new(LinkUtilization::default()),
            rng: RefCell::new(rng),
            stats: RefCell::new(PcieLinkStats::default()),
            error_log,
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
    pub fn stats(&self) -> PcieLinkStats {
        let mut stats = *self.stats.borrow();
        let utilization = self.utilization.borrow();
        stats.current_utilization = utilization.current;
        stats.average_utilization = utilization.average;
        stats
    }

    /// Gen7 AI-FEC path: ML prediction trims the processing delay for
    /// common patterns and adaptive CRC scales it by running link quality.
    fn gen7_optimizations(&self, packet: &PciePacket, base_delay_ns: f64) -> f64 {
        let scheme = self.config.generation.crc_scheme();
        let mut delay_ns = base_delay_ns;

        if scheme.ml_prediction {
            if packet.tlp_header.tlp_type == TlpType::MemoryRead {
                delay_ns *= 0.8;
            } else if packet.data_payload_size <= 64 {
                delay_ns *= 0.9;
            }
        }

        if scheme.adaptive_crc {
            let stats = self.stats.borrow();
            let link_quality =
                1.0 - stats.crc_errors as f64 / (stats.packets_processed.max(1)) as f64;
            if link_quality > 0.99 {
                delay_ns *= 0.7;
            } else if link_quality < 0.95 {
                delay_ns *= 1.3;
            }
        }

        delay_ns.max(1.0)
    }

    fn congestion_delay_ns(&self, utilization: f64) -> f64 {
        let threshold = self.config.congestion_threshold;
        if utilization < threshold {
            return 0.0;
        }
        let congestion_factor = (utilization - threshold) / (1.0 - threshold);
        (self.config.max_congestion_delay_ns * congestion_factor * congestion_factor)
            .min(self.config.max_congestion_delay_ns)
    }

    /// One transmission attempt: apply the delays, update utilisation and
    /// sample the CRC error model. Returns false when a CRC error occurred.
    async fn process_attempt(&self, packet: &mut PciePacket) -> bool {
        let transmission_ticks = self
            .limiter
            .ticks_from_bits(packet.total_packet_size as usize * 8);
        let transmission_ns = transmission_ticks as f64;

        let scheme = self.config.generation.crc_scheme();
        let mut crc_delay_ns = scheme.processing_delay_ns;
        if self.config.generation == PcieGeneration::Gen7 {
            crc_delay_ns = self.gen7_optimizations(packet, crc_delay_ns);
        }

        let congestion_ns = if self.config.enable_congestion_model {
            self.congestion_delay_ns(self.utilization.borrow().current)
        } else {
            0.0
        };

        let total_delay_ns = transmission_ns + crc_delay_ns + congestion_ns;
        self.limiter
            .delay_ticks(transmission_ticks + (crc_delay_ns + congestion_ns).round() as usize)
            .await;

        self.utilization.borrow_mut().update(
            packet.total_packet_size,
            transmission_ns,
            self.clock.time_now_ns(),
        );
        self.stats.borrow_mut().total_processing_ns += total_delay_ns;

        if self.config.enable_crc_simulation {
            let sample: f64 = self.rng.borrow_mut().gen_range(0.0..1.0);
            if sample < scheme.retry_probability {
                self.stats.borrow_mut().crc_errors += 1;
                packet.crc_error_injected = true;
                return false;
            }
        }
        true
    }
}

#[async_trait(?Send)]
impl Runnable for PcieLink {
    async fn run(&self) -> SimResult {
        let rx = take_option!(self.rx);
        let tx = take_option!(self.tx);

        loop {
            let packet = rx.get()?.await;
            let mut pcie_packet = match packet {
                Packet::Pcie(pcie_packet) => pcie_packet,
                other => PciePacket::wrap(
                    &self.entity,
                    other,
                    self.config.generation,
                    self.config.lanes,
                ),
            };

            let mut success = self.process_attempt(&mut pcie_packet).await;
            while !success && pcie_packet.retry_count < MAX_RETRIES {
                pcie_packet.retry_count += 1;
                self.stats.borrow_mut().retries += 1;
                trace!(self.entity ; "CRC error, retry #{} for tag {}",
                    pcie_packet.retry_count, pcie_packet.tlp_header.tag);

                self.clock.wait_ticks(RETRY_PENALTY_NS).await;
                success = self.process_attempt(&mut pcie_packet).await;
            }

            if !success {
                let mut stats = self.stats.borrow_mut();
                stats.dropped_packets += 1;
                model_error!(self.entity, self.error_log, ErrorKind::DeviceError ;
                    "packet tag {} failed after maximum retries", pcie_packet.tlp_header.tag);
                continue;
            }

            self.stats.borrow_mut().packets_processed += 1;
            tx.put(Packet::Pcie(pcie_packet))?.await;
        }
    }
}
