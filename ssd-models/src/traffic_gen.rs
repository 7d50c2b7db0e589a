// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Host request stream generator.
//!
//! Produces a bounded stream of [`GenericPacket`] requests under a chosen
//! arrival pattern and address/locality/read-write mix, then finishes.
//! Outstanding-request flow control is optional: with `max_outstanding > 0`
//! a new emission waits on the completion event until a response has
//! reclaimed capacity.
//!
//! # Ports
//!
//!  - One [output port](ssd_engine::port::OutPort): `tx`

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use ssd_engine::engine::Engine;
use ssd_engine::events::repeated::Repeated;
use ssd_engine::port::{OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::{Event, Runnable};
use ssd_engine::types::{AccessType, SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::tag::Tagged;
use ssd_track::{exit, trace};

use ssd_components::{connect_tx, take_option};

use crate::ns_to_ticks;
use crate::packet::{GenericPacket, Packet};

/// Inter-arrival patterns.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TrafficPattern {
    #[default]
    Constant,
    Burst,
    Poisson,
    Exponential,
    Normal,
}

/// Workload presets that configure the pattern parameters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WorkloadTemplate {
    #[default]
    Custom,
    Database,
    WebServer,
    MlInference,
    IotSensors,
    Streaming,
}

/// Traffic generator configuration.
#[derive(Clone, Debug)]
pub struct TrafficConfig {
    /// Base inter-arrival time for the CONSTANT pattern, in ps ticks.
    pub interval_ticks: u64,
    pub pattern: TrafficPattern,
    pub template: WorkloadTemplate,
    /// Probability (0-100) that a request uses the sequential cursor.
    pub locality_percentage: u32,
    /// Probability (0-100) that a request is a write.
    pub write_percentage: u32,
    pub databyte_value: u8,
    pub num_transactions: usize,
    pub start_address: u32,
    pub end_address: u32,
    pub address_increment: u32,

    // Burst pattern
    pub burst_size: u32,
    pub burst_interval_ticks: u64,
    pub idle_time_ticks: u64,

    // Stochastic patterns
    pub delay_mean_ns: f64,
    pub delay_stddev_ns: f64,
    /// Arrival rate in events per ns for the POISSON pattern; 0 derives the
    /// rate from `delay_mean_ns`.
    pub poisson_rate: f64,

    /// 0 = unlimited.
    pub max_outstanding: usize,

    pub seed: u64,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            interval_ticks: ns_to_ticks(10.0),
            pattern: TrafficPattern::Constant,
            template: WorkloadTemplate::Custom,
            locality_percentage: 50,
            write_percentage: 50,
            databyte_value: 64,
            num_transactions: 100,
            start_address: 0,
            end_address: 0xFF,
            address_increment: 0x10,
            burst_size: 8,
            burst_interval_ticks: ns_to_ticks(2.0),
            idle_time_ticks: ns_to_ticks(100.0),
            delay_mean_ns: 10.0,
            delay_stddev_ns: 2.0,
            poisson_rate: 0.0,
            max_outstanding: 0,
            seed: 1,
        }
    }
}

impl TrafficConfig {
    /// Apply the workload template presets. Explicit overrides should be
    /// applied after this.
    #[must_use]
    pub fn with_template(mut self, template: WorkloadTemplate) -> Self {
        self.template = template;
        match template {
            WorkloadTemplate::Custom => {}
            WorkloadTemplate::Database => {
                // Bursty transaction log traffic with high locality
                self.pattern = TrafficPattern::Burst;
                self.locality_percentage = 70;
                self.write_percentage = 40;
                self.burst_size = 16;
                self.burst_interval_ticks = ns_to_ticks(1.0);
                self.idle_time_ticks = ns_to_ticks(200.0);
            }
            WorkloadTemplate::WebServer => {
                // Read-heavy random lookups with Poisson arrivals
                self.pattern = TrafficPattern::Poisson;
                self.locality_percentage = 20;
                self.write_percentage = 10;
                self.delay_mean_ns = 20.0;
            }
            WorkloadTemplate::MlInference => {
                // Streaming sequential reads of large tensors
                self.pattern = TrafficPattern::Constant;
                self.locality_percentage = 100;
                self.write_percentage = 0;
                self.databyte_value = 255;
                self.interval_ticks = ns_to_ticks(5.0);
            }
            WorkloadTemplate::IotSensors => {
                // Constant trickle of small sensor writes
                self.pattern = TrafficPattern::Constant;
                self.locality_percentage = 90;
                self.write_percentage = 100;
                self.databyte_value = 16;
                self.interval_ticks = ns_to_ticks(100.0);
            }
            WorkloadTemplate::Streaming => {
                // Large sequential transfers at a steady rate
                self.pattern = TrafficPattern::Normal;
                self.locality_percentage = 100;
                self.write_percentage = 20;
                self.databyte_value = 128;
                self.delay_mean_ns = 8.0;
                self.delay_stddev_ns = 1.0;
            }
        }
        self
    }

    fn validate(&self) -> Result<(), String> {
        if self.locality_percentage > 100 || self.write_percentage > 100 {
            return Err(String::from("percentages must be within 0-100"));
        }
        if self.end_address < self.start_address {
            return Err(String::from("end_address below start_address"));
        }
        if self.pattern == TrafficPattern::Burst && self.burst_size == 0 {
            return Err(String::from("burst_size must be non-zero"));
        }
        Ok(())
    }
}

/// Counters exposed after a run.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrafficStats {
    pub generated: usize,
    pub reads: usize,
    pub writes: usize,
}

#[derive(EntityDisplay)]
pub struct TrafficGen {
    pub entity: Arc<Entity>,
    clock: Clock,
    config: TrafficConfig,

    tx: RefCell<Option<OutPort<Packet>>>,

    outstanding: Rc<Cell<usize>>,
    completion: Repeated<()>,

    rng: RefCell<Xoshiro256PlusPlus>,
    stats: RefCell<TrafficStats>,
}

impl TrafficGen {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: TrafficConfig,
    ) -> Result<Rc<Self>, SimError> {
        if let Err(msg) = config.validate() {
            return ssd_engine::sim_error!(format!("{name}: {msg}"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let tx = OutPort::new(&entity, "tx");
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed ^ 0x7261_6666_6963);
        let rc_self = Rc::new(Self {
            entity,
            clock: clock.clone(),
            config,
            tx: RefCell::new(Some(tx)),
            outstanding: Rc::new(Cell::new(0)),
            completion: Repeated::default(),
            rng: RefCell::new(rng),
            stats: RefCell::new(TrafficStats::default()),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    /// Shared outstanding-request counter; the release path decrements it.
    #[must_use]
    pub fn outstanding_handle(&self) -> Rc<Cell<usize>> {
        self.outstanding.clone()
    }

    /// Event notified when a response reclaims outstanding capacity.
    #[must_use]
    pub fn completion_event(&self) -> Repeated<()> {
        self.completion.clone()
    }

    #[must_use]
    pub fn stats(&self) -> TrafficStats {
        *self.stats.borrow()
    }

    fn draw_address(&self, cursor: &mut u32) -> u32 {
        let mut rng = self.rng.borrow_mut();
        let sequential = (rng.gen_range(0..100)) < self.config.locality_percentage;
        if sequential {
            let address = *cursor;
            *cursor = cursor.wrapping_add(self.config.address_increment);
            if *cursor > self.config.end_address || *cursor < self.config.start_address {
                *cursor = self.config.start_address;
            }
            address
        } else {
            rng.gen_range(self.config.start_address..=self.config.end_address)
        }
    }

    fn draw_command(&self) -> AccessType {
        let mut rng = self.rng.borrow_mut();
        if rng.gen_range(0..100) < self.config.write_percentage {
            AccessType::Write
        } else {
            AccessType::Read
        }
    }

    /// Pattern-specific inter-arrival delay in ps ticks.
    fn inter_arrival_ticks(&self, emitted: usize) -> u64 {
        let config = &self.config;
        match config.pattern {
            TrafficPattern::Constant => config.interval_ticks,
            TrafficPattern::Burst => {
                if emitted as u32 % config.burst_size == 0 {
                    config.idle_time_ticks
                } else {
                    config.burst_interval_ticks
                }
            }
            TrafficPattern::Poisson => {
                let rate = if config.poisson_rate > 0.0 {
                    config.poisson_rate
                } else {
                    1.0 / config.delay_mean_ns
                };
                let exp = Exp::new(rate).unwrap();
                ns_to_ticks(exp.sample(&mut *self.rng.borrow_mut()))
            }
            TrafficPattern::Exponential => {
                let exp = Exp::new(1.0 / config.delay_mean_ns).unwrap();
                ns_to_ticks(exp.sample(&mut *self.rng.borrow_mut()))
            }
            TrafficPattern::Normal => {
                let normal = Normal::new(config.delay_mean_ns, config.delay_stddev_ns).unwrap();
                let delay_ns = normal.sample(&mut *self.rng.borrow_mut()).max(0.0);
                ns_to_ticks(delay_ns)
            }
        }
    }
}

#[async_trait(?Send)]
impl Runnable for TrafficGen {
    async fn run(&self) -> SimResult {
        let tx = take_option!(self.tx);
        let mut cursor = self.config.start_address;

        for i in 0..self.config.num_transactions {
            // Outstanding-request flow control
            if self.config.max_outstanding > 0 {
                while self.outstanding.get() >= self.config.max_outstanding {
                    self.completion.listen().await;
                }
            }

            let address = self.draw_address(&mut cursor);
            let command = self.draw_command();
            let data = match command {
                AccessType::Write => self.rng.borrow_mut().gen_range(0..0x1000),
                AccessType::Read => 0,
            };

            let packet = GenericPacket::new(
                &self.entity,
                command,
                address,
                data,
                self.config.databyte_value,
            );

            {
                let mut stats = self.stats.borrow_mut();
                stats.generated += 1;
                match command {
                    AccessType::Read => stats.reads += 1,
                    AccessType::Write => stats.writes += 1,
                }
            }

            let packet = Packet::Generic(packet);
            trace!(self.entity ; "emit {}", packet);
            exit!(self.entity ; packet.tag());
            self.outstanding.set(self.outstanding.get() + 1);
            tx.put(packet)?.await;

            let wait_ticks = self.inter_arrival_ticks(i + 1);
            if wait_ticks > 0 {
                self.clock.wait_ticks(wait_ticks).await;
            }
        }

        Ok(())
    }
}
