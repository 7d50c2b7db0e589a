// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! An n-way set-associative L1 cache with configurable replacement, write
//! and allocation policies.
//!
//! Hits are served after `hit_latency`; misses wait `miss_latency`, forward
//! the request downstream and fill the line when the response returns. A
//! separate worker consumes downstream responses so that write-through
//! acknowledgements (which have no waiting miss) are absorbed without
//! blocking the pipeline.
//!
//! # Ports
//!
//!  - Two [input ports](ssd_engine::port::InPort): `cpu_rx`, `mem_rx`
//!  - Two [output ports](ssd_engine::port::OutPort): `cpu_tx`, `mem_tx`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use ssd_components::{connect_tx, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::events::repeated::Repeated;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::{Event, Runnable};
use ssd_engine::types::{AccessType, SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::tag::{Tag, Tagged};
use ssd_track::trace;

use crate::packet::Packet;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReplacementPolicy {
    #[default]
    Lru,
    Fifo,
    Random,
    Lfu,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum WritePolicy {
    #[default]
    WriteBack,
    WriteThrough,
    WriteAround,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum AllocationPolicy {
    #[default]
    WriteAllocate,
    NoWriteAllocate,
}

/// MESI-style line states.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum LineState {
    #[default]
    Invalid,
    Shared,
    Exclusive,
    Modified,
}

/// One cache line's metadata.
#[derive(Clone, Debug, Default)]
pub struct CacheLine {
    pub tag: u32,
    pub state: LineState,
    pub valid: bool,
    pub dirty: bool,
    pub last_access_ns: f64,
    pub access_count: u32,
}

/// Cache configuration.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub size_kb: usize,
    pub line_size: usize,
    pub associativity: usize,
    pub replacement_policy: ReplacementPolicy,
    pub write_policy: WritePolicy,
    pub allocation_policy: AllocationPolicy,
    pub hit_latency_ticks: u64,
    pub miss_latency_ticks: u64,
    pub seed: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            size_kb: 32,
            line_size: 64,
            associativity: 4,
            replacement_policy: ReplacementPolicy::Lru,
            write_policy: WritePolicy::WriteBack,
            allocation_policy: AllocationPolicy::WriteAllocate,
            hit_latency_ticks: crate::ns_to_ticks(1.0),
            miss_latency_ticks: crate::ns_to_ticks(10.0),
            seed: 1,
        }
    }
}

/// Cache counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub writebacks: u64,
    /// Write-through acknowledgements consumed by the response worker.
    pub absorbed_acks: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.accesses > 0 {
            self.hits as f64 / self.accesses as f64
        } else {
            0.0
        }
    }
}

/// The cache array and its address decode.
struct CacheContents {
    config: CacheConfig,
    num_sets: usize,
    offset_bits: u32,
    index_bits: u32,
    sets: Vec<Vec<CacheLine>>,
    rng: Xoshiro256PlusPlus,
}

impl CacheContents {
    fn new(config: CacheConfig) -> Result<Self, String> {
        if !config.line_size.is_power_of_two() {
            return Err(format!("line size {} not a power of two", config.line_size));
        }
        let size_bytes = config.size_kb * 1024;
        let num_lines = size_bytes / config.line_size;
        if config.associativity == 0 || num_lines % config.associativity != 0 {
            return Err(format!(
                "associativity {} does not divide {} lines",
                config.associativity, num_lines
            ));
        }
        let num_sets = num_lines / config.associativity;
        if !num_sets.is_power_of_two() {
            return Err(format!("{num_sets} sets not a power of two"));
        }

        let offset_bits = config.line_size.trailing_zeros();
        let index_bits = num_sets.trailing_zeros();
        let sets = vec![vec![CacheLine::default(); config.associativity]; num_sets];
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed ^ 0x6361_6368_65);
        Ok(Self {
            config,
            num_sets,
            offset_bits,
            index_bits,
            sets,
            rng,
        })
    }

    /// Split an address into its (set, tag) pair:
    ///
    /// ```text
    ///  msb                  lsb
    ///  +-----+-------+--------+
    ///  | tag | index | offset |
    ///  +-----+-------+--------+
    /// ```
    fn decode(&self, address: u32) -> (usize, u32) {
        let set = ((address >> self.offset_bits) as usize) & (self.num_sets - 1);
        let tag = address >> (self.offset_bits + self.index_bits);
        (set, tag)
    }

    /// The way holding this address, if any.
    fn find_way(&self, set: usize, tag: u32) -> Option<usize> {
        self.sets[set]
            .iter()
            .position(|line| line.valid && line.tag == tag)
    }

    /// First invalid way, otherwise by replacement policy.
    fn select_victim(&mut self, set: usize) -> usize {
        if let Some(way) = self.sets[set].iter().position(|line| !line.valid) {
            return way;
        }

        let ways = &self.sets[set];
        match self.config.replacement_policy {
            ReplacementPolicy::Lru | ReplacementPolicy::Fifo => {
                // FIFO is approximated by the oldest access time
                let mut victim = 0;
                for (way, line) in ways.iter().enumerate() {
                    if line.last_access_ns < ways[victim].last_access_ns {
                        victim = way;
                    }
                }
                victim
            }
            ReplacementPolicy::Lfu => {
                let mut victim = 0;
                for (way, line) in ways.iter().enumerate() {
                    if line.access_count < ways[victim].access_count {
                        victim = way;
                    }
                }
                victim
            }
            ReplacementPolicy::Random => self.rng.gen_range(0..self.config.associativity),
        }
    }
}

#[derive(EntityDisplay)]
pub struct L1Cache {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,

    cpu_rx: RefCell<Option<InPort<Packet>>>,
    cpu_tx: RefCell<Option<OutPort<Packet>>>,
    mem_tx: RefCell<Option<OutPort<Packet>>>,
    mem_rx: RefCell<Option<InPort<Packet>>>,

    contents: Rc<RefCell<CacheContents>>,
    stats: Rc<RefCell<CacheStats>>,

    /// Trace tag of the in-flight miss, if any.
    pending_miss: Rc<RefCell<Option<Tag>>>,
    /// Slot the response worker fills for the waiting miss.
    fill_slot: Rc<RefCell<Option<Packet>>>,
    fill_event: Repeated<()>,
}

impl L1Cache {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: CacheConfig,
    ) -> Result<Rc<Self>, SimError> {
        let contents = match CacheContents::new(config) {
            Ok(contents) => contents,
            Err(msg) => return ssd_engine::sim_error!(format!("{name}: {msg}")),
        };
        let entity = Arc::new(Entity::new(parent, name));
        let cpu_rx = InPort::new(&entity, "cpu_rx");
        let cpu_tx = OutPort::new(&entity, "cpu_tx");
        let mem_tx = OutPort::new(&entity, "mem_tx");
        let mem_rx = InPort::new(&entity, "mem_rx");
        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            clock: clock.clone(),
            cpu_rx: RefCell::new(Some(cpu_rx)),
            cpu_tx: RefCell::new(Some(cpu_tx)),
            mem_tx: RefCell::new(Some(mem_tx)),
            mem_rx: RefCell::new(Some(mem_rx)),
            contents: Rc::new(RefCell::new(contents)),
            stats: Rc::new(RefCell::new(CacheStats::default())),
            pending_miss: Rc::new(RefCell::new(None)),
            fill_slot: Rc::new(RefCell::new(None)),
            fill_event: Repeated::default(),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_cpu_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.cpu_tx, connect ; port_state)
    }

    pub fn connect_port_mem_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.mem_tx, connect ; port_state)
    }

    pub fn port_cpu_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.cpu_rx, state)
    }

    pub fn port_mem_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.mem_rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        *self.stats.borrow()
    }

    /// Expose the (set, tag) decode for testing.
    #[must_use]
    pub fn decode(&self, address: u32) -> (usize, u32) {
        self.contents.borrow().decode(address)
    }

    /// Whether an address is currently held in a valid line.
    #[must_use]
    pub fn holds(&self, address: u32) -> bool {
        let contents = self.contents.borrow();
        let (set, tag) = contents.decode(address);
        contents.find_way(set, tag).is_some()
    }

    /// Fill the line selected for this response.
    fn fill_line(&self, response: &Packet) {
        let mut contents = self.contents.borrow_mut();
        let (set, tag) = contents.decode(response.address());
        let victim = contents.select_victim(set);
        let write_policy = contents.config.write_policy;
        let now_ns = self.clock.time_now_ns();

        let line = &mut contents.sets[set][victim];
        {
            let mut stats = self.stats.borrow_mut();
            if line.valid {
                stats.evictions += 1;
                if line.dirty && write_policy == WritePolicy::WriteBack {
                    stats.writebacks += 1;
                }
            }
        }

        let is_write = response.command() == AccessType::Write;
        line.tag = tag;
        line.valid = true;
        line.dirty = is_write && write_policy == WritePolicy::WriteBack;
        line.state = if is_write {
            LineState::Modified
        } else {
            LineState::Exclusive
        };
        line.last_access_ns = now_ns;
        line.access_count += 1;

        trace!(self.entity ; "filled set {set} way {victim} tag {tag:x}");
    }
}

#[async_trait(?Send)]
impl Runnable for L1Cache {
    async fn run(&self) -> SimResult {
        // Response worker: deliver fills to the waiting miss, absorb
        // write-through acknowledgements.
        {
            let mem_rx = take_option!(self.mem_rx);
            let pending_miss = self.pending_miss.clone();
            let fill_slot = self.fill_slot.clone();
            let fill_event = self.fill_event.clone();
            let stats = self.stats.clone();
            self.spawner.spawn(async move {
                loop {
                    let response = mem_rx.get()?.await;
                    let is_fill = *pending_miss.borrow() == Some(response.tag());
                    if is_fill {
                        *fill_slot.borrow_mut() = Some(response);
                        fill_event.notify()?;
                    } else {
                        stats.borrow_mut().absorbed_acks += 1;
                    }
                }
            });
        }

        let cpu_rx = take_option!(self.cpu_rx);
        let cpu_tx = take_option!(self.cpu_tx);
        let mem_tx = take_option!(self.mem_tx);

        loop {
            let request = cpu_rx.get()?.await;
            self.stats.borrow_mut().accesses += 1;

            let address = request.address();
            let is_write = request.command() == AccessType::Write;
            let (write_policy, allocation_policy, hit_ticks, miss_ticks) = {
                let contents = self.contents.borrow();
                (
                    contents.config.write_policy,
                    contents.config.allocation_policy,
                    contents.config.hit_latency_ticks,
                    contents.config.miss_latency_ticks,
                )
            };

            // Write-around writes bypass the cache entirely
            let bypass = is_write && write_policy == WritePolicy::WriteAround;

            let hit_way = if bypass {
                // A stale copy must not serve later reads
                let mut contents = self.contents.borrow_mut();
                let (set, tag) = contents.decode(address);
                if let Some(way) = contents.find_way(set, tag) {
                    contents.sets[set][way].valid = false;
                    contents.sets[set][way].state = LineState::Invalid;
                }
                None
            } else {
                let contents = self.contents.borrow();
                let (set, tag) = contents.decode(address);
                contents.find_way(set, tag)
            };

            match hit_way {
                Some(way) => {
                    self.stats.borrow_mut().hits += 1;
                    let now_ns = self.clock.time_now_ns();
                    {
                        let mut contents = self.contents.borrow_mut();
                        let (set, _) = contents.decode(address);
                        let line = &mut contents.sets[set][way];
                        line.last_access_ns = now_ns;
                        line.access_count += 1;

                        if is_write {
                            match write_policy {
                                WritePolicy::WriteBack => {
                                    line.dirty = true;
                                    line.state = LineState::Modified;
                                }
                                WritePolicy::WriteThrough | WritePolicy::WriteAround => {}
                            }
                        }
                    }

                    if is_write && write_policy == WritePolicy::WriteThrough {
                        // Forward a copy downstream without waiting for its
                        // acknowledgement
                        mem_tx.put(request.clone())?.await;
                    }

                    self.clock.wait_ticks(hit_ticks).await;
                    cpu_tx.put(request)?.await;
                }
                None => {
                    self.stats.borrow_mut().misses += 1;
                    self.clock.wait_ticks(miss_ticks).await;

                    *self.pending_miss.borrow_mut() = Some(request.tag());
                    mem_tx.put(request)?.await;

                    // Wait for the response worker to deliver the fill
                    loop {
                        if self.fill_slot.borrow().is_some() {
                            break;
                        }
                        self.fill_event.listen().await;
                    }
                    let response = self.fill_slot.borrow_mut().take().unwrap();
                    *self.pending_miss.borrow_mut() = None;

                    let fill = !bypass
                        && !(is_write && allocation_policy == AllocationPolicy::NoWriteAllocate);
                    if fill {
                        self.fill_line(&response);
                    }

                    cpu_tx.put(response)?.await;
                }
            }
        }
    }
}
