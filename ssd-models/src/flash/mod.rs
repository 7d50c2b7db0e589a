// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Multi-channel flash controller.
//!
//! Commands from the DRAM layer are translated from their logical address to
//! a physical page (a monotonic first-touch allocator stands in for a full
//! FTL), decoded to `(channel, die, block, page)`, wrapped into flash
//! commands and routed into the per-channel command queue. Each channel
//! drains its queue into the NAND array connected behind it; completions
//! from all channels are merged and the origin request is sent back
//! upstream.
//!
//! A wear-leveling task periodically inspects the per-block erase counters
//! and swaps the extremes once their spread exceeds a threshold.
//!
//! # Ports
//!
//!  - One [input port](ssd_engine::port::InPort): `rx` (from DRAM)
//!  - One [output port](ssd_engine::port::OutPort): `tx` (to DRAM)
//!  - Per channel: `flash_tx[i]` towards the NAND array and `flash_rx[i]`
//!    for its completions.

pub mod nand;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_components::arbiter::{Arbiter, RoundRobinPolicy};
use ssd_components::router::{Route, Router};
use ssd_components::store::Store;
use ssd_components::{connect_tx, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::Runnable;
use ssd_engine::types::{AccessType, SimError, SimResult};
use ssd_model_builder::EntityDisplay;
use ssd_track::entity::Entity;
use ssd_track::trace;

use crate::ns_to_ticks;
use crate::packet::{FlashAddress, FlashCommand, FlashPacket, Packet};
pub use nand::{FlashTiming, NandConfig, NandFlash, NandStats, PageState};

/// Wear-leveling runs every 100 ms of simulated time.
const WEAR_LEVEL_PERIOD_NS: f64 = 100_000_000.0;
/// Erase-count spread that triggers wear leveling.
const WEAR_LEVEL_SPREAD: u32 = 100;

/// Flash controller configuration.
#[derive(Clone, Debug)]
pub struct FlashConfig {
    pub num_channels: u32,
    pub dies_per_channel: u32,
    /// Command queue depth per channel.
    pub command_queue_depth: usize,
    pub page_size_kb: u32,
    pub pages_per_block: u32,
    pub blocks_per_die: u32,
    pub enable_wear_leveling: bool,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            num_channels: 8,
            dies_per_channel: 4,
            command_queue_depth: 16,
            page_size_kb: 16,
            pages_per_block: 128,
            blocks_per_die: 1024,
            enable_wear_leveling: true,
        }
    }
}

/// Per-channel operation counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChannelStats {
    pub total_operations: u64,
    pub read_operations: u64,
    pub write_operations: u64,
    pub erase_operations: u64,
}

/// Flash controller counters.
#[derive(Clone, Debug, Default)]
pub struct FlashStats {
    pub total_commands: u64,
    pub completed_commands: u64,
    pub read_commands: u64,
    pub write_commands: u64,
    pub erase_commands: u64,
    /// Commands that found their channel queue full.
    pub channel_conflicts: u64,
    pub wear_level_swaps: u64,
    pub channels: Vec<ChannelStats>,
}

/// Route flash packets by the channel the controller assigned.
struct ChannelRoute {}

impl Route<Packet> for ChannelRoute {
    fn route(&self, packet: &Packet) -> Result<usize, SimError> {
        match packet {
            Packet::Flash(flash_packet) => Ok(flash_packet.channel as usize),
            other => ssd_engine::sim_error!(format!("cannot route non-flash packet {other}")),
        }
    }
}

#[derive(EntityDisplay)]
pub struct FlashController {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,
    config: FlashConfig,

    rx: RefCell<Option<InPort<Packet>>>,
    tx: RefCell<Option<OutPort<Packet>>>,
    /// Internal egress into the channel router.
    route_tx: RefCell<Option<OutPort<Packet>>>,
    /// Internal ingress from the completion arbiter.
    done_rx: RefCell<Option<InPort<Packet>>>,

    channel_queues: Vec<Rc<Store<Packet>>>,
    completion_arbiter: Rc<Arbiter<Packet>>,

    /// Logical page -> physical page; entries are never removed.
    logical_to_physical: Rc<RefCell<HashMap<u64, u64>>>,
    next_physical: RefCell<u64>,

    /// Per-block erase counters for the wear-leveling heuristic.
    erase_counts: Rc<RefCell<Vec<u32>>>,

    stats: Rc<RefCell<FlashStats>>,
}

impl FlashController {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: FlashConfig,
    ) -> Result<Rc<Self>, SimError> {
        if config.num_channels == 0 || config.command_queue_depth == 0 {
            return ssd_engine::sim_error!(format!(
                "{name}: channels and queue depth must be non-zero"
            ));
        }

        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let tx = OutPort::new(&entity, "tx");

        let num_channels = config.num_channels as usize;
        let router = Router::new_and_register(
            engine,
            &entity,
            "channel_router",
            num_channels,
            Box::new(ChannelRoute {}),
        )?;
        let mut channel_queues = Vec::with_capacity(num_channels);
        for channel in 0..num_channels {
            let queue = Store::new_and_register(
                engine,
                &entity,
                format!("ch{channel}_queue").as_str(),
                config.command_queue_depth,
            )?;
            router.connect_port_tx_i(channel, queue.port_rx())?;
            channel_queues.push(queue);
        }

        let completion_arbiter = Arbiter::new_and_register(
            engine,
            &entity,
            "completion_arb",
            num_channels,
            Box::new(RoundRobinPolicy::new()),
        )?;

        let mut route_tx = OutPort::new(&entity, "route_tx");
        route_tx.connect(router.port_rx())?;

        let done_rx = InPort::new(&entity, "done_rx");
        completion_arbiter.connect_port_tx(done_rx.state())?;

        let total_blocks =
            (config.num_channels * config.dies_per_channel * config.blocks_per_die) as usize;

        let stats = FlashStats {
            channels: vec![ChannelStats::default(); num_channels],
            ..FlashStats::default()
        };

        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            clock: clock.clone(),
            config,
            rx: RefCell::new(Some(rx)),
            tx: RefCell::new(Some(tx)),
            route_tx: RefCell::new(Some(route_tx)),
            done_rx: RefCell::new(Some(done_rx)),
            channel_queues,
            completion_arbiter,
            logical_to_physical: Rc::new(RefCell::new(HashMap::new())),
            next_physical: RefCell::new(0),
            erase_counts: Rc::new(RefCell::new(vec![0; total_blocks])),
            stats: Rc::new(RefCell::new(stats)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// Connect channel `i` towards its NAND array.
    pub fn connect_port_flash_tx_i(
        &self,
        i: usize,
        port_state: PortStateResult<Packet>,
    ) -> SimResult {
        self.channel_queues[i].connect_port_tx(port_state)
    }

    /// Completions from channel `i`'s NAND array enter here.
    pub fn port_flash_rx_i(&self, i: usize) -> PortStateResult<Packet> {
        self.completion_arbiter.port_rx_i(i)
    }

    pub fn connect_port_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.tx, connect ; port_state)
    }

    pub fn port_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> FlashStats {
        self.stats.borrow().clone()
    }

    /// Number of logical pages that have been mapped so far.
    #[must_use]
    pub fn num_mapped(&self) -> usize {
        self.logical_to_physical.borrow().len()
    }

    #[must_use]
    pub fn erase_count_spread(&self) -> (u32, u32) {
        let counts = self.erase_counts.borrow();
        let max = counts.iter().copied().max().unwrap_or(0);
        let min = counts.iter().copied().min().unwrap_or(0);
        (min, max)
    }

    /// Direct map with first-touch allocation of physical pages.
    fn translate(&self, logical: u64) -> u64 {
        if let Some(physical) = self.logical_to_physical.borrow().get(&logical) {
            return *physical;
        }
        let physical = *self.next_physical.borrow();
        *self.next_physical.borrow_mut() += 1;
        self.logical_to_physical.borrow_mut().insert(logical, physical);
        physical
    }

    /// Decode a physical page number into (channel, die, block,
    /// page-in-block).
    fn decode_physical(&self, physical: u64) -> (u32, u32, u32, u32) {
        let pages_per_die = (self.config.blocks_per_die * self.config.pages_per_block) as u64;
        let pages_per_channel = pages_per_die * self.config.dies_per_channel as u64;

        let channel = (physical / pages_per_channel) % self.config.num_channels as u64;
        let addr_in_channel = physical % pages_per_channel;
        let die = addr_in_channel / pages_per_die;
        let addr_in_die = addr_in_channel % pages_per_die;
        let block = addr_in_die / self.config.pages_per_block as u64;
        let page = addr_in_die % self.config.pages_per_block as u64;

        (channel as u32, die as u32, block as u32, page as u32)
    }

    /// Spread a page-in-block index over the (wl, ssl, page) dimensions; the
    /// die selects the NAND plane.
    fn flash_address(&self, die: u32, block: u32, page_in_block: u32) -> FlashAddress {
        FlashAddress {
            plane: die as u8,
            block: block as u16,
            wl: (page_in_block / 128) as u8,
            ssl: ((page_in_block / 32) % 4) as u8,
            page: (page_in_block % 32) as u16,
        }
    }

    fn global_block(&self, channel: u32, die: u32, block: u32) -> usize {
        ((channel * self.config.dies_per_channel + die) * self.config.blocks_per_die + block)
            as usize
    }

    fn account_channel_op(&self, channel: u32, command: FlashCommand) {
        let mut stats = self.stats.borrow_mut();
        let entry = &mut stats.channels[channel as usize];
        entry.total_operations += 1;
        match command {
            FlashCommand::Read => {
                entry.read_operations += 1;
                stats.read_commands += 1;
            }
            FlashCommand::Program => {
                entry.write_operations += 1;
                stats.write_commands += 1;
            }
            FlashCommand::Erase => {
                entry.erase_operations += 1;
                stats.erase_commands += 1;
            }
        }
    }
}

#[async_trait(?Send)]
impl Runnable for FlashController {
    async fn run(&self) -> SimResult {
        // Completion handling: merge channel completions, unwrap the origin
        // request and send it back upstream.
        {
            let done_rx = take_option!(self.done_rx);
            let tx = take_option!(self.tx);
            let stats = self.stats.clone();
            self.spawner.spawn(async move {
                loop {
                    let completion = done_rx.get()?.await;
                    stats.borrow_mut().completed_commands += 1;
                    tx.put(completion.unwrap_origin())?.await;
                }
            });
        }

        // Wear leveling: periodically swap the extremal erase counters once
        // the spread exceeds the threshold.
        if self.config.enable_wear_leveling {
            let entity = self.entity.clone();
            let clock = self.clock.clone();
            let erase_counts = self.erase_counts.clone();
            let stats = self.stats.clone();
            self.spawner.spawn(async move {
                loop {
                    clock.wait_ticks_or_exit(ns_to_ticks(WEAR_LEVEL_PERIOD_NS)).await;
                    let mut counts = erase_counts.borrow_mut();
                    let Some(max_index) =
                        (0..counts.len()).max_by_key(|i| counts[*i])
                    else {
                        continue;
                    };
                    let Some(min_index) =
                        (0..counts.len()).min_by_key(|i| counts[*i])
                    else {
                        continue;
                    };
                    if counts[max_index] - counts[min_index] > WEAR_LEVEL_SPREAD {
                        trace!(entity ; "wear leveling (max {}, min {})",
                            counts[max_index], counts[min_index]);
                        counts.swap(max_index, min_index);
                        stats.borrow_mut().wear_level_swaps += 1;
                    }
                }
            });
        }

        // Command reception: translate, decode, wrap and route.
        let rx = take_option!(self.rx);
        let route_tx = take_option!(self.route_tx);

        loop {
            let request = rx.get()?.await;
            self.stats.borrow_mut().total_commands += 1;

            let mut flash_packet = match request {
                // Pre-formed flash commands (erase management, tests) keep
                // their address and channel
                Packet::Flash(flash_packet) => flash_packet,
                other => {
                    let logical = other.address() as u64;
                    let physical = self.translate(logical);
                    let (channel, die, block, page) = self.decode_physical(physical);

                    let command = match other.command() {
                        AccessType::Read => FlashCommand::Read,
                        AccessType::Write => FlashCommand::Program,
                    };
                    let mut flash_packet = FlashPacket::wrap(&self.entity, command, other);
                    flash_packet.flash_address = self.flash_address(die, block, page);
                    flash_packet.channel = channel;
                    trace!(self.entity ; "logical 0x{logical:x} -> physical 0x{physical:x} \
                        (ch{channel}/die{die}/blk{block}/pg{page})");
                    flash_packet
                }
            };

            let channel = flash_packet.channel.min(self.config.num_channels - 1);
            flash_packet.channel = channel;
            self.account_channel_op(channel, flash_packet.flash_command);

            if flash_packet.flash_command == FlashCommand::Erase {
                let addr = flash_packet.flash_address;
                let index =
                    self.global_block(channel, addr.plane as u32, addr.block as u32);
                if let Some(count) = self.erase_counts.borrow_mut().get_mut(index) {
                    *count += 1;
                }
            }

            // Back-pressure on a full channel queue
            if self.channel_queues[channel as usize].fill_level() >= self.config.command_queue_depth
            {
                self.stats.borrow_mut().channel_conflicts += 1;
            }
            route_tx.put(Packet::Flash(flash_packet))?.await;
        }
    }
}
