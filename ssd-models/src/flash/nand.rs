// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! NAND flash array model.
//!
//! Pages move between CLEAN, PROGRAMMED and INVALID; programming requires a
//! CLEAN page, erasing resets a whole block and counts a P/E cycle. Failure
//! probabilities mark blocks bad. Operation delays are tR/tProg/tErase plus
//! the I/O transfer time, with ±5% Gaussian jitter.
//!
//! # Ports
//!
//!  - One [input port](ssd_engine::port::InPort): `rx`
//!  - One [output port](ssd_engine::port::OutPort): `release_tx`

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
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
use crate::ns_to_ticks;
use crate::packet::{FlashAddress, FlashCommand, Packet};

/// String select lines per wordline.
const SSL_PER_WORDLINE: usize = 4;
/// Pages per string select line.
const PAGES_PER_SSL: usize = 32;

/// NAND timing parameters.
#[derive(Clone, Debug)]
pub struct FlashTiming {
    /// Read latency.
    pub t_r_ns: f64,
    /// Program latency.
    pub t_prog_ns: f64,
    /// Erase latency.
    pub t_erase_ns: f64,
    /// I/O interface speed.
    pub io_speed_mhz: f64,
    /// I/O width, 8 or 16 bits.
    pub io_width_bits: u8,
}

impl Default for FlashTiming {
    fn default() -> Self {
        Self {
            t_r_ns: 25_000.0,
            t_prog_ns: 200_000.0,
            t_erase_ns: 2_000_000.0,
            io_speed_mhz: 100.0,
            io_width_bits: 8,
        }
    }
}

impl FlashTiming {
    /// I/O transfer time for the given data size.
    #[must_use]
    pub fn io_time_ns(&self, data_size_bytes: u32) -> f64 {
        if self.io_speed_mhz <= 0.0 {
            return 0.0;
        }
        let data_bits = data_size_bytes as u64 * 8;
        let transfer_cycles = data_bits.div_ceil(self.io_width_bits as u64);
        transfer_cycles as f64 * 1000.0 / self.io_speed_mhz
    }
}

/// Page state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum PageState {
    /// Erased, ready for program.
    #[default]
    Clean,
    /// Contains valid data.
    Programmed,
    /// Contains invalid/old data.
    Invalid,
}

/// One erase block.
#[derive(Clone, Debug)]
pub struct FlashBlock {
    pub pages: Vec<PageState>,
    pub erase_count: u32,
    pub is_bad_block: bool,
}

impl FlashBlock {
    fn new(pages_per_block: usize) -> Self {
        Self {
            pages: vec![PageState::Clean; pages_per_block],
            erase_count: 0,
            is_bad_block: false,
        }
    }
}

/// NAND geometry and behaviour configuration.
#[derive(Clone, Debug)]
pub struct NandConfig {
    pub num_planes: usize,
    pub blocks_per_plane: usize,
    /// Wordlines per block; each wordline holds `4 * 32` pages.
    pub wordlines_per_block: usize,
    pub timing: FlashTiming,
    /// P/E cycles before wear-out failures begin.
    pub max_pe_cycles: u32,

    /// Failure injection probabilities; zero them for deterministic tests.
    pub program_failure_prob: f64,
    pub erase_failure_prob: f64,
    pub wearout_failure_prob: f64,

    pub seed: u64,
}

impl Default for NandConfig {
    fn default() -> Self {
        Self {
            num_planes: 4,
            blocks_per_plane: 1024,
            wordlines_per_block: 128,
            timing: FlashTiming::default(),
            max_pe_cycles: 100_000,
            program_failure_prob: 0.001,
            erase_failure_prob: 0.01,
            wearout_failure_prob: 0.1,
            seed: 1,
        }
    }
}

/// NAND counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct NandStats {
    pub total_reads: u64,
    pub total_programs: u64,
    pub total_erases: u64,
    pub failed_programs: u64,
    pub failed_erases: u64,
    pub bad_block_count: u64,
    pub rejected_commands: u64,
}

/// The flash array: `[plane][block]` of page states.
struct NandArray {
    config: NandConfig,
    planes: Vec<Vec<FlashBlock>>,
    rng: Xoshiro256PlusPlus,
    jitter: Normal<f64>,
}

impl NandArray {
    fn new(config: NandConfig) -> Self {
        let pages_per_block = config.wordlines_per_block * SSL_PER_WORDLINE * PAGES_PER_SSL;
        let planes = (0..config.num_planes)
            .map(|_| {
                (0..config.blocks_per_plane)
                    .map(|_| FlashBlock::new(pages_per_block))
                    .collect()
            })
            .collect();
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed ^ 0x6e61_6e64);
        Self {
            config,
            planes,
            rng,
            jitter: Normal::new(0.0, 1.0).unwrap(),
        }
    }

    fn is_valid_address(&self, addr: &FlashAddress) -> bool {
        (addr.plane as usize) < self.config.num_planes
            && (addr.block as usize) < self.config.blocks_per_plane
            && (addr.wl as usize) < self.config.wordlines_per_block
            && (addr.ssl as usize) < SSL_PER_WORDLINE
            && (addr.page as usize) < PAGES_PER_SSL
    }

    fn page_index(addr: &FlashAddress) -> usize {
        addr.wl as usize * SSL_PER_WORDLINE * PAGES_PER_SSL
            + addr.ssl as usize * PAGES_PER_SSL
            + addr.page as usize
    }

    fn page_state(&self, addr: &FlashAddress) -> PageState {
        self.planes[addr.plane as usize][addr.block as usize].pages[Self::page_index(addr)]
    }

    fn set_page_state(&mut self, addr: &FlashAddress, state: PageState) {
        self.planes[addr.plane as usize][addr.block as usize].pages[Self::page_index(addr)] =
            state;
    }

    fn mark_bad_block(&mut self, plane: u8, block: u16) {
        self.planes[plane as usize][block as usize].is_bad_block = true;
    }

    fn should_fail(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.gen_range(0.0..1.0) < probability
    }

    /// ±5% Gaussian timing variation, clamped non-negative.
    fn with_jitter(&mut self, base_delay_ns: f64) -> f64 {
        let variation = self.jitter.sample(&mut self.rng) * base_delay_ns * 0.05;
        (base_delay_ns + variation).max(0.0)
    }
}

#[derive(EntityDisplay)]
pub struct NandFlash {
    pub entity: Arc<Entity>,
    clock: Clock,

    rx: RefCell<Option<InPort<Packet>>>,
    release_tx: RefCell<Option<OutPort<Packet>>>,

    array: Rc<RefCell<NandArray>>,
    stats: Rc<RefCell<NandStats>>,
    error_log: ErrorLog,
}

impl NandFlash {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: NandConfig,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        if config.num_planes == 0 || config.blocks_per_plane == 0 || config.wordlines_per_block == 0
        {
            return ssd_engine::sim_error!(format!("{name}: geometry must be non-zero"));
        }
        let entity = Arc::new(Entity::new(parent, name));
        let rx = InPort::new(&entity, "rx");
        let release_tx = OutPort::new(&entity, "release_tx");
        let rc_self = Rc::new(Self {
            entity,
            clock: clock.clone(),
            rx: RefCell::new(Some(rx)),
            release_tx: RefCell::new(Some(release_tx)),
            array: Rc::new(RefCell::new(NandArray::new(config))),
            stats: Rc::new(RefCell::new(NandStats::default())),
            error_log,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_release_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.release_tx, connect ; port_state)
    }

    pub fn port_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> NandStats {
        *self.stats.borrow()
    }

    #[must_use]
    pub fn block_erase_count(&self, plane: u8, block: u16) -> u32 {
        self.array.borrow().planes[plane as usize][block as usize].erase_count
    }

    #[must_use]
    pub fn is_bad_block(&self, plane: u8, block: u16) -> bool {
        self.array.borrow().planes[plane as usize][block as usize].is_bad_block
    }

    #[must_use]
    pub fn page_state(&self, addr: &FlashAddress) -> PageState {
        self.array.borrow().page_state(addr)
    }
}

#[async_trait(?Send)]
impl Runnable for NandFlash {
    async fn run(&self) -> SimResult {
        let rx = take_option!(self.rx);
        let release_tx = take_option!(self.release_tx);

        loop {
            let packet = rx.get()?.await;
            let mut flash_packet = match packet {
                Packet::Flash(flash_packet) => flash_packet,
                other => {
                    self.stats.borrow_mut().rejected_commands += 1;
                    model_error!(self.entity, self.error_log, ErrorKind::InvalidPacketType ;
                        "expected a flash command, got {other}");
                    continue;
                }
            };

            let addr = flash_packet.flash_address;
            if !self.array.borrow().is_valid_address(&addr) {
                self.stats.borrow_mut().rejected_commands += 1;
                model_error!(self.entity, self.error_log, ErrorKind::AddressOutOfBounds ;
                    "invalid flash address {addr}");
                continue;
            }
            if self.array.borrow().planes[addr.plane as usize][addr.block as usize].is_bad_block {
                self.stats.borrow_mut().rejected_commands += 1;
                model_error!(self.entity, self.error_log, ErrorKind::DeviceError ;
                    "access to bad block {addr}");
                continue;
            }

            let delay_ns = match flash_packet.flash_command {
                FlashCommand::Read => {
                    let mut array = self.array.borrow_mut();
                    self.stats.borrow_mut().total_reads += 1;

                    // Reading a clean page returns the erased pattern
                    if array.page_state(&addr) == PageState::Clean {
                        flash_packet.set_data(0xFF);
                    }
                    array.config.timing.t_r_ns
                        + array.config.timing.io_time_ns(flash_packet.data_size)
                }
                FlashCommand::Program => {
                    let mut array = self.array.borrow_mut();
                    self.stats.borrow_mut().total_programs += 1;
                    let delay = array.config.timing.t_prog_ns
                        + array.config.timing.io_time_ns(flash_packet.data_size);

                    if array.page_state(&addr) != PageState::Clean {
                        // Program-before-erase violation
                        self.stats.borrow_mut().failed_programs += 1;
                        model_error!(self.entity, self.error_log, ErrorKind::DeviceError ;
                            "program to non-clean page {addr}");
                    } else {
                        array.set_page_state(&addr, PageState::Programmed);
                        let failure_prob = array.config.program_failure_prob;
                        if array.should_fail(failure_prob) {
                            array.mark_bad_block(addr.plane, addr.block);
                            let mut stats = self.stats.borrow_mut();
                            stats.failed_programs += 1;
                            stats.bad_block_count += 1;
                            model_error!(self.entity, self.error_log, ErrorKind::DeviceError ;
                                "program failure, marked block bad {addr}");
                        }
                    }
                    delay
                }
                FlashCommand::Erase => {
                    let mut array = self.array.borrow_mut();
                    self.stats.borrow_mut().total_erases += 1;
                    let delay = array.config.timing.t_erase_ns;

                    {
                        let block =
                            &mut array.planes[addr.plane as usize][addr.block as usize];
                        for page in block.pages.iter_mut() {
                            *page = PageState::Clean;
                        }
                        block.erase_count += 1;
                    }

                    let erase_count =
                        array.planes[addr.plane as usize][addr.block as usize].erase_count;
                    let worn_out = erase_count >= array.config.max_pe_cycles;
                    let wearout_prob = array.config.wearout_failure_prob;
                    let erase_prob = array.config.erase_failure_prob;
                    let failed = (worn_out && array.should_fail(wearout_prob))
                        || array.should_fail(erase_prob);
                    if failed {
                        array.mark_bad_block(addr.plane, addr.block);
                        let mut stats = self.stats.borrow_mut();
                        stats.failed_erases += 1;
                        stats.bad_block_count += 1;
                        model_error!(self.entity, self.error_log, ErrorKind::DeviceError ;
                            "erase failure, marked block bad {addr}");
                    }
                    delay
                }
            };

            let actual_delay_ns = self.array.borrow_mut().with_jitter(delay_ns);
            trace!(self.entity ; "{} {} delay {:.1}ns",
                flash_packet.flash_command, addr, actual_delay_ns);
            if actual_delay_ns > 0.0 {
                self.clock.wait_ticks(ns_to_ticks(actual_delay_ns)).await;
            }

            release_tx.put(Packet::Flash(flash_packet))?.await;
        }
    }
}
