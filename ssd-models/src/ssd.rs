// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The SSD: controller front end and the assembled device.
//!
//! [`SsdController`] terminates the PCIe transport, charges the command
//! processing overhead and dispatches requests into the storage hierarchy;
//! completions are matched against the active-command table and returned to
//! the host. [`SsdTop`] wires controller, L1 cache, DRAM controller, flash
//! controller and the per-channel NAND arrays together and owns every
//! inter-module port.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
use ssd_components::arbiter::{Arbiter, RoundRobinPolicy};
use ssd_components::delay::Delay;
use ssd_components::{connect_port, port_rx, take_option};
use ssd_engine::engine::Engine;
use ssd_engine::executor::Spawner;
use ssd_engine::port::{InPort, OutPort, PortStateResult};
use ssd_engine::time::clock::Clock;
use ssd_engine::traits::Runnable;
use ssd_engine::types::{SimError, SimResult};
use ssd_model_builder::{EntityDisplay, Runnable};
use ssd_track::entity::Entity;
use ssd_track::{trace, warn};

use crate::cache::{CacheConfig, CacheStats, L1Cache};
use crate::dram::{DramConfig, DramController, DramStats};
use crate::error::{ErrorKind, ErrorLog};
use crate::flash::{
    FlashConfig, FlashController, FlashStats, NandConfig, NandFlash, NandStats,
};
use crate::model_error;
use crate::ns_to_ticks;
use crate::packet::Packet;

/// SSD controller configuration.
#[derive(Clone, Debug)]
pub struct SsdControllerConfig {
    /// Fixed command processing overhead.
    pub command_processing_ns: f64,
    /// Highest addressable LBA.
    pub max_lba: u32,
}

impl Default for SsdControllerConfig {
    fn default() -> Self {
        Self {
            command_processing_ns: 100.0,
            max_lba: u32::MAX,
        }
    }
}

/// Controller counters.
#[derive(Clone, Copy, Debug, Default)]
pub struct SsdControllerStats {
    pub total_commands: u64,
    pub completed_commands: u64,
    pub error_commands: u64,
    pub total_bytes_transferred: u64,
    pub total_latency_ns: f64,
}

impl SsdControllerStats {
    #[must_use]
    pub fn avg_latency_ns(&self) -> f64 {
        if self.completed_commands > 0 {
            self.total_latency_ns / self.completed_commands as f64
        } else {
            0.0
        }
    }
}

/// The NVMe-style front end of the device.
///
/// # Ports
///
///  - Two [input ports](ssd_engine::port::InPort): `pcie_rx`, `storage_rx`
///  - Two [output ports](ssd_engine::port::OutPort): `pcie_tx`, `storage_tx`
#[derive(EntityDisplay)]
pub struct SsdController {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    clock: Clock,
    config: SsdControllerConfig,

    pcie_rx: RefCell<Option<InPort<Packet>>>,
    storage_rx: RefCell<Option<InPort<Packet>>>,

    /// Command-processing pipeline stage in front of the storage hierarchy.
    processing_delay: Rc<Delay<Packet>>,
    /// Merges completions and error completions towards the host.
    response_arbiter: Rc<Arbiter<Packet>>,

    /// Internal ports
    proc_tx: RefCell<Option<OutPort<Packet>>>,
    done_tx: RefCell<Option<OutPort<Packet>>>,
    err_tx: RefCell<Option<OutPort<Packet>>>,

    /// Submit time in ns of each active command, keyed by index.
    active_commands: Rc<RefCell<HashMap<u32, f64>>>,

    stats: Rc<RefCell<SsdControllerStats>>,
    error_log: ErrorLog,
}

impl SsdController {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: SsdControllerConfig,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        let entity = Arc::new(Entity::new(parent, name));

        let processing_delay = Delay::new_and_register(
            engine,
            clock,
            &entity,
            "cmd_proc",
            ns_to_ticks(config.command_processing_ns) as usize,
        )?;
        let response_arbiter = Arbiter::new_and_register(
            engine,
            &entity,
            "rsp_arb",
            2,
            Box::new(RoundRobinPolicy::new()),
        )?;

        let mut proc_tx = OutPort::new(&entity, "proc_tx");
        proc_tx.connect(processing_delay.port_rx())?;
        let mut done_tx = OutPort::new(&entity, "done_tx");
        done_tx.connect(response_arbiter.port_rx_i(0))?;
        let mut err_tx = OutPort::new(&entity, "err_tx");
        err_tx.connect(response_arbiter.port_rx_i(1))?;

        let pcie_rx = InPort::new(&entity, "pcie_rx");
        let storage_rx = InPort::new(&entity, "storage_rx");

        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            clock: clock.clone(),
            config,
            pcie_rx: RefCell::new(Some(pcie_rx)),
            storage_rx: RefCell::new(Some(storage_rx)),
            processing_delay,
            response_arbiter,
            proc_tx: RefCell::new(Some(proc_tx)),
            done_tx: RefCell::new(Some(done_tx)),
            err_tx: RefCell::new(Some(err_tx)),
            active_commands: Rc::new(RefCell::new(HashMap::new())),
            stats: Rc::new(RefCell::new(SsdControllerStats::default())),
            error_log,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_pcie_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        self.response_arbiter.connect_port_tx(port_state)
    }

    pub fn connect_port_storage_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        self.processing_delay.connect_port_tx(port_state)
    }

    pub fn port_pcie_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.pcie_rx, state)
    }

    pub fn port_storage_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.storage_rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> SsdControllerStats {
        *self.stats.borrow()
    }

    #[must_use]
    pub fn num_active(&self) -> usize {
        self.active_commands.borrow().len()
    }
}

#[async_trait(?Send)]
impl Runnable for SsdController {
    async fn run(&self) -> SimResult {
        // Completion handling: match responses against the active-command
        // table and return them to the host.
        {
            let entity = self.entity.clone();
            let storage_rx = take_option!(self.storage_rx);
            let done_tx = take_option!(self.done_tx);
            let clock = self.clock.clone();
            let active_commands = self.active_commands.clone();
            let stats = self.stats.clone();
            self.spawner.spawn(async move {
                loop {
                    let response = storage_rx.get()?.await;
                    let index = response.attribute("index") as u32;
                    match active_commands.borrow_mut().remove(&index) {
                        Some(submit_ns) => {
                            let mut stats = stats.borrow_mut();
                            stats.completed_commands += 1;
                            stats.total_latency_ns += clock.time_now_ns() - submit_ns;
                        }
                        None => {
                            warn!(entity ; "completion with no active command, index={index}");
                        }
                    }
                    done_tx.put(response)?.await;
                }
            });
        }

        let pcie_rx = take_option!(self.pcie_rx);
        let proc_tx = take_option!(self.proc_tx);
        let err_tx = take_option!(self.err_tx);

        loop {
            let request = pcie_rx.get()?.await.unwrap_origin();
            self.stats.borrow_mut().total_commands += 1;

            // Validate the LBA range
            if request.address() > self.config.max_lba {
                self.stats.borrow_mut().error_commands += 1;
                model_error!(self.entity, self.error_log, ErrorKind::AddressOutOfBounds ;
                    "LBA 0x{:x} out of range", request.address());
                // Error completion straight back to the host
                err_tx.put(request)?.await;
                continue;
            }

            let index = request.attribute("index") as u32;
            self.active_commands
                .borrow_mut()
                .insert(index, self.clock.time_now_ns());
            {
                let mut stats = self.stats.borrow_mut();
                stats.total_bytes_transferred += request.payload_bytes() as u64;
            }
            trace!(self.entity ; "dispatch {}", request);

            proc_tx.put(request)?.await;
        }
    }
}

/// Full device configuration.
#[derive(Clone, Debug, Default)]
pub struct SsdTopConfig {
    pub controller: SsdControllerConfig,
    pub cache: CacheConfig,
    pub dram: DramConfig,
    pub flash: FlashConfig,
    pub nand: NandConfig,
}

/// Aggregate device statistics snapshot.
#[derive(Clone, Debug)]
pub struct SsdStatistics {
    pub controller: SsdControllerStats,
    pub cache: CacheStats,
    pub dram: DramStats,
    pub flash: FlashStats,
    pub nand: Vec<NandStats>,
}

/// The assembled SSD.
///
/// ```text
///  pcie_rx -> controller -> cache -> dram -> flash controller -> NAND[ch]
///  pcie_tx <- controller <- cache <- dram <- flash controller <-
/// ```
#[derive(EntityDisplay, Runnable)]
pub struct SsdTop {
    pub entity: Arc<Entity>,
    controller: Rc<SsdController>,
    cache: Rc<L1Cache>,
    dram: Rc<DramController>,
    flash: Rc<FlashController>,
    nand: Vec<Rc<NandFlash>>,
}

impl SsdTop {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: SsdTopConfig,
        error_log: ErrorLog,
    ) -> Result<Rc<Self>, SimError> {
        // The controller maps dies onto NAND planes
        if config.flash.dies_per_channel as usize > config.nand.num_planes {
            return ssd_engine::sim_error!(format!(
                "{name}: dies_per_channel exceeds the NAND plane count"
            ));
        }
        if config.flash.blocks_per_die as usize > config.nand.blocks_per_plane {
            return ssd_engine::sim_error!(format!(
                "{name}: blocks_per_die exceeds the NAND blocks per plane"
            ));
        }

        let entity = Arc::new(Entity::new(parent, name));

        let controller = SsdController::new_and_register(
            engine,
            clock,
            &entity,
            "controller",
            config.controller,
            error_log.clone(),
        )?;
        let cache = L1Cache::new_and_register(engine, clock, &entity, "l1_cache", config.cache)?;
        let dram = DramController::new_and_register(engine, clock, &entity, "dram", config.dram)?;
        let flash =
            FlashController::new_and_register(engine, clock, &entity, "flash_ctrl", config.flash.clone())?;

        let mut nand = Vec::new();
        for channel in 0..config.flash.num_channels {
            let mut nand_config = config.nand.clone();
            nand_config.seed = config.nand.seed ^ channel as u64;
            let device = NandFlash::new_and_register(
                engine,
                clock,
                &entity,
                format!("nand_ch{channel}").as_str(),
                nand_config,
                error_log.clone(),
            )?;
            flash.connect_port_flash_tx_i(channel as usize, device.port_rx())?;
            connect_port!(device, release_tx => flash, flash_rx, channel as usize)?;
            nand.push(device);
        }

        connect_port!(controller, storage_tx => cache, cpu_rx)?;
        connect_port!(cache, cpu_tx => controller, storage_rx)?;
        connect_port!(cache, mem_tx => dram, mem_rx)?;
        connect_port!(dram, mem_tx => cache, mem_rx)?;
        connect_port!(dram, flash_tx => flash, rx)?;
        connect_port!(flash, tx => dram, flash_rx)?;

        let rc_self = Rc::new(Self {
            entity,
            controller,
            cache,
            dram,
            flash,
            nand,
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    /// Requests from the host-side link enter here.
    pub fn port_pcie_rx(&self) -> PortStateResult<Packet> {
        self.controller.port_pcie_rx()
    }

    /// Completions towards the host-side link.
    pub fn connect_port_pcie_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        self.controller.connect_port_pcie_tx(port_state)
    }

    #[must_use]
    pub fn cache(&self) -> &Rc<L1Cache> {
        &self.cache
    }

    #[must_use]
    pub fn dram(&self) -> &Rc<DramController> {
        &self.dram
    }

    #[must_use]
    pub fn flash(&self) -> &Rc<FlashController> {
        &self.flash
    }

    #[must_use]
    pub fn nand(&self, channel: usize) -> &Rc<NandFlash> {
        &self.nand[channel]
    }

    /// Aggregate statistics after a run.
    #[must_use]
    pub fn statistics(&self) -> SsdStatistics {
        SsdStatistics {
            controller: self.controller.stats(),
            cache: self.cache.stats(),
            dram: self.dram.stats(),
            flash: self.flash.stats(),
            nand: self.nand.iter().map(|device| device.stats()).collect(),
        }
    }
}
