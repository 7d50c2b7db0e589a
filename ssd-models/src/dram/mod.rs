// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Multi-standard DRAM controller (DDR4/DDR5/LPDDR5).
//!
//! Every bank runs the FSM
//! `IDLE -> ACTIVATING -> ACTIVE -> READING/WRITING -> ACTIVE ->
//! PRECHARGING -> IDLE` with the JEDEC timing constraints of the configured
//! speed grade; a refresh task drives banks through `REFRESHING` under one
//! of five schemes. Timing is the ordering mechanism: the controller task
//! serialises commands to a bank purely by waiting out its state and
//! constraint windows.
//!
//! Requests arrive from the cache on `mem_rx`, are charged their DRAM
//! service time and forwarded downstream on `flash_tx`; completions from
//! the flash layer return upstream through `flash_rx` to `mem_tx`.
//!
//! # Ports
//!
//!  - Two [input ports](ssd_engine::port::InPort): `mem_rx`, `flash_rx`
//!  - Two [output ports](ssd_engine::port::OutPort): `mem_tx`, `flash_tx`

pub mod timing;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use async_trait::async_trait;
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

use crate::packet::Packet;
pub use timing::{DramTiming, MemoryType, RefreshScheme, SpeedGrade};

/// Marker for "no open row".
const NO_ROW: u32 = 0xFFFF_FFFF;

/// DRAM bank state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum BankState {
    #[default]
    Idle,
    Activating,
    Active,
    Reading,
    Writing,
    Precharging,
    Refreshing,
}

/// One DRAM bank.
#[derive(Clone, Debug)]
pub struct DramBank {
    pub state: BankState,
    pub active_row: u32,
    pub bank_group_id: u32,
    pub bank_id: u32,
    pub last_activate_tick: u64,
    pub last_precharge_tick: u64,
    pub last_read_tick: u64,
    pub last_write_tick: u64,
}

impl DramBank {
    fn new(bank_group_id: u32, bank_id: u32) -> Self {
        Self {
            state: BankState::Idle,
            active_row: NO_ROW,
            bank_group_id,
            bank_id,
            last_activate_tick: 0,
            last_precharge_tick: 0,
            last_read_tick: 0,
            last_write_tick: 0,
        }
    }
}

/// DRAM controller statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct DramStats {
    pub total_requests: u64,
    pub read_requests: u64,
    pub write_requests: u64,
    pub row_hits: u64,
    pub row_misses: u64,
    pub page_empty_hits: u64,
    pub refresh_cycles: u64,
    pub bank_conflicts: u64,
    pub total_read_latency_ticks: u64,
    pub total_write_latency_ticks: u64,

    pub all_bank_refreshes: u64,
    pub same_bank_refreshes: u64,
    pub per_bank_refreshes: u64,
    pub distributed_refreshes: u64,
    pub total_refresh_latency_ticks: u64,
    /// Commands or refreshes delayed by each other.
    pub refresh_conflicts: u64,
}

impl DramStats {
    #[must_use]
    pub fn row_hit_rate(&self) -> f64 {
        if self.total_requests > 0 {
            self.row_hits as f64 / self.total_requests as f64
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn avg_read_latency_ns(&self) -> f64 {
        if self.read_requests > 0 {
            self.total_read_latency_ticks as f64 / self.read_requests as f64 / 1000.0
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn avg_write_latency_ns(&self) -> f64 {
        if self.write_requests > 0 {
            self.total_write_latency_ticks as f64 / self.write_requests as f64 / 1000.0
        } else {
            0.0
        }
    }
}

/// DRAM controller configuration.
#[derive(Clone, Debug)]
pub struct DramConfig {
    pub memory_type: MemoryType,
    pub speed_grade: SpeedGrade,
    pub num_banks: u32,
    pub num_bank_groups: u32,
    pub num_ranks: u32,
    /// DRAM page size in bytes.
    pub page_size: u32,
    pub burst_length: u32,
    /// Precharge automatically after each access.
    pub auto_precharge: bool,
    pub refresh_enable: bool,
    /// Override the preset's refresh scheme.
    pub refresh_scheme: Option<RefreshScheme>,
    /// Override the preset timing record entirely.
    pub timing_override: Option<DramTiming>,
}

impl Default for DramConfig {
    fn default() -> Self {
        Self {
            memory_type: MemoryType::Ddr4,
            speed_grade: SpeedGrade::Ddr4_3200,
            num_banks: 8,
            num_bank_groups: 1,
            num_ranks: 1,
            page_size: 1024,
            burst_length: 8,
            auto_precharge: true,
            refresh_enable: true,
            refresh_scheme: None,
            timing_override: None,
        }
    }
}

/// Shared controller state: banks, stats and the timing helpers, usable from
/// both the command task and the refresh task.
struct DramCore {
    entity: Arc<Entity>,
    clock: Clock,
    timing: DramTiming,
    memory_type: MemoryType,
    num_banks: u32,
    num_bank_groups: u32,
    auto_precharge: bool,

    bank_bits: u32,
    col_bits: u32,

    banks: RefCell<Vec<DramBank>>,
    stats: RefCell<DramStats>,

    /// Last CAS issue: (tick, bank group) for tCCDS/tCCDL spacing.
    last_cas: RefCell<Option<(u64, u32)>>,
    /// Last ACTIVATE issue: (tick, bank group) for tRRDS/tRRDL spacing.
    last_ras: RefCell<Option<(u64, u32)>>,
}

impl DramCore {
    fn now(&self) -> u64 {
        self.clock.tick_now().tick()
    }

    fn total_banks(&self) -> u32 {
        self.num_banks * self.num_bank_groups
    }

    fn has_bank_groups(&self) -> bool {
        matches!(self.memory_type, MemoryType::Ddr5 | MemoryType::Lpddr5)
            && self.num_bank_groups > 1
    }

    /// Simple interleaved decode: bank bits sit above the 6-bit line offset,
    /// the column above those, the row in the remaining high bits.
    fn decode(&self, address: u32) -> (usize, u32, u32) {
        let bank = ((address >> 6) & (self.total_banks() - 1)) as usize;
        let col = (address >> (6 + self.bank_bits)) & ((1 << self.col_bits) - 1);
        let row = address >> (6 + self.bank_bits + self.col_bits);
        (bank, row, col)
    }

    fn bank_group_of(&self, bank_index: usize) -> u32 {
        self.banks.borrow()[bank_index].bank_group_id
    }

    /// Wait until the bank-group-dependent spacing since the last event of
    /// the same kind has elapsed, then record this one.
    async fn wait_spacing(
        &self,
        last: &RefCell<Option<(u64, u32)>>,
        group: u32,
        same_group_ticks: u64,
        cross_group_ticks: u64,
    ) {
        if !self.has_bank_groups() {
            return;
        }
        let wait = match *last.borrow() {
            Some((tick, last_group)) => {
                let spacing = if last_group == group {
                    same_group_ticks
                } else {
                    cross_group_ticks
                };
                (tick + spacing).saturating_sub(self.now())
            }
            None => 0,
        };
        if wait > 0 {
            self.clock.wait_ticks(wait).await;
        }
        *last.borrow_mut() = Some((self.now(), group));
    }

    /// ACTIVATE: honour tRP since the last precharge (and tRRD spacing),
    /// then open the row after tRCD.
    async fn activate_row(&self, bank_index: usize, row: u32) {
        let wait = {
            let banks = self.banks.borrow();
            (banks[bank_index].last_precharge_tick + self.timing.t_rp).saturating_sub(self.now())
        };
        if wait > 0 {
            self.clock.wait_ticks(wait).await;
        }

        let group = self.bank_group_of(bank_index);
        self.wait_spacing(&self.last_ras, group, self.timing.t_rrd_s, self.timing.t_rrd_l)
            .await;

        {
            let mut banks = self.banks.borrow_mut();
            let bank = &mut banks[bank_index];
            bank.state = BankState::Activating;
            bank.active_row = row;
            bank.last_activate_tick = self.now();
        }

        self.clock.wait_ticks(self.timing.t_rcd).await;
        self.banks.borrow_mut()[bank_index].state = BankState::Active;
        trace!(self.entity ; "activated row {row} in bank {bank_index}");
    }

    /// PRECHARGE: honour tRAS since the activate, then close the row after
    /// tRP.
    async fn precharge_bank(&self, bank_index: usize) {
        let wait = {
            let banks = self.banks.borrow();
            (banks[bank_index].last_activate_tick + self.timing.t_ras).saturating_sub(self.now())
        };
        if wait > 0 {
            self.clock.wait_ticks(wait).await;
        }

        self.banks.borrow_mut()[bank_index].state = BankState::Precharging;
        self.clock.wait_ticks(self.timing.t_rp).await;

        let mut banks = self.banks.borrow_mut();
        let bank = &mut banks[bank_index];
        bank.state = BankState::Idle;
        bank.last_precharge_tick = self.now();
        bank.active_row = NO_ROW;
    }

    async fn perform_read(&self, bank_index: usize) {
        let group = self.bank_group_of(bank_index);
        self.wait_spacing(&self.last_cas, group, self.timing.t_ccd_s, self.timing.t_ccd_l)
            .await;

        {
            let mut banks = self.banks.borrow_mut();
            banks[bank_index].state = BankState::Reading;
            banks[bank_index].last_read_tick = self.now();
        }
        self.clock
            .wait_ticks(self.timing.t_cl + self.timing.t_burst)
            .await;
        self.banks.borrow_mut()[bank_index].state = BankState::Active;
    }

    async fn perform_write(&self, bank_index: usize) {
        let group = self.bank_group_of(bank_index);
        self.wait_spacing(&self.last_cas, group, self.timing.t_ccd_s, self.timing.t_ccd_l)
            .await;

        {
            let mut banks = self.banks.borrow_mut();
            banks[bank_index].state = BankState::Writing;
            banks[bank_index].last_write_tick = self.now();
        }
        self.clock.wait_ticks(self.timing.t_burst).await;
        self.banks.borrow_mut()[bank_index].state = BankState::Active;
    }

    async fn process_request(&self, address: u32, command: AccessType) {
        let (bank_index, row, col) = self.decode(address);

        // Wait out a busy bank in tBurst steps
        let busy = {
            let state = self.banks.borrow()[bank_index].state;
            state != BankState::Idle && state != BankState::Active
        };
        if busy {
            self.stats.borrow_mut().bank_conflicts += 1;
            loop {
                self.clock.wait_ticks(self.timing.t_burst).await;
                let state = self.banks.borrow()[bank_index].state;
                if state == BankState::Idle || state == BankState::Active {
                    break;
                }
            }
        }

        let (state, active_row) = {
            let banks = self.banks.borrow();
            (banks[bank_index].state, banks[bank_index].active_row)
        };
        match state {
            BankState::Idle => {
                self.activate_row(bank_index, row).await;
                self.stats.borrow_mut().page_empty_hits += 1;
            }
            BankState::Active if active_row == row => {
                self.stats.borrow_mut().row_hits += 1;
            }
            _ => {
                self.precharge_bank(bank_index).await;
                self.activate_row(bank_index, row).await;
                self.stats.borrow_mut().row_misses += 1;
            }
        }

        match command {
            AccessType::Read => self.perform_read(bank_index).await,
            AccessType::Write => self.perform_write(bank_index).await,
        }
        trace!(self.entity ; "{command} bank {bank_index} row {row} col {col}");

        if self.auto_precharge {
            self.precharge_bank(bank_index).await;
        }
    }

    // Refresh schemes

    fn refresh_interval_ticks(&self, scheme: RefreshScheme) -> u64 {
        match scheme {
            RefreshScheme::AllBank => self.timing.t_refi,
            RefreshScheme::SameBank => self.timing.t_refi / self.num_bank_groups as u64,
            RefreshScheme::PerBank | RefreshScheme::Distributed => self.timing.t_refi_pb,
            // Adaptive hybrid interval
            RefreshScheme::RefreshManagementUnit => self.timing.t_refi / 2,
        }
    }

    async fn perform_all_bank_refresh(&self) {
        let conflict = self
            .banks
            .borrow()
            .iter()
            .any(|bank| bank.state != BankState::Idle && bank.state != BankState::Refreshing);
        if conflict {
            self.stats.borrow_mut().refresh_conflicts += 1;
            // Stall, then force
            self.clock.wait_ticks(self.timing.t_burst * 2).await;
        }

        let start = self.now();
        let num_banks = self.banks.borrow().len();
        for bank_index in 0..num_banks {
            if self.banks.borrow()[bank_index].state == BankState::Active {
                self.precharge_bank(bank_index).await;
            }
            self.banks.borrow_mut()[bank_index].state = BankState::Refreshing;
        }

        self.clock.wait_ticks(self.timing.t_rfc_ab).await;

        for bank in self.banks.borrow_mut().iter_mut() {
            bank.state = BankState::Idle;
        }

        let mut stats = self.stats.borrow_mut();
        stats.all_bank_refreshes += 1;
        stats.total_refresh_latency_ticks += self.now() - start;
    }

    async fn perform_same_bank_refresh(&self, bank_group_id: u32) {
        if !self.has_bank_groups() || bank_group_id >= self.num_bank_groups {
            // DDR4 fallback
            self.perform_all_bank_refresh().await;
            return;
        }

        let start = self.now();
        let first = (bank_group_id * self.num_banks) as usize;
        let last = first + self.num_banks as usize;

        for bank_index in first..last {
            if self.banks.borrow()[bank_index].state == BankState::Active {
                self.precharge_bank(bank_index).await;
            }
            self.banks.borrow_mut()[bank_index].state = BankState::Refreshing;
        }

        self.clock.wait_ticks(self.timing.t_rfc_sb).await;

        for bank_index in first..last {
            self.banks.borrow_mut()[bank_index].state = BankState::Idle;
        }

        let mut stats = self.stats.borrow_mut();
        stats.same_bank_refreshes += 1;
        stats.total_refresh_latency_ticks += self.now() - start;
    }

    async fn perform_per_bank_refresh(&self, bank_index: usize) {
        if bank_index >= self.banks.borrow().len() {
            return;
        }

        let start = self.now();
        let state = self.banks.borrow()[bank_index].state;
        match state {
            BankState::Idle => {}
            BankState::Active => self.precharge_bank(bank_index).await,
            _ => {
                self.stats.borrow_mut().refresh_conflicts += 1;
                self.clock.wait_ticks(self.timing.t_burst).await;
            }
        }

        self.banks.borrow_mut()[bank_index].state = BankState::Refreshing;
        self.clock.wait_ticks(self.timing.t_rfc_pb).await;
        self.banks.borrow_mut()[bank_index].state = BankState::Idle;

        let mut stats = self.stats.borrow_mut();
        stats.per_bank_refreshes += 1;
        stats.total_refresh_latency_ticks += self.now() - start;
    }

    async fn perform_distributed_refresh(&self, bank_index: usize) {
        self.perform_per_bank_refresh(bank_index).await;
        self.stats.borrow_mut().distributed_refreshes += 1;

        // Spread the refresh load
        if self.timing.refresh_granularity > 8192 {
            self.clock.wait_ticks(self.timing.t_refi_pb / 4).await;
        }
    }

    async fn perform_rmu_refresh(&self, refresh_counter: u64) {
        if refresh_counter % 4 == 0 {
            self.perform_all_bank_refresh().await;
        } else {
            let target = (refresh_counter % self.total_banks() as u64) as usize;
            self.perform_per_bank_refresh(target).await;
        }
    }
}

#[derive(EntityDisplay)]
pub struct DramController {
    pub entity: Arc<Entity>,
    spawner: Spawner,
    core: Rc<DramCore>,
    refresh_enable: bool,
    refresh_scheme: RefreshScheme,

    mem_rx: RefCell<Option<InPort<Packet>>>,
    mem_tx: RefCell<Option<OutPort<Packet>>>,
    flash_tx: RefCell<Option<OutPort<Packet>>>,
    flash_rx: RefCell<Option<InPort<Packet>>>,
}

impl DramController {
    pub fn new_and_register(
        engine: &Engine,
        clock: &Clock,
        parent: &Arc<Entity>,
        name: &str,
        config: DramConfig,
    ) -> Result<Rc<Self>, SimError> {
        if !config.num_banks.is_power_of_two()
            || !config.num_bank_groups.is_power_of_two()
            || !config.page_size.is_power_of_two()
            || config.page_size < 64
        {
            return ssd_engine::sim_error!(format!(
                "{name}: banks, bank groups and page size must be powers of two (page >= 64)"
            ));
        }

        let mut timing = match &config.timing_override {
            Some(timing) => timing.clone(),
            None => DramTiming::create(config.memory_type, config.speed_grade),
        };
        if let Some(scheme) = config.refresh_scheme {
            timing.refresh_scheme = scheme;
        }
        let refresh_scheme = timing.refresh_scheme;

        let entity = Arc::new(Entity::new(parent, name));
        let mem_rx = InPort::new(&entity, "mem_rx");
        let mem_tx = OutPort::new(&entity, "mem_tx");
        let flash_tx = OutPort::new(&entity, "flash_tx");
        let flash_rx = InPort::new(&entity, "flash_rx");

        // Banks are laid out rank-major, then group-major
        let mut banks = Vec::new();
        for _rank in 0..config.num_ranks {
            for bank_group in 0..config.num_bank_groups {
                for bank in 0..config.num_banks {
                    banks.push(DramBank::new(bank_group, bank));
                }
            }
        }

        let total_banks = config.num_banks * config.num_bank_groups;
        let page_cols = config.page_size / 64;
        let core = Rc::new(DramCore {
            entity: entity.clone(),
            clock: clock.clone(),
            timing,
            memory_type: config.memory_type,
            num_banks: config.num_banks,
            num_bank_groups: config.num_bank_groups,
            auto_precharge: config.auto_precharge,
            bank_bits: total_banks.trailing_zeros(),
            col_bits: page_cols.trailing_zeros(),
            banks: RefCell::new(banks),
            stats: RefCell::new(DramStats::default()),
            last_cas: RefCell::new(None),
            last_ras: RefCell::new(None),
        });

        let rc_self = Rc::new(Self {
            entity,
            spawner: engine.spawner(),
            core,
            refresh_enable: config.refresh_enable,
            refresh_scheme,
            mem_rx: RefCell::new(Some(mem_rx)),
            mem_tx: RefCell::new(Some(mem_tx)),
            flash_tx: RefCell::new(Some(flash_tx)),
            flash_rx: RefCell::new(Some(flash_rx)),
        });
        engine.register(rc_self.clone());
        Ok(rc_self)
    }

    pub fn connect_port_mem_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.mem_tx, connect ; port_state)
    }

    pub fn connect_port_flash_tx(&self, port_state: PortStateResult<Packet>) -> SimResult {
        connect_tx!(self.flash_tx, connect ; port_state)
    }

    pub fn port_mem_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.mem_rx, state)
    }

    pub fn port_flash_rx(&self) -> PortStateResult<Packet> {
        port_rx!(self.flash_rx, state)
    }

    #[must_use]
    pub fn stats(&self) -> DramStats {
        *self.core.stats.borrow()
    }

    /// The state a bank is currently in.
    #[must_use]
    pub fn bank_state(&self, bank_index: usize) -> BankState {
        self.core.banks.borrow()[bank_index].state
    }

    /// Expose the (bank, row, column) decode for testing.
    #[must_use]
    pub fn decode(&self, address: u32) -> (usize, u32, u32) {
        self.core.decode(address)
    }
}

#[async_trait(?Send)]
impl Runnable for DramController {
    async fn run(&self) -> SimResult {
        // Refresh scheduler
        if self.refresh_enable {
            let core = self.core.clone();
            let scheme = self.refresh_scheme;
            self.spawner.spawn(async move {
                let mut refresh_counter: u64 = 0;
                let mut distributed_index: usize = 0;
                loop {
                    let interval = core.refresh_interval_ticks(scheme);
                    core.clock.wait_ticks_or_exit(interval).await;

                    match scheme {
                        RefreshScheme::AllBank => core.perform_all_bank_refresh().await,
                        RefreshScheme::SameBank => {
                            let group = (refresh_counter % core.num_bank_groups as u64) as u32;
                            core.perform_same_bank_refresh(group).await;
                        }
                        RefreshScheme::PerBank => {
                            let bank = (refresh_counter % core.total_banks() as u64) as usize;
                            core.perform_per_bank_refresh(bank).await;
                        }
                        RefreshScheme::Distributed => {
                            core.perform_distributed_refresh(distributed_index).await;
                            distributed_index =
                                (distributed_index + 1) % core.total_banks() as usize;
                        }
                        RefreshScheme::RefreshManagementUnit => {
                            core.perform_rmu_refresh(refresh_counter).await;
                        }
                    }

                    refresh_counter += 1;
                    core.stats.borrow_mut().refresh_cycles += 1;
                }
            });
        }

        // Upstream completion path
        {
            let flash_rx = take_option!(self.flash_rx);
            let mem_tx = take_option!(self.mem_tx);
            self.spawner.spawn(async move {
                loop {
                    let response = flash_rx.get()?.await;
                    mem_tx.put(response)?.await;
                }
            });
        }

        let mem_rx = take_option!(self.mem_rx);
        let flash_tx = take_option!(self.flash_tx);
        let core = self.core.clone();

        loop {
            let request = mem_rx.get()?.await;
            let start = core.now();

            core.process_request(request.address(), request.command()).await;

            let latency = core.now() - start;
            {
                let mut stats = core.stats.borrow_mut();
                stats.total_requests += 1;
                match request.command() {
                    AccessType::Read => {
                        stats.read_requests += 1;
                        stats.total_read_latency_ticks += latency;
                    }
                    AccessType::Write => {
                        stats.write_requests += 1;
                        stats.total_write_latency_ticks += latency;
                    }
                }
            }

            flash_tx.put(request)?.await;
        }
    }
}
